//! The server dispatcher: a single task owns the socket, the booking store,
//! the request-history cache, and the monitor registry. They form one
//! consistency domain, so no request ever observes a partial update.

pub mod history;
pub mod loss;
pub mod monitor;
pub mod store;

use std::net::SocketAddr;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tracing::{debug, info, warn};

use crate::protocol::messages::{DecodeError, ErrorCode, Reply, Request, RequestOp};
use crate::protocol::{Semantics, MAX_DATAGRAM_SIZE};
use self::history::{HistoryCache, HISTORY_TTL};
use self::loss::LossModel;
use self::monitor::MonitorRegistry;
use self::store::{BookingStore, NotificationSet};

pub const DEFAULT_FACILITIES: [&str; 4] =
    ["Meeting Room A", "Lecture Theatre 1", "Conference Hall", "Seminar Room B"];

pub struct Server {
    socket: tokio::net::UdpSocket,
    semantics: Semantics,
    store: BookingStore,
    history: HistoryCache,
    monitors: MonitorRegistry,
    loss: LossModel,
}

impl Server {
    pub async fn bind(addr: SocketAddr, semantics: Semantics, loss: LossModel) -> anyhow::Result<Server> {
        let socket = tokio::net::UdpSocket::bind(addr).await?;
        let store = BookingStore::new(DEFAULT_FACILITIES);
        info!(
            addr = %socket.local_addr()?,
            %semantics,
            facilities = ?store.facility_names().collect::<Vec<_>>(),
            "facility booking server listening"
        );

        Ok(Server {
            socket,
            semantics,
            store,
            history: HistoryCache::new(HISTORY_TTL),
            monitors: MonitorRegistry::new(),
            loss,
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub async fn run(&mut self) -> anyhow::Result<()> {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        loop {
            let (len, peer) = self.socket.recv_from(&mut buf).await?;

            if self.loss.drop_request() {
                debug!(%peer, len, "simulated loss of incoming request");
                continue;
            }

            self.handle_datagram(&buf[..len], peer).await;
        }
    }

    async fn handle_datagram(&mut self, datagram: &[u8], peer: SocketAddr) {
        let request = match Request::deser(datagram) {
            Ok(request) => request,
            Err(DecodeError::UnknownOp(code)) => {
                debug!(%peer, code, "request with unknown operation code");
                let reply = error_reply(ErrorCode::UnknownOp, format!("unknown operation code {}", code));
                self.send_reply(&encode_reply(&reply), peer, "UNKNOWN_OP error").await;
                return;
            }
            Err(DecodeError::Malformed(e)) => {
                debug!(%peer, error = %e, "malformed request");
                let reply = error_reply(ErrorCode::Malformed, e.to_string());
                self.send_reply(&encode_reply(&reply), peer, "MALFORMED error").await;
                return;
            }
        };

        debug!(%peer, id = request.id, op = request.op.name(), "received request");

        // Registration is routed past the history cache: a retransmitted
        //  registration just appends a second, coexisting subscription.
        if let RequestOp::MonitorRegister { facility, duration_secs } = &request.op {
            self.handle_monitor_register(facility.clone(), *duration_secs, peer).await;
            return;
        }

        if self.semantics == Semantics::AtMostOnce {
            if let Some(cached) = self.history.lookup(peer, request.id) {
                debug!(%peer, id = request.id, "duplicate request, re-sending cached reply");
                self.send_reply(&cached, peer, "cached reply").await;
                return;
            }
        }

        let (reply, notifications) = self.execute(&request.op);
        let reply_bytes = encode_reply(&reply);

        if self.semantics == Semantics::AtMostOnce {
            self.history.insert(peer, request.id, reply_bytes.clone());
        }

        self.send_reply(&reply_bytes, peer, "reply").await;

        for facility in notifications {
            self.fan_out(&facility).await;
        }
    }

    fn execute(&mut self, op: &RequestOp) -> (Reply, NotificationSet) {
        let result = match op {
            RequestOp::Query { facility, days } => {
                self.store.query(facility, days).map(|free| (Reply::Availability(free), Vec::new()))
            }
            RequestOp::Book { facility, start, end } => {
                self.store.book(facility, *start, *end).map(|(confirmation_id, notified)| {
                    (Reply::Booked { confirmation_id }, notified)
                })
            }
            RequestOp::Change { confirmation_id, offset_minutes } => self
                .store
                .change(confirmation_id, *offset_minutes)
                .map(|notified| (Reply::Changed, notified)),
            RequestOp::Extend { confirmation_id, extra_minutes } => self
                .store
                .extend(confirmation_id, *extra_minutes)
                .map(|notified| (Reply::Extended, notified)),
            RequestOp::Cancel { confirmation_id } => {
                self.store.cancel(confirmation_id).map(|notified| (Reply::Cancelled, notified))
            }
            RequestOp::MonitorRegister { .. } => {
                // routed before the history cache; never reaches here
                return (
                    error_reply(ErrorCode::Internal, "monitor registration mis-routed".to_string()),
                    Vec::new(),
                );
            }
        };

        match result {
            Ok((reply, notifications)) => (reply, notifications),
            Err(e) => {
                debug!(error = %e, "request failed");
                (error_reply(e.code(), e.to_string()), Vec::new())
            }
        }
    }

    async fn handle_monitor_register(&mut self, facility: String, duration_secs: u32, peer: SocketAddr) {
        if !self.store.has_facility(&facility) {
            let reply = error_reply(ErrorCode::NotFound, format!("facility '{}' not found", facility));
            self.send_reply(&encode_reply(&reply), peer, "NOT_FOUND error").await;
            return;
        }

        self.monitors.register(&facility, peer, Duration::from_secs(duration_secs as u64));
        info!(%peer, %facility, duration_secs, "registered monitor");
        self.send_reply(&encode_reply(&Reply::MonitorRegistered), peer, "monitor ack").await;

        // the subscriber starts from a full snapshot rather than waiting for
        //  the first change
        if let Ok(free) = self.store.week_view(&facility) {
            let update = Reply::MonitorUpdate { facility, free };
            self.send_callback(&encode_reply(&update), peer).await;
        }
    }

    /// Recomputes the facility's week view and pushes it to every active
    /// subscriber, synchronously within the current request's handling.
    async fn fan_out(&mut self, facility: &str) {
        let free = match self.store.week_view(facility) {
            Ok(free) => free,
            Err(e) => {
                warn!(facility, error = %e, "cannot compute week view for fan-out");
                return;
            }
        };

        let endpoints = self.monitors.active_endpoints(facility);
        if endpoints.is_empty() {
            return;
        }
        let update = Reply::MonitorUpdate { facility: facility.to_string(), free };
        let update_bytes = encode_reply(&update);

        for endpoint in endpoints {
            if !self.send_callback(&update_bytes, endpoint).await {
                self.monitors.remove(facility, endpoint);
            }
        }
    }

    /// Loss-simulated reply transmission. Transport errors on replies are
    /// logged and otherwise ignored; the client's retry covers them.
    async fn send_reply(&mut self, bytes: &[u8], to: SocketAddr, what: &str) {
        if self.loss.drop_reply() {
            debug!(%to, what, "simulated loss of outgoing datagram");
            return;
        }
        match self.socket.send_to(bytes, to).await {
            Ok(_) => debug!(%to, what, len = bytes.len(), "sent"),
            Err(e) => warn!(%to, what, error = %e, "error sending reply"),
        }
    }

    /// Callbacks count as server-originated datagrams for loss simulation.
    /// Returns false on a transport error so the caller can drop the
    /// subscription; a simulated drop is not a transport error.
    async fn send_callback(&mut self, bytes: &[u8], to: SocketAddr) -> bool {
        if self.loss.drop_reply() {
            debug!(%to, "simulated loss of monitor update");
            return true;
        }
        match self.socket.send_to(bytes, to).await {
            Ok(_) => {
                debug!(%to, len = bytes.len(), "sent monitor update");
                true
            }
            Err(e) => {
                warn!(%to, error = %e, "error sending monitor update, dropping subscription");
                false
            }
        }
    }
}

fn encode_reply(reply: &Reply) -> Bytes {
    let mut buf = BytesMut::new();
    reply.ser(&mut buf);
    buf.freeze()
}

fn error_reply(code: ErrorCode, detail: String) -> Reply {
    Reply::Error { code, detail }
}
