//! The client side of the invocation protocol: bounded retransmission with a
//! stable request id, reply demultiplexing, and the monitor receive loop.

pub mod menu;

use std::net::SocketAddr;
use std::time::Duration;

use bytes::BytesMut;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::time::{timeout, Instant};
use tracing::{debug, info};

use crate::protocol::messages::{ErrorCode, Reply, Request, RequestOp};
use crate::protocol::time::{FreeInterval, WeekTime};
use crate::protocol::{Semantics, MAX_DATAGRAM_SIZE};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("no reply after {attempts} attempts")]
    Timeout { attempts: u32 },
    #[error("server error {code:?}: {detail}")]
    Server { code: ErrorCode, detail: String },
    #[error("reply did not match the request")]
    UnexpectedReply,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server: SocketAddr,
    pub semantics: Semantics,
    pub timeout: Duration,
    pub max_attempts: u32,
}

impl ClientConfig {
    pub fn new(server: SocketAddr, semantics: Semantics) -> ClientConfig {
        ClientConfig {
            server,
            semantics,
            timeout: DEFAULT_TIMEOUT,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

pub struct BookingClient {
    socket: UdpSocket,
    config: ClientConfig,
    next_request_id: u32,
}

impl BookingClient {
    pub async fn connect(config: ClientConfig) -> anyhow::Result<BookingClient> {
        let bind_addr: SocketAddr = if config.server.is_ipv4() {
            "0.0.0.0:0".parse()?
        } else {
            "[::]:0".parse()?
        };
        let socket = UdpSocket::bind(bind_addr).await?;
        socket.connect(config.server).await?;
        info!(server = %config.server, semantics = %config.semantics, "client ready");

        Ok(BookingClient {
            socket,
            config,
            next_request_id: 1,
        })
    }

    pub fn semantics(&self) -> Semantics {
        self.config.semantics
    }

    fn alloc_request_id(&mut self) -> u32 {
        let id = self.next_request_id;
        self.next_request_id = id.wrapping_add(1);
        id
    }

    /// One remote invocation: send, wait for a reply matching the request's
    /// operation code (or ERROR), retransmit the identical datagram with the
    /// same request id on timeout. Both semantics retransmit; at-most-once
    /// relies on the unchanged id to hit the server's history cache.
    pub async fn invoke(&mut self, op: RequestOp) -> Result<Reply, ClientError> {
        let request = Request { id: self.alloc_request_id(), op };
        let expected_code = request.op.code();
        let mut buf = BytesMut::new();
        request.ser(&mut buf);
        let datagram = buf.freeze();

        let mut recv_buf = vec![0u8; MAX_DATAGRAM_SIZE];
        for attempt in 1..=self.config.max_attempts {
            debug!(id = request.id, op = request.op.name(), attempt, "sending request");
            self.socket.send(&datagram).await?;

            let deadline = Instant::now() + self.config.timeout;
            if let Some(reply) = self.await_reply(expected_code, deadline, &mut recv_buf).await? {
                return match reply {
                    Reply::Error { code, detail } => Err(ClientError::Server { code, detail }),
                    reply => Ok(reply),
                };
            }
            debug!(id = request.id, attempt, "timed out waiting for reply");
        }

        Err(ClientError::Timeout { attempts: self.config.max_attempts })
    }

    /// Waits until `deadline` for a datagram carrying `expected_code` or an
    /// ERROR. Anything else (stray replies from earlier attempts, monitor
    /// updates) is discarded without extending the deadline.
    async fn await_reply(
        &mut self,
        expected_code: u8,
        deadline: Instant,
        recv_buf: &mut [u8],
    ) -> Result<Option<Reply>, ClientError> {
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            let len = match timeout(remaining, self.socket.recv(recv_buf)).await {
                Err(_elapsed) => return Ok(None),
                Ok(received) => received?,
            };
            match Reply::deser(&recv_buf[..len]) {
                Ok(reply) if reply.code() == expected_code || matches!(reply, Reply::Error { .. }) => {
                    return Ok(Some(reply));
                }
                Ok(reply) => {
                    debug!(code = reply.code(), "discarding unexpected datagram");
                }
                Err(e) => {
                    debug!(error = %e, "discarding undecodable datagram");
                }
            }
        }
    }

    pub async fn query(&mut self, facility: &str, days: Vec<u8>) -> Result<Vec<FreeInterval>, ClientError> {
        match self.invoke(RequestOp::Query { facility: facility.to_string(), days }).await? {
            Reply::Availability(free) => Ok(free),
            _ => Err(ClientError::UnexpectedReply),
        }
    }

    pub async fn book(&mut self, facility: &str, start: WeekTime, end: WeekTime) -> Result<String, ClientError> {
        let op = RequestOp::Book { facility: facility.to_string(), start, end };
        match self.invoke(op).await? {
            Reply::Booked { confirmation_id } => Ok(confirmation_id),
            _ => Err(ClientError::UnexpectedReply),
        }
    }

    pub async fn change(&mut self, confirmation_id: &str, offset_minutes: i32) -> Result<(), ClientError> {
        let op = RequestOp::Change { confirmation_id: confirmation_id.to_string(), offset_minutes };
        match self.invoke(op).await? {
            Reply::Changed => Ok(()),
            _ => Err(ClientError::UnexpectedReply),
        }
    }

    pub async fn extend(&mut self, confirmation_id: &str, extra_minutes: u32) -> Result<(), ClientError> {
        let op = RequestOp::Extend { confirmation_id: confirmation_id.to_string(), extra_minutes };
        match self.invoke(op).await? {
            Reply::Extended => Ok(()),
            _ => Err(ClientError::UnexpectedReply),
        }
    }

    pub async fn cancel(&mut self, confirmation_id: &str) -> Result<(), ClientError> {
        let op = RequestOp::Cancel { confirmation_id: confirmation_id.to_string() };
        match self.invoke(op).await? {
            Reply::Cancelled => Ok(()),
            _ => Err(ClientError::UnexpectedReply),
        }
    }

    /// Registers for callbacks, then blocks in a receive loop for the whole
    /// registration window, surfacing every update for the facility through
    /// `on_update`. No retransmission happens in this mode; a lost callback
    /// is simply never seen.
    pub async fn monitor(
        &mut self,
        facility: &str,
        duration_secs: u32,
        mut on_update: impl FnMut(&[FreeInterval]),
    ) -> Result<(), ClientError> {
        let op = RequestOp::MonitorRegister {
            facility: facility.to_string(),
            duration_secs,
        };
        match self.invoke(op).await? {
            Reply::MonitorRegistered => {}
            _ => return Err(ClientError::UnexpectedReply),
        }
        info!(facility, duration_secs, "monitoring");

        let deadline = Instant::now() + Duration::from_secs(duration_secs as u64);
        let mut recv_buf = vec![0u8; MAX_DATAGRAM_SIZE];
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(());
            }
            let len = match timeout(remaining, self.socket.recv(&mut recv_buf)).await {
                Err(_elapsed) => return Ok(()),
                Ok(received) => received?,
            };
            match Reply::deser(&recv_buf[..len]) {
                Ok(Reply::MonitorUpdate { facility: updated, free }) if updated == facility => {
                    debug!(facility, intervals = free.len(), "monitor update");
                    on_update(&free);
                }
                Ok(_) => debug!("discarding datagram while monitoring"),
                Err(e) => debug!(error = %e, "discarding undecodable datagram"),
            }
        }
    }
}
