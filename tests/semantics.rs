//! End-to-end scenarios over loopback UDP: the observable differences
//! between at-least-once and at-most-once under duplication and loss, and
//! the monitor callback path.

use std::net::SocketAddr;
use std::time::Duration;

use bytes::BytesMut;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::timeout;

use facility_booking::client::{BookingClient, ClientConfig, ClientError};
use facility_booking::protocol::messages::{ErrorCode, Reply, Request, RequestOp};
use facility_booking::protocol::time::{FreeInterval, WeekTime};
use facility_booking::protocol::Semantics;
use facility_booking::server::loss::LossModel;
use facility_booking::server::Server;

async fn spawn_server(semantics: Semantics, loss: LossModel) -> SocketAddr {
    let mut server = Server::bind("127.0.0.1:0".parse().unwrap(), semantics, loss)
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(async move { server.run().await });
    addr
}

async fn raw_socket(server: SocketAddr) -> UdpSocket {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    socket.connect(server).await.unwrap();
    socket
}

fn encode_request(id: u32, op: RequestOp) -> Vec<u8> {
    let mut buf = BytesMut::new();
    Request { id, op }.ser(&mut buf);
    buf.to_vec()
}

async fn exchange_raw(socket: &UdpSocket, datagram: &[u8]) -> Vec<u8> {
    socket.send(datagram).await.unwrap();
    let mut buf = vec![0u8; 2048];
    let len = timeout(Duration::from_secs(2), socket.recv(&mut buf))
        .await
        .expect("no reply within 2s")
        .unwrap();
    buf.truncate(len);
    buf
}

async fn exchange(socket: &UdpSocket, datagram: &[u8]) -> Reply {
    let raw = exchange_raw(socket, datagram).await;
    Reply::deser(&raw).unwrap()
}

fn t(day: u8, hour: u8, minute: u8) -> WeekTime {
    WeekTime::try_from_parts(day, hour, minute).unwrap()
}

fn interval(start: WeekTime, end: WeekTime) -> FreeInterval {
    FreeInterval { start, end }
}

#[tokio::test]
async fn touching_intervals_do_not_conflict() {
    let server = spawn_server(Semantics::AtMostOnce, LossModel::lossless()).await;
    let mut client = BookingClient::connect(ClientConfig::new(server, Semantics::AtMostOnce))
        .await
        .unwrap();

    client.book("Meeting Room A", t(0, 9, 0), t(0, 10, 0)).await.unwrap();
    client.book("Meeting Room A", t(0, 10, 0), t(0, 11, 0)).await.unwrap();

    let free = client.query("Meeting Room A", vec![0]).await.unwrap();
    assert_eq!(
        free,
        vec![
            interval(t(0, 0, 0), t(0, 9, 0)),
            interval(t(0, 11, 0), t(1, 0, 0)),
        ]
    );
}

#[tokio::test]
async fn duplicate_extend_is_idempotent_under_at_least_once() {
    let server = spawn_server(Semantics::AtLeastOnce, LossModel::lossless()).await;
    let socket = raw_socket(server).await;

    let book = encode_request(
        1,
        RequestOp::Book {
            facility: "Meeting Room A".to_string(),
            start: t(0, 10, 0),
            end: t(0, 11, 0),
        },
    );
    let confirmation_id = match exchange(&socket, &book).await {
        Reply::Booked { confirmation_id } => confirmation_id,
        other => panic!("unexpected reply {:?}", other),
    };

    // same request id both times: at-least-once re-executes, the idempotent
    //  algebra keeps the end at 11:30 rather than 12:00
    let extend = encode_request(
        2,
        RequestOp::Extend { confirmation_id, extra_minutes: 30 },
    );
    assert_eq!(exchange(&socket, &extend).await, Reply::Extended);
    assert_eq!(exchange(&socket, &extend).await, Reply::Extended);

    let query = encode_request(3, RequestOp::Query { facility: "Meeting Room A".to_string(), days: vec![0] });
    match exchange(&socket, &query).await {
        Reply::Availability(free) => assert_eq!(
            free,
            vec![
                interval(t(0, 0, 0), t(0, 10, 0)),
                interval(t(0, 11, 30), t(1, 0, 0)),
            ]
        ),
        other => panic!("unexpected reply {:?}", other),
    }
}

#[tokio::test]
async fn duplicate_mutations_under_at_least_once() {
    let server = spawn_server(Semantics::AtLeastOnce, LossModel::lossless()).await;
    let socket = raw_socket(server).await;

    // a duplicated BOOK re-executes and conflicts with its own first run
    let book = encode_request(
        1,
        RequestOp::Book {
            facility: "Conference Hall".to_string(),
            start: t(1, 14, 0),
            end: t(1, 15, 0),
        },
    );
    let confirmation_id = match exchange(&socket, &book).await {
        Reply::Booked { confirmation_id } => confirmation_id,
        other => panic!("unexpected reply {:?}", other),
    };
    match exchange(&socket, &book).await {
        Reply::Error { code: ErrorCode::Conflict, .. } => {}
        other => panic!("unexpected reply {:?}", other),
    }

    // a duplicated CANCEL fails on the second execution
    let cancel = encode_request(2, RequestOp::Cancel { confirmation_id });
    assert_eq!(exchange(&socket, &cancel).await, Reply::Cancelled);
    match exchange(&socket, &cancel).await {
        Reply::Error { code: ErrorCode::Cancelled, .. } => {}
        other => panic!("unexpected reply {:?}", other),
    }
}

#[tokio::test]
async fn duplicate_cancel_under_at_most_once_returns_cached_reply() {
    let server = spawn_server(Semantics::AtMostOnce, LossModel::lossless()).await;
    let socket = raw_socket(server).await;

    let book = encode_request(
        1,
        RequestOp::Book {
            facility: "Seminar Room B".to_string(),
            start: t(2, 9, 0),
            end: t(2, 10, 0),
        },
    );
    let confirmation_id = match exchange(&socket, &book).await {
        Reply::Booked { confirmation_id } => confirmation_id,
        other => panic!("unexpected reply {:?}", other),
    };

    // same request id: the duplicate hits the history cache and the reply
    //  bytes are identical to the first transmission
    let cancel = encode_request(2, RequestOp::Cancel { confirmation_id: confirmation_id.clone() });
    let first = exchange_raw(&socket, &cancel).await;
    let second = exchange_raw(&socket, &cancel).await;
    assert_eq!(Reply::deser(&first).unwrap(), Reply::Cancelled);
    assert_eq!(first, second);

    // a fresh request id re-executes and sees the cancelled state
    let retry = encode_request(3, RequestOp::Cancel { confirmation_id });
    match exchange(&socket, &retry).await {
        Reply::Error { code: ErrorCode::Cancelled, .. } => {}
        other => panic!("unexpected reply {:?}", other),
    }
}

#[tokio::test]
async fn malformed_and_unknown_datagrams_get_uncached_errors() {
    let server = spawn_server(Semantics::AtMostOnce, LossModel::lossless()).await;
    let socket = raw_socket(server).await;

    match exchange(&socket, &[1, 0, 0]).await {
        Reply::Error { code: ErrorCode::Malformed, .. } => {}
        other => panic!("unexpected reply {:?}", other),
    }

    match exchange(&socket, &[200, 0, 0, 0, 1]).await {
        Reply::Error { code: ErrorCode::UnknownOp, .. } => {}
        other => panic!("unexpected reply {:?}", other),
    }
}

#[tokio::test]
async fn monitor_fan_out_and_expiry() {
    let server = spawn_server(Semantics::AtMostOnce, LossModel::lossless()).await;

    // observer registers for 1 second
    let observer = raw_socket(server).await;
    let register = encode_request(
        1,
        RequestOp::MonitorRegister { facility: "Meeting Room A".to_string(), duration_secs: 1 },
    );
    assert_eq!(exchange(&observer, &register).await, Reply::MonitorRegistered);

    // the registration is followed by an immediate snapshot of the free week
    match exchange_and_decode(&observer).await {
        Reply::MonitorUpdate { facility, free } => {
            assert_eq!(facility, "Meeting Room A");
            assert_eq!(free, vec![interval(t(0, 0, 0), t(7, 0, 0))]);
        }
        other => panic!("unexpected datagram {:?}", other),
    }

    // another client books: the observer gets the post-book view
    let mut booker = BookingClient::connect(ClientConfig::new(server, Semantics::AtMostOnce))
        .await
        .unwrap();
    booker.book("Meeting Room A", t(0, 9, 0), t(0, 10, 0)).await.unwrap();

    match exchange_and_decode(&observer).await {
        Reply::MonitorUpdate { facility, free } => {
            assert_eq!(facility, "Meeting Room A");
            assert_eq!(
                free,
                vec![
                    interval(t(0, 0, 0), t(0, 9, 0)),
                    interval(t(0, 10, 0), t(7, 0, 0)),
                ]
            );
        }
        other => panic!("unexpected datagram {:?}", other),
    }

    // bookings of other facilities do not reach this observer
    booker.book("Conference Hall", t(0, 9, 0), t(0, 10, 0)).await.unwrap();

    // once the registration expires, further changes stay silent
    tokio::time::sleep(Duration::from_millis(1200)).await;
    booker.book("Meeting Room A", t(0, 12, 0), t(0, 13, 0)).await.unwrap();

    let mut buf = vec![0u8; 2048];
    let outcome = timeout(Duration::from_millis(500), observer.recv(&mut buf)).await;
    assert!(outcome.is_err(), "expected silence after expiry");
}

async fn exchange_and_decode(socket: &UdpSocket) -> Reply {
    let mut buf = vec![0u8; 2048];
    let len = timeout(Duration::from_secs(2), socket.recv(&mut buf))
        .await
        .expect("no datagram within 2s")
        .unwrap();
    Reply::deser(&buf[..len]).unwrap()
}

#[tokio::test]
async fn monitor_client_surfaces_updates() {
    let server = spawn_server(Semantics::AtMostOnce, LossModel::lossless()).await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let observer = tokio::spawn(async move {
        let mut client = BookingClient::connect(ClientConfig::new(server, Semantics::AtMostOnce))
            .await
            .unwrap();
        client
            .monitor("Lecture Theatre 1", 2, |free| {
                tx.send(free.to_vec()).unwrap();
            })
            .await
            .unwrap();
    });

    // initial snapshot
    let snapshot = timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
    assert_eq!(snapshot, vec![interval(t(0, 0, 0), t(7, 0, 0))]);

    let mut booker = BookingClient::connect(ClientConfig::new(server, Semantics::AtMostOnce))
        .await
        .unwrap();
    booker.book("Lecture Theatre 1", t(3, 8, 0), t(3, 9, 0)).await.unwrap();

    let update = timeout(Duration::from_secs(2), rx.recv()).await.unwrap().unwrap();
    assert_eq!(
        update,
        vec![
            interval(t(0, 0, 0), t(3, 8, 0)),
            interval(t(3, 9, 0), t(7, 0, 0)),
        ]
    );

    observer.await.unwrap();
}

#[tokio::test]
async fn lossy_bookings_eventually_succeed_under_at_most_once() {
    // requests are dropped 40% of the time; the bounded retry with a stable
    //  request id must land every booking exactly once
    let server = spawn_server(Semantics::AtMostOnce, LossModel::from_seed(0.4, 0.0, 20_260_802)).await;

    let mut config = ClientConfig::new(server, Semantics::AtMostOnce);
    config.timeout = Duration::from_millis(100);
    config.max_attempts = 12;
    let mut client = BookingClient::connect(config).await.unwrap();

    let mut confirmation_ids = Vec::new();
    for slot in 0..50u16 {
        let start = WeekTime::try_from_minutes(slot * 120).unwrap();
        let end = WeekTime::try_from_minutes(slot * 120 + 60).unwrap();
        let id = client.book("Conference Hall", start, end).await.unwrap();
        confirmation_ids.push(id);
    }

    confirmation_ids.sort();
    confirmation_ids.dedup();
    assert_eq!(confirmation_ids.len(), 50);
}

#[tokio::test]
async fn client_times_out_when_every_reply_is_lost() {
    let server = spawn_server(Semantics::AtMostOnce, LossModel::from_seed(0.0, 1.0, 1)).await;

    let mut config = ClientConfig::new(server, Semantics::AtMostOnce);
    config.timeout = Duration::from_millis(50);
    config.max_attempts = 3;
    let mut client = BookingClient::connect(config).await.unwrap();

    match client.query("Meeting Room A", vec![0]).await {
        Err(ClientError::Timeout { attempts: 3 }) => {}
        other => panic!("unexpected outcome {:?}", other.map(|_| ())),
    }
}
