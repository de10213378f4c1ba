//! End-to-end registry tests
//!
//! Drive the hub through its public handle with in-memory sockets built from
//! futures channels, so no server or network is needed.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::Message;
use futures::channel::mpsc as wire;
use futures::StreamExt;
use tokio::sync::broadcast;
use tokio::sync::mpsc::error::TryRecvError;
use tokio_test::{assert_err, assert_ok};

use wshub::config::HubConfig;
use wshub::hub::{BroadcastReport, Client, CloseReason, Hub, HubError, HubHandle, UserId};
use wshub::websocket::{spawn_pumps, LoggingHandler, Pumps};

struct Peer {
    written: wire::UnboundedReceiver<Message>,
    incoming: wire::UnboundedSender<Result<Message, String>>,
    pumps: Pumps,
}

fn start_hub() -> (HubHandle, broadcast::Sender<()>) {
    let (hub, handle) = Hub::with_config(HubConfig {
        command_buffer: 64,
        send_timeout_ms: 200,
    });
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    tokio::spawn(hub.run(shutdown_rx));
    (handle, shutdown_tx)
}

async fn connect(hub: &HubHandle, user_id: UserId) -> Peer {
    let (client, queues) = Client::new(user_id, 256);
    assert_ok!(hub.register(client).await);

    let (sink, written) = wire::unbounded();
    let (incoming, stream) = wire::unbounded();
    let pumps = spawn_pumps(sink, stream, queues, hub.clone(), Arc::new(LoggingHandler), 512);

    Peer {
        written,
        incoming,
        pumps,
    }
}

async fn next_binary(peer: &mut Peer) -> Bytes {
    let frame = tokio::time::timeout(Duration::from_secs(2), peer.written.next())
        .await
        .expect("frame should arrive")
        .expect("wire should be open");

    match frame {
        Message::Binary(data) => data,
        other => panic!("expected binary frame, got {:?}", other),
    }
}

async fn wait_until_gone(hub: &HubHandle, user_id: UserId) {
    for _ in 0..200 {
        if !hub.is_connected(user_id).await.unwrap() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("user {} was never unregistered", user_id);
}

#[tokio::test]
async fn test_send_message_round_trip() {
    let (hub, _shutdown) = start_hub();
    let mut peer = connect(&hub, 1).await;

    assert_ok!(hub.send_message(1, "hi").await);
    assert_eq!(next_binary(&mut peer).await, Bytes::from_static(b"hi"));

    for i in 0..20u8 {
        assert_ok!(hub.send_message(1, vec![i]).await);
    }
    for i in 0..20u8 {
        assert_eq!(next_binary(&mut peer).await, Bytes::from(vec![i]));
    }
}

#[tokio::test]
async fn test_read_failure_removes_client() {
    let (hub, _shutdown) = start_hub();
    let peer = connect(&hub, 1).await;

    peer.incoming
        .unbounded_send(Err("peer went away".to_string()))
        .unwrap();

    wait_until_gone(&hub, 1).await;
    assert_eq!(hub.send_message(1, "x").await, Err(HubError::NotFound(1)));

    tokio::time::timeout(Duration::from_secs(2), peer.pumps.join())
        .await
        .expect("pumps should stop after read failure");
}

#[tokio::test]
async fn test_broadcast_reaches_every_client() {
    let (hub, _shutdown) = start_hub();
    let mut a = connect(&hub, 1).await;
    let mut b = connect(&hub, 2).await;

    let report = hub.broadcast("all hands").await.unwrap();

    assert_eq!(report, BroadcastReport { delivered: 2, evicted: 0 });
    assert_eq!(next_binary(&mut a).await, Bytes::from_static(b"all hands"));
    assert_eq!(next_binary(&mut b).await, Bytes::from_static(b"all hands"));
}

#[tokio::test]
async fn test_undrained_client_evicted_after_capacity() {
    let (hub, _shutdown) = start_hub();
    let (client, mut queues) = Client::new(7, 256);
    hub.register(client).await.unwrap();

    let mut evicted_at = None;
    for i in 1..=300u32 {
        let report = hub.broadcast(format!("message {}", i)).await.unwrap();
        if report.evicted == 1 {
            evicted_at = Some(i);
        }
    }

    assert_eq!(evicted_at, Some(257));
    assert!(!hub.is_connected(7).await.unwrap());

    // Everything accepted before eviction is still queued, then the queue is closed
    for i in 1..=256u32 {
        let message = queues.outbound.recv().await.unwrap();
        assert_eq!(message, Bytes::from(format!("message {}", i)));
    }
    assert_eq!(queues.outbound.recv().await, None);
}

#[tokio::test]
async fn test_concurrent_registration_keeps_latecomer() {
    let (hub, _shutdown) = start_hub();
    let (first, mut first_queues) = Client::new(2, 8);
    let (second, mut second_queues) = Client::new(2, 8);

    let (a, b) = tokio::join!(hub.register(first), hub.register(second));
    assert_ok!(a);
    assert_ok!(b);

    assert_eq!(hub.stats().await.unwrap().connections, 1);
    assert_ok!(hub.send_message(2, "winner").await);

    let first_state = first_queues.outbound.try_recv();
    let second_state = second_queues.outbound.try_recv();

    // Exactly one record survives; the superseded one has its queue closed
    match (first_state, second_state) {
        (Err(TryRecvError::Disconnected), Ok(message))
        | (Ok(message), Err(TryRecvError::Disconnected)) => {
            assert_eq!(message, Bytes::from_static(b"winner"));
        }
        other => panic!("unexpected queue states: {:?}", other),
    }
}

#[tokio::test]
async fn test_duplicate_unregister_closes_once() {
    let (hub, _shutdown) = start_hub();
    let (client, mut queues) = Client::new(3, 8);
    let id = client.id;
    hub.register(client).await.unwrap();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let hub = hub.clone();
            tokio::spawn(async move { hub.unregister(3, id, CloseReason::ReadClosed).await })
        })
        .collect();
    for handle in handles {
        assert_ok!(handle.await.unwrap());
    }

    assert!(!hub.is_connected(3).await.unwrap());
    assert_eq!(queues.outbound.recv().await, None);

    let stats = hub.stats().await.unwrap();
    assert_eq!(stats.registered_total, 1);
    assert_eq!(stats.evicted_total, 1);
}

#[tokio::test]
async fn test_send_to_unknown_user_leaves_queues_untouched() {
    let (hub, _shutdown) = start_hub();
    let (client, mut queues) = Client::new(1, 8);
    hub.register(client).await.unwrap();

    assert_err!(hub.send_message(404, "nobody").await);
    assert!(matches!(queues.outbound.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test]
async fn test_shutdown_closes_live_connections() {
    let (hub, shutdown) = start_hub();
    let peer = connect(&hub, 1).await;
    let Peer {
        mut written,
        incoming: _incoming,
        pumps,
    } = peer;

    shutdown.send(()).unwrap();

    let frame = tokio::time::timeout(Duration::from_secs(2), written.next())
        .await
        .expect("close frame should arrive")
        .expect("wire should be open");
    assert!(matches!(frame, Message::Close(Some(_))));

    tokio::time::timeout(Duration::from_secs(2), pumps.join())
        .await
        .expect("pumps should stop on shutdown");
    assert_eq!(hub.broadcast("late").await, Err(HubError::Closed));
}
