//! Connection record and the queues shared with its pumps

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use axum::body::Bytes;
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot, watch};
use uuid::Uuid;

/// Logical user identifier supplied by the connecting peer
pub type UserId = i64;

/// Probe requests are rare; a tiny buffer is enough
const PROBE_BUFFER_SIZE: usize = 4;

/// Last successful I/O on a connection (Unix millis), shared by both pumps,
/// the coordinator and the liveness monitor
#[derive(Debug)]
pub struct Activity(AtomicI64);

impl Activity {
    pub fn new() -> Self {
        Self(AtomicI64::new(Utc::now().timestamp_millis()))
    }

    pub fn touch(&self) {
        self.touch_at(Utc::now());
    }

    pub fn touch_at(&self, at: DateTime<Utc>) {
        self.0.store(at.timestamp_millis(), Ordering::Relaxed);
    }

    pub fn last(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.0.load(Ordering::Relaxed)).unwrap_or_else(Utc::now)
    }

    /// Whether the last activity is at least `threshold` old at `now`
    pub fn idle_for(&self, now: DateTime<Utc>, threshold: chrono::Duration) -> bool {
        now.signed_duration_since(self.last()) >= threshold
    }
}

impl Default for Activity {
    fn default() -> Self {
        Self::new()
    }
}

/// A liveness probe handed to the outbound pump, which owns the write half.
/// `reply` gets true once the peer answers the ping with a pong.
#[derive(Debug)]
pub struct Probe {
    pub reply: oneshot::Sender<bool>,
}

/// Registry entry for one live connection.
///
/// Holds the only long-lived producer handle of the outbound queue, so
/// dropping the record is what closes the queue.
#[derive(Debug)]
pub struct Client {
    pub id: Uuid,
    pub user_id: UserId,
    pub(crate) outbound: mpsc::Sender<Bytes>,
    pub(crate) probe: mpsc::Sender<Probe>,
    pub(crate) activity: Arc<Activity>,
    /// Dropped with the record; wakes senders waiting for queue capacity
    pub(crate) removed: watch::Sender<()>,
}

/// Consumer ends of a client's queues, moved into its pumps
#[derive(Debug)]
pub struct ClientQueues {
    pub id: Uuid,
    pub user_id: UserId,
    pub outbound: mpsc::Receiver<Bytes>,
    pub probe: mpsc::Receiver<Probe>,
    pub activity: Arc<Activity>,
}

impl Client {
    /// Create a record with an outbound queue of `capacity` messages (at least one)
    pub fn new(user_id: UserId, capacity: usize) -> (Self, ClientQueues) {
        let id = Uuid::new_v4();
        let (outbound_tx, outbound_rx) = mpsc::channel(capacity.max(1));
        let (probe_tx, probe_rx) = mpsc::channel(PROBE_BUFFER_SIZE);
        let activity = Arc::new(Activity::new());
        let (removed, _) = watch::channel(());

        let client = Self {
            id,
            user_id,
            outbound: outbound_tx,
            probe: probe_tx,
            activity: activity.clone(),
            removed,
        };
        let queues = ClientQueues {
            id,
            user_id,
            outbound: outbound_rx,
            probe: probe_rx,
            activity,
        };

        (client, queues)
    }

    pub fn activity(&self) -> &Arc<Activity> {
        &self.activity
    }

    pub(crate) fn probe_target(&self) -> ProbeTarget {
        ProbeTarget {
            id: self.id,
            user_id: self.user_id,
            probe: self.probe.clone(),
            activity: self.activity.clone(),
        }
    }
}

/// Snapshot of an idle client handed out to the liveness monitor
#[derive(Debug, Clone)]
pub struct ProbeTarget {
    pub id: Uuid,
    pub user_id: UserId,
    pub(crate) probe: mpsc::Sender<Probe>,
    pub activity: Arc<Activity>,
}

impl ProbeTarget {
    /// Ping the peer and wait for its pong.
    ///
    /// Returns false if the pumps are gone or the ping could not be written.
    /// A peer that never answers leaves this pending; callers bound it with
    /// a timeout.
    pub async fn ping(&self) -> bool {
        let (reply, rx) = oneshot::channel();
        if self.probe.send(Probe { reply }).await.is_err() {
            return false;
        }
        rx.await.unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_activity_idle_threshold() {
        let activity = Activity::new();
        let now = Utc::now();
        activity.touch_at(now - chrono::Duration::seconds(30));

        assert!(activity.idle_for(now, chrono::Duration::seconds(30)));
        assert!(activity.idle_for(now, chrono::Duration::seconds(10)));
        assert!(!activity.idle_for(now, chrono::Duration::seconds(31)));
    }

    #[tokio::test]
    async fn test_dropping_client_closes_outbound_queue() {
        let (client, mut queues) = Client::new(7, 4);
        client.outbound.try_send(Bytes::from_static(b"a")).unwrap();
        drop(client);

        assert_eq!(queues.outbound.recv().await, Some(Bytes::from_static(b"a")));
        assert_eq!(queues.outbound.recv().await, None);
    }

    #[tokio::test]
    async fn test_zero_capacity_is_raised_to_one() {
        let (client, mut queues) = Client::new(2, 0);

        client.outbound.try_send(Bytes::from_static(b"only")).unwrap();
        assert!(client.outbound.try_send(Bytes::from_static(b"more")).is_err());
        assert_eq!(queues.outbound.recv().await, Some(Bytes::from_static(b"only")));
    }

    #[tokio::test]
    async fn test_ping_fails_without_pump() {
        let (client, queues) = Client::new(1, 4);
        let target = client.probe_target();
        drop(queues);

        assert!(!target.ping().await);
    }

    #[tokio::test]
    async fn test_ping_reports_pump_outcome() {
        let (client, mut queues) = Client::new(1, 4);
        let target = client.probe_target();

        tokio::spawn(async move {
            if let Some(probe) = queues.probe.recv().await {
                let _ = probe.reply.send(true);
            }
        });

        assert!(target.ping().await);
    }
}
