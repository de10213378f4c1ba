use std::time::Duration;

use axum::body::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{timeout_at, Instant};
use uuid::Uuid;

use crate::metrics::DeliveryMetrics;

use super::client::{Client, ProbeTarget, UserId};
use super::coordinator::{Command, Delivery};
use super::types::{BroadcastReport, CloseReason, HubError, HubStats};

/// Cloneable handle to the hub coordinator.
///
/// This is the programmatic surface the rest of the application uses; every
/// call becomes a command processed in order by the coordinator loop.
#[derive(Clone)]
pub struct HubHandle {
    commands: mpsc::Sender<Command>,
    send_timeout: Duration,
}

impl HubHandle {
    pub(crate) fn new(commands: mpsc::Sender<Command>, send_timeout: Duration) -> Self {
        Self {
            commands,
            send_timeout,
        }
    }

    async fn command(&self, command: Command) -> Result<(), HubError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| HubError::Closed)
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, HubError> {
        let (reply, rx) = oneshot::channel();
        self.command(make(reply)).await?;
        rx.await.map_err(|_| HubError::Closed)
    }

    /// Register a client, replacing (and closing) any client with the same user id
    pub async fn register(&self, client: Client) -> Result<(), HubError> {
        self.command(Command::Register(client)).await
    }

    /// Remove connection `id` of `user_id`; no-op if it is no longer registered
    pub async fn unregister(
        &self,
        user_id: UserId,
        id: Uuid,
        reason: CloseReason,
    ) -> Result<(), HubError> {
        self.command(Command::Unregister {
            user_id,
            id,
            reason,
        })
        .await
    }

    /// Offer a message to every registered client, evicting those that are full
    pub async fn broadcast(&self, message: impl Into<Bytes>) -> Result<BroadcastReport, HubError> {
        let message = message.into();
        self.request(|reply| Command::Broadcast { message, reply })
            .await
    }

    /// Deliver a message to one user.
    ///
    /// Waits up to the configured send timeout for queue capacity. The wait
    /// happens on the caller's task, never inside the coordinator, and the
    /// message is only enqueued by the coordinator while the connection is
    /// still registered. A client that stays full past the timeout is evicted;
    /// one that leaves the registry during the wait yields `Disconnected`.
    pub async fn send_message(
        &self,
        user_id: UserId,
        message: impl Into<Bytes>,
    ) -> Result<(), HubError> {
        let deadline = Instant::now() + self.send_timeout;
        let mut message = message.into();
        let mut expected = None;

        loop {
            let delivery = self
                .request(|reply| Command::Deliver {
                    user_id,
                    expected,
                    message,
                    reply,
                })
                .await?;

            let route = match delivery {
                Delivery::Queued => {
                    DeliveryMetrics::record_direct();
                    return Ok(());
                }
                Delivery::Missing if expected.is_some() => {
                    return Err(HubError::Disconnected(user_id))
                }
                Delivery::Missing => return Err(HubError::NotFound(user_id)),
                Delivery::Closed => return Err(HubError::Disconnected(user_id)),
                Delivery::Full {
                    route,
                    message: returned,
                } => {
                    message = returned;
                    route
                }
            };

            let id = route.id;
            expected = Some(id);

            match timeout_at(deadline, route.capacity()).await {
                Ok(true) => continue,
                Ok(false) => return Err(HubError::Disconnected(user_id)),
                Err(_) => {
                    tracing::warn!(
                        user_id = user_id,
                        connection_id = %id,
                        timeout_ms = self.send_timeout.as_millis() as u64,
                        "Point-to-point send timed out, evicting client"
                    );
                    self.unregister(user_id, id, CloseReason::SendTimeout)
                        .await?;
                    return Err(HubError::SendTimeout(user_id));
                }
            }
        }
    }

    /// Clients whose last activity is at least `older_than` old
    pub async fn idle_clients(&self, older_than: Duration) -> Result<Vec<ProbeTarget>, HubError> {
        self.request(|reply| Command::IdleClients { older_than, reply })
            .await
    }

    pub async fn stats(&self) -> Result<HubStats, HubError> {
        self.request(|reply| Command::Stats { reply }).await
    }

    pub async fn is_connected(&self, user_id: UserId) -> Result<bool, HubError> {
        let id = self
            .request(|reply| Command::Lookup { user_id, reply })
            .await?;
        Ok(id.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HubConfig;
    use crate::hub::Hub;
    use tokio::sync::broadcast;

    fn spawn_hub(send_timeout_ms: u64) -> (HubHandle, broadcast::Sender<()>) {
        let (hub, handle) = Hub::with_config(HubConfig {
            command_buffer: 16,
            send_timeout_ms,
        });
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        tokio::spawn(hub.run(shutdown_rx));
        (handle, shutdown_tx)
    }

    #[tokio::test]
    async fn test_send_timeout_evicts_client() {
        let (handle, _shutdown) = spawn_hub(50);

        let (client, mut queues) = Client::new(4, 1);
        handle.register(client).await.unwrap();

        handle.send_message(4, "first").await.unwrap();
        let result = handle.send_message(4, "second").await;

        assert_eq!(result, Err(HubError::SendTimeout(4)));
        assert!(!handle.is_connected(4).await.unwrap());
        assert_eq!(queues.outbound.recv().await, Some(Bytes::from_static(b"first")));
        assert_eq!(queues.outbound.recv().await, None);
    }

    #[tokio::test]
    async fn test_pending_send_fails_when_client_unregistered() {
        let (handle, _shutdown) = spawn_hub(5000);
        let (client, mut queues) = Client::new(6, 1);
        let id = client.id;
        handle.register(client).await.unwrap();
        handle.send_message(6, "fill").await.unwrap();

        let pending = tokio::spawn({
            let handle = handle.clone();
            async move { handle.send_message(6, "late").await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.unregister(6, id, CloseReason::ReadClosed).await.unwrap();

        let result = tokio::time::timeout(Duration::from_secs(2), pending)
            .await
            .expect("pending send should finish")
            .unwrap();
        assert_eq!(result, Err(HubError::Disconnected(6)));

        // Nothing reaches the queue after removal, and it is closed
        assert_eq!(queues.outbound.recv().await, Some(Bytes::from_static(b"fill")));
        assert_eq!(queues.outbound.recv().await, None);
    }

    #[tokio::test]
    async fn test_pending_send_does_not_follow_replacement() {
        let (handle, _shutdown) = spawn_hub(5000);
        let (old, mut old_queues) = Client::new(7, 1);
        handle.register(old).await.unwrap();
        handle.send_message(7, "fill").await.unwrap();

        let pending = tokio::spawn({
            let handle = handle.clone();
            async move { handle.send_message(7, "late").await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        let (new, mut new_queues) = Client::new(7, 4);
        handle.register(new).await.unwrap();

        let result = tokio::time::timeout(Duration::from_secs(2), pending)
            .await
            .expect("pending send should finish")
            .unwrap();
        assert_eq!(result, Err(HubError::Disconnected(7)));

        assert_eq!(old_queues.outbound.recv().await, Some(Bytes::from_static(b"fill")));
        assert_eq!(old_queues.outbound.recv().await, None);
        assert!(new_queues.outbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_pending_send_completes_once_drained() {
        let (handle, _shutdown) = spawn_hub(5000);
        let (client, mut queues) = Client::new(8, 1);
        handle.register(client).await.unwrap();
        handle.send_message(8, "first").await.unwrap();

        let pending = tokio::spawn({
            let handle = handle.clone();
            async move { handle.send_message(8, "second").await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(queues.outbound.recv().await, Some(Bytes::from_static(b"first")));

        let result = tokio::time::timeout(Duration::from_secs(2), pending)
            .await
            .expect("pending send should finish")
            .unwrap();
        assert_eq!(result, Ok(()));
        assert_eq!(queues.outbound.recv().await, Some(Bytes::from_static(b"second")));
    }

    #[tokio::test]
    async fn test_calls_fail_once_coordinator_stopped() {
        let (hub, handle) = Hub::new();
        drop(hub);

        assert_eq!(handle.broadcast("x").await, Err(HubError::Closed));
        assert_eq!(handle.stats().await.map(|s| s.connections), Err(HubError::Closed));
    }
}
