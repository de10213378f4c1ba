use std::collections::HashMap;
use std::time::Duration;

use axum::body::Bytes;
use chrono::Utc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use uuid::Uuid;

use crate::config::HubConfig;
use crate::metrics::{ConnectionMetrics, DeliveryMetrics};

use super::client::{Client, ProbeTarget, UserId};
use super::handle::HubHandle;
use super::types::{BroadcastReport, CloseReason, HubStats};

/// Requests processed by the coordinator loop, strictly one at a time
pub(crate) enum Command {
    Register(Client),
    Unregister {
        user_id: UserId,
        id: Uuid,
        reason: CloseReason,
    },
    Broadcast {
        message: Bytes,
        reply: oneshot::Sender<BroadcastReport>,
    },
    /// Enqueue for one user. `expected` pins the connection on a retry.
    Deliver {
        user_id: UserId,
        expected: Option<Uuid>,
        message: Bytes,
        reply: oneshot::Sender<Delivery>,
    },
    Lookup {
        user_id: UserId,
        reply: oneshot::Sender<Option<Uuid>>,
    },
    IdleClients {
        older_than: Duration,
        reply: oneshot::Sender<Vec<ProbeTarget>>,
    },
    Stats {
        reply: oneshot::Sender<HubStats>,
    },
}

/// Outcome of a [`Command::Deliver`]
pub(crate) enum Delivery {
    Queued,
    /// No such user, or a different connection than `expected`
    Missing,
    /// The record's pumps are gone; it has been evicted
    Closed,
    /// Queue full; the message comes back along with a way to wait for room
    Full { route: Route, message: Bytes },
}

/// Lent out while a point-to-point send waits for queue capacity.
/// Never used to enqueue: messages only enter a queue inside the coordinator.
pub(crate) struct Route {
    pub id: Uuid,
    sender: mpsc::Sender<Bytes>,
    removed: watch::Receiver<()>,
}

impl Route {
    /// Wait until the queue has room. False if the record left the registry first.
    pub async fn capacity(mut self) -> bool {
        tokio::select! {
            _ = self.removed.changed() => false,
            permit = self.sender.reserve() => permit.is_ok(),
        }
    }
}

/// Registry coordinator.
///
/// Sole owner of the user id -> client map. Every read and write of the
/// registry arrives as a [`Command`] through [`HubHandle`], so registry
/// changes are totally ordered by arrival.
pub struct Hub {
    clients: HashMap<UserId, Client>,
    commands: mpsc::Receiver<Command>,
    stats: HubStats,
}

impl Hub {
    pub fn new() -> (Self, HubHandle) {
        Self::with_config(HubConfig::default())
    }

    pub fn with_config(config: HubConfig) -> (Self, HubHandle) {
        let (tx, rx) = mpsc::channel(config.command_buffer.max(1));
        let hub = Self {
            clients: HashMap::new(),
            commands: rx,
            stats: HubStats::default(),
        };
        let handle = HubHandle::new(tx, Duration::from_millis(config.send_timeout_ms));

        (hub, handle)
    }

    /// Run the coordinator until shutdown is signalled or every handle is dropped.
    /// All remaining clients are closed on the way out.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!("Hub coordinator started");

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("Hub coordinator received shutdown signal");
                    break;
                }
                command = self.commands.recv() => match command {
                    Some(command) => self.handle(command),
                    None => {
                        tracing::debug!("All hub handles dropped");
                        break;
                    }
                }
            }
        }

        self.close_all();
        tracing::info!("Hub coordinator stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Register(client) => self.register(client),
            Command::Unregister {
                user_id,
                id,
                reason,
            } => {
                self.unregister(user_id, id, reason);
            }
            Command::Broadcast { message, reply } => {
                let report = self.broadcast(message);
                let _ = reply.send(report);
            }
            Command::Deliver {
                user_id,
                expected,
                message,
                reply,
            } => {
                let _ = reply.send(self.deliver(user_id, expected, message));
            }
            Command::Lookup { user_id, reply } => {
                let _ = reply.send(self.clients.get(&user_id).map(|client| client.id));
            }
            Command::IdleClients { older_than, reply } => {
                let _ = reply.send(self.idle_clients(older_than));
            }
            Command::Stats { reply } => {
                let mut stats = self.stats.clone();
                stats.connections = self.clients.len();
                let _ = reply.send(stats);
            }
        }
    }

    /// Install a client, closing any record it supersedes
    fn register(&mut self, client: Client) {
        let user_id = client.user_id;
        let connection_id = client.id;

        if let Some(previous) = self.clients.insert(user_id, client) {
            tracing::info!(
                user_id = user_id,
                connection_id = %previous.id,
                replaced_by = %connection_id,
                "Closing superseded connection"
            );
            self.record_removed(previous, CloseReason::Superseded);
        }

        self.stats.registered_total += 1;
        ConnectionMetrics::record_opened();
        ConnectionMetrics::set_active(self.clients.len());

        tracing::info!(
            user_id = user_id,
            connection_id = %connection_id,
            "Connection registered"
        );
    }

    /// Remove the record for `user_id` only if it is still connection `id`.
    /// Returns false when it was already gone or replaced.
    fn unregister(&mut self, user_id: UserId, id: Uuid, reason: CloseReason) -> bool {
        match self.clients.get(&user_id) {
            Some(client) if client.id == id => {}
            _ => return false,
        }

        if let Some(client) = self.clients.remove(&user_id) {
            self.record_removed(client, reason);
            ConnectionMetrics::set_active(self.clients.len());
        }
        true
    }

    /// Offer `message` to every queue without waiting; evict clients that cannot take it
    fn broadcast(&mut self, message: Bytes) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        let mut stalled = Vec::new();

        for (user_id, client) in &self.clients {
            match client.outbound.try_send(message.clone()) {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Full(_)) => stalled.push((*user_id, CloseReason::QueueFull)),
                Err(TrySendError::Closed(_)) => stalled.push((*user_id, CloseReason::WriteFailed)),
            }
        }

        for (user_id, reason) in stalled {
            if let Some(client) = self.clients.remove(&user_id) {
                tracing::warn!(
                    user_id = user_id,
                    connection_id = %client.id,
                    reason = %reason,
                    "Evicting client during broadcast"
                );
                self.record_removed(client, reason);
                report.evicted += 1;
            }
        }

        self.stats.broadcasts_total += 1;
        DeliveryMetrics::record_broadcast(report.delivered);
        ConnectionMetrics::set_active(self.clients.len());

        tracing::debug!(
            bytes = message.len(),
            delivered = report.delivered,
            evicted = report.evicted,
            "Broadcast round completed"
        );

        report
    }

    /// Offer `message` to one user's queue without waiting
    fn deliver(&mut self, user_id: UserId, expected: Option<Uuid>, message: Bytes) -> Delivery {
        let client = match self.clients.get(&user_id) {
            Some(client) if expected.map_or(true, |id| id == client.id) => client,
            _ => return Delivery::Missing,
        };

        match client.outbound.try_send(message) {
            Ok(()) => Delivery::Queued,
            Err(TrySendError::Full(message)) => Delivery::Full {
                route: Route {
                    id: client.id,
                    sender: client.outbound.clone(),
                    removed: client.removed.subscribe(),
                },
                message,
            },
            Err(TrySendError::Closed(_)) => {
                let id = client.id;
                self.unregister(user_id, id, CloseReason::WriteFailed);
                Delivery::Closed
            }
        }
    }

    fn idle_clients(&self, older_than: Duration) -> Vec<ProbeTarget> {
        let now = Utc::now();
        let threshold = chrono::Duration::milliseconds(older_than.as_millis() as i64);

        self.clients
            .values()
            .filter(|client| client.activity.idle_for(now, threshold))
            .map(Client::probe_target)
            .collect()
    }

    /// Dropping the client releases the registry's producer handle, which
    /// closes the outbound queue and makes the outbound pump close the socket
    fn record_removed(&mut self, client: Client, reason: CloseReason) {
        self.stats.evicted_total += 1;
        ConnectionMetrics::record_closed(reason.as_str());

        tracing::info!(
            user_id = client.user_id,
            connection_id = %client.id,
            reason = %reason,
            "Connection unregistered"
        );

        drop(client);
    }

    fn close_all(&mut self) {
        // Registrations still buffered would otherwise keep their queues open
        self.commands.close();
        while let Ok(command) = self.commands.try_recv() {
            if let Command::Register(client) = command {
                self.record_removed(client, CloseReason::Shutdown);
            }
        }

        let clients: Vec<Client> = self.clients.drain().map(|(_, client)| client).collect();
        let count = clients.len();

        for client in clients {
            self.record_removed(client, CloseReason::Shutdown);
        }
        ConnectionMetrics::set_active(0);

        if count > 0 {
            tracing::info!(closed = count, "Closed remaining connections");
        }
    }
}
