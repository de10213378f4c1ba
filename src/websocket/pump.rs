//! Per-connection read and write pumps.
//!
//! Each connection gets exactly one reader task and one writer task; neither
//! half of the socket is ever shared. Whichever pump stops first drives the
//! same teardown: unregister the record (idempotent) and close the socket.
//!
//! A liveness probe spans both pumps: the writer sends the ping and parks the
//! probe's reply with the reader, which completes it when the pong arrives.

use std::fmt::Display;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::ws::{close_code, CloseFrame, Message, Utf8Bytes};
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::hub::{Activity, ClientQueues, CloseReason, HubHandle, Probe, UserId};
use crate::metrics::DeliveryMetrics;

use super::message::MessageHandler;

/// Join handles of a connection's two pumps
pub struct Pumps {
    pub reader: JoinHandle<()>,
    pub writer: JoinHandle<()>,
}

impl Pumps {
    /// Wait until both pumps have finished
    pub async fn join(self) {
        let _ = tokio::join!(self.reader, self.writer);
    }
}

/// Start the reader and writer for one registered connection
pub fn spawn_pumps<W, R, E>(
    sink: W,
    stream: R,
    queues: ClientQueues,
    hub: HubHandle,
    handler: Arc<dyn MessageHandler>,
    max_message_size: usize,
) -> Pumps
where
    W: Sink<Message> + Unpin + Send + 'static,
    W::Error: Display + Send + 'static,
    R: Stream<Item = Result<Message, E>> + Unpin + Send + 'static,
    E: Display + Send + 'static,
{
    let ClientQueues {
        id,
        user_id,
        outbound,
        probe,
        activity,
    } = queues;
    let (released_tx, released_rx) = watch::channel(false);
    let (awaiting_tx, awaiting_rx) = mpsc::unbounded_channel();

    let writer = WritePump {
        id,
        user_id,
        outbound,
        probe,
        activity: activity.clone(),
        hub: hub.clone(),
        released: released_tx,
        awaiting_pong: awaiting_tx,
    };
    let reader = ReadPump {
        id,
        user_id,
        activity,
        hub,
        handler,
        max_message_size,
        released: released_rx,
        awaiting_pong: awaiting_rx,
    };

    Pumps {
        writer: tokio::spawn(writer.run(sink)),
        reader: tokio::spawn(reader.run(stream)),
    }
}

struct ReadPump {
    id: Uuid,
    user_id: UserId,
    activity: Arc<Activity>,
    hub: HubHandle,
    handler: Arc<dyn MessageHandler>,
    max_message_size: usize,
    released: watch::Receiver<bool>,
    /// Replies of probes waiting for the peer's pong
    awaiting_pong: mpsc::UnboundedReceiver<oneshot::Sender<bool>>,
}

impl ReadPump {
    async fn run<R, E>(mut self, mut stream: R)
    where
        R: Stream<Item = Result<Message, E>> + Unpin,
        E: Display,
    {
        loop {
            let frame = tokio::select! {
                // The writer has closed the socket, or is gone
                _ = self.released.changed() => break,
                frame = stream.next() => frame,
            };

            let payload = match frame {
                Some(Ok(Message::Binary(data))) => data,
                Some(Ok(Message::Text(text))) => Bytes::copy_from_slice(text.as_str().as_bytes()),
                Some(Ok(Message::Ping(_))) => {
                    self.activity.touch();
                    continue;
                }
                Some(Ok(Message::Pong(_))) => {
                    self.activity.touch();
                    while let Ok(reply) = self.awaiting_pong.try_recv() {
                        let _ = reply.send(true);
                    }
                    continue;
                }
                Some(Ok(Message::Close(frame))) => {
                    tracing::debug!(
                        user_id = self.user_id,
                        connection_id = %self.id,
                        frame = ?frame,
                        "Received close frame"
                    );
                    break;
                }
                Some(Err(e)) => {
                    tracing::debug!(
                        user_id = self.user_id,
                        connection_id = %self.id,
                        error = %e,
                        "WebSocket read failed"
                    );
                    break;
                }
                None => break,
            };

            if payload.len() > self.max_message_size {
                tracing::warn!(
                    user_id = self.user_id,
                    connection_id = %self.id,
                    size = payload.len(),
                    limit = self.max_message_size,
                    "Inbound message exceeds size limit"
                );
                break;
            }

            self.activity.touch();
            DeliveryMetrics::record_received();
            self.handler.handle(self.user_id, payload);
        }

        // Closing the queue makes the writer close the socket
        let _ = self
            .hub
            .unregister(self.user_id, self.id, CloseReason::ReadClosed)
            .await;
    }
}

struct WritePump {
    id: Uuid,
    user_id: UserId,
    outbound: mpsc::Receiver<Bytes>,
    probe: mpsc::Receiver<Probe>,
    activity: Arc<Activity>,
    hub: HubHandle,
    released: watch::Sender<bool>,
    awaiting_pong: mpsc::UnboundedSender<oneshot::Sender<bool>>,
}

impl WritePump {
    async fn run<W>(mut self, mut sink: W)
    where
        W: Sink<Message> + Unpin,
        W::Error: Display,
    {
        let failed = loop {
            tokio::select! {
                message = self.outbound.recv() => match message {
                    Some(bytes) => {
                        if let Err(e) = sink.send(Message::Binary(bytes)).await {
                            tracing::debug!(
                                user_id = self.user_id,
                                connection_id = %self.id,
                                error = %e,
                                "WebSocket write failed"
                            );
                            break true;
                        }
                        self.activity.touch();
                    }
                    // Record left the registry
                    None => break false,
                },
                Some(probe) = self.probe.recv() => {
                    // Parked before the write so an early pong still finds it
                    if let Err(unparked) = self.awaiting_pong.send(probe.reply) {
                        let _ = unparked.0.send(false);
                        break false;
                    }
                    if let Err(e) = sink.send(Message::Ping(Bytes::new())).await {
                        tracing::debug!(
                            user_id = self.user_id,
                            connection_id = %self.id,
                            error = %e,
                            "WebSocket ping failed"
                        );
                        break true;
                    }
                }
            }
        };

        if failed {
            let _ = self
                .hub
                .unregister(self.user_id, self.id, CloseReason::WriteFailed)
                .await;
        }

        let close = Message::Close(Some(CloseFrame {
            code: close_code::NORMAL,
            reason: Utf8Bytes::from_static(""),
        }));
        let _ = sink.send(close).await;
        let _ = sink.close().await;
        let _ = self.released.send(true);

        tracing::debug!(
            user_id = self.user_id,
            connection_id = %self.id,
            "Outbound pump stopped"
        );
    }
}
