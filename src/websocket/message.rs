use axum::body::Bytes;

use crate::hub::UserId;

/// Consumer of inbound payloads.
///
/// Called synchronously from the inbound pump after every successful read,
/// so implementations should hand long work off to another task.
pub trait MessageHandler: Send + Sync + 'static {
    fn handle(&self, user_id: UserId, payload: Bytes);
}

/// Default handler: payloads are opaque, only their arrival is logged
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingHandler;

impl MessageHandler for LoggingHandler {
    fn handle(&self, user_id: UserId, payload: Bytes) {
        tracing::debug!(user_id = user_id, bytes = payload.len(), "Inbound message");
    }
}

impl<F> MessageHandler for F
where
    F: Fn(UserId, Bytes) + Send + Sync + 'static,
{
    fn handle(&self, user_id: UserId, payload: Bytes) {
        self(user_id, payload)
    }
}
