//! Errors, reports and statistics produced by the hub

use serde::Serialize;
use thiserror::Error;

use super::client::UserId;

/// Errors reported to callers of the hub's programmatic surface
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HubError {
    #[error("recipient {0} not found")]
    NotFound(UserId),

    #[error("timed out waiting for queue capacity of recipient {0}")]
    SendTimeout(UserId),

    #[error("recipient {0} disconnected during send")]
    Disconnected(UserId),

    #[error("hub coordinator is not running")]
    Closed,
}

/// Why a record left the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Inbound pump saw a read error, close frame or end of stream
    ReadClosed,
    /// Outbound pump failed to write a frame
    WriteFailed,
    /// Liveness probe failed or timed out
    ProbeFailed,
    /// Outbound queue was full during a broadcast
    QueueFull,
    /// Point-to-point send did not get queue capacity in time
    SendTimeout,
    /// A newer connection registered under the same user id
    Superseded,
    /// The coordinator is shutting down
    Shutdown,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReadClosed => "read_closed",
            Self::WriteFailed => "write_failed",
            Self::ProbeFailed => "probe_failed",
            Self::QueueFull => "queue_full",
            Self::SendTimeout => "send_timeout",
            Self::Superseded => "superseded",
            Self::Shutdown => "shutdown",
        }
    }
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a single broadcast round
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastReport {
    /// Clients whose queue accepted the message
    pub delivered: usize,
    /// Clients evicted because their queue was full or closed
    pub evicted: usize,
}

/// Registry statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct HubStats {
    pub connections: usize,
    pub registered_total: u64,
    /// Records removed for any reason, superseded and shutdown included
    pub evicted_total: u64,
    pub broadcasts_total: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        assert_eq!(HubError::NotFound(3).to_string(), "recipient 3 not found");
        assert_eq!(HubError::Closed.to_string(), "hub coordinator is not running");
    }

    #[test]
    fn test_close_reason_labels() {
        assert_eq!(CloseReason::QueueFull.to_string(), "queue_full");
        assert_eq!(CloseReason::Superseded.as_str(), "superseded");
    }
}
