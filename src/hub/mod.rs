//! Live-connection registry and fan-out broadcaster
//!
//! This module provides:
//! - The connection record and its bounded outbound queue
//! - The coordinator task that serializes every registry access
//! - A cloneable handle for register/unregister/broadcast/send

mod client;
mod coordinator;
mod handle;
mod types;

pub use client::{Activity, Client, ClientQueues, Probe, ProbeTarget, UserId};
pub use coordinator::Hub;
pub use handle::HubHandle;
pub use types::{BroadcastReport, CloseReason, HubError, HubStats};
