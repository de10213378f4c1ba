mod liveness;

pub use liveness::{LivenessMonitor, ProbeReport};
