use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio::sync::broadcast;
use tokio::time::timeout;

use crate::config::WebSocketConfig;
use crate::hub::{CloseReason, HubHandle, ProbeTarget};
use crate::metrics::ProbeMetrics;

/// Maximum concurrent probes to avoid overwhelming the system
const MAX_CONCURRENT_PROBES: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProbeOutcome {
    Alive,
    Failed,
    TimedOut,
}

/// Result of one liveness round
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProbeReport {
    pub probed: usize,
    pub alive: usize,
    pub evicted: usize,
}

/// Background task that pings idle connections and evicts the ones whose
/// peer does not answer with a pong in time. A failed probe only ever affects
/// its own connection.
pub struct LivenessMonitor {
    hub: HubHandle,
    interval: Duration,
    probe_timeout: Duration,
    shutdown: broadcast::Receiver<()>,
}

impl LivenessMonitor {
    pub fn new(
        config: &WebSocketConfig,
        hub: HubHandle,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self::with_intervals(
            hub,
            config.heartbeat_interval(),
            config.probe_timeout(),
            shutdown,
        )
    }

    pub fn with_intervals(
        hub: HubHandle,
        interval: Duration,
        probe_timeout: Duration,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            hub,
            interval,
            probe_timeout,
            shutdown,
        }
    }

    /// Run until shutdown is signalled
    pub async fn run(mut self) {
        let mut timer = tokio::time::interval(self.interval);

        // Skip immediate first tick
        timer.tick().await;

        tracing::info!(
            interval_ms = self.interval.as_millis() as u64,
            probe_timeout_ms = self.probe_timeout.as_millis() as u64,
            "Liveness monitor started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("Liveness monitor received shutdown signal");
                    break;
                }
                _ = timer.tick() => {
                    self.probe_idle().await;
                }
            }
        }

        tracing::info!("Liveness monitor stopped");
    }

    /// Probe every connection idle for at least one interval
    pub async fn probe_idle(&self) -> ProbeReport {
        let targets = match self.hub.idle_clients(self.interval).await {
            Ok(targets) => targets,
            Err(e) => {
                tracing::warn!(error = %e, "Could not list idle connections");
                return ProbeReport::default();
            }
        };

        if targets.is_empty() {
            return ProbeReport::default();
        }

        let start = Instant::now();
        let mut report = ProbeReport {
            probed: targets.len(),
            ..Default::default()
        };

        for batch in targets.chunks(MAX_CONCURRENT_PROBES) {
            let outcomes = join_all(batch.iter().map(|target| self.probe(target))).await;

            for outcome in outcomes {
                match outcome {
                    ProbeOutcome::Alive => report.alive += 1,
                    ProbeOutcome::Failed | ProbeOutcome::TimedOut => report.evicted += 1,
                }
            }
        }

        tracing::debug!(
            probed = report.probed,
            alive = report.alive,
            evicted = report.evicted,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Liveness round completed"
        );

        report
    }

    async fn probe(&self, target: &ProbeTarget) -> ProbeOutcome {
        let outcome = match timeout(self.probe_timeout, target.ping()).await {
            Ok(true) => ProbeOutcome::Alive,
            Ok(false) => ProbeOutcome::Failed,
            Err(_) => ProbeOutcome::TimedOut,
        };

        match outcome {
            ProbeOutcome::Alive => {
                target.activity.touch();
                ProbeMetrics::record_ok();
                return outcome;
            }
            ProbeOutcome::Failed => ProbeMetrics::record_failed(),
            ProbeOutcome::TimedOut => ProbeMetrics::record_timeout(),
        }

        tracing::info!(
            user_id = target.user_id,
            connection_id = %target.id,
            outcome = ?outcome,
            "Liveness probe failed, evicting connection"
        );

        if let Err(e) = self
            .hub
            .unregister(target.user_id, target.id, CloseReason::ProbeFailed)
            .await
        {
            tracing::warn!(error = %e, "Failed to unregister unreachable connection");
        }

        outcome
    }
}
