use std::{sync::Arc, time::Duration};

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::decision::orchestrator::{Orchestrator, PeriodicOutcome};

/// Fires [`Orchestrator::run_periodic_decision`] at a fixed cadence.
pub struct PeriodicScheduler {
    orchestrator: Arc<Orchestrator>,
    interval: Duration,
}

impl PeriodicScheduler {
    pub fn new(orchestrator: Arc<Orchestrator>, interval: Duration) -> Self {
        Self {
            orchestrator,
            interval,
        }
    }

    /// `None` when the configured interval disables periodic decisions.
    pub fn from_config(orchestrator: Arc<Orchestrator>) -> Option<Self> {
        let interval = orchestrator.config().periodic_interval()?;
        Some(Self::new(orchestrator, interval))
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub async fn run(self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::info!(
            target: "decision.scheduler",
            interval_ms = self.interval.as_millis() as u64,
            "periodic_scheduler_started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let outcome = tokio::select! {
                _ = shutdown.cancelled() => break,
                outcome = self.orchestrator.run_periodic_decision() => outcome,
            };
            log_outcome(&outcome);
        }

        tracing::info!(target: "decision.scheduler", "periodic_scheduler_stopped");
    }
}

fn log_outcome(outcome: &PeriodicOutcome) {
    match outcome {
        PeriodicOutcome::Skipped(reason) => {
            tracing::debug!(target: "decision.scheduler", reason = ?reason, "periodic_tick_skipped")
        }
        PeriodicOutcome::NoAction { .. } => {
            tracing::debug!(target: "decision.scheduler", "periodic_tick_no_action")
        }
        PeriodicOutcome::Chosen { action, .. } => {
            tracing::debug!(target: "decision.scheduler", action = %action, "periodic_tick_chose_action")
        }
        PeriodicOutcome::Failed(err) => {
            tracing::debug!(target: "decision.scheduler", error = %err, "periodic_tick_failed")
        }
    }
}
