//! Periodic certificate sweep
//!
//! Every declared certificate is evaluated when it is declared and whenever
//! an event arrives. The scheduler adds a slow periodic pass so expiry and
//! the renewal window are noticed on an otherwise idle gateway.

use std::time::Duration;

use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::manager::CertManager;

/// Default sweep interval (24 hours)
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(24 * 3600);

/// Minimum sweep interval (1 hour)
pub const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

/// Background task that sweeps all certificates on an interval
pub struct SweepScheduler {
    manager: CertManager,
    sweep_interval: Duration,
}

impl SweepScheduler {
    pub fn new(manager: CertManager) -> Self {
        Self {
            manager,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }

    /// Set the sweep interval
    ///
    /// Clamped to a minimum of 1 hour.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval.max(MIN_SWEEP_INTERVAL);
        self
    }

    pub fn interval(&self) -> Duration {
        self.sweep_interval
    }

    /// Sweep until cancelled
    ///
    /// The first sweep happens one interval after start; declarations are
    /// evaluated on arrival.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            sweep_interval_hours = self.sweep_interval.as_secs() / 3600,
            "Starting certificate sweep scheduler"
        );

        let mut ticker = interval_at(Instant::now() + self.sweep_interval, self.sweep_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    debug!("Running scheduled certificate sweep");
                    if let Err(e) = self.manager.sweep().await {
                        warn!(error = %e, "Scheduled certificate sweep failed");
                        break;
                    }
                }
            }
        }

        debug!("Certificate sweep scheduler stopped");
    }
}

impl std::fmt::Debug for SweepScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SweepScheduler")
            .field("sweep_interval", &self.sweep_interval)
            .finish()
    }
}
