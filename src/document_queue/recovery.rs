//! Stuck-job watchdog.
//!
//! Startup recovery handles jobs abandoned by a crash; this watchdog handles
//! the rarer case of a job that entered processing and never left, e.g. a
//! processor that hung past any reasonable duration while the server stayed
//! up.

use super::manager::QueueManager;
use crate::config::RecoverySettings;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

pub struct StuckJobWatchdog {
    manager: Arc<QueueManager>,
    settings: RecoverySettings,
}

impl StuckJobWatchdog {
    pub fn new(manager: Arc<QueueManager>, settings: RecoverySettings) -> Self {
        Self { manager, settings }
    }

    /// Run the watchdog until the shutdown token is cancelled.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            "Stuck job watchdog started (interval {}s, timeout {}s)",
            self.settings.interval_secs, self.settings.stuck_timeout_secs
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = sleep(Duration::from_secs(self.settings.interval_secs)) => {}
            }

            if let Err(e) = self
                .manager
                .recover_stuck_jobs(Some(self.settings.stuck_timeout_secs))
            {
                error!("Stuck job scan failed: {:#}", e);
            }
        }

        info!("Stuck job watchdog stopped");
    }
}
