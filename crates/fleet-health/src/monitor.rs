//! Health monitor: background task that re-probes hosts on an interval.
//!
//! Each tick runs a batch check over the hosts that are due; hosts that keep
//! failing are probed less often (see [`crate::HealthTracker`]).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info};

use crate::registry::HostRegistry;

pub struct HealthMonitor {
    registry: Arc<HostRegistry>,
    interval: Duration,
}

impl HealthMonitor {
    pub fn new(registry: Arc<HostRegistry>, interval: Duration) -> Self {
        Self { registry, interval }
    }

    /// Run until `shutdown` flips.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.interval.as_secs(), "health monitor started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    if let Err(e) = self.registry.batch_health_check_due().await {
                        error!(error = %e, "health sweep failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("health monitor shutting down");
                    break;
                }
            }
        }
    }
}
