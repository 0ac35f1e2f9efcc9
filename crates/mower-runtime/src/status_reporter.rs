//! Periodic status snapshots plus the simulated battery drain.

use std::sync::Arc;
use std::time::Duration;

use mower_kernel::SafetyState;
use mower_middleware::TelemetryLink;
use mower_types::{MowerError, OutboundEvent, SafetySnapshot};
use tracing::{debug, info, warn};

use crate::config::ControllerConfig;
use crate::shutdown::{self, ShutdownSignal};

pub struct StatusReporter {
    state: SafetyState,
    link: Arc<dyn TelemetryLink>,
    period: Duration,
    battery_step: f32,
}

impl StatusReporter {
    pub fn new(state: SafetyState, link: Arc<dyn TelemetryLink>, config: &ControllerConfig) -> Self {
        Self {
            state,
            link,
            period: config.status_tick(),
            battery_step: config.battery_step_pct,
        }
    }

    /// Drain the battery, then send a snapshot if the link is up.
    ///
    /// Returns the snapshot that was (or would have been) sent.
    ///
    /// # Errors
    ///
    /// Propagates the link's send error.
    pub async fn tick_once(&self) -> Result<SafetySnapshot, MowerError> {
        self.state.decay_battery(self.battery_step);
        let snapshot = self.state.snapshot();
        if self.link.is_connected() {
            self.link
                .send(OutboundEvent::MowerStatus(snapshot.clone()))
                .await?;
        } else {
            debug!("link down; status snapshot not sent");
        }
        Ok(snapshot)
    }

    pub async fn run(self, mut shutdown: ShutdownSignal) {
        info!(period_ms = self.period.as_millis() as u64, "status reporter started");
        loop {
            if let Err(e) = self.tick_once().await {
                warn!(error = %e, "status report failed");
            }
            if shutdown::sleep(&mut shutdown, self.period).await {
                break;
            }
        }
        info!("status reporter stopped");
    }
}
