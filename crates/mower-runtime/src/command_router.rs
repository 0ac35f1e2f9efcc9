//! [`CommandRouter`] – applies supervisor input to the safety state.
//!
//! | Inbound event | Effect |
//! |---|---|
//! | `Connected` | mark link healthy, clear lockout, send a status snapshot |
//! | `Disconnected` | lock out the engine, force Stop + blade off |
//! | `Heartbeat` | refresh the heartbeat clock, reply with status |
//! | `Command` | movement, then blade, then autonomous toggle |
//!
//! A malformed command is rejected as a whole; nothing in it is applied.

use std::sync::Arc;

use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use mower_kernel::{DriveOutcome, LinkHealth, SafetyState};
use mower_middleware::TelemetryLink;
use mower_types::{ControlCommand, InboundEvent, MowerError, OutboundEvent};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::shutdown::{self, ShutdownSignal};

pub struct CommandRouter {
    state: SafetyState,
    health: Arc<LinkHealth>,
    link: Arc<dyn TelemetryLink>,
}

impl CommandRouter {
    pub fn new(state: SafetyState, health: Arc<LinkHealth>, link: Arc<dyn TelemetryLink>) -> Self {
        Self {
            state,
            health,
            link,
        }
    }

    /// Apply one inbound event.
    ///
    /// # Errors
    ///
    /// [`MowerError::Protocol`] for an unparseable or empty command and
    /// [`MowerError::Actuator`] when a command could not be driven.  Status
    /// replies that fail to send are only logged.
    pub async fn handle(&self, event: InboundEvent) -> Result<(), MowerError> {
        match event {
            InboundEvent::Connected => {
                info!("supervisor connected");
                self.health.mark_connected();
                self.state.set_link_lost(false);
                self.send_status().await;
                Ok(())
            }
            InboundEvent::Disconnected => {
                warn!("supervisor disconnected; stopping mower");
                self.health.mark_disconnected();
                self.state.set_link_lost(true);
                self.state.force_stop(true)
            }
            InboundEvent::Heartbeat => {
                self.health.heartbeat();
                self.send_status().await;
                Ok(())
            }
            InboundEvent::Command(payload) => self.apply_command(payload),
        }
    }

    fn apply_command(&self, payload: Value) -> Result<(), MowerError> {
        let command: ControlCommand = serde_json::from_value(payload)
            .map_err(|e| MowerError::Protocol(format!("malformed command: {e}")))?;
        if command.is_empty() {
            return Err(MowerError::Protocol(
                "command carries no movement, blade, or autonomous field".to_string(),
            ));
        }
        // A well-formed command proves the supervisor is alive.
        self.health.heartbeat();

        if let Some(movement) = command.movement {
            debug!(direction = %movement.direction, speed = movement.speed, "manual drive");
            if self.state.manual_drive(movement.direction, movement.speed)?
                == DriveOutcome::Preempted
            {
                debug!("manual drive ignored; controller is halted");
            }
        }
        if let Some(blade) = command.blade {
            debug!(active = blade.active, speed = blade.speed, "manual blade");
            self.state.manual_blade(blade.active, blade.speed)?;
        }
        if let Some(enabled) = command.autonomous {
            info!(enabled, "autonomous mode toggled");
            self.state.set_autonomous(enabled)?;
        }
        Ok(())
    }

    async fn send_status(&self) {
        if !self.link.is_connected() {
            return;
        }
        let status = OutboundEvent::MowerStatus(self.state.snapshot());
        if let Err(e) = self.link.send(status).await {
            warn!(error = %e, "failed to send status reply");
        }
    }

    /// Drain `inbound` until it ends or shutdown is requested.
    pub async fn run(self, mut inbound: BoxStream<'static, InboundEvent>, mut shutdown: ShutdownSignal) {
        info!("command router started");
        loop {
            let event = tokio::select! {
                _ = shutdown::signalled(&mut shutdown) => break,
                event = inbound.next() => event,
            };
            let Some(event) = event else {
                debug!("inbound stream ended");
                break;
            };
            if let Err(e) = self.handle(event).await {
                warn!(error = %e, "command rejected");
            }
        }
        info!("command router stopped");
    }
}
