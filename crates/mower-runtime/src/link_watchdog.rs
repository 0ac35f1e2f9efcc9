//! [`LinkWatchdog`] – stops the mower when remote supervision is lost.
//!
//! Once per tick the watchdog classifies the supervisor link using the
//! lock-free [`LinkHealth`] clock:
//!
//! | Freshness | Action |
//! |---|---|
//! | `Fresh` | clear the link-lost lockout |
//! | `Stale` | lock out the pattern engine, force Stop + blade off |
//! | `Disconnected` | lock out the pattern engine |
//!
//! and, while the transport reports disconnected, attempts a reconnect
//! (best effort, retried every tick).  A reconnect attempt is bounded to half
//! a tick, so a relay that never finishes the handshake cannot hold up the
//! next staleness check.

use std::sync::Arc;
use std::time::Duration;

use mower_kernel::{LinkFreshness, LinkHealth, SafetyState};
use mower_middleware::TelemetryLink;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::ControllerConfig;
use crate::shutdown::{self, ShutdownSignal};

pub struct LinkWatchdog {
    health: Arc<LinkHealth>,
    state: SafetyState,
    link: Arc<dyn TelemetryLink>,
    tick: Duration,
    reconnect_timeout: Duration,
    last: Option<LinkFreshness>,
}

impl LinkWatchdog {
    pub fn new(
        health: Arc<LinkHealth>,
        state: SafetyState,
        link: Arc<dyn TelemetryLink>,
        config: &ControllerConfig,
    ) -> Self {
        Self {
            health,
            state,
            link,
            tick: config.watchdog_tick(),
            reconnect_timeout: config.watchdog_tick() / 2,
            last: None,
        }
    }

    /// Run one supervision check as of `now`.
    pub async fn check_once(&mut self, now: Instant) -> LinkFreshness {
        let freshness = self.health.freshness(now);
        let was = self.last.replace(freshness);

        match freshness {
            LinkFreshness::Fresh => {
                if matches!(was, Some(LinkFreshness::Stale { .. })) {
                    info!("supervisor heartbeat restored");
                }
                self.state.set_link_lost(false);
            }
            LinkFreshness::Stale { silent_for } => {
                let silent_ms = silent_for.as_millis() as u64;
                if matches!(was, Some(LinkFreshness::Stale { .. })) {
                    debug!(silent_ms, "supervisor still silent");
                } else {
                    warn!(silent_ms, "lost supervisor heartbeat; stopping mower");
                }
                self.state.set_link_lost(true);
                if let Err(e) = self.state.force_stop(true) {
                    error!(error = %e, "watchdog could not stop the mower");
                }
            }
            LinkFreshness::Disconnected => {
                self.state.set_link_lost(true);
                if was.is_some_and(|w| w != LinkFreshness::Disconnected) {
                    warn!("supervisor link down; stopping mower");
                    if let Err(e) = self.state.force_stop(true) {
                        error!(error = %e, "watchdog could not stop the mower");
                    }
                }
            }
        }

        if !self.link.is_connected() {
            match tokio::time::timeout(self.reconnect_timeout, self.link.connect()).await {
                Ok(Ok(())) => info!("reconnected to supervisor"),
                Ok(Err(e)) => warn!(error = %e, "reconnect failed; retrying next tick"),
                Err(_) => warn!(
                    timeout_ms = self.reconnect_timeout.as_millis() as u64,
                    "reconnect timed out; retrying next tick"
                ),
            }
        }
        freshness
    }

    pub async fn run(mut self, mut shutdown: ShutdownSignal) {
        info!(timeout_ms = self.health.timeout().as_millis() as u64, "link watchdog started");
        loop {
            let started = Instant::now();
            self.check_once(started).await;
            if shutdown::sleep_until(&mut shutdown, started + self.tick).await {
                break;
            }
        }
        info!("link watchdog stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mower_hal::sim::{ActuationCall, ActuationLog, SimActuation};
    use mower_middleware::{EventBus, LoopbackHandle, LoopbackLink};
    use futures_util::stream::{self, BoxStream};
    use mower_types::{Direction, InboundEvent, MowerError, OutboundEvent};
    use tokio::sync::watch;

    struct Rig {
        watchdog: LinkWatchdog,
        health: Arc<LinkHealth>,
        state: SafetyState,
        log: ActuationLog,
        supervisor: LoopbackHandle,
    }

    async fn rig() -> Rig {
        let port = SimActuation::new();
        let log = port.log();
        let state = SafetyState::new(Box::new(port));
        let config = ControllerConfig::default();
        let health = Arc::new(LinkHealth::new(config.heartbeat_timeout()));
        let link = LoopbackLink::new(Arc::new(EventBus::default()));
        let supervisor = link.handle();
        link.connect().await.unwrap();
        health.mark_connected();
        let watchdog = LinkWatchdog::new(Arc::clone(&health), state.clone(), Arc::new(link), &config);
        Rig {
            watchdog,
            health,
            state,
            log,
            supervisor,
        }
    }

    fn ends_with_full_stop(log: &ActuationLog) -> bool {
        let calls = log.calls();
        calls.len() >= 2
            && calls[calls.len() - 2..]
                == [
                    ActuationCall::Drive {
                        direction: Direction::Stop,
                        speed_pct: 0,
                    },
                    ActuationCall::Blade {
                        active: false,
                        speed_pct: 0,
                    },
                ]
    }

    #[tokio::test]
    async fn fresh_link_leaves_motion_alone() {
        let mut rig = rig().await;
        rig.state.manual_drive(Direction::Forward, 50).unwrap();
        let freshness = rig.watchdog.check_once(Instant::now()).await;
        assert_eq!(freshness, LinkFreshness::Fresh);
        assert_eq!(rig.state.snapshot().direction, Direction::Forward);
        assert!(!rig.state.control_view().link_lost);
    }

    #[tokio::test]
    async fn stale_link_forces_full_stop() {
        let mut rig = rig().await;
        rig.state.manual_drive(Direction::Forward, 50).unwrap();
        rig.state.manual_blade(true, 100).unwrap();

        let later = Instant::now() + Duration::from_secs(11);
        let freshness = rig.watchdog.check_once(later).await;
        assert!(matches!(freshness, LinkFreshness::Stale { .. }));

        let snap = rig.state.snapshot();
        assert!(!snap.moving);
        assert!(!snap.blade_active);
        assert!(rig.state.control_view().link_lost);
        assert!(ends_with_full_stop(&rig.log));
    }

    #[tokio::test]
    async fn heartbeat_after_stale_lifts_lockout() {
        let mut rig = rig().await;
        let later = Instant::now() + Duration::from_secs(11);
        rig.watchdog.check_once(later).await;
        assert!(rig.state.control_view().link_lost);

        rig.health.clock().beat_at(later);
        assert_eq!(rig.watchdog.check_once(later).await, LinkFreshness::Fresh);
        assert!(!rig.state.control_view().link_lost);
    }

    #[tokio::test]
    async fn disconnected_link_is_reconnected() {
        let mut rig = rig().await;
        rig.watchdog.check_once(Instant::now()).await;
        rig.state.manual_drive(Direction::Forward, 50).unwrap();

        rig.supervisor.drop_connection();
        rig.health.mark_disconnected();
        let attempts = rig.supervisor.connect_attempts();

        let freshness = rig.watchdog.check_once(Instant::now()).await;
        assert_eq!(freshness, LinkFreshness::Disconnected);
        assert!(rig.state.control_view().link_lost);
        assert!(!rig.state.snapshot().moving);
        assert_eq!(rig.supervisor.connect_attempts(), attempts + 1);
        assert!(rig.supervisor.is_connected());
    }

    #[tokio::test]
    async fn failed_reconnect_is_retried_next_tick() {
        let mut rig = rig().await;
        rig.supervisor.drop_connection();
        rig.supervisor.refuse_connections(true);
        let attempts = rig.supervisor.connect_attempts();

        rig.watchdog.check_once(Instant::now()).await;
        rig.watchdog.check_once(Instant::now()).await;
        assert_eq!(rig.supervisor.connect_attempts(), attempts + 2);
        assert!(!rig.supervisor.is_connected());
    }

    /// Accepts the attempt but never finishes the handshake.
    struct HungLink;

    #[async_trait::async_trait]
    impl TelemetryLink for HungLink {
        async fn connect(&self) -> Result<(), MowerError> {
            std::future::pending().await
        }
        async fn disconnect(&self) -> Result<(), MowerError> {
            Ok(())
        }
        fn is_connected(&self) -> bool {
            false
        }
        async fn send(&self, _event: OutboundEvent) -> Result<(), MowerError> {
            Err(MowerError::Link("not connected".into()))
        }
        fn inbound_stream(&self) -> BoxStream<'static, InboundEvent> {
            Box::pin(stream::pending())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn hung_reconnect_does_not_stall_supervision() {
        let port = SimActuation::new();
        let log = port.log();
        let state = SafetyState::new(Box::new(port));
        let config = ControllerConfig::default();
        let health = Arc::new(LinkHealth::new(config.heartbeat_timeout()));
        health.mark_connected();
        let mut watchdog =
            LinkWatchdog::new(Arc::clone(&health), state.clone(), Arc::new(HungLink), &config);

        let started = Instant::now();
        let freshness = tokio::time::timeout(Duration::from_secs(30), watchdog.check_once(started))
            .await
            .expect("check_once must return while connect hangs");
        assert_eq!(freshness, LinkFreshness::Fresh);
        assert!(started.elapsed() <= config.watchdog_tick());

        // The run loop keeps its cadence and still catches the stale link.
        state.manual_drive(Direction::Forward, 50).unwrap();
        state.manual_blade(true, 100).unwrap();
        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(watchdog.run(rx));
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(!state.snapshot().moving);
        assert!(ends_with_full_stop(&log));

        tx.send(true).unwrap();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn run_loop_stops_mower_within_one_tick_of_timeout() {
        let rig = rig().await;
        rig.state.manual_drive(Direction::Forward, 50).unwrap();
        rig.state.manual_blade(true, 100).unwrap();

        let (tx, rx) = watch::channel(false);
        let state = rig.state.clone();
        let task = tokio::spawn(rig.watchdog.run(rx));

        tokio::time::sleep(Duration::from_millis(9_500)).await;
        assert!(state.snapshot().moving);

        // Stale after 10 s; detected by the 11 s tick at the latest.
        tokio::time::sleep(Duration::from_millis(2_000)).await;
        let snap = state.snapshot();
        assert!(!snap.moving);
        assert!(!snap.blade_active);
        assert!(ends_with_full_stop(&rig.log));

        tx.send(true).unwrap();
        task.await.unwrap();
    }
}
