//! [`ObstacleMonitor`] – range sensor poll plus the hard obstacle interlock.
//!
//! Every poll period the monitor takes one distance measurement, stores it in
//! the [`SafetyState`], and lets the state apply the interlock: an obstacle
//! closer than the threshold while driving forward stops the drivetrain in
//! the same critical section.  When that happens an `obstacle_detected`
//! event is sent upstream.
//!
//! A sensor that does not answer within the measurement budget is read as
//! [`SENSOR_TIMEOUT_DISTANCE_CM`][mower_types::SENSOR_TIMEOUT_DISTANCE_CM]
//! ("nothing in range").  Sensor errors back off and retry; the loop only
//! ends on shutdown.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use mower_hal::{RangeReading, RangeSensor};
use mower_kernel::{InterlockOutcome, SafetyState};
use mower_middleware::TelemetryLink;
use mower_types::{MowerError, ObstacleReport, OutboundEvent};
use tracing::{debug, info, warn};

use crate::config::ControllerConfig;
use crate::shutdown::{self, ShutdownSignal};

pub struct ObstacleMonitor {
    sensor: Box<dyn RangeSensor>,
    state: SafetyState,
    link: Arc<dyn TelemetryLink>,
    threshold_cm: f32,
    sensor_timeout: Duration,
    poll: Duration,
    backoff: Duration,
    obstacle_present: bool,
}

impl ObstacleMonitor {
    pub fn new(
        sensor: Box<dyn RangeSensor>,
        state: SafetyState,
        link: Arc<dyn TelemetryLink>,
        config: &ControllerConfig,
    ) -> Self {
        Self {
            sensor,
            state,
            link,
            threshold_cm: config.obstacle_threshold_cm,
            sensor_timeout: config.sensor_timeout(),
            poll: config.obstacle_poll(),
            backoff: config.error_backoff(),
            obstacle_present: false,
        }
    }

    /// Take one measurement and apply the interlock.
    ///
    /// # Errors
    ///
    /// [`MowerError::Sensor`] from the sensor, or [`MowerError::Actuator`] if
    /// the interlock stop could not be applied.  A failed `obstacle_detected`
    /// send is only logged.
    pub async fn poll_once(&mut self) -> Result<InterlockOutcome, MowerError> {
        let reading =
            match tokio::time::timeout(self.sensor_timeout, self.sensor.measure_distance_cm()).await {
                Ok(reading) => reading?,
                Err(_) => {
                    debug!(sensor = self.sensor.id(), "range sensor did not answer in time");
                    RangeReading::Timeout
                }
            };
        let distance_cm = reading.distance_cm();
        let outcome = self.state.record_distance(distance_cm, self.threshold_cm)?;

        if outcome.obstacle && !self.obstacle_present {
            warn!(distance_cm, "obstacle detected");
        } else if !outcome.obstacle && self.obstacle_present {
            info!(distance_cm, "obstacle cleared");
        }
        self.obstacle_present = outcome.obstacle;

        if outcome.stopped && self.link.is_connected() {
            let report = OutboundEvent::ObstacleDetected(ObstacleReport {
                distance: distance_cm,
                timestamp: Utc::now(),
            });
            if let Err(e) = self.link.send(report).await {
                warn!(error = %e, "failed to report obstacle upstream");
            }
        }
        Ok(outcome)
    }

    pub async fn run(mut self, mut shutdown: ShutdownSignal) {
        info!(sensor = self.sensor.id(), "obstacle monitor started");
        loop {
            let delay = match self.poll_once().await {
                Ok(_) => self.poll,
                Err(e) => {
                    warn!(error = %e, "obstacle monitor error; backing off");
                    self.backoff
                }
            };
            if shutdown::sleep(&mut shutdown, delay).await {
                break;
            }
        }
        info!("obstacle monitor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mower_hal::sim::{ActuationLog, SimActuation, SimRangeSensor};
    use mower_middleware::{EventBus, LoopbackHandle, LoopbackLink};
    use mower_types::Direction;
    use tokio::sync::watch;

    struct Rig {
        monitor: ObstacleMonitor,
        sensor: SimRangeSensor,
        state: SafetyState,
        log: ActuationLog,
        supervisor: LoopbackHandle,
    }

    async fn rig(sensor: SimRangeSensor) -> Rig {
        let port = SimActuation::new();
        let log = port.log();
        let state = SafetyState::new(Box::new(port));
        let link = LoopbackLink::new(Arc::new(EventBus::default()));
        let supervisor = link.handle();
        link.connect().await.unwrap();
        let monitor = ObstacleMonitor::new(
            Box::new(sensor.clone()),
            state.clone(),
            Arc::new(link),
            &ControllerConfig::default(),
        );
        Rig {
            monitor,
            sensor,
            state,
            log,
            supervisor,
        }
    }

    #[tokio::test]
    async fn close_obstacle_stops_forward_motion_and_reports() {
        let mut rig = rig(SimRangeSensor::new("front", 200.0)).await;
        rig.state.manual_drive(Direction::Forward, 50).unwrap();
        rig.sensor.push_reading(RangeReading::Distance(18.0));

        let outcome = rig.monitor.poll_once().await.unwrap();
        assert!(outcome.stopped);
        assert_eq!(rig.log.last_drive(), Some((Direction::Stop, 0)));
        assert_eq!(rig.supervisor.obstacle_alerts(), vec![18.0]);

        let snap = rig.state.snapshot();
        assert!(snap.obstacle_detected);
        assert_eq!(snap.last_distance_cm, 18.0);
    }

    #[tokio::test]
    async fn obstacle_while_turning_is_recorded_but_not_reported() {
        let mut rig = rig(SimRangeSensor::new("front", 10.0)).await;
        rig.state.manual_drive(Direction::Left, 40).unwrap();

        let outcome = rig.monitor.poll_once().await.unwrap();
        assert!(outcome.obstacle);
        assert!(!outcome.stopped);
        assert_eq!(rig.state.snapshot().direction, Direction::Left);
        assert!(rig.supervisor.obstacle_alerts().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_sensor_reads_as_clear() {
        let sensor = SimRangeSensor::new("front", 5.0).with_latency(Duration::from_millis(500));
        let mut rig = rig(sensor).await;
        rig.state.manual_drive(Direction::Forward, 50).unwrap();

        let outcome = rig.monitor.poll_once().await.unwrap();
        assert_eq!(outcome.distance_cm, 400.0);
        assert!(!outcome.obstacle);
        assert_eq!(rig.state.snapshot().direction, Direction::Forward);
    }

    #[tokio::test(start_paused = true)]
    async fn consecutive_timeouts_keep_the_loop_alive() {
        let rig = rig(SimRangeSensor::new("front", 150.0)).await;
        rig.sensor.push_reading(RangeReading::Timeout);
        rig.sensor.push_reading(RangeReading::Timeout);
        rig.state.manual_drive(Direction::Forward, 50).unwrap();

        let (tx, rx) = watch::channel(false);
        let sensor = rig.sensor.clone();
        let state = rig.state.clone();
        let task = tokio::spawn(rig.monitor.run(rx));

        // Two polls, both timeouts.
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(sensor.measurements(), 2);
        let snap = state.snapshot();
        assert_eq!(snap.last_distance_cm, 400.0);
        assert!(!snap.obstacle_detected);
        assert!(snap.moving);

        // The loop is still polling and still enforces the interlock.
        sensor.set_distance(12.0);
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(!state.snapshot().moving);

        tx.send(true).unwrap();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn sensor_error_backs_off_then_recovers() {
        let rig = rig(SimRangeSensor::new("front", 120.0)).await;
        rig.sensor.push_error("echo line stuck high");

        let (tx, rx) = watch::channel(false);
        let sensor = rig.sensor.clone();
        let state = rig.state.clone();
        let task = tokio::spawn(rig.monitor.run(rx));

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(sensor.measurements(), 1, "backoff must delay the retry");

        tokio::time::sleep(Duration::from_millis(700)).await;
        assert!(sensor.measurements() >= 2);
        assert_eq!(state.snapshot().last_distance_cm, 120.0);

        tx.send(true).unwrap();
        task.await.unwrap();
    }
}
