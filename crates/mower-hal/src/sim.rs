//! In-process simulated drivers for CI/CD testing without physical hardware.
//!
//! Every simulated driver is cheap to clone or hands out a cloneable handle,
//! so a test can keep one side while the control loops own the other:
//!
//! ```rust
//! use mower_hal::sim::{ActuationCall, SimActuation};
//! use mower_hal::ActuationPort;
//! use mower_types::Direction;
//!
//! let mut port = SimActuation::new();
//! let log = port.log();
//!
//! port.set_drive(Direction::Forward, 50).expect("sim drive must succeed");
//! assert_eq!(
//!     log.calls(),
//!     vec![ActuationCall::Drive { direction: Direction::Forward, speed_pct: 50 }]
//! );
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use mower_types::{DetectedObject, Direction, MowerError};
use tracing::debug;

use crate::actuator::ActuationPort;
use crate::camera::{CameraFrame, FrameSource, ObjectDetector};
use crate::range_sensor::{RangeReading, RangeSensor};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ────────────────────────────────────────────────────────────────────────────
// Simulated actuation
// ────────────────────────────────────────────────────────────────────────────

/// One command received by a [`SimActuation`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ActuationCall {
    Drive { direction: Direction, speed_pct: u8 },
    Blade { active: bool, speed_pct: u8 },
}

#[derive(Default)]
struct LogInner {
    calls: Vec<ActuationCall>,
    fault: bool,
}

/// Shared, ordered record of every command a [`SimActuation`] accepted.
#[derive(Clone, Default)]
pub struct ActuationLog {
    inner: Arc<Mutex<LogInner>>,
}

impl ActuationLog {
    /// Every accepted call, oldest first.
    pub fn calls(&self) -> Vec<ActuationCall> {
        lock(&self.inner).calls.clone()
    }

    /// Only the drive commands, oldest first.
    pub fn drive_history(&self) -> Vec<(Direction, u8)> {
        lock(&self.inner)
            .calls
            .iter()
            .filter_map(|c| match c {
                ActuationCall::Drive {
                    direction,
                    speed_pct,
                } => Some((*direction, *speed_pct)),
                _ => None,
            })
            .collect()
    }

    /// The most recent drive command, if any.
    pub fn last_drive(&self) -> Option<(Direction, u8)> {
        self.drive_history().last().copied()
    }

    /// The most recent blade command, if any.
    pub fn last_blade(&self) -> Option<(bool, u8)> {
        lock(&self.inner).calls.iter().rev().find_map(|c| match c {
            ActuationCall::Blade { active, speed_pct } => Some((*active, *speed_pct)),
            _ => None,
        })
    }

    /// Forget all recorded calls.
    pub fn clear(&self) {
        lock(&self.inner).calls.clear();
    }

    /// While `true`, every command fails with [`MowerError::Actuator`] and
    /// is not recorded.
    pub fn set_fault(&self, fault: bool) {
        lock(&self.inner).fault = fault;
    }

    fn record(&self, call: ActuationCall) -> Result<(), MowerError> {
        let mut inner = lock(&self.inner);
        if inner.fault {
            return Err(MowerError::Actuator {
                component: "sim_actuation".to_string(),
                details: "simulated driver fault".to_string(),
            });
        }
        inner.calls.push(call);
        Ok(())
    }
}

/// A simulated drivetrain + blade that records every command.
#[derive(Default)]
pub struct SimActuation {
    log: ActuationLog,
}

impl SimActuation {
    /// Create a new simulated port with an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// A handle onto this port's command log.
    pub fn log(&self) -> ActuationLog {
        self.log.clone()
    }
}

impl ActuationPort for SimActuation {
    fn set_drive(&mut self, direction: Direction, speed_pct: u8) -> Result<(), MowerError> {
        let speed_pct = if direction == Direction::Stop { 0 } else { speed_pct };
        debug!(%direction, speed_pct, "sim drive");
        self.log.record(ActuationCall::Drive {
            direction,
            speed_pct,
        })
    }

    fn set_blade(&mut self, active: bool, speed_pct: u8) -> Result<(), MowerError> {
        debug!(active, speed_pct, "sim blade");
        self.log.record(ActuationCall::Blade { active, speed_pct })
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Simulated range sensor
// ────────────────────────────────────────────────────────────────────────────

struct SensorScript {
    queue: VecDeque<Result<RangeReading, MowerError>>,
    steady: RangeReading,
    measurements: usize,
}

/// A simulated distance sensor.
///
/// Scripted readings are served first, in order; once the script runs dry
/// the sensor keeps returning its steady reading.  Clones share the script,
/// so a test can steer a sensor that a control loop already owns.
#[derive(Clone)]
pub struct SimRangeSensor {
    id: String,
    script: Arc<Mutex<SensorScript>>,
    latency: Duration,
}

impl SimRangeSensor {
    /// Create a sensor that reports `steady_cm` until told otherwise.
    pub fn new(id: impl Into<String>, steady_cm: f32) -> Self {
        Self {
            id: id.into(),
            script: Arc::new(Mutex::new(SensorScript {
                queue: VecDeque::new(),
                steady: RangeReading::Distance(steady_cm),
                measurements: 0,
            })),
            latency: Duration::ZERO,
        }
    }

    /// Make every measurement take `latency` (simulates a slow echo).
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Queue a one-shot reading.
    pub fn push_reading(&self, reading: RangeReading) {
        lock(&self.script).queue.push_back(Ok(reading));
    }

    /// Queue a one-shot failure.
    pub fn push_error(&self, message: impl Into<String>) {
        lock(&self.script)
            .queue
            .push_back(Err(MowerError::Sensor(message.into())));
    }

    /// Replace the steady reading served after the script runs dry.
    pub fn set_distance(&self, cm: f32) {
        lock(&self.script).steady = RangeReading::Distance(cm);
    }

    /// Number of measurements taken so far.
    pub fn measurements(&self) -> usize {
        lock(&self.script).measurements
    }
}

#[async_trait]
impl RangeSensor for SimRangeSensor {
    fn id(&self) -> &str {
        &self.id
    }

    async fn measure_distance_cm(&mut self) -> Result<RangeReading, MowerError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let mut script = lock(&self.script);
        script.measurements += 1;
        match script.queue.pop_front() {
            Some(next) => next,
            None => Ok(script.steady),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Simulated camera + detector
// ────────────────────────────────────────────────────────────────────────────

/// A simulated camera that returns a blank (all-zero) 4×4 frame.
/// Always succeeds.
pub struct SimFrameSource {
    id: String,
}

impl SimFrameSource {
    /// Create a new simulated camera with the given identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

impl FrameSource for SimFrameSource {
    fn id(&self) -> &str {
        &self.id
    }

    fn capture(&mut self) -> Result<CameraFrame, MowerError> {
        Ok(CameraFrame {
            width: 4,
            height: 4,
            data: vec![0u8; 16],
        })
    }
}

/// Placeholder detector: reports a fixed list of objects for every frame
/// (empty by default).
#[derive(Default)]
pub struct SimObjectDetector {
    objects: Vec<DetectedObject>,
}

impl SimObjectDetector {
    /// A detector that never finds anything.
    pub fn new() -> Self {
        Self::default()
    }

    /// A detector that reports `objects` on every frame.
    pub fn with_objects(objects: Vec<DetectedObject>) -> Self {
        Self { objects }
    }
}

impl ObjectDetector for SimObjectDetector {
    fn detect(&mut self, _frame: &CameraFrame) -> Result<Vec<DetectedObject>, MowerError> {
        Ok(self.objects.clone())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sim_actuation_records_calls_in_order() {
        let mut port = SimActuation::new();
        let log = port.log();

        port.set_drive(Direction::Forward, 50).unwrap();
        port.set_blade(true, 80).unwrap();
        port.set_drive(Direction::Stop, 70).unwrap();

        assert_eq!(
            log.calls(),
            vec![
                ActuationCall::Drive {
                    direction: Direction::Forward,
                    speed_pct: 50
                },
                ActuationCall::Blade {
                    active: true,
                    speed_pct: 80
                },
                // Stop always zeroes the duty cycle.
                ActuationCall::Drive {
                    direction: Direction::Stop,
                    speed_pct: 0
                },
            ]
        );
        assert_eq!(log.last_drive(), Some((Direction::Stop, 0)));
        assert_eq!(log.last_blade(), Some((true, 80)));
    }

    #[test]
    fn sim_actuation_fault_rejects_and_skips_log() {
        let mut port = SimActuation::new();
        let log = port.log();
        log.set_fault(true);
        assert!(matches!(
            port.set_drive(Direction::Forward, 10),
            Err(MowerError::Actuator { .. })
        ));
        assert!(log.calls().is_empty());

        log.set_fault(false);
        port.set_blade(false, 0).unwrap();
        assert_eq!(log.calls().len(), 1);
        log.clear();
        assert!(log.calls().is_empty());
    }

    #[tokio::test]
    async fn sim_range_sensor_serves_script_then_steady() {
        let mut sensor = SimRangeSensor::new("front", 150.0);
        let handle = sensor.clone();
        handle.push_reading(RangeReading::Timeout);
        handle.push_error("echo line stuck");

        assert_eq!(
            sensor.measure_distance_cm().await.unwrap(),
            RangeReading::Timeout
        );
        assert!(sensor.measure_distance_cm().await.is_err());
        assert_eq!(
            sensor.measure_distance_cm().await.unwrap(),
            RangeReading::Distance(150.0)
        );

        handle.set_distance(12.0);
        assert_eq!(
            sensor.measure_distance_cm().await.unwrap(),
            RangeReading::Distance(12.0)
        );
        assert_eq!(handle.measurements(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn sim_range_sensor_latency_is_observed() {
        let mut sensor = SimRangeSensor::new("front", 80.0).with_latency(Duration::from_millis(300));
        let started = tokio::time::Instant::now();
        sensor.measure_distance_cm().await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(300));
    }

    #[test]
    fn sim_camera_returns_blank_frame() {
        let mut cam = SimFrameSource::new("front");
        let frame = cam.capture().unwrap();
        assert_eq!(frame.width, 4);
        assert_eq!(frame.height, 4);
        assert!(frame.data.iter().all(|&b| b == 0));
    }

    #[test]
    fn sim_detector_reports_configured_objects() {
        let frame = SimFrameSource::new("front").capture().unwrap();
        assert!(SimObjectDetector::new().detect(&frame).unwrap().is_empty());

        let mut detector = SimObjectDetector::with_objects(vec![DetectedObject {
            kind: "obstacle".to_string(),
            confidence: 0.95,
            bbox: [1, 1, 3, 3],
        }]);
        assert_eq!(detector.detect(&frame).unwrap().len(), 1);
    }
}
