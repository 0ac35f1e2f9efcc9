//! [`SafetyState`] – the guarded motion/blade/obstacle/battery record.
//!
//! Every control loop holds a clone of the same [`SafetyState`].  The record
//! and the [`ActuationPort`] sit behind one mutex, so a state change and the
//! motor command that realises it are applied together and two loops can
//! never interleave conflicting drive commands.  The lock is only held for
//! the duration of a synchronous port call and never across an `.await`.
//!
//! # Field ownership
//!
//! | Writer | Fields | Entry points |
//! |---|---|---|
//! | obstacle monitor | `obstacle_detected`, `last_distance_cm` (+ interlock stop) | [`SafetyState::record_distance`] |
//! | command router | drive, blade, autonomous flag | [`SafetyState::manual_drive`], [`SafetyState::manual_blade`], [`SafetyState::set_autonomous`] |
//! | pattern engine | drive, blade | [`SafetyState::engine_drive`], [`SafetyState::engine_blade`] |
//! | status ticker | `battery_pct` | [`SafetyState::decay_battery`] |
//! | watchdog / shutdown | forced stop | [`SafetyState::force_stop`], [`SafetyState::halt`] |
//!
//! # Control epoch
//!
//! Manual movement commands, autonomous-mode changes, and forced stops bump a
//! monotonically increasing epoch.  The engine passes the epoch it based its
//! decision on; a stale epoch means a higher-priority writer got there first
//! and the engine write is rejected with [`DriveOutcome::Preempted`].
//!
//! # Invariants
//!
//! - `blade_speed_pct == 0` whenever `!blade_active`.
//! - `speed_pct` is clamped to `0..=100` before it reaches the port.
//! - `direction == Stop` ⇔ `!moving`, and a stopped drivetrain has speed 0.
//! - The record only reflects commands the port accepted.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use mower_hal::ActuationPort;
use mower_types::{Direction, MowerError, SafetySnapshot, clamp_pct};
use tracing::{debug, info, warn};

/// Result of a write that may lose arbitration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveOutcome {
    /// The port accepted the command and the record was updated.
    Applied,
    /// A higher-priority writer owns the drivetrain; nothing was sent.
    Preempted,
}

/// What the obstacle monitor learned from one measurement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InterlockOutcome {
    pub distance_cm: f32,
    pub obstacle: bool,
    /// `true` when this measurement forced forward motion to stop.
    pub stopped: bool,
}

/// A consistent read of everything the pattern engine decides on.
#[derive(Debug, Clone)]
pub struct ControlView {
    pub snapshot: SafetySnapshot,
    pub epoch: u64,
    pub link_lost: bool,
    pub halted: bool,
}

impl ControlView {
    /// `true` when the autonomous engine is allowed to command motion.
    pub fn engine_may_drive(&self) -> bool {
        self.snapshot.autonomous_mode && !self.link_lost && !self.halted
    }
}

struct Inner {
    record: SafetySnapshot,
    epoch: u64,
    link_lost: bool,
    halted: bool,
    port: Box<dyn ActuationPort>,
}

impl Inner {
    fn drive(&mut self, direction: Direction, speed_pct: u8) -> Result<(), MowerError> {
        let speed_pct = if direction == Direction::Stop {
            0
        } else {
            speed_pct.min(100)
        };
        self.port.set_drive(direction, speed_pct)?;
        self.record.direction = direction;
        self.record.speed_pct = speed_pct;
        self.record.moving = direction != Direction::Stop;
        Ok(())
    }

    fn blade(&mut self, active: bool, speed_pct: u8) -> Result<(), MowerError> {
        let speed_pct = if active { speed_pct.min(100) } else { 0 };
        self.port.set_blade(active, speed_pct)?;
        self.record.blade_active = active;
        self.record.blade_speed_pct = speed_pct;
        Ok(())
    }

    /// Stop the drivetrain and optionally the blade.  Both are attempted even
    /// if the first fails; the first error is returned.
    fn stop_all(&mut self, blade_off: bool) -> Result<(), MowerError> {
        let drive = self.drive(Direction::Stop, 0);
        let blade = if blade_off { self.blade(false, 0) } else { Ok(()) };
        drive.and(blade)
    }

    fn engine_owns_drive(&self, epoch: u64) -> bool {
        epoch == self.epoch && self.record.autonomous_mode && !self.link_lost && !self.halted
    }
}

/// Shared, cheaply cloneable handle onto the single safety record.
#[derive(Clone)]
pub struct SafetyState {
    inner: Arc<Mutex<Inner>>,
}

impl SafetyState {
    /// Create the record for a new session: stopped, blade off, battery full,
    /// no obstacle, autonomous mode off.
    pub fn new(port: Box<dyn ActuationPort>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                record: SafetySnapshot::default(),
                epoch: 0,
                link_lost: false,
                halted: false,
                port,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            // A panicking driver must not make the mower unstoppable.
            warn!("safety state lock was poisoned; recovering");
            PoisonError::into_inner(poisoned)
        })
    }

    // -------------------------------------------------------------------------
    // Readers
    // -------------------------------------------------------------------------

    /// Best-effort copy of the record.
    pub fn snapshot(&self) -> SafetySnapshot {
        self.lock().record.clone()
    }

    /// Record plus arbitration state, read under one lock.
    pub fn control_view(&self) -> ControlView {
        let inner = self.lock();
        ControlView {
            snapshot: inner.record.clone(),
            epoch: inner.epoch,
            link_lost: inner.link_lost,
            halted: inner.halted,
        }
    }

    /// Current control epoch.
    pub fn epoch(&self) -> u64 {
        self.lock().epoch
    }

    // -------------------------------------------------------------------------
    // Command router
    // -------------------------------------------------------------------------

    /// Apply a manual movement command.  Always preempts the autonomous
    /// engine, even when the port rejects the command.
    ///
    /// # Errors
    ///
    /// Propagates [`MowerError::Actuator`] from the port; the record keeps its
    /// previous drive state.
    pub fn manual_drive(&self, direction: Direction, speed: i64) -> Result<DriveOutcome, MowerError> {
        let mut inner = self.lock();
        if inner.halted {
            return Ok(DriveOutcome::Preempted);
        }
        inner.epoch += 1;
        inner.drive(direction, clamp_pct(speed))?;
        Ok(DriveOutcome::Applied)
    }

    /// Apply a manual blade command.  An inactive blade is always driven at
    /// speed 0.
    ///
    /// # Errors
    ///
    /// Propagates [`MowerError::Actuator`] from the port.
    pub fn manual_blade(&self, active: bool, speed: i64) -> Result<DriveOutcome, MowerError> {
        let mut inner = self.lock();
        if inner.halted {
            return Ok(DriveOutcome::Preempted);
        }
        inner.blade(active, clamp_pct(speed))?;
        Ok(DriveOutcome::Applied)
    }

    /// Switch autonomous mode.  Turning it off stops the drivetrain in the
    /// same critical section; the blade is left as-is.
    ///
    /// # Errors
    ///
    /// Propagates [`MowerError::Actuator`] if the stop cannot be applied.  The
    /// flag itself is always updated.
    pub fn set_autonomous(&self, enabled: bool) -> Result<(), MowerError> {
        let mut inner = self.lock();
        inner.epoch += 1;
        inner.record.autonomous_mode = enabled;
        if !enabled {
            inner.drive(Direction::Stop, 0)?;
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Autonomous pattern engine
    // -------------------------------------------------------------------------

    /// Drive on behalf of the engine, provided it still owns the drivetrain
    /// at `epoch`.
    ///
    /// # Errors
    ///
    /// Propagates [`MowerError::Actuator`] from the port.
    pub fn engine_drive(
        &self,
        epoch: u64,
        direction: Direction,
        speed_pct: u8,
    ) -> Result<DriveOutcome, MowerError> {
        let mut inner = self.lock();
        if !inner.engine_owns_drive(epoch) {
            return Ok(DriveOutcome::Preempted);
        }
        inner.drive(direction, speed_pct)?;
        Ok(DriveOutcome::Applied)
    }

    /// Blade command on behalf of the engine, same arbitration as
    /// [`engine_drive`][Self::engine_drive].
    ///
    /// # Errors
    ///
    /// Propagates [`MowerError::Actuator`] from the port.
    pub fn engine_blade(
        &self,
        epoch: u64,
        active: bool,
        speed_pct: u8,
    ) -> Result<DriveOutcome, MowerError> {
        let mut inner = self.lock();
        if !inner.engine_owns_drive(epoch) {
            return Ok(DriveOutcome::Preempted);
        }
        inner.blade(active, speed_pct)?;
        Ok(DriveOutcome::Applied)
    }

    /// Stop the drivetrain without arbitration, leaving the blade alone.
    /// Used by the engine when it relinquishes control.
    ///
    /// # Errors
    ///
    /// Propagates [`MowerError::Actuator`] from the port.
    pub fn stop_drive(&self) -> Result<(), MowerError> {
        self.lock().drive(Direction::Stop, 0)
    }

    // -------------------------------------------------------------------------
    // Obstacle monitor
    // -------------------------------------------------------------------------

    /// Store a distance reading and apply the hard interlock: an obstacle
    /// closer than `threshold_cm` while moving forward stops the drivetrain
    /// immediately.
    ///
    /// # Errors
    ///
    /// Propagates [`MowerError::Actuator`] if the interlock stop cannot be
    /// applied.  The obstacle fields are updated regardless, and the record
    /// still shows forward motion so the next reading retries the stop.
    pub fn record_distance(
        &self,
        distance_cm: f32,
        threshold_cm: f32,
    ) -> Result<InterlockOutcome, MowerError> {
        let mut inner = self.lock();
        let obstacle = distance_cm < threshold_cm;
        inner.record.obstacle_detected = obstacle;
        inner.record.last_distance_cm = distance_cm;

        let must_stop =
            obstacle && inner.record.moving && inner.record.direction == Direction::Forward;
        if must_stop {
            inner.drive(Direction::Stop, 0)?;
            warn!(distance_cm, "obstacle interlock stopped forward motion");
        }
        Ok(InterlockOutcome {
            distance_cm,
            obstacle,
            stopped: must_stop,
        })
    }

    // -------------------------------------------------------------------------
    // Watchdog, link loss, shutdown
    // -------------------------------------------------------------------------

    /// Stop the drivetrain (and the blade when `blade_off`) regardless of
    /// who owns it, and preempt the engine.
    ///
    /// # Errors
    ///
    /// Returns the first [`MowerError::Actuator`]; both stops are attempted.
    pub fn force_stop(&self, blade_off: bool) -> Result<(), MowerError> {
        let mut inner = self.lock();
        inner.epoch += 1;
        inner.stop_all(blade_off)
    }

    /// Mark the supervisor link as lost (engine writes are refused) or
    /// restored.
    pub fn set_link_lost(&self, lost: bool) {
        let mut inner = self.lock();
        if inner.link_lost != lost {
            debug!(lost, "link supervision flag changed");
            inner.link_lost = lost;
            inner.epoch += 1;
        }
    }

    /// Permanently refuse further motion for this session and stop
    /// everything.  Called once at shutdown.
    ///
    /// # Errors
    ///
    /// Returns the first [`MowerError::Actuator`]; both stops are attempted.
    pub fn halt(&self) -> Result<(), MowerError> {
        let mut inner = self.lock();
        inner.halted = true;
        inner.epoch += 1;
        info!("safety state halted; forcing stop and blade off");
        inner.stop_all(true)
    }

    // -------------------------------------------------------------------------
    // Battery gauge
    // -------------------------------------------------------------------------

    /// Decrease the simulated battery by `step` percent if the mower is
    /// moving or cutting.  Never increases; floors at 0.  Returns the new
    /// level.
    pub fn decay_battery(&self, step: f32) -> f32 {
        let mut inner = self.lock();
        if inner.record.moving || inner.record.blade_active {
            inner.record.battery_pct = (inner.record.battery_pct - step.max(0.0)).max(0.0);
        }
        inner.record.battery_pct
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
