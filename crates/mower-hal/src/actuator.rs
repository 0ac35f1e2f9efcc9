//! Generic `ActuationPort` trait for the drivetrain and cutting blade.
//!
//! The safety record in `mower-kernel` owns exactly one port and is the only
//! caller, so drivers never see two loops racing on the same motor.  Drivers
//! can be swapped (GPIO/PWM, simulation, a test recorder) without touching
//! control logic.

use mower_types::{Direction, MowerError};

/// Drivetrain + blade actuator.
///
/// Both commands must be idempotent and must not block beyond the hardware
/// settling time.  Speeds arrive already clamped to `0..=100`.
pub trait ActuationPort: Send + Sync {
    /// Drive the wheels in `direction` at `speed_pct` percent duty.
    ///
    /// [`Direction::Stop`] must zero both wheel motors regardless of
    /// `speed_pct`.
    ///
    /// # Errors
    ///
    /// Returns [`MowerError::Actuator`] if the command cannot be applied.
    fn set_drive(&mut self, direction: Direction, speed_pct: u8) -> Result<(), MowerError>;

    /// Switch the blade motor on or off at `speed_pct` percent duty.
    ///
    /// # Errors
    ///
    /// Returns [`MowerError::Actuator`] if the command cannot be applied.
    fn set_blade(&mut self, active: bool, speed_pct: u8) -> Result<(), MowerError>;
}
