//! `mower-hal` – Hardware Abstraction Layer
//!
//! The narrow contracts the control loops use to touch the physical mower.
//! Pin-level actuation, pulse timing, camera capture, and the detection model
//! live behind these traits; the rest of the stack never sees a GPIO.
//!
//! # Modules
//!
//! - [`actuator`] – [`ActuationPort`][actuator::ActuationPort]: drivetrain and
//!   blade motor commands.
//! - [`range_sensor`] – [`RangeSensor`][range_sensor::RangeSensor]: the
//!   ultrasonic distance sensor, with an explicit timeout reading.
//! - [`camera`] – [`FrameSource`][camera::FrameSource] and
//!   [`ObjectDetector`][camera::ObjectDetector]: opaque encoded frames and the
//!   detector that annotates them.
//! - [`sim`] – in-process simulated drivers so the full stack runs headless.

pub mod actuator;
pub mod camera;
pub mod range_sensor;
pub mod sim;

pub use actuator::ActuationPort;
pub use camera::{CameraFrame, FrameSource, ObjectDetector};
pub use range_sensor::{RangeReading, RangeSensor};
pub use sim::{
    ActuationCall, ActuationLog, SimActuation, SimFrameSource, SimObjectDetector, SimRangeSensor,
};
