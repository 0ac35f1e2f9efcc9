//! Generic `FrameSource` and `ObjectDetector` traits for the video pipeline.
//!
//! Capture, encoding, and the detection model are external; the controller
//! only forwards what these return.

use mower_types::{DetectedObject, MowerError};

/// An encoded frame returned by a camera driver.
#[derive(Debug, Clone)]
pub struct CameraFrame {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Encoded image bytes (e.g. JPEG).  Opaque to the controller.
    pub data: Vec<u8>,
}

/// A camera that yields already-encoded frames.
pub trait FrameSource: Send + Sync {
    /// Stable identifier for this camera, e.g. `"front_rgb"`.
    fn id(&self) -> &str;

    /// Capture and return the next available frame.
    ///
    /// # Errors
    ///
    /// Returns [`MowerError::Sensor`] if the frame cannot be captured.
    fn capture(&mut self) -> Result<CameraFrame, MowerError>;
}

/// Produces object detections for a frame.
pub trait ObjectDetector: Send + Sync {
    /// Run detection over `frame`.
    ///
    /// # Errors
    ///
    /// Returns [`MowerError::Sensor`] if inference fails.
    fn detect(&mut self, frame: &CameraFrame) -> Result<Vec<DetectedObject>, MowerError>;
}
