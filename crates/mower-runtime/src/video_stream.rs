//! [`VideoStreamer`] – camera frames plus detections, upstream at ~10 FPS.
//!
//! Frames are only captured while the link is up.  Capture or detection
//! failures back off for the error period and retry.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use mower_hal::{FrameSource, ObjectDetector};
use mower_middleware::TelemetryLink;
use mower_types::{MowerError, OutboundEvent, VideoFrame};
use tracing::{info, warn};

use crate::config::ControllerConfig;
use crate::shutdown::{self, ShutdownSignal};

pub struct VideoStreamer {
    camera: Box<dyn FrameSource>,
    detector: Box<dyn ObjectDetector>,
    link: Arc<dyn TelemetryLink>,
    period: Duration,
    backoff: Duration,
}

impl VideoStreamer {
    pub fn new(
        camera: Box<dyn FrameSource>,
        detector: Box<dyn ObjectDetector>,
        link: Arc<dyn TelemetryLink>,
        config: &ControllerConfig,
    ) -> Self {
        Self {
            camera,
            detector,
            link,
            period: config.video_frame(),
            backoff: config.error_backoff(),
        }
    }

    /// Capture, annotate and send one frame.  Returns `false` when the link
    /// was down and nothing was captured.
    ///
    /// # Errors
    ///
    /// [`MowerError::Sensor`] from the camera or detector, or the link's send
    /// error.
    pub async fn stream_once(&mut self) -> Result<bool, MowerError> {
        if !self.link.is_connected() {
            return Ok(false);
        }
        let frame = self.camera.capture()?;
        let objects = self.detector.detect(&frame)?;
        self.link
            .send(OutboundEvent::VideoFrame(VideoFrame {
                frame: frame.data,
                objects,
                timestamp: Utc::now(),
            }))
            .await?;
        Ok(true)
    }

    pub async fn run(mut self, mut shutdown: ShutdownSignal) {
        info!(camera = self.camera.id(), "video streamer started");
        loop {
            let delay = match self.stream_once().await {
                Ok(_) => self.period,
                Err(e) => {
                    warn!(error = %e, "video frame failed; backing off");
                    self.backoff
                }
            };
            if shutdown::sleep(&mut shutdown, delay).await {
                break;
            }
        }
        info!("video streamer stopped");
    }
}
