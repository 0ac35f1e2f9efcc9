//! [`Coordinator`] – owns the shared state and the lifecycle of every loop.
//!
//! # Startup
//!
//! 1. Subscribe to the link's inbound stream (so `Connected` is not missed).
//! 2. Connect to the supervisor; a failure is logged and left to the link
//!    watchdog to retry.
//! 3. Spawn the obstacle monitor, pattern engine, link watchdog, command
//!    router, status reporter and (when a camera is fitted) video streamer.
//!
//! # Shutdown
//!
//! [`Coordinator::stop`] stops the drivetrain and the blade *first* and
//! latches the safety state so no loop can move the mower again, then
//! signals the loops, joins each one with a bounded wait and finally
//! disconnects the link.  Calling it twice is harmless.

use std::sync::Arc;
use std::time::Duration;

use mower_hal::{ActuationPort, FrameSource, ObjectDetector, RangeSensor};
use mower_kernel::{LinkHealth, SafetyState};
use mower_middleware::TelemetryLink;
use mower_types::MowerError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::command_router::CommandRouter;
use crate::config::ControllerConfig;
use crate::link_watchdog::LinkWatchdog;
use crate::obstacle_monitor::ObstacleMonitor;
use crate::pattern_engine::PatternEngine;
use crate::status_reporter::StatusReporter;
use crate::video_stream::VideoStreamer;

/// How long [`Coordinator::stop`] waits for each loop before aborting it.
const JOIN_TIMEOUT: Duration = Duration::from_secs(1);

/// The hardware the coordinator drives.
pub struct Drivers {
    pub actuation: Box<dyn ActuationPort>,
    pub range_sensor: Box<dyn RangeSensor>,
    /// Camera and detector; `None` disables video streaming.
    pub camera: Option<(Box<dyn FrameSource>, Box<dyn ObjectDetector>)>,
}

/// Sensor drivers waiting to be handed to their loops.
struct Pending {
    range_sensor: Box<dyn RangeSensor>,
    camera: Option<(Box<dyn FrameSource>, Box<dyn ObjectDetector>)>,
}

pub struct Coordinator {
    config: ControllerConfig,
    state: SafetyState,
    health: Arc<LinkHealth>,
    link: Arc<dyn TelemetryLink>,
    pending: Option<Pending>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
    running: bool,
}

impl Coordinator {
    pub fn new(config: ControllerConfig, drivers: Drivers, link: Arc<dyn TelemetryLink>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            health: Arc::new(LinkHealth::new(config.heartbeat_timeout())),
            state: SafetyState::new(drivers.actuation),
            config,
            link,
            pending: Some(Pending {
                range_sensor: drivers.range_sensor,
                camera: drivers.camera,
            }),
            shutdown,
            tasks: Vec::new(),
            running: false,
        }
    }

    pub fn safety_state(&self) -> &SafetyState {
        &self.state
    }

    pub fn link_health(&self) -> &Arc<LinkHealth> {
        &self.health
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Connect and spawn every control loop.
    ///
    /// # Errors
    ///
    /// [`MowerError::Config`] if the coordinator was already started.  A
    /// failed initial connection is not an error.
    pub async fn start(&mut self) -> Result<(), MowerError> {
        let Some(pending) = self.pending.take() else {
            return Err(MowerError::Config("coordinator already started".to_string()));
        };

        let inbound = self.link.inbound_stream();
        match self.link.connect().await {
            Ok(()) => info!("connected to supervisor"),
            Err(e) => warn!(error = %e, "initial connection failed; watchdog will retry"),
        }

        let monitor = ObstacleMonitor::new(
            pending.range_sensor,
            self.state.clone(),
            Arc::clone(&self.link),
            &self.config,
        );
        self.spawn("obstacle_monitor", |rx| monitor.run(rx));

        let engine = PatternEngine::new(self.state.clone(), &self.config);
        self.spawn("pattern_engine", |rx| engine.run(rx));

        let watchdog = LinkWatchdog::new(
            Arc::clone(&self.health),
            self.state.clone(),
            Arc::clone(&self.link),
            &self.config,
        );
        self.spawn("link_watchdog", |rx| watchdog.run(rx));

        let router = CommandRouter::new(
            self.state.clone(),
            Arc::clone(&self.health),
            Arc::clone(&self.link),
        );
        self.spawn("command_router", |rx| router.run(inbound, rx));

        let reporter = StatusReporter::new(self.state.clone(), Arc::clone(&self.link), &self.config);
        self.spawn("status_reporter", |rx| reporter.run(rx));

        if let Some((camera, detector)) = pending.camera {
            let streamer = VideoStreamer::new(camera, detector, Arc::clone(&self.link), &self.config);
            self.spawn("video_stream", |rx| streamer.run(rx));
        }

        self.running = true;
        info!(loops = self.tasks.len(), "mower controller running");
        Ok(())
    }

    fn spawn<F, Fut>(&mut self, name: &'static str, make: F)
    where
        F: FnOnce(watch::Receiver<bool>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(make(self.shutdown.subscribe()));
        self.tasks.push((name, handle));
    }

    /// Stop everything.  Safe to call more than once.
    pub async fn stop(&mut self) {
        if let Err(e) = self.state.halt() {
            error!(error = %e, "failed to stop motors during shutdown");
        }
        if !self.running && self.tasks.is_empty() {
            return;
        }
        info!("stopping mower controller");
        self.running = false;
        let _ = self.shutdown.send(true);

        for (name, mut handle) in self.tasks.drain(..) {
            match tokio::time::timeout(JOIN_TIMEOUT, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(task = name, error = %e, "control loop ended abnormally"),
                Err(_) => {
                    warn!(task = name, "control loop did not stop in time; aborting");
                    handle.abort();
                }
            }
        }

        if let Err(e) = self.link.disconnect().await {
            warn!(error = %e, "link disconnect failed");
        }
        info!("mower controller stopped");
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        if self.running {
            let _ = self.state.halt();
            let _ = self.shutdown.send(true);
        }
    }
}
