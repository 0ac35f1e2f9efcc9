//! `mower-runtime` – the real-time control loops and their coordinator.
//!
//! # Modules
//!
//! - [`coordinator`] – [`Coordinator`][coordinator::Coordinator]: builds the
//!   shared safety state, spawns every loop, and runs the ordered shutdown.
//! - [`obstacle_monitor`] – range sensor polling and the hard obstacle
//!   interlock.
//! - [`pattern_engine`] – [`PatternEngine`][pattern_engine::PatternEngine]:
//!   zig-zag coverage with obstacle evasion while autonomous mode is on.
//! - [`link_watchdog`] – stops the mower when the supervisor goes silent and
//!   reconnects the link.
//! - [`command_router`] – applies supervisor commands and heartbeats.
//! - [`status_reporter`] – 1 Hz status snapshots and battery drain.
//! - [`video_stream`] – camera frames with detections at ~10 FPS.
//! - [`config`] – [`ControllerConfig`][config::ControllerConfig] timing and
//!   threshold tunables.
//! - [`shutdown`] – the cooperative shutdown signal every loop races against.
//! - [`logging`] – [`init_tracing`][logging::init_tracing]: console (compact
//!   or JSON) plus optional OTLP span export.
//!
//! # Safety arbitration
//!
//! All motion goes through [`SafetyState`][mower_kernel::SafetyState].  The
//! obstacle interlock and the watchdog stop are applied inside its critical
//! section, so no loop can drive into an obstacle between a reading and the
//! stop.

pub mod command_router;
pub mod config;
pub mod coordinator;
pub mod link_watchdog;
pub mod logging;
pub mod obstacle_monitor;
pub mod pattern_engine;
pub mod shutdown;
pub mod status_reporter;
pub mod video_stream;

pub use command_router::CommandRouter;
pub use config::ControllerConfig;
pub use coordinator::{Coordinator, Drivers};
pub use link_watchdog::LinkWatchdog;
pub use logging::{TracerProviderGuard, init_tracing};
pub use obstacle_monitor::ObstacleMonitor;
pub use pattern_engine::{PatternCursor, PatternEngine, Phase};
pub use shutdown::ShutdownSignal;
pub use status_reporter::StatusReporter;
pub use video_stream::VideoStreamer;
