//! `mower-middleware` – The Nervous System
//!
//! Moves data between the controller and the outside world without caring
//! about its meaning.
//!
//! # Modules
//!
//! - [`bus`] – Headless, typed, topic-based publish/subscribe event bus built
//!   on Tokio broadcast channels.
//! - [`link`] – the [`TelemetryLink`] trait plus the shared envelope codec.
//! - [`ws_link`] – [`WsTelemetryLink`]: robot-side WebSocket client for the
//!   relay.
//! - [`loopback`] – [`LoopbackLink`]: in-process link for simulation and
//!   tests.

pub mod bus;
pub mod link;
pub mod loopback;
pub mod ws_link;

pub use bus::{EventBus, Topic, TopicReceiver};
pub use link::TelemetryLink;
pub use loopback::{LoopbackHandle, LoopbackLink};
pub use ws_link::WsTelemetryLink;
