//! In-process loopback link.
//!
//! [`LoopbackLink`] lets the full controller run headless:
//!
//! * **Outbound** – every [`OutboundEvent`] is recorded and published onto the
//!   internal [`EventBus`] under its [`Topic`], so a local viewer (or a test)
//!   can observe telemetry without a relay.
//! * **Inbound** – a [`LoopbackHandle`] plays the supervisor: it injects
//!   commands and heartbeats, and can drop or refuse the connection.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use mower_types::{Event, InboundEvent, MowerError, OutboundEvent, WireMessage};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;

use crate::bus::{EventBus, Topic};
use crate::link::{TelemetryLink, broadcast_stream};

const SOURCE: &str = "mower-middleware::loopback";
const INBOUND_CAPACITY: usize = 128;

#[derive(Default)]
struct Shared {
    connected: AtomicBool,
    refuse_connect: AtomicBool,
    connect_attempts: AtomicUsize,
    sent: Mutex<Vec<OutboundEvent>>,
}

impl Shared {
    fn sent(&self) -> MutexGuard<'_, Vec<OutboundEvent>> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A [`TelemetryLink`] that never leaves the process.
pub struct LoopbackLink {
    bus: Arc<EventBus>,
    inbound: broadcast::Sender<InboundEvent>,
    shared: Arc<Shared>,
}

impl LoopbackLink {
    /// Create a disconnected loopback link publishing onto `bus`.
    pub fn new(bus: Arc<EventBus>) -> Self {
        let (inbound, _) = broadcast::channel(INBOUND_CAPACITY);
        Self {
            bus,
            inbound,
            shared: Arc::new(Shared::default()),
        }
    }

    /// A supervisor-side handle onto this link.
    pub fn handle(&self) -> LoopbackHandle {
        LoopbackHandle {
            inbound: self.inbound.clone(),
            shared: Arc::clone(&self.shared),
        }
    }
}

#[async_trait]
impl TelemetryLink for LoopbackLink {
    async fn connect(&self) -> Result<(), MowerError> {
        self.shared.connect_attempts.fetch_add(1, Ordering::AcqRel);
        if self.shared.refuse_connect.load(Ordering::Acquire) {
            return Err(MowerError::Link("loopback refused connection".to_string()));
        }
        if !self.shared.connected.swap(true, Ordering::AcqRel) {
            let _ = self.inbound.send(InboundEvent::Connected);
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), MowerError> {
        if self.shared.connected.swap(false, Ordering::AcqRel) {
            let _ = self.inbound.send(InboundEvent::Disconnected);
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    async fn send(&self, event: OutboundEvent) -> Result<(), MowerError> {
        if !self.is_connected() {
            return Err(MowerError::Link("not connected".to_string()));
        }
        let payload = WireMessage::from(event.clone());
        let topic = Topic::for_message(&payload);
        // Nobody watching the bus is normal for a headless run.
        if let Err(e) = self.bus.publish_to(topic, Event::new(SOURCE, payload)) {
            debug!(error = %e, "loopback event had no bus subscribers");
        }
        self.shared.sent().push(event);
        Ok(())
    }

    fn inbound_stream(&self) -> BoxStream<'static, InboundEvent> {
        broadcast_stream(self.inbound.subscribe())
    }
}

/// The supervisor's end of a [`LoopbackLink`].  Cheap to clone.
#[derive(Clone)]
pub struct LoopbackHandle {
    inbound: broadcast::Sender<InboundEvent>,
    shared: Arc<Shared>,
}

impl LoopbackHandle {
    /// Deliver a raw `command` payload.
    pub fn send_command(&self, payload: Value) {
        let _ = self.inbound.send(InboundEvent::Command(payload));
    }

    /// Deliver a `heartbeat`.
    pub fn send_heartbeat(&self) {
        let _ = self.inbound.send(InboundEvent::Heartbeat);
    }

    /// Simulate the supervisor going away.
    pub fn drop_connection(&self) {
        if self.shared.connected.swap(false, Ordering::AcqRel) {
            let _ = self.inbound.send(InboundEvent::Disconnected);
        }
    }

    /// While `true`, [`TelemetryLink::connect`] fails.
    pub fn refuse_connections(&self, refuse: bool) {
        self.shared.refuse_connect.store(refuse, Ordering::Release);
    }

    pub fn connect_attempts(&self) -> usize {
        self.shared.connect_attempts.load(Ordering::Acquire)
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    /// Everything the robot sent so far, oldest first.
    pub fn sent(&self) -> Vec<OutboundEvent> {
        self.shared.sent().clone()
    }

    /// Only the status snapshots the robot sent.
    pub fn status_updates(&self) -> usize {
        self.shared
            .sent()
            .iter()
            .filter(|e| matches!(e, OutboundEvent::MowerStatus(_)))
            .count()
    }

    /// Only the obstacle alerts the robot sent.
    pub fn obstacle_alerts(&self) -> Vec<f32> {
        self.shared
            .sent()
            .iter()
            .filter_map(|e| match e {
                OutboundEvent::ObstacleDetected(report) => Some(report.distance),
                _ => None,
            })
            .collect()
    }

    pub fn clear_sent(&self) {
        self.shared.sent().clear();
    }
}
