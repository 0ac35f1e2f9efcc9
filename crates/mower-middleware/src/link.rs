//! The telemetry link contract.
//!
//! The controller never speaks WebSocket (or anything else) directly.  It
//! talks to a [`TelemetryLink`], which turns [`OutboundEvent`]s into the
//! wire protocol and turns whatever the supervisor sends into a stream of
//! [`InboundEvent`]s.
//!
//! # Implementations
//!
//! - [`WsTelemetryLink`][crate::ws_link::WsTelemetryLink] – JSON envelopes
//!   over a WebSocket to the relay.
//! - [`LoopbackLink`][crate::loopback::LoopbackLink] – in-process link for
//!   headless simulation and tests.

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream};
use mower_types::{InboundEvent, MowerError, OutboundEvent, WireMessage};
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Every supervisor transport must implement this trait.
///
/// # Contract
///
/// * All methods take `&self`; a link is shared as `Arc<dyn TelemetryLink>`
///   between every loop that sends.
/// * `connect` on an already-connected link is a no-op.  A successful
///   connect yields [`InboundEvent::Connected`]; losing the connection
///   yields [`InboundEvent::Disconnected`].
/// * `send` on a disconnected link fails with [`MowerError::Link`]; it never
///   blocks waiting for a reconnection.
/// * `inbound_stream` returns events delivered *after* the call.  Take the
///   stream before anything that may produce events.
#[async_trait]
pub trait TelemetryLink: Send + Sync {
    /// Establish the connection.
    async fn connect(&self) -> Result<(), MowerError>;

    /// Tear the connection down.  Safe to call when already disconnected.
    async fn disconnect(&self) -> Result<(), MowerError>;

    fn is_connected(&self) -> bool;

    /// Deliver one event to the supervisor.
    async fn send(&self, event: OutboundEvent) -> Result<(), MowerError>;

    /// Live stream of supervisor events.
    fn inbound_stream(&self) -> BoxStream<'static, InboundEvent>;
}

/// Adapt a broadcast receiver into the boxed stream [`TelemetryLink`]
/// implementations hand out.  Lagging is logged and skipped; the stream ends
/// when the sender is dropped.
pub fn broadcast_stream(
    receiver: broadcast::Receiver<InboundEvent>,
) -> BoxStream<'static, InboundEvent> {
    Box::pin(stream::unfold(receiver, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) => return Some((event, rx)),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(lagged_by = n, "inbound link stream lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }))
}

/// Decode one text frame from the supervisor.
///
/// Only `command` and `heartbeat` envelopes are meaningful to the robot;
/// everything else (relay status broadcasts, other robots' telemetry) is
/// ignored.  Undecodable frames are dropped with a warning.
pub fn decode_inbound(text: &str) -> Option<InboundEvent> {
    match serde_json::from_str::<WireMessage>(text) {
        Ok(WireMessage::Command(payload)) => Some(InboundEvent::Command(payload)),
        Ok(WireMessage::Heartbeat { .. }) => Some(InboundEvent::Heartbeat),
        Ok(other) => {
            debug!(?other, "ignoring non-robot envelope");
            None
        }
        Err(e) => {
            warn!(error = %e, "dropping malformed envelope");
            None
        }
    }
}

/// Encode an outbound event as a JSON text frame.
///
/// # Errors
///
/// [`MowerError::Protocol`] if serialisation fails.
pub fn encode_outbound(event: OutboundEvent) -> Result<String, MowerError> {
    serde_json::to_string(&WireMessage::from(event)).map_err(|e| MowerError::Protocol(e.to_string()))
}
