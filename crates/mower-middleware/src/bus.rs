//! Headless, typed, topic-based publish/subscribe event bus.
//!
//! Uses [`tokio::sync::broadcast`] channels under the hood so that every
//! subscriber receives every message without any single subscriber blocking
//! the others.
//!
//! # Topics
//!
//! | Topic | Typical traffic |
//! |---|---|
//! | [`Topic::Telemetry`] | `mower_status` snapshots and video frames |
//! | [`Topic::Commands`] | Supervisor commands and heartbeats travelling to robots |
//! | [`Topic::SystemAlerts`] | Obstacle interlock alerts |
//!
//! Besides the topic lanes there is one global channel that carries every
//! envelope regardless of kind; the relay fans it out to all sessions.

use mower_types::{Event, MowerError, WireMessage};
use tokio::sync::broadcast;

/// Default channel capacity (number of buffered events before old ones are
/// dropped for slow subscribers).
const DEFAULT_CAPACITY: usize = 256;

/// Enumeration of all first-class routing topics on the event bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Periodic status snapshots and camera frames.
    Telemetry,
    /// Supervisor → robot traffic.
    Commands,
    /// Safety-relevant events that operators must see.
    SystemAlerts,
}

impl Topic {
    /// The lane a wire envelope belongs on.
    pub fn for_message(message: &WireMessage) -> Self {
        match message {
            WireMessage::MowerStatus(_)
            | WireMessage::VideoFrame(_)
            | WireMessage::MowerStatusUpdate { .. }
            | WireMessage::VideoUpdate(_)
            | WireMessage::ServerStatus { .. } => Topic::Telemetry,
            WireMessage::Command(_) | WireMessage::Heartbeat { .. } => Topic::Commands,
            WireMessage::ObstacleDetected(_) | WireMessage::ObstacleAlert { .. } => {
                Topic::SystemAlerts
            }
        }
    }
}

/// Shared event bus. Clone it cheaply – all clones share the same underlying
/// broadcast channels.
///
/// * **Topic-based** (`publish_to` / `subscribe_to`) – routes events to one
///   of the [`Topic`] lanes.
/// * **Global** (`publish` / `subscribe`) – a single channel carrying every
///   event.
#[derive(Clone, Debug)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
    telemetry: broadcast::Sender<Event>,
    commands: broadcast::Sender<Event>,
    system_alerts: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a new bus with the given channel capacity.
    ///
    /// The `capacity` is applied to every channel independently.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        let (telemetry, _) = broadcast::channel(capacity);
        let (commands, _) = broadcast::channel(capacity);
        let (system_alerts, _) = broadcast::channel(capacity);
        Self {
            sender,
            telemetry,
            commands,
            system_alerts,
        }
    }

    // -----------------------------------------------------------------------
    // Topic-based API
    // -----------------------------------------------------------------------

    /// Publish `event` to the given [`Topic`] channel.
    ///
    /// Returns the number of active receivers that were handed the event.
    ///
    /// # Errors
    ///
    /// [`MowerError::Channel`] when nobody is subscribed to the topic.
    pub fn publish_to(&self, topic: Topic, event: Event) -> Result<usize, MowerError> {
        self.topic_sender(topic)
            .send(event)
            .map_err(|_| MowerError::Channel(format!("No subscribers for topic {topic:?}")))
    }

    /// Subscribe to a specific [`Topic`] channel.
    pub fn subscribe_to(&self, topic: Topic) -> TopicReceiver {
        TopicReceiver {
            topic,
            receiver: self.topic_sender(topic).subscribe(),
        }
    }

    // -----------------------------------------------------------------------
    // Global API
    // -----------------------------------------------------------------------

    /// Publish an event to the global broadcast channel.
    ///
    /// # Errors
    ///
    /// [`MowerError::Channel`] when nobody is subscribed.
    pub fn publish(&self, event: Event) -> Result<usize, MowerError> {
        self.sender
            .send(event)
            .map_err(|e| MowerError::Channel(format!("event bus send error: {e}")))
    }

    /// Subscribe to all events on the global broadcast channel.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Number of live subscribers on the global channel.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    fn topic_sender(&self, topic: Topic) -> &broadcast::Sender<Event> {
        match topic {
            Topic::Telemetry => &self.telemetry,
            Topic::Commands => &self.commands,
            Topic::SystemAlerts => &self.system_alerts,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Topic-based receiver
// ---------------------------------------------------------------------------

/// An async receiver bound to a single [`Topic`] channel.
///
/// Obtained via [`EventBus::subscribe_to`].
pub struct TopicReceiver {
    topic: Topic,
    receiver: broadcast::Receiver<Event>,
}

impl TopicReceiver {
    /// Wait for the next event on this topic.
    ///
    /// Returns:
    /// * `Ok(event)` – a successfully received event.
    /// * `Err(broadcast::error::RecvError::Lagged(n))` – the subscriber fell
    ///   behind and `n` messages were dropped.
    /// * `Err(broadcast::error::RecvError::Closed)` – the bus has shut down.
    pub async fn recv(&mut self) -> Result<Event, broadcast::error::RecvError> {
        self.receiver.recv().await
    }

    /// Non-blocking receive, mainly for tests.
    pub fn try_recv(&mut self) -> Result<Event, broadcast::error::TryRecvError> {
        self.receiver.try_recv()
    }

    /// The [`Topic`] this receiver is bound to.
    pub fn topic(&self) -> Topic {
        self.topic
    }
}
