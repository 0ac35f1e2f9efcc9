use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Distance reported when the range sensor does not answer in time.
pub const SENSOR_TIMEOUT_DISTANCE_CM: f32 = 400.0;

/// Clamp an arbitrary commanded percentage into `0..=100`.
pub fn clamp_pct(value: i64) -> u8 {
    value.clamp(0, 100) as u8
}

/// Drivetrain direction understood by the actuation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Forward,
    Backward,
    Left,
    Right,
    #[default]
    Stop,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Direction::Forward => "forward",
            Direction::Backward => "backward",
            Direction::Left => "left",
            Direction::Right => "right",
            Direction::Stop => "stop",
        };
        f.write_str(s)
    }
}

/// Side the coverage pattern turns towards next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnBias {
    Left,
    Right,
}

impl TurnBias {
    /// The opposite side.
    pub fn flipped(self) -> Self {
        match self {
            TurnBias::Left => TurnBias::Right,
            TurnBias::Right => TurnBias::Left,
        }
    }

    /// The drive direction that turns towards this side.
    pub fn direction(self) -> Direction {
        match self {
            TurnBias::Left => Direction::Left,
            TurnBias::Right => Direction::Right,
        }
    }
}

/// Point-in-time copy of the shared safety record.
///
/// Field names on the wire follow the status payload the relay and viewers
/// already understand (`speed`, `blade_speed`, `battery`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetySnapshot {
    pub moving: bool,
    pub direction: Direction,
    #[serde(rename = "speed")]
    pub speed_pct: u8,
    pub blade_active: bool,
    #[serde(rename = "blade_speed")]
    pub blade_speed_pct: u8,
    #[serde(rename = "battery")]
    pub battery_pct: f32,
    #[serde(rename = "obstacles_detected")]
    pub obstacle_detected: bool,
    pub last_distance_cm: f32,
    #[serde(default)]
    pub autonomous_mode: bool,
}

impl Default for SafetySnapshot {
    fn default() -> Self {
        Self {
            moving: false,
            direction: Direction::Stop,
            speed_pct: 0,
            blade_active: false,
            blade_speed_pct: 0,
            battery_pct: 100.0,
            obstacle_detected: false,
            last_distance_cm: SENSOR_TIMEOUT_DISTANCE_CM,
            autonomous_mode: false,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Inbound commands
// ────────────────────────────────────────────────────────────────────────────

fn default_drive_speed() -> i64 {
    50
}

fn default_blade_speed() -> i64 {
    100
}

/// Manual drive request.  `speed` is deliberately wide so that out-of-range
/// operator input can be clamped instead of rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovementCommand {
    pub direction: Direction,
    #[serde(default = "default_drive_speed")]
    pub speed: i64,
}

/// Cutting blade request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BladeCommand {
    pub active: bool,
    #[serde(default = "default_blade_speed")]
    pub speed: i64,
}

/// A `command` payload from the supervisor.  Any subset of the three parts
/// may be present.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ControlCommand {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub movement: Option<MovementCommand>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blade: Option<BladeCommand>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autonomous: Option<bool>,
}

impl ControlCommand {
    /// `true` when the payload carries none of the recognised parts.
    pub fn is_empty(&self) -> bool {
        self.movement.is_none() && self.blade.is_none() && self.autonomous.is_none()
    }
}

/// Events a telemetry link delivers to the robot.
///
/// Command payloads are kept raw so the router decides how to treat
/// malformed input.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    Connected,
    Disconnected,
    Command(serde_json::Value),
    Heartbeat,
}

// ────────────────────────────────────────────────────────────────────────────
// Outbound telemetry
// ────────────────────────────────────────────────────────────────────────────

/// One detection produced by the object detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedObject {
    #[serde(rename = "type")]
    pub kind: String,
    pub confidence: f32,
    /// `[x_min, y_min, x_max, y_max]` in pixels.
    pub bbox: [u32; 4],
}

/// An encoded camera frame plus whatever the detector found in it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoFrame {
    /// JPEG bytes; a standard base64 string on the wire.
    #[serde(with = "frame_base64")]
    pub frame: Vec<u8>,
    pub objects: Vec<DetectedObject>,
    pub timestamp: DateTime<Utc>,
}

mod frame_base64 {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD.decode(text.as_bytes()).map_err(serde::de::Error::custom)
    }
}

/// Emitted when the obstacle interlock stops forward motion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObstacleReport {
    pub distance: f32,
    pub timestamp: DateTime<Utc>,
}

/// Events the robot sends upstream.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundEvent {
    MowerStatus(SafetySnapshot),
    VideoFrame(VideoFrame),
    ObstacleDetected(ObstacleReport),
}

impl OutboundEvent {
    /// Wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            OutboundEvent::MowerStatus(_) => "mower_status",
            OutboundEvent::VideoFrame(_) => "video_frame",
            OutboundEvent::ObstacleDetected(_) => "obstacle_detected",
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Wire envelope
// ────────────────────────────────────────────────────────────────────────────

/// JSON envelope exchanged between robots, the relay, and viewers:
/// `{"event": "<name>", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum WireMessage {
    // robot → relay
    MowerStatus(SafetySnapshot),
    VideoFrame(VideoFrame),
    ObstacleDetected(ObstacleReport),
    // viewer → relay → robot
    Command(serde_json::Value),
    Heartbeat {
        #[serde(default)]
        time: Option<DateTime<Utc>>,
    },
    // relay → viewer
    MowerStatusUpdate {
        mower_id: Uuid,
        status: SafetySnapshot,
        time: DateTime<Utc>,
    },
    VideoUpdate(VideoFrame),
    ObstacleAlert {
        distance: f32,
        time: DateTime<Utc>,
    },
    ServerStatus {
        status: String,
        time: DateTime<Utc>,
    },
}

impl From<OutboundEvent> for WireMessage {
    fn from(event: OutboundEvent) -> Self {
        match event {
            OutboundEvent::MowerStatus(s) => WireMessage::MowerStatus(s),
            OutboundEvent::VideoFrame(f) => WireMessage::VideoFrame(f),
            OutboundEvent::ObstacleDetected(o) => WireMessage::ObstacleDetected(o),
        }
    }
}

/// Unified event wrapper for the in-process event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g., "mower-relay::session/3f2c..."
    pub source: String,
    pub payload: WireMessage,
}

impl Event {
    /// Wrap `payload` with a fresh id and the current time.
    pub fn new(source: impl Into<String>, payload: WireMessage) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Global error type spanning actuator faults, sensor failures, link
/// problems, and malformed supervisor input.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MowerError {
    #[error("Actuator Fault on {component}: {details}")]
    Actuator { component: String, details: String },

    #[error("Sensor Error: {0}")]
    Sensor(String),

    #[error("Link Error: {0}")]
    Link(String),

    #[error("Protocol Error: {0}")]
    Protocol(String),

    #[error("Channel Error: {0}")]
    Channel(String),

    #[error("Configuration Error: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn video_frame_bytes_travel_as_base64() {
        let frame = VideoFrame {
            frame: vec![0xff, 0xd8, 0xff, 0xe0],
            objects: Vec::new(),
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["frame"], "/9j/4A==");

        let back: VideoFrame = serde_json::from_value(json).unwrap();
        assert_eq!(back.frame, frame.frame);

        let bad = serde_json::json!({
            "frame": "not base64!",
            "objects": [],
            "timestamp": "2024-05-01T12:00:00Z"
        });
        assert!(serde_json::from_value::<VideoFrame>(bad).is_err());
    }

    #[test]
    fn clamp_pct_bounds() {
        assert_eq!(clamp_pct(-20), 0);
        assert_eq!(clamp_pct(0), 0);
        assert_eq!(clamp_pct(55), 55);
        assert_eq!(clamp_pct(100), 100);
        assert_eq!(clamp_pct(250), 100);
        assert_eq!(clamp_pct(i64::MAX), 100);
    }

    #[test]
    fn turn_bias_flips_and_maps_to_direction() {
        assert_eq!(TurnBias::Right.flipped(), TurnBias::Left);
        assert_eq!(TurnBias::Left.flipped(), TurnBias::Right);
        assert_eq!(TurnBias::Left.direction(), Direction::Left);
        assert_eq!(TurnBias::Right.direction(), Direction::Right);
    }

    #[test]
    fn snapshot_uses_status_field_names() {
        let json = serde_json::to_value(SafetySnapshot::default()).unwrap();
        assert_eq!(json["direction"], "stop");
        assert_eq!(json["speed"], 0);
        assert_eq!(json["blade_speed"], 0);
        assert_eq!(json["battery"], 100.0);
        assert_eq!(json["obstacles_detected"], false);
    }

    #[test]
    fn control_command_applies_default_speeds() {
        let cmd: ControlCommand = serde_json::from_str(
            r#"{"movement":{"direction":"forward"},"blade":{"active":true}}"#,
        )
        .unwrap();
        assert_eq!(cmd.movement.as_ref().unwrap().speed, 50);
        assert_eq!(cmd.blade.as_ref().unwrap().speed, 100);
        assert!(cmd.autonomous.is_none());
        assert!(!cmd.is_empty());
    }

    #[test]
    fn control_command_rejects_unknown_direction() {
        let res: Result<ControlCommand, _> =
            serde_json::from_str(r#"{"movement":{"direction":"sideways","speed":10}}"#);
        assert!(res.is_err());
    }

    #[test]
    fn wire_message_envelope_shape() {
        let msg = WireMessage::ObstacleDetected(ObstacleReport {
            distance: 12.5,
            timestamp: Utc::now(),
        });
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["event"], "obstacle_detected");
        assert_eq!(json["data"]["distance"], 12.5);

        let back: WireMessage = serde_json::from_value(json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn wire_message_parses_viewer_command() {
        let raw = r#"{"event":"command","data":{"autonomous":true}}"#;
        let msg: WireMessage = serde_json::from_str(raw).unwrap();
        match msg {
            WireMessage::Command(v) => assert_eq!(v["autonomous"], true),
            other => panic!("unexpected variant {other:?}"),
        }
    }

    #[test]
    fn outbound_event_converts_to_wire_message() {
        let wire: WireMessage = OutboundEvent::MowerStatus(SafetySnapshot::default()).into();
        assert!(matches!(wire, WireMessage::MowerStatus(_)));
        assert_eq!(
            OutboundEvent::MowerStatus(SafetySnapshot::default()).name(),
            "mower_status"
        );
    }

    #[test]
    fn mower_error_display() {
        let err = MowerError::Actuator {
            component: "drive".to_string(),
            details: "pwm write failed".to_string(),
        };
        assert!(err.to_string().contains("drive"));
        assert!(MowerError::Protocol("bad".into()).to_string().contains("Protocol"));
    }
}
