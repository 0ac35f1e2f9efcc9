//! [`ControllerConfig`] – timing, thresholds and speeds for every control loop.
//!
//! Loaded from the `[controller]` table of the CLI config file.  Every field
//! has a default, so an empty table (or none at all) yields the stock
//! behaviour.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunables shared by the control loops.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerConfig {
    // ── Obstacle monitor ─────────────────────────────────────────────────
    /// Range sensor polling period.
    #[serde(default = "default_obstacle_poll_ms")]
    pub obstacle_poll_ms: u64,

    /// Readings strictly below this distance count as an obstacle.
    #[serde(default = "default_obstacle_threshold_cm")]
    pub obstacle_threshold_cm: f32,

    /// Budget for one measurement (trigger + echo phases).
    #[serde(default = "default_sensor_timeout_ms")]
    pub sensor_timeout_ms: u64,

    /// Pause after any loop error before the next attempt.
    #[serde(default = "default_error_backoff_ms")]
    pub error_backoff_ms: u64,

    // ── Autonomous pattern ───────────────────────────────────────────────
    #[serde(default = "default_engine_tick_ms")]
    pub engine_tick_ms: u64,

    #[serde(default = "default_forward_speed_pct")]
    pub forward_speed_pct: u8,

    #[serde(default = "default_blade_speed_pct")]
    pub blade_speed_pct: u8,

    /// Speed used for reversing and every turn.
    #[serde(default = "default_maneuver_speed_pct")]
    pub maneuver_speed_pct: u8,

    #[serde(default = "default_evade_reverse_ms")]
    pub evade_reverse_ms: u64,

    #[serde(default = "default_evade_turn_ms")]
    pub evade_turn_ms: u64,

    /// Straight-line leg length before a scheduled coverage turn.
    #[serde(default = "default_coverage_leg_ms")]
    pub coverage_leg_ms: u64,

    #[serde(default = "default_turn_pause_ms")]
    pub turn_pause_ms: u64,

    #[serde(default = "default_coverage_turn_ms")]
    pub coverage_turn_ms: u64,

    // ── Link watchdog ────────────────────────────────────────────────────
    #[serde(default = "default_watchdog_tick_ms")]
    pub watchdog_tick_ms: u64,

    /// Maximum supervisor silence before a forced stop.
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: u64,

    // ── Status + video ───────────────────────────────────────────────────
    #[serde(default = "default_status_tick_ms")]
    pub status_tick_ms: u64,

    /// Simulated battery drain per status tick while moving or cutting.
    #[serde(default = "default_battery_step_pct")]
    pub battery_step_pct: f32,

    /// Camera frame period (100 ms = 10 FPS).
    #[serde(default = "default_video_frame_ms")]
    pub video_frame_ms: u64,
}

fn default_obstacle_poll_ms() -> u64 {
    200
}
fn default_obstacle_threshold_cm() -> f32 {
    30.0
}
fn default_sensor_timeout_ms() -> u64 {
    200
}
fn default_error_backoff_ms() -> u64 {
    1_000
}
fn default_engine_tick_ms() -> u64 {
    500
}
fn default_forward_speed_pct() -> u8 {
    50
}
fn default_blade_speed_pct() -> u8 {
    80
}
fn default_maneuver_speed_pct() -> u8 {
    40
}
fn default_evade_reverse_ms() -> u64 {
    1_500
}
fn default_evade_turn_ms() -> u64 {
    2_000
}
fn default_coverage_leg_ms() -> u64 {
    10_000
}
fn default_turn_pause_ms() -> u64 {
    500
}
fn default_coverage_turn_ms() -> u64 {
    1_500
}
fn default_watchdog_tick_ms() -> u64 {
    1_000
}
fn default_heartbeat_timeout_ms() -> u64 {
    10_000
}
fn default_status_tick_ms() -> u64 {
    1_000
}
fn default_battery_step_pct() -> f32 {
    0.01
}
fn default_video_frame_ms() -> u64 {
    100
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            obstacle_poll_ms: default_obstacle_poll_ms(),
            obstacle_threshold_cm: default_obstacle_threshold_cm(),
            sensor_timeout_ms: default_sensor_timeout_ms(),
            error_backoff_ms: default_error_backoff_ms(),
            engine_tick_ms: default_engine_tick_ms(),
            forward_speed_pct: default_forward_speed_pct(),
            blade_speed_pct: default_blade_speed_pct(),
            maneuver_speed_pct: default_maneuver_speed_pct(),
            evade_reverse_ms: default_evade_reverse_ms(),
            evade_turn_ms: default_evade_turn_ms(),
            coverage_leg_ms: default_coverage_leg_ms(),
            turn_pause_ms: default_turn_pause_ms(),
            coverage_turn_ms: default_coverage_turn_ms(),
            watchdog_tick_ms: default_watchdog_tick_ms(),
            heartbeat_timeout_ms: default_heartbeat_timeout_ms(),
            status_tick_ms: default_status_tick_ms(),
            battery_step_pct: default_battery_step_pct(),
            video_frame_ms: default_video_frame_ms(),
        }
    }
}

impl ControllerConfig {
    pub fn obstacle_poll(&self) -> Duration {
        Duration::from_millis(self.obstacle_poll_ms)
    }
    pub fn sensor_timeout(&self) -> Duration {
        Duration::from_millis(self.sensor_timeout_ms)
    }
    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }
    pub fn engine_tick(&self) -> Duration {
        Duration::from_millis(self.engine_tick_ms)
    }
    pub fn evade_reverse(&self) -> Duration {
        Duration::from_millis(self.evade_reverse_ms)
    }
    pub fn evade_turn(&self) -> Duration {
        Duration::from_millis(self.evade_turn_ms)
    }
    pub fn coverage_leg(&self) -> Duration {
        Duration::from_millis(self.coverage_leg_ms)
    }
    pub fn turn_pause(&self) -> Duration {
        Duration::from_millis(self.turn_pause_ms)
    }
    pub fn coverage_turn(&self) -> Duration {
        Duration::from_millis(self.coverage_turn_ms)
    }
    pub fn watchdog_tick(&self) -> Duration {
        Duration::from_millis(self.watchdog_tick_ms)
    }
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }
    pub fn status_tick(&self) -> Duration {
        Duration::from_millis(self.status_tick_ms)
    }
    pub fn video_frame(&self) -> Duration {
        Duration::from_millis(self.video_frame_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_stock_behaviour() {
        let cfg = ControllerConfig::default();
        assert_eq!(cfg.obstacle_poll(), Duration::from_millis(200));
        assert_eq!(cfg.obstacle_threshold_cm, 30.0);
        assert_eq!(cfg.engine_tick(), Duration::from_millis(500));
        assert_eq!(cfg.coverage_leg(), Duration::from_secs(10));
        assert_eq!(cfg.heartbeat_timeout(), Duration::from_secs(10));
        assert_eq!(cfg.forward_speed_pct, 50);
        assert_eq!(cfg.blade_speed_pct, 80);
        assert_eq!(cfg.maneuver_speed_pct, 40);
    }

    #[test]
    fn partial_table_keeps_other_defaults() {
        let cfg: ControllerConfig =
            serde_json::from_str(r#"{"obstacle_threshold_cm": 45.0, "coverage_leg_ms": 4000}"#)
                .unwrap();
        assert_eq!(cfg.obstacle_threshold_cm, 45.0);
        assert_eq!(cfg.coverage_leg(), Duration::from_secs(4));
        assert_eq!(cfg.evade_turn(), Duration::from_secs(2));
        assert_eq!(cfg.video_frame(), Duration::from_millis(100));
    }
}
