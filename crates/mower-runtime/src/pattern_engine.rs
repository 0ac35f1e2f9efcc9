//! [`PatternEngine`] – unsupervised coverage and obstacle evasion.
//!
//! While autonomous mode is on, the engine runs a zig-zag coverage pattern:
//!
//! ```text
//!   Idle ──(not moving)──▶ Forward ──(10 s leg)──▶ Turning ──▶ Forward
//!                            │                                   ▲
//!                            └──(obstacle)──▶ Evading ───────────┘
//! ```
//!
//! * **Idle → Forward** – forward at cruise speed, blade on.
//! * **Takeover** – if autonomous mode is switched on while the mower is
//!   already under way, the blade is started and the engine adopts a forward
//!   leg, or runs the scheduled turn when heading any other way.  A manual
//!   command issued while the pattern is engaged runs as the current leg
//!   until the next scheduled turn.
//! * **Evading** – reverse, turn towards `turn_bias`, then forward again.
//!   No obstacle re-check happens mid-sequence.
//! * **Turning** – stop, pause, turn towards `turn_bias`, flip the bias,
//!   forward again.
//!
//! Maneuvers are explicit steps with deadlines instead of blocking sleeps.
//! [`PatternEngine::step`] is a pure function of the safety state and `now`,
//! returning when it next wants to run; the [`run`][PatternEngine::run] loop
//! sleeps until then (never longer than one tick) and stays responsive to
//! shutdown during a maneuver.
//!
//! Every drive command carries the control epoch observed when the decision
//! was made.  If a manual command, a mode change, or the link watchdog got in
//! first, the command is refused and the engine falls back to `Idle`.

use std::time::Duration;

use mower_kernel::{DriveOutcome, SafetyState};
use mower_types::{Direction, MowerError, TurnBias};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::ControllerConfig;
use crate::shutdown::{self, ShutdownSignal};

// ─────────────────────────────────────────────────────────────────────────────
// Cursor
// ─────────────────────────────────────────────────────────────────────────────

/// Coarse engine phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Forward,
    Evading,
    Turning,
}

/// One timed step of a maneuver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManeuverStep {
    /// Evading: backing away from the obstacle.
    Reverse,
    /// Evading: turning away.
    EvadeTurn,
    /// Turning: stopped before the scheduled turn.
    Pause,
    /// Turning: the scheduled turn itself.
    CoverageTurn,
}

/// Engine-owned progress through the pattern.
#[derive(Debug, Clone)]
pub struct PatternCursor {
    pub phase: Phase,
    pub turn_bias: TurnBias,
    pub phase_started_at: Instant,
    /// Current maneuver step and when it ends.
    pub step: Option<(ManeuverStep, Instant)>,
    epoch: u64,
    /// The engine has driven since autonomous mode was last switched on.
    engaged: bool,
}

impl PatternCursor {
    fn new(now: Instant) -> Self {
        Self {
            phase: Phase::Idle,
            turn_bias: TurnBias::Right,
            phase_started_at: now,
            step: None,
            epoch: 0,
            engaged: false,
        }
    }

    /// Back to `Idle`.  The turn bias survives so the zig-zag keeps
    /// alternating across interruptions.
    fn reset(&mut self, now: Instant) {
        self.phase = Phase::Idle;
        self.phase_started_at = now;
        self.step = None;
    }

    fn enter(&mut self, phase: Phase, now: Instant) {
        self.phase = phase;
        self.phase_started_at = now;
        self.step = None;
    }
}

#[derive(Debug, Clone)]
struct Timing {
    tick: Duration,
    backoff: Duration,
    forward_speed: u8,
    blade_speed: u8,
    maneuver_speed: u8,
    evade_reverse: Duration,
    evade_turn: Duration,
    coverage_leg: Duration,
    turn_pause: Duration,
    coverage_turn: Duration,
}

impl From<&ControllerConfig> for Timing {
    fn from(cfg: &ControllerConfig) -> Self {
        Self {
            tick: cfg.engine_tick(),
            backoff: cfg.error_backoff(),
            forward_speed: cfg.forward_speed_pct,
            blade_speed: cfg.blade_speed_pct,
            maneuver_speed: cfg.maneuver_speed_pct,
            evade_reverse: cfg.evade_reverse(),
            evade_turn: cfg.evade_turn(),
            coverage_leg: cfg.coverage_leg(),
            turn_pause: cfg.turn_pause(),
            coverage_turn: cfg.coverage_turn(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Engine
// ─────────────────────────────────────────────────────────────────────────────

pub struct PatternEngine {
    state: SafetyState,
    timing: Timing,
    cursor: PatternCursor,
}

impl PatternEngine {
    pub fn new(state: SafetyState, config: &ControllerConfig) -> Self {
        Self {
            state,
            timing: Timing::from(config),
            cursor: PatternCursor::new(Instant::now()),
        }
    }

    pub fn cursor(&self) -> &PatternCursor {
        &self.cursor
    }

    /// Advance the pattern as of `now` and return when to run next.
    ///
    /// # Errors
    ///
    /// [`MowerError::Actuator`] if a drive or blade command fails.  The
    /// cursor is left unchanged, so the same transition is retried on the
    /// next call.
    pub fn step(&mut self, now: Instant) -> Result<Instant, MowerError> {
        let next_tick = now + self.timing.tick;
        let view = self.state.control_view();

        if !view.engine_may_drive() {
            if self.cursor.phase != Phase::Idle {
                info!(
                    autonomous = view.snapshot.autonomous_mode,
                    link_lost = view.link_lost,
                    "autonomous pattern relinquished control"
                );
                self.cursor.reset(now);
            }
            self.cursor.engaged = false;
            return Ok(next_tick);
        }

        if self.cursor.phase != Phase::Idle && view.epoch != self.cursor.epoch {
            debug!(phase = ?self.cursor.phase, "autonomous pattern preempted");
            self.cursor.reset(now);
        }
        if self.cursor.phase == Phase::Idle {
            self.cursor.epoch = view.epoch;
        }

        let snapshot = view.snapshot;
        match self.cursor.phase {
            Phase::Idle => {
                if !snapshot.moving {
                    info!("starting autonomous coverage");
                    if self.start_forward(now, true)? {
                        self.cursor.engaged = true;
                    }
                } else if !self.cursor.engaged {
                    return self.take_over(snapshot.direction, snapshot.blade_active, now, next_tick);
                } else {
                    debug!(direction = %snapshot.direction, "manual motion runs as the current leg");
                    self.cursor.enter(Phase::Forward, now);
                }
                Ok(next_tick)
            }

            Phase::Forward => {
                if snapshot.obstacle_detected {
                    info!(
                        distance_cm = snapshot.last_distance_cm,
                        bias = ?self.cursor.turn_bias,
                        "obstacle ahead; evading"
                    );
                    let until = now + self.timing.evade_reverse;
                    if self.drive(Direction::Backward, self.timing.maneuver_speed, now)? {
                        self.cursor.enter(Phase::Evading, now);
                        self.cursor.step = Some((ManeuverStep::Reverse, until));
                        return Ok(until.min(next_tick));
                    }
                } else if now.saturating_duration_since(self.cursor.phase_started_at)
                    >= self.timing.coverage_leg
                {
                    info!(bias = ?self.cursor.turn_bias, "coverage leg complete; turning");
                    let until = now + self.timing.turn_pause;
                    if self.drive(Direction::Stop, 0, now)? {
                        self.cursor.enter(Phase::Turning, now);
                        self.cursor.step = Some((ManeuverStep::Pause, until));
                        return Ok(until.min(next_tick));
                    }
                } else if !snapshot.moving {
                    debug!("forward leg interrupted; resuming");
                    self.start_forward(now, false)?;
                }
                Ok(next_tick)
            }

            Phase::Evading | Phase::Turning => self.advance_maneuver(now, next_tick),
        }
    }

    fn advance_maneuver(&mut self, now: Instant, next_tick: Instant) -> Result<Instant, MowerError> {
        let Some((step, deadline)) = self.cursor.step else {
            self.cursor.reset(now);
            return Ok(next_tick);
        };
        if now < deadline {
            return Ok(deadline.min(next_tick));
        }

        let bias = self.cursor.turn_bias;
        match step {
            ManeuverStep::Reverse => {
                let until = now + self.timing.evade_turn;
                if self.drive(bias.direction(), self.timing.maneuver_speed, now)? {
                    self.cursor.step = Some((ManeuverStep::EvadeTurn, until));
                    return Ok(until.min(next_tick));
                }
            }
            ManeuverStep::Pause => {
                let until = now + self.timing.coverage_turn;
                if self.drive(bias.direction(), self.timing.maneuver_speed, now)? {
                    self.cursor.step = Some((ManeuverStep::CoverageTurn, until));
                    return Ok(until.min(next_tick));
                }
            }
            ManeuverStep::EvadeTurn => {
                if self.drive(Direction::Forward, self.timing.forward_speed, now)? {
                    self.cursor.enter(Phase::Forward, now);
                }
            }
            ManeuverStep::CoverageTurn => {
                if self.drive(Direction::Forward, self.timing.forward_speed, now)? {
                    self.cursor.turn_bias = bias.flipped();
                    self.cursor.enter(Phase::Forward, now);
                }
            }
        }
        Ok(next_tick)
    }

    /// Autonomous mode came on while the mower was already moving.
    fn take_over(
        &mut self,
        direction: Direction,
        blade_active: bool,
        now: Instant,
        next_tick: Instant,
    ) -> Result<Instant, MowerError> {
        if !blade_active && !self.blade_on(now)? {
            return Ok(next_tick);
        }
        self.cursor.engaged = true;

        if direction == Direction::Forward {
            info!("autonomous coverage adopting forward leg");
            self.cursor.enter(Phase::Forward, now);
            return Ok(next_tick);
        }

        info!(%direction, bias = ?self.cursor.turn_bias, "autonomous coverage taking over; turning");
        let until = now + self.timing.turn_pause;
        if self.drive(Direction::Stop, 0, now)? {
            self.cursor.enter(Phase::Turning, now);
            self.cursor.step = Some((ManeuverStep::Pause, until));
            return Ok(until.min(next_tick));
        }
        Ok(next_tick)
    }

    /// Forward at cruise speed (and blade on when `with_blade`).  Returns
    /// `false` if the engine lost arbitration.
    fn start_forward(&mut self, now: Instant, with_blade: bool) -> Result<bool, MowerError> {
        if !self.drive(Direction::Forward, self.timing.forward_speed, now)? {
            return Ok(false);
        }
        if with_blade && !self.blade_on(now)? {
            return Ok(false);
        }
        self.cursor.enter(Phase::Forward, now);
        Ok(true)
    }

    /// Blade on at cutting speed under the cursor's epoch.
    fn blade_on(&mut self, now: Instant) -> Result<bool, MowerError> {
        match self
            .state
            .engine_blade(self.cursor.epoch, true, self.timing.blade_speed)?
        {
            DriveOutcome::Applied => Ok(true),
            DriveOutcome::Preempted => {
                self.cursor.reset(now);
                Ok(false)
            }
        }
    }

    /// Issue one drive command under the cursor's epoch.  A refused command
    /// resets the cursor and returns `false`.
    fn drive(&mut self, direction: Direction, speed_pct: u8, now: Instant) -> Result<bool, MowerError> {
        match self.state.engine_drive(self.cursor.epoch, direction, speed_pct)? {
            DriveOutcome::Applied => Ok(true),
            DriveOutcome::Preempted => {
                debug!(%direction, "engine command preempted");
                self.cursor.reset(now);
                Ok(false)
            }
        }
    }

    pub async fn run(mut self, mut shutdown: ShutdownSignal) {
        info!("autonomous pattern engine started");
        loop {
            let now = Instant::now();
            let wake = match self.step(now) {
                Ok(wake) => wake,
                Err(e) => {
                    warn!(error = %e, "pattern engine error; backing off");
                    now + self.timing.backoff
                }
            };
            if shutdown::sleep_until(&mut shutdown, wake).await {
                break;
            }
        }
        info!("autonomous pattern engine stopped");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
