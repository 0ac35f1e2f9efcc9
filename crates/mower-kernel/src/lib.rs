//! `mower-kernel` – Safety & Supervision
//!
//! The brainstem of the mower controller. It does not plan; it holds the one
//! shared record every loop reads and writes, and it enforces the rules that
//! keep a blade-equipped machine from moving unsafely.
//!
//! # Modules
//!
//! - [`safety_state`] – [`SafetyState`][safety_state::SafetyState]: the
//!   mutex-guarded motion/blade/obstacle/battery record.  It owns the
//!   [`ActuationPort`][mower_hal::ActuationPort], so every state change and
//!   the matching motor command happen in one critical section.  The obstacle
//!   interlock and the control-epoch arbitration between manual commands and
//!   the autonomous engine live here.
//! - [`watchdog`] – [`HeartbeatClock`][watchdog::HeartbeatClock] and
//!   [`LinkHealth`][watchdog::LinkHealth]: lock-free heartbeat freshness
//!   tracking for the remote supervisor link.

pub mod safety_state;
pub mod watchdog;

pub use safety_state::{ControlView, DriveOutcome, InterlockOutcome, SafetyState};
pub use watchdog::{HeartbeatClock, LinkFreshness, LinkHealth};
