//! [`LinkHealth`] – supervisor link freshness monitor.
//!
//! The command router calls [`LinkHealth::heartbeat`] whenever the remote
//! supervisor proves it is alive (a `heartbeat` message, or the connection
//! being established).  The link watchdog loop polls
//! [`LinkHealth::freshness`] and forces the mower to a stop once the link has
//! been silent for longer than the configured timeout.
//!
//! The heartbeat timestamp is a single atomic, so recording a heartbeat never
//! waits behind the safety-state lock or any other loop.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::Instant;

// ────────────────────────────────────────────────────────────────────────────
// Heartbeat clock
// ────────────────────────────────────────────────────────────────────────────

/// Lock-free "last heard from" timestamp.
///
/// Stored as nanoseconds since the clock was created, so the instant read back
/// is exactly the one recorded.  Timestamps only move forward; an older
/// heartbeat arriving late is ignored.
#[derive(Debug)]
pub struct HeartbeatClock {
    origin: Instant,
    last_ns: AtomicU64,
}

impl Default for HeartbeatClock {
    fn default() -> Self {
        Self::new()
    }
}

impl HeartbeatClock {
    /// A clock whose last heartbeat is "now".
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            last_ns: AtomicU64::new(0),
        }
    }

    /// Record a heartbeat at the current time.
    pub fn beat(&self) {
        self.beat_at(Instant::now());
    }

    /// Record a heartbeat observed at `at`.
    pub fn beat_at(&self, at: Instant) {
        let ns = u64::try_from(at.saturating_duration_since(self.origin).as_nanos())
            .unwrap_or(u64::MAX);
        self.last_ns.fetch_max(ns, Ordering::AcqRel);
    }

    /// When the most recent heartbeat was recorded.
    pub fn last_heartbeat_at(&self) -> Instant {
        self.origin + Duration::from_nanos(self.last_ns.load(Ordering::Acquire))
    }

    /// Time elapsed between the last heartbeat and `now`.
    pub fn since_last(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_heartbeat_at())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Link health
// ────────────────────────────────────────────────────────────────────────────

/// Freshness state reported for the supervisor link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkFreshness {
    /// No supervisor is connected; nothing to supervise.
    Disconnected,
    /// A heartbeat arrived within the timeout.
    Fresh,
    /// Connected, but silent for longer than the timeout.
    Stale { silent_for: Duration },
}

/// Connection flag plus heartbeat clock for the single supervisor link.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use mower_kernel::watchdog::{LinkFreshness, LinkHealth};
///
/// let health = LinkHealth::new(Duration::from_secs(10));
/// assert_eq!(health.freshness(tokio::time::Instant::now()), LinkFreshness::Disconnected);
///
/// health.mark_connected();
/// assert_eq!(health.freshness(tokio::time::Instant::now()), LinkFreshness::Fresh);
/// ```
#[derive(Debug)]
pub struct LinkHealth {
    clock: HeartbeatClock,
    connected: AtomicBool,
    timeout: Duration,
}

impl LinkHealth {
    /// Create a disconnected link with the given heartbeat `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self {
            clock: HeartbeatClock::new(),
            connected: AtomicBool::new(false),
            timeout,
        }
    }

    /// Maximum allowed silence.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The link came up.  Establishing the connection counts as a heartbeat.
    pub fn mark_connected(&self) {
        self.clock.beat();
        self.connected.store(true, Ordering::Release);
    }

    /// The link went down.
    pub fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::Release);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// The supervisor proved it is alive.
    pub fn heartbeat(&self) {
        self.clock.beat();
    }

    pub fn clock(&self) -> &HeartbeatClock {
        &self.clock
    }

    /// Classify the link as of `now`.
    pub fn freshness(&self, now: Instant) -> LinkFreshness {
        if !self.is_connected() {
            return LinkFreshness::Disconnected;
        }
        let silent_for = self.clock.since_last(now);
        if silent_for > self.timeout {
            LinkFreshness::Stale { silent_for }
        } else {
            LinkFreshness::Fresh
        }
    }
}
