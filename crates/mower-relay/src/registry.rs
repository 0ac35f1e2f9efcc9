//! [`SessionRegistry`] – which robots the relay has heard from, and when.
//!
//! A connection becomes a robot session the first time it sends
//! `mower_status`.  Sessions are kept after the socket closes and only
//! dropped by [`SessionRegistry::sweep_idle`] once they have been quiet for
//! longer than the idle limit.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use mower_types::SafetySnapshot;
use serde::Serialize;
use uuid::Uuid;

/// Last known state of one robot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RobotSession {
    pub status: SafetySnapshot,
    pub last_update: DateTime<Utc>,
}

/// Thread-safe table of robot sessions keyed by connection id.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Mutex<BTreeMap<Uuid, RobotSession>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn sessions(&self) -> MutexGuard<'_, BTreeMap<Uuid, RobotSession>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store the latest status for `id`.  Returns `true` if this created a
    /// new session.
    pub fn record_status(&self, id: Uuid, status: SafetySnapshot, at: DateTime<Utc>) -> bool {
        self.sessions()
            .insert(
                id,
                RobotSession {
                    status,
                    last_update: at,
                },
            )
            .is_none()
    }

    pub fn get(&self, id: &Uuid) -> Option<RobotSession> {
        self.sessions().get(id).cloned()
    }

    pub fn remove(&self, id: &Uuid) -> Option<RobotSession> {
        self.sessions().remove(id)
    }

    pub fn len(&self) -> usize {
        self.sessions().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions().is_empty()
    }

    /// Drop every session whose last update is more than `max_idle` before
    /// `now`.  Returns the removed ids.
    pub fn sweep_idle(&self, now: DateTime<Utc>, max_idle: Duration) -> Vec<Uuid> {
        let mut sessions = self.sessions();
        let stale: Vec<Uuid> = sessions
            .iter()
            .filter(|(_, s)| {
                (now - s.last_update)
                    .to_std()
                    .is_ok_and(|idle| idle > max_idle)
            })
            .map(|(id, _)| *id)
            .collect();
        for id in &stale {
            sessions.remove(id);
        }
        stale
    }

    /// The session table as served by `GET /api/status`.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(&*self.sessions()).unwrap_or_else(|_| serde_json::json!({}))
    }
}
