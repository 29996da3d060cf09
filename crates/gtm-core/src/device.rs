//! Devices and their play sessions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{DeviceId, SessionId};

/// A session that is currently in progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenSession {
    /// When the session started.
    pub start_time: DateTime<Utc>,
    /// Correlation token from the start event, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
}

/// A completed session. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClosedSession {
    /// When the session started (possibly inferred, see `estimated`).
    pub start_time: DateTime<Utc>,
    /// When the session ended.
    pub end_time: DateTime<Utc>,
    /// Recorded duration in milliseconds, clamped to be non-negative.
    pub duration_ms: i64,
    /// Correlation token, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    /// True when the start time was inferred because the matching start
    /// event was never observed.
    #[serde(default)]
    pub estimated: bool,
}

/// A monitored device and its accumulated play history.
///
/// `total_ms` is a cache over `closed_sessions` — it is recomputed on
/// snapshot reload and incremented in lockstep with every appended session,
/// never a source of truth that can drift.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    /// Stable identifier.
    pub id: DeviceId,
    /// Human label, defaults to the id.
    pub display_name: String,
    /// True between an accepted start event and the matching end.
    #[serde(default)]
    pub is_online: bool,
    /// The in-progress session, if one is open.
    ///
    /// `is_online == true` with no open session is the legal "phantom
    /// online" state after a snapshot reload; the next end event is routed
    /// through the recovery path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub open_session: Option<OpenSession>,
    /// Completed sessions in completion order.
    #[serde(default)]
    pub closed_sessions: Vec<ClosedSession>,
    /// Cached sum of `closed_sessions[*].duration_ms`.
    #[serde(default)]
    pub total_ms: i64,
    /// First-seen timestamp.
    pub created_at: DateTime<Utc>,
}

impl Device {
    /// Creates a new device record, first seen at `created_at`.
    #[must_use]
    pub fn new(id: DeviceId, display_name: Option<String>, created_at: DateTime<Utc>) -> Self {
        let display_name = display_name.unwrap_or_else(|| id.as_str().to_string());
        Self {
            id,
            display_name,
            is_online: false,
            open_session: None,
            closed_sessions: Vec::new(),
            total_ms: 0,
            created_at,
        }
    }

    /// Total play time including the open session's elapsed time at `now`.
    #[must_use]
    pub fn total_ms_at(&self, now: DateTime<Utc>) -> i64 {
        let open_ms = self
            .open_session
            .as_ref()
            .map_or(0, |open| (now - open.start_time).num_milliseconds().max(0));
        self.total_ms + open_ms
    }

    /// Re-derives the `total_ms` cache from the closed session list.
    pub fn recompute_total_ms(&mut self) {
        self.total_ms = self.closed_sessions.iter().map(|s| s.duration_ms).sum();
    }

    /// True if any recorded session has an inferred start time.
    #[must_use]
    pub fn has_estimated_sessions(&self) -> bool {
        self.closed_sessions.iter().any(|s| s.estimated)
    }

    /// End time of the most recently closed session, if any.
    #[must_use]
    pub fn last_closed_end(&self) -> Option<DateTime<Utc>> {
        self.closed_sessions.last().map(|s| s.end_time)
    }
}
