//! Canonical lifecycle events, after normalization.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{DeviceId, SessionId};

/// The kind of lifecycle event, derived from the payload's `event`/`type`
/// field.
///
/// Device firmware in the wild uses both long and short spellings, so
/// parsing accepts the legacy `game_start`/`game_end` aliases alongside
/// `start`/`end`. Anything else is preserved verbatim as [`Self::Unknown`]
/// rather than rejected: unknown kinds carry no state transition but are
/// still worth keeping in the trailing log.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// The device came online and a play session began.
    Start,
    /// The device went offline and the session ended.
    End,
    /// Anything else, with the raw kind string retained for display.
    Unknown(String),
}

impl EventKind {
    /// Parses a raw kind string. Never fails; unrecognized values become
    /// [`Self::Unknown`].
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match raw {
            "game_start" | "start" => Self::Start,
            "game_end" | "end" => Self::End,
            other => Self::Unknown(other.to_string()),
        }
    }

    /// Canonical string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Start => "start",
            Self::End => "end",
            Self::Unknown(raw) => raw,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for EventKind {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventKind {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(Self::parse(&s))
    }
}

/// A canonical lifecycle event, as produced by the normalizer.
///
/// Events are transient: they drive the session reconstructor and are kept
/// only in the registry's bounded trailing log for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// The device this event belongs to.
    pub device_id: DeviceId,
    /// What happened.
    pub kind: EventKind,
    /// When it happened (falls back to arrival time during normalization).
    pub timestamp: DateTime<Utc>,
    /// Optional correlation token tying a start to its end.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    /// Human label carried by the payload, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// The full original payload, retained for display.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_parses_aliases() {
        assert_eq!(EventKind::parse("game_start"), EventKind::Start);
        assert_eq!(EventKind::parse("start"), EventKind::Start);
        assert_eq!(EventKind::parse("game_end"), EventKind::End);
        assert_eq!(EventKind::parse("end"), EventKind::End);
        assert_eq!(
            EventKind::parse("heartbeat"),
            EventKind::Unknown("heartbeat".to_string())
        );
    }

    #[test]
    fn kind_serde_uses_canonical_string() {
        let json = serde_json::to_string(&EventKind::Start).unwrap();
        assert_eq!(json, "\"start\"");
        let parsed: EventKind = serde_json::from_str("\"game_end\"").unwrap();
        assert_eq!(parsed, EventKind::End);
    }

    #[test]
    fn event_serde_roundtrip() {
        let event = Event {
            device_id: DeviceId::new("d1").unwrap(),
            kind: EventKind::Start,
            timestamp: Utc::now(),
            session_id: Some(SessionId::new("s1").unwrap()),
            display_name: Some("Living room".to_string()),
            extra: None,
        };

        let json = serde_json::to_string(&event).unwrap();
        let parsed: Event = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.device_id, event.device_id);
        assert_eq!(parsed.kind, event.kind);
        assert_eq!(parsed.session_id, event.session_id);
    }
}
