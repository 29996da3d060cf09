//! Payload normalization.
//!
//! Incoming telemetry arrives in several shapes (alternate id keys, missing
//! timestamps, extra fields). This module maps every raw payload into one
//! canonical [`Event`] or rejects it as malformed without touching any
//! state.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::event::{Event, EventKind};
use crate::types::{DeviceId, SessionId};

/// Accepted device identifier keys, in priority order.
const DEVICE_ID_KEYS: &[&str] = &["playerId", "player_id", "deviceId", "device_id"];

/// Accepted display name keys, in priority order.
const DISPLAY_NAME_KEYS: &[&str] = &["playerName", "deviceName"];

/// Errors produced while normalizing a raw payload.
///
/// All variants mean the payload was structurally invalid and was dropped.
/// A *missing device id* is intentionally not an error: ambiguous data is
/// preferable to dropped telemetry, so those events land on the `"unknown"`
/// sentinel device instead.
#[derive(Debug, Error)]
pub enum NormalizeError {
    /// The payload was not valid JSON.
    #[error("malformed payload: {0}")]
    Json(#[from] serde_json::Error),
    /// The payload parsed but was not a JSON object.
    #[error("malformed payload: not a JSON object")]
    NotAnObject,
}

/// Normalizes a raw payload into a canonical [`Event`].
///
/// `received_at` is the arrival time, used when the payload carries no
/// parsable timestamp.
pub fn normalize(raw: &[u8], received_at: DateTime<Utc>) -> Result<Event, NormalizeError> {
    let value: Value = serde_json::from_slice(raw)?;
    let Value::Object(obj) = value else {
        return Err(NormalizeError::NotAnObject);
    };

    let device_id = first_string(&obj, DEVICE_ID_KEYS)
        .and_then(|id| DeviceId::new(id).ok())
        .unwrap_or_else(DeviceId::unknown);

    let kind = first_string(&obj, &["event", "type"])
        .map_or_else(|| EventKind::Unknown(String::new()), |raw| EventKind::parse(&raw));

    let timestamp = obj
        .get("timestamp")
        .and_then(parse_timestamp)
        .unwrap_or(received_at);

    let session_id = first_string(&obj, &["sessionId", "session_id"])
        .and_then(|id| SessionId::new(id).ok());

    let display_name = first_string(&obj, DISPLAY_NAME_KEYS);

    Ok(Event {
        device_id,
        kind,
        timestamp,
        session_id,
        display_name,
        extra: Some(Value::Object(obj)),
    })
}

/// Returns the first non-empty string value among `keys`.
fn first_string(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| obj.get(*key))
        .filter_map(Value::as_str)
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

/// Parses a timestamp value: RFC 3339 strings or epoch milliseconds.
fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arrival() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-03-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn normalizes_full_payload() {
        let raw = br#"{
            "event": "game_start",
            "playerId": "d1",
            "playerName": "Living room",
            "sessionId": "s1",
            "timestamp": "2024-03-01T10:30:00Z"
        }"#;

        let event = normalize(raw, arrival()).unwrap();
        assert_eq!(event.device_id.as_str(), "d1");
        assert_eq!(event.kind, EventKind::Start);
        assert_eq!(event.display_name.as_deref(), Some("Living room"));
        assert_eq!(event.session_id.as_ref().unwrap().as_str(), "s1");
        assert_eq!(event.timestamp.to_rfc3339(), "2024-03-01T10:30:00+00:00");
    }

    #[test]
    fn device_id_key_priority() {
        let raw = br#"{"event":"start","player_id":"snake","deviceId":"camel"}"#;
        let event = normalize(raw, arrival()).unwrap();
        assert_eq!(event.device_id.as_str(), "snake");

        let raw = br#"{"event":"start","deviceId":"camel","device_id":"snake2"}"#;
        let event = normalize(raw, arrival()).unwrap();
        assert_eq!(event.device_id.as_str(), "camel");
    }

    #[test]
    fn missing_device_id_falls_back_to_sentinel() {
        let raw = br#"{"event":"end"}"#;
        let event = normalize(raw, arrival()).unwrap();
        assert!(event.device_id.is_unknown());
        assert_eq!(event.kind, EventKind::End);
    }

    #[test]
    fn empty_device_id_falls_back_to_sentinel() {
        let raw = br#"{"event":"end","playerId":""}"#;
        let event = normalize(raw, arrival()).unwrap();
        assert!(event.device_id.is_unknown());
    }

    #[test]
    fn kind_falls_back_to_type_key() {
        let raw = br#"{"type":"end","playerId":"d1"}"#;
        let event = normalize(raw, arrival()).unwrap();
        assert_eq!(event.kind, EventKind::End);
    }

    #[test]
    fn missing_timestamp_uses_arrival_time() {
        let raw = br#"{"event":"start","playerId":"d1"}"#;
        let event = normalize(raw, arrival()).unwrap();
        assert_eq!(event.timestamp, arrival());
    }

    #[test]
    fn unparsable_timestamp_uses_arrival_time() {
        let raw = br#"{"event":"start","playerId":"d1","timestamp":"yesterday-ish"}"#;
        let event = normalize(raw, arrival()).unwrap();
        assert_eq!(event.timestamp, arrival());
    }

    #[test]
    fn epoch_millis_timestamp() {
        let raw = br#"{"event":"start","playerId":"d1","timestamp":1709290800000}"#;
        let event = normalize(raw, arrival()).unwrap();
        assert_eq!(event.timestamp.timestamp_millis(), 1_709_290_800_000);
    }

    #[test]
    fn unknown_kind_is_preserved() {
        let raw = br#"{"event":"heartbeat","playerId":"d1"}"#;
        let event = normalize(raw, arrival()).unwrap();
        assert_eq!(event.kind, EventKind::Unknown("heartbeat".to_string()));
    }

    #[test]
    fn malformed_json_is_rejected() {
        let result = normalize(b"{not json", arrival());
        assert!(matches!(result, Err(NormalizeError::Json(_))));
    }

    #[test]
    fn non_object_payload_is_rejected() {
        let result = normalize(b"[1,2,3]", arrival());
        assert!(matches!(result, Err(NormalizeError::NotAnObject)));
    }

    #[test]
    fn extra_retains_full_payload() {
        let raw = br#"{"event":"start","playerId":"d1","firmware":"2.1"}"#;
        let event = normalize(raw, arrival()).unwrap();
        let extra = event.extra.unwrap();
        assert_eq!(extra.get("firmware").and_then(|v| v.as_str()), Some("2.1"));
    }
}
