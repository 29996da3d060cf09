//! Session reconstruction from the lifecycle event stream.
//!
//! The transport delivers at-least-once and unordered, and the monitor
//! itself may restart mid-session, so the event stream can miss a start
//! (observer restarted), miss an end (device crashed), or repeat an end.
//! This module rebuilds session boundaries anyway: matched pairs close
//! normally, an unmatched end while the device is marked online produces an
//! *estimated* session rather than dropping the play time, and a stale end
//! is a no-op notice.

use chrono::{DateTime, Utc};

use crate::device::{ClosedSession, OpenSession};
use crate::event::{Event, EventKind};
use crate::registry::DeviceRegistry;
use crate::types::DeviceId;

/// Outcome of applying one event. Informational only; none of these are
/// errors — duplicate and unknown events are an assumed operating
/// condition, not an exceptional one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    /// A session was opened.
    SessionOpened {
        device: DeviceId,
        /// True when a still-open session was discarded (last start wins).
        discarded_open: bool,
    },
    /// A session was closed against its observed start event.
    SessionClosed { device: DeviceId, duration_ms: i64 },
    /// A session was synthesized because the start boundary was missing.
    SessionEstimated { device: DeviceId, duration_ms: i64 },
    /// An end event arrived for a device that was already offline.
    StaleEnd { device: DeviceId },
    /// The event kind carried no state transition.
    UnknownKind { device: DeviceId, kind: String },
}

/// Applies one normalized event to the registry.
///
/// This is the single mutation entry point for event traffic; callers must
/// serialize invocations (see the engine's command queue) because the
/// recovery path below reads the device's closed-session history.
pub fn apply(registry: &mut DeviceRegistry, event: Event) -> Applied {
    let device = registry.device_entry(
        &event.device_id,
        event.display_name.as_deref(),
        event.timestamp,
    );

    let applied = match &event.kind {
        EventKind::Start => {
            let discarded_open = device.open_session.is_some();
            if discarded_open {
                tracing::warn!(
                    device = %device.id,
                    "start event discarded a still-open session (last start wins)"
                );
            }
            device.open_session = Some(OpenSession {
                start_time: event.timestamp,
                session_id: event.session_id.clone(),
            });
            device.is_online = true;
            Applied::SessionOpened {
                device: event.device_id.clone(),
                discarded_open,
            }
        }
        EventKind::End => {
            if let Some(open) = device.open_session.take() {
                // Matched pair: close normally.
                let duration_ms = (event.timestamp - open.start_time)
                    .num_milliseconds()
                    .max(0);
                device.closed_sessions.push(ClosedSession {
                    start_time: open.start_time,
                    end_time: event.timestamp,
                    duration_ms,
                    session_id: event.session_id.clone().or(open.session_id),
                    estimated: false,
                });
                device.total_ms += duration_ms;
                device.is_online = false;
                Applied::SessionClosed {
                    device: event.device_id.clone(),
                    duration_ms,
                }
            } else if device.is_online {
                // Recovery path: the device is marked online but the open
                // session was lost (typically a restart cleared it). Infer
                // a start boundary instead of dropping the play time.
                let end = event.timestamp;
                let mut start = device.last_closed_end().unwrap_or(end);
                if start > end {
                    // The last closed session ended "after" this end event;
                    // clamp to the start of the end event's calendar day.
                    start = start_of_day(end);
                }
                let duration_ms = (end - start).num_milliseconds().max(0);
                device.closed_sessions.push(ClosedSession {
                    start_time: start,
                    end_time: end,
                    duration_ms,
                    session_id: event.session_id.clone(),
                    estimated: true,
                });
                device.total_ms += duration_ms;
                device.is_online = false;
                tracing::info!(
                    device = %device.id,
                    duration_ms,
                    "recorded estimated session for unmatched end event"
                );
                Applied::SessionEstimated {
                    device: event.device_id.clone(),
                    duration_ms,
                }
            } else {
                // Already offline: duplicate or stale retransmission.
                Applied::StaleEnd {
                    device: event.device_id.clone(),
                }
            }
        }
        EventKind::Unknown(kind) => Applied::UnknownKind {
            device: event.device_id.clone(),
            kind: kind.clone(),
        },
    };

    registry.push_event(event);
    applied
}

/// Midnight UTC on the given instant's calendar day.
fn start_of_day(instant: DateTime<Utc>) -> DateTime<Utc> {
    instant
        .date_naive()
        .and_time(chrono::NaiveTime::MIN)
        .and_utc()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    use crate::types::SessionId;

    fn at(rfc3339: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(rfc3339)
            .unwrap()
            .with_timezone(&Utc)
    }

    fn event(id: &str, kind: EventKind, timestamp: DateTime<Utc>) -> Event {
        Event {
            device_id: DeviceId::new(id).unwrap(),
            kind,
            timestamp,
            session_id: None,
            display_name: None,
            extra: None,
        }
    }

    fn d1() -> DeviceId {
        DeviceId::new("d1").unwrap()
    }

    #[test]
    fn matched_pair_closes_with_exact_duration() {
        let mut registry = DeviceRegistry::new();
        let start = at("2024-03-01T10:00:00Z");
        let end = start + Duration::milliseconds(90_000);

        apply(&mut registry, event("d1", EventKind::Start, start));
        let applied = apply(&mut registry, event("d1", EventKind::End, end));

        assert_eq!(
            applied,
            Applied::SessionClosed {
                device: d1(),
                duration_ms: 90_000
            }
        );
        let device = registry.device(&d1()).unwrap();
        assert!(!device.is_online);
        assert!(device.open_session.is_none());
        assert_eq!(device.closed_sessions.len(), 1);
        let session = &device.closed_sessions[0];
        assert_eq!(session.duration_ms, 90_000);
        assert!(!session.estimated);
        assert_eq!(device.total_ms, 90_000);
    }

    #[test]
    fn start_marks_device_online() {
        let mut registry = DeviceRegistry::new();
        apply(
            &mut registry,
            event("d1", EventKind::Start, at("2024-03-01T10:00:00Z")),
        );
        let device = registry.device(&d1()).unwrap();
        assert!(device.is_online);
        assert!(device.open_session.is_some());
        assert_eq!(registry.online_count(), 1);
    }

    #[test]
    fn second_start_discards_open_session() {
        let mut registry = DeviceRegistry::new();
        let first = at("2024-03-01T10:00:00Z");
        let second = first + Duration::minutes(5);

        apply(&mut registry, event("d1", EventKind::Start, first));
        let applied = apply(&mut registry, event("d1", EventKind::Start, second));

        assert_eq!(
            applied,
            Applied::SessionOpened {
                device: d1(),
                discarded_open: true
            }
        );
        let device = registry.device(&d1()).unwrap();
        // Last start wins: the open session now starts at the second event
        // and the first interval is not recorded anywhere.
        assert_eq!(device.open_session.as_ref().unwrap().start_time, second);
        assert!(device.closed_sessions.is_empty());
        assert_eq!(device.total_ms, 0);
    }

    #[test]
    fn negative_duration_clamped_to_zero() {
        let mut registry = DeviceRegistry::new();
        let start = at("2024-03-01T10:00:00Z");
        // Clock anomaly: end before start.
        let end = start - Duration::seconds(30);

        apply(&mut registry, event("d1", EventKind::Start, start));
        let applied = apply(&mut registry, event("d1", EventKind::End, end));

        assert_eq!(
            applied,
            Applied::SessionClosed {
                device: d1(),
                duration_ms: 0
            }
        );
        assert_eq!(registry.device(&d1()).unwrap().total_ms, 0);
    }

    #[test]
    fn recovery_estimates_from_last_closed_session() {
        // Restart scenario: start at T, restart clears the open
        // session but keeps the device online, end at T+3600000 with a
        // prior session ending at T-600000.
        let t = at("2024-03-01T10:00:00Z");
        let mut registry = DeviceRegistry::new();

        apply(
            &mut registry,
            event("d1", EventKind::Start, t - Duration::minutes(30)),
        );
        apply(
            &mut registry,
            event("d1", EventKind::End, t - Duration::milliseconds(600_000)),
        );
        apply(&mut registry, event("d1", EventKind::Start, t));

        // Simulate the restart: snapshot reload clears open sessions.
        let mut registry =
            DeviceRegistry::restore(registry.devices_cloned(), registry.events_cloned());
        let device = registry.device(&d1()).unwrap();
        assert!(device.is_online);
        assert!(device.open_session.is_none());

        let end = t + Duration::milliseconds(3_600_000);
        let applied = apply(&mut registry, event("d1", EventKind::End, end));

        assert_eq!(
            applied,
            Applied::SessionEstimated {
                device: d1(),
                duration_ms: 4_200_000
            }
        );
        let device = registry.device(&d1()).unwrap();
        let synthesized = device.closed_sessions.last().unwrap();
        assert!(synthesized.estimated);
        assert_eq!(synthesized.start_time, t - Duration::milliseconds(600_000));
        assert_eq!(synthesized.duration_ms, 4_200_000);
        assert!(!device.is_online);
    }

    #[test]
    fn recovery_without_history_yields_zero_duration() {
        let mut registry = DeviceRegistry::new();
        apply(
            &mut registry,
            event("d1", EventKind::Start, at("2024-03-01T10:00:00Z")),
        );
        let mut registry =
            DeviceRegistry::restore(registry.devices_cloned(), registry.events_cloned());

        let end = at("2024-03-01T11:00:00Z");
        let applied = apply(&mut registry, event("d1", EventKind::End, end));

        // No prior closed session: the estimate falls back to the end
        // timestamp itself rather than fabricating a duration.
        assert_eq!(
            applied,
            Applied::SessionEstimated {
                device: d1(),
                duration_ms: 0
            }
        );
        let session = registry.device(&d1()).unwrap().closed_sessions.last().unwrap().clone();
        assert_eq!(session.start_time, end);
        assert!(session.estimated);
    }

    #[test]
    fn recovery_with_future_estimate_clamps_to_day_start() {
        let mut registry = DeviceRegistry::new();
        // A prior session that ended "tomorrow" relative to the stale end
        // event we are about to receive.
        apply(
            &mut registry,
            event("d1", EventKind::Start, at("2024-03-02T01:00:00Z")),
        );
        apply(
            &mut registry,
            event("d1", EventKind::End, at("2024-03-02T02:00:00Z")),
        );
        apply(
            &mut registry,
            event("d1", EventKind::Start, at("2024-03-02T03:00:00Z")),
        );
        let mut registry =
            DeviceRegistry::restore(registry.devices_cloned(), registry.events_cloned());

        // End event on the previous day.
        let end = at("2024-03-01T06:00:00Z");
        let applied = apply(&mut registry, event("d1", EventKind::End, end));

        let Applied::SessionEstimated { duration_ms, .. } = applied else {
            panic!("expected estimated session, got {applied:?}");
        };
        let session = registry.device(&d1()).unwrap().closed_sessions.last().unwrap().clone();
        assert_eq!(session.start_time, at("2024-03-01T00:00:00Z"));
        assert_eq!(duration_ms, 6 * 3_600_000);
        assert!(duration_ms >= 0);
    }

    #[test]
    fn stale_end_is_a_noop() {
        let mut registry = DeviceRegistry::new();
        let start = at("2024-03-01T10:00:00Z");
        let end = start + Duration::minutes(10);

        apply(&mut registry, event("d1", EventKind::Start, start));
        apply(&mut registry, event("d1", EventKind::End, end));
        // At-least-once delivery: the end arrives again.
        let applied = apply(&mut registry, event("d1", EventKind::End, end));

        assert_eq!(applied, Applied::StaleEnd { device: d1() });
        let device = registry.device(&d1()).unwrap();
        assert_eq!(device.closed_sessions.len(), 1);
        assert_eq!(device.total_ms, 600_000);
    }

    #[test]
    fn unknown_kind_carries_no_transition() {
        let mut registry = DeviceRegistry::new();
        let applied = apply(
            &mut registry,
            event(
                "d1",
                EventKind::Unknown("heartbeat".to_string()),
                at("2024-03-01T10:00:00Z"),
            ),
        );

        assert_eq!(
            applied,
            Applied::UnknownKind {
                device: d1(),
                kind: "heartbeat".to_string()
            }
        );
        let device = registry.device(&d1()).unwrap();
        assert!(!device.is_online);
        assert!(device.open_session.is_none());
        // The device record was still created lazily and the event logged.
        assert_eq!(registry.events().count(), 1);
    }

    #[test]
    fn events_land_in_trailing_log() {
        let mut registry = DeviceRegistry::new();
        let start = at("2024-03-01T10:00:00Z");
        apply(&mut registry, event("d1", EventKind::Start, start));
        apply(
            &mut registry,
            event("d2", EventKind::Start, start + Duration::seconds(1)),
        );

        let newest = registry.events().next().unwrap();
        assert_eq!(newest.device_id.as_str(), "d2");
        assert_eq!(registry.events().count(), 2);
    }

    #[test]
    fn session_id_prefers_end_event_token() {
        let mut registry = DeviceRegistry::new();
        let start = at("2024-03-01T10:00:00Z");
        let mut start_event = event("d1", EventKind::Start, start);
        start_event.session_id = Some(SessionId::new("from-start").unwrap());
        apply(&mut registry, start_event);

        let mut end_event = event("d1", EventKind::End, start + Duration::minutes(1));
        end_event.session_id = Some(SessionId::new("from-end").unwrap());
        apply(&mut registry, end_event);

        let session = &registry.device(&d1()).unwrap().closed_sessions[0];
        assert_eq!(session.session_id.as_ref().unwrap().as_str(), "from-end");
    }
}
