//! Calendar-day aggregation of play time.
//!
//! Pure functions over the device registry: callable repeatedly, no hidden
//! state. Sessions that span midnight are split proportionally across the
//! days they touch, including the currently open session (treated as a
//! synthetic session ending "now").
//!
//! Bucketing is computed in an explicit timezone so the CLI can report in
//! local calendar days while library tests stay deterministic in UTC.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, LocalResult, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::Serialize;

use crate::device::Device;
use crate::types::DeviceId;

/// Milliseconds in a full calendar day.
const FULL_DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// An optional date-range filter, inclusive on both ends.
///
/// Filtering is whole-session: a session partially outside the range is
/// still split, and only its in-range day buckets are kept.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateRange {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl DateRange {
    /// No filtering at all.
    #[must_use]
    pub const fn unbounded() -> Self {
        Self {
            from: None,
            to: None,
        }
    }

    /// A range bounded on either or both ends.
    #[must_use]
    pub const fn new(from: Option<NaiveDate>, to: Option<NaiveDate>) -> Self {
        Self { from, to }
    }

    fn contains(&self, date: NaiveDate) -> bool {
        self.from.is_none_or(|from| date >= from) && self.to.is_none_or(|to| date <= to)
    }
}

/// One device's share of a single day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceDayStat {
    pub device_id: DeviceId,
    pub name: String,
    pub duration_ms: i64,
    /// True when part of this day's duration comes from a session that is
    /// still in progress.
    pub ongoing: bool,
}

/// Aggregated play time for one calendar date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailyBucket {
    pub date: NaiveDate,
    pub total_ms: i64,
    /// Per-device breakdown, sorted by duration descending.
    pub devices: Vec<DeviceDayStat>,
}

/// Totals across the whole reported range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportSummary {
    /// Number of days with at least one session slice.
    pub days: usize,
    pub total_ms: i64,
    /// Distinct devices appearing anywhere in the range.
    pub device_count: usize,
}

/// The full report: buckets sorted descending by date for presentation,
/// plus the summary row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailyReport {
    pub buckets: Vec<DailyBucket>,
    pub summary: ReportSummary,
}

/// One session's share of one day, before merging.
struct Slice {
    date: NaiveDate,
    duration_ms: i64,
    ongoing: bool,
}

/// Computes the daily report for the given devices.
///
/// Open sessions are treated as synthetic sessions ending at `now`.
/// Estimated sessions aggregate like any other; the `estimated` flag is a
/// per-session display concern.
pub fn daily_report<'a, Tz: TimeZone>(
    devices: impl IntoIterator<Item = &'a Device>,
    range: DateRange,
    now: DateTime<Utc>,
    tz: &Tz,
) -> DailyReport {
    let mut days: BTreeMap<NaiveDate, BTreeMap<DeviceId, (String, i64, bool)>> = BTreeMap::new();

    for device in devices {
        for session in &device.closed_sessions {
            add_session(
                &mut days,
                device,
                session.start_time,
                session.end_time,
                session.duration_ms,
                false,
                range,
                tz,
            );
        }
        if let Some(open) = &device.open_session {
            let duration_ms = (now - open.start_time).num_milliseconds().max(0);
            add_session(
                &mut days,
                device,
                open.start_time,
                now,
                duration_ms,
                true,
                range,
                tz,
            );
        }
    }

    let mut distinct: HashSet<DeviceId> = HashSet::new();
    let mut total_ms = 0;
    let mut buckets = Vec::with_capacity(days.len());

    // Descending by date for presentation.
    for (date, per_device) in days.into_iter().rev() {
        let mut devices: Vec<DeviceDayStat> = per_device
            .into_iter()
            .map(|(device_id, (name, duration_ms, ongoing))| {
                distinct.insert(device_id.clone());
                DeviceDayStat {
                    device_id,
                    name,
                    duration_ms,
                    ongoing,
                }
            })
            .collect();
        devices.sort_by(|a, b| {
            b.duration_ms
                .cmp(&a.duration_ms)
                .then_with(|| a.device_id.cmp(&b.device_id))
        });
        let bucket_total: i64 = devices.iter().map(|d| d.duration_ms).sum();
        total_ms += bucket_total;
        buckets.push(DailyBucket {
            date,
            total_ms: bucket_total,
            devices,
        });
    }

    DailyReport {
        summary: ReportSummary {
            days: buckets.len(),
            total_ms,
            device_count: distinct.len(),
        },
        buckets,
    }
}

#[expect(
    clippy::too_many_arguments,
    reason = "internal helper; bundling these into a struct obscures the call sites"
)]
fn add_session<Tz: TimeZone>(
    days: &mut BTreeMap<NaiveDate, BTreeMap<DeviceId, (String, i64, bool)>>,
    device: &Device,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    duration_ms: i64,
    ongoing: bool,
    range: DateRange,
    tz: &Tz,
) {
    let end = end.max(start);
    let start_date = start.with_timezone(tz).date_naive();
    let end_date = end.with_timezone(tz).date_naive();

    // Whole-session range filter.
    if range.from.is_some_and(|from| end_date < from)
        || range.to.is_some_and(|to| start_date > to)
    {
        return;
    }

    for slice in slice_session(start, end, start_date, end_date, duration_ms, ongoing, tz) {
        if !range.contains(slice.date) {
            continue;
        }
        let entry = days
            .entry(slice.date)
            .or_default()
            .entry(device.id.clone())
            .or_insert_with(|| (device.display_name.clone(), 0, false));
        entry.1 += slice.duration_ms;
        entry.2 |= slice.ongoing;
    }
}

/// Splits one session across the calendar days it touches.
///
/// First day: end-of-first-day minus start. Last day: end minus
/// start-of-last-day. Interior days: 24 hours. Every slice is clipped so
/// the slices never sum to more than the session's recorded duration
/// (absorbs rounding at day boundaries and clock anomalies).
fn slice_session<Tz: TimeZone>(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    start_date: NaiveDate,
    end_date: NaiveDate,
    duration_ms: i64,
    ongoing: bool,
    tz: &Tz,
) -> Vec<Slice> {
    if start_date == end_date {
        return vec![Slice {
            date: start_date,
            duration_ms: duration_ms.max(0),
            ongoing,
        }];
    }

    let mut slices = Vec::new();
    let mut remaining = duration_ms.max(0);
    let mut day = start_date;
    while day <= end_date {
        let wall_ms = if day == start_date {
            day.succ_opt()
                .map_or(0, |next| (day_start(next, tz) - start).num_milliseconds())
        } else if day == end_date {
            (end - day_start(day, tz)).num_milliseconds()
        } else {
            FULL_DAY_MS
        };
        let day_ms = wall_ms.clamp(0, remaining);
        remaining -= day_ms;
        slices.push(Slice {
            date: day,
            duration_ms: day_ms,
            ongoing: ongoing && day == end_date,
        });
        let Some(next) = day.succ_opt() else { break };
        day = next;
    }
    slices
}

/// Midnight of `date` in `tz`, expressed as a UTC instant.
///
/// DST fall-back picks the earlier midnight; a spring-forward gap at
/// midnight falls back to 01:00 local, which is guaranteed to exist.
fn day_start<Tz: TimeZone>(date: NaiveDate, tz: &Tz) -> DateTime<Utc> {
    let midnight = date.and_time(NaiveTime::MIN);
    match tz.from_local_datetime(&midnight) {
        LocalResult::Single(dt) | LocalResult::Ambiguous(dt, _) => dt.with_timezone(&Utc),
        LocalResult::None => {
            let one_am = date.and_time(NaiveTime::from_hms_opt(1, 0, 0).unwrap_or(NaiveTime::MIN));
            tz.from_local_datetime(&one_am)
                .earliest()
                .map_or_else(|| midnight.and_utc(), |dt| dt.with_timezone(&Utc))
        }
    }
}
