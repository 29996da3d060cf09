//! Daily play-time report.

use std::io::Write;

use anyhow::Result;
use chrono::{Local, Utc};
use gtm_core::{DateRange, DeviceRegistry, daily_report};
use gtm_store::{Snapshot, SnapshotStore};

use crate::commands::util::format_duration;

/// Loads the registry a read-only command works against.
///
/// A missing snapshot is an empty registry, not an error.
pub fn load_registry(store: &mut dyn SnapshotStore) -> Result<DeviceRegistry> {
    Ok(store
        .load()?
        .map_or_else(DeviceRegistry::new, Snapshot::restore))
}

pub fn run<W: Write>(
    writer: &mut W,
    store: &mut dyn SnapshotStore,
    range: DateRange,
    json: bool,
) -> Result<()> {
    let registry = load_registry(store)?;
    let report = daily_report(registry.devices(), range, Utc::now(), &Local);

    if json {
        serde_json::to_writer_pretty(&mut *writer, &report)?;
        writeln!(writer)?;
        return Ok(());
    }

    if report.buckets.is_empty() {
        writeln!(writer, "No play time recorded.")?;
        return Ok(());
    }

    for bucket in &report.buckets {
        writeln!(
            writer,
            "{}  {}",
            bucket.date,
            format_duration(bucket.total_ms)
        )?;
        for stat in &bucket.devices {
            let marker = if stat.ongoing { "  (ongoing)" } else { "" };
            writeln!(
                writer,
                "  {:<24} {}{marker}",
                stat.name,
                format_duration(stat.duration_ms)
            )?;
        }
    }
    writeln!(writer)?;
    writeln!(
        writer,
        "Total: {} across {} device(s) on {} day(s)",
        format_duration(report.summary.total_ms),
        report.summary.device_count,
        report.summary.days
    )?;

    Ok(())
}
