//! Device listing.

use std::io::Write;

use anyhow::Result;
use chrono::Utc;
use gtm_store::SnapshotStore;

use crate::commands::report::load_registry;
use crate::commands::util::format_duration;

pub fn run<W: Write>(writer: &mut W, store: &mut dyn SnapshotStore, json: bool) -> Result<()> {
    let registry = load_registry(store)?;

    if json {
        serde_json::to_writer_pretty(&mut *writer, &registry.devices_cloned())?;
        writeln!(writer)?;
        return Ok(());
    }

    if registry.is_empty() {
        writeln!(writer, "No devices known.")?;
        return Ok(());
    }

    let now = Utc::now();
    for device in registry.devices() {
        let presence = if device.is_online { "online" } else { "offline" };
        let estimated = if device.has_estimated_sessions() {
            " ~"
        } else {
            ""
        };
        writeln!(
            writer,
            "{:<24} [{}] {:<7} {}  {} session(s){estimated}",
            device.display_name,
            device.id,
            presence,
            format_duration(device.total_ms_at(now)),
            device.closed_sessions.len()
        )?;
    }
    writeln!(
        writer,
        "\n{} device(s), {} online",
        registry.len(),
        registry.online_count()
    )?;

    Ok(())
}
