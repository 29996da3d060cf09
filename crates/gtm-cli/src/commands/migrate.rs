//! Snapshot migration between store backends.

use std::io::Write;

use anyhow::Result;
use gtm_store::SnapshotStore;

pub fn run<W: Write>(
    writer: &mut W,
    source: &mut dyn SnapshotStore,
    dest: &mut dyn SnapshotStore,
    dest_label: &str,
) -> Result<()> {
    let stats = gtm_store::migrate(source, dest)?;
    writeln!(
        writer,
        "Migrated {} device(s) and {} event(s) to {dest_label}",
        stats.devices, stats.events
    )?;
    Ok(())
}
