//! Trailing event log listing.

use std::io::Write;

use anyhow::Result;
use chrono::SecondsFormat;
use gtm_store::SnapshotStore;

use crate::commands::report::load_registry;

pub fn run<W: Write>(writer: &mut W, store: &mut dyn SnapshotStore, limit: usize) -> Result<()> {
    let registry = load_registry(store)?;

    let mut shown = 0;
    for event in registry.events().take(limit) {
        writeln!(
            writer,
            "{}  {:<16} {}",
            event.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
            event.device_id,
            event.kind
        )?;
        shown += 1;
    }
    if shown == 0 {
        writeln!(writer, "No events recorded.")?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use gtm_core::{DeviceRegistry, apply, normalize};
    use gtm_store::{JsonStore, Snapshot};

    #[test]
    fn lists_newest_first_and_honors_limit() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = DeviceRegistry::new();
        for (payload, ts) in [
            (
                r#"{"playerId":"switch","event":"game_start"}"#,
                "2024-01-01T10:00:00Z",
            ),
            (
                r#"{"playerId":"switch","event":"game_end"}"#,
                "2024-01-01T11:00:00Z",
            ),
            (
                r#"{"playerId":"pc","event":"game_start"}"#,
                "2024-01-01T12:00:00Z",
            ),
        ] {
            let received = DateTime::parse_from_rfc3339(ts).unwrap().with_timezone(&Utc);
            apply(&mut registry, normalize(payload.as_bytes(), received).unwrap());
        }
        let mut store = JsonStore::new(dir.path().join("snapshot.json"));
        store
            .save(&Snapshot::capture(&registry, Utc::now()))
            .unwrap();

        let mut output = Vec::new();
        run(&mut output, &mut store, 2).unwrap();
        let output = String::from_utf8(output).unwrap();

        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("pc"));
        assert!(lines[0].ends_with("start"));
        assert!(lines[1].contains("switch"));
        assert!(lines[1].ends_with("end"));
    }

    #[test]
    fn empty_log_prints_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = JsonStore::new(dir.path().join("absent.json"));

        let mut output = Vec::new();
        run(&mut output, &mut store, 20).unwrap();
        assert_eq!(String::from_utf8(output).unwrap(), "No events recorded.\n");
    }
}
