//! Device deletion.

use std::io::Write;

use anyhow::{Result, bail};
use chrono::Utc;
use gtm_core::DeviceId;
use gtm_store::{Snapshot, SnapshotStore};

use crate::commands::report::load_registry;
use crate::commands::util::format_duration;

pub fn run<W: Write>(
    writer: &mut W,
    store: &mut dyn SnapshotStore,
    device_id: &str,
    yes: bool,
) -> Result<()> {
    let id = DeviceId::new(device_id)?;
    if !yes {
        bail!("deleting {device_id} removes all of its history; re-run with --yes to confirm");
    }

    let mut registry = load_registry(store)?;
    let Some(device) = registry.delete_device(&id) else {
        bail!("no such device: {device_id}");
    };
    store.save(&Snapshot::capture(&registry, Utc::now()))?;

    writeln!(
        writer,
        "Deleted {} ({} session(s), {})",
        id,
        device.closed_sessions.len(),
        format_duration(device.total_ms)
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use gtm_core::{DeviceRegistry, apply, normalize};
    use gtm_store::JsonStore;

    fn seeded_store(dir: &std::path::Path) -> JsonStore {
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
        let mut store = JsonStore::new(dir.join("snapshot.json"));
        store
            .save(&Snapshot::capture(&registry, Utc::now()))
            .unwrap();
        store
    }

    #[test]
    fn refuses_without_confirmation() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = seeded_store(dir.path());

        let mut output = Vec::new();
        let err = run(&mut output, &mut store, "switch", false).unwrap_err();
        assert!(err.to_string().contains("--yes"));

        // Nothing was removed.
        let registry = load_registry(&mut store).unwrap();
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn deletes_device_and_purges_its_events() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = seeded_store(dir.path());

        let mut output = Vec::new();
        run(&mut output, &mut store, "switch", true).unwrap();
        assert!(String::from_utf8(output).unwrap().contains("Deleted switch"));

        let registry = load_registry(&mut store).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(
            registry
                .events()
                .all(|event| event.device_id.as_str() != "switch")
        );
    }

    #[test]
    fn missing_device_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = seeded_store(dir.path());

        let mut output = Vec::new();
        let err = run(&mut output, &mut store, "toaster", true).unwrap_err();
        assert!(err.to_string().contains("no such device"));
    }
}
