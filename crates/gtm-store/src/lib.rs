//! Persistence for the play-time monitor.
//!
//! A [`Snapshot`] is a point-in-time capture of the in-memory registry:
//! every device with its session history plus the trailing event log.
//! Backends implement [`SnapshotStore`] and replace the previous snapshot
//! wholesale on save; there is no incremental write path.
//!
//! # Thread Safety
//!
//! Stores wrap file handles or a `rusqlite::Connection`, which are `Send`
//! but not `Sync`. The monitor serializes all access through a single
//! owner task, so no further synchronization is layered here.
//!
//! # Timestamp Format
//!
//! Timestamps are stored as TEXT in ISO 8601 form (e.g.
//! `2024-01-15T10:30:00Z`) in both backends. Lexicographic ordering
//! matches chronological ordering and the values stay human-readable.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use gtm_core::{Device, DeviceRegistry, Event, TRAILING_EVENT_CAP};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

pub mod sqlite;

pub use sqlite::SqliteStore;

/// Current snapshot schema version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Storage errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// The backing data exists but cannot be interpreted.
    #[error("corrupt snapshot: {message}")]
    Corrupt { message: String },
    /// Migration was asked to copy from a store with no snapshot.
    #[error("source store holds no snapshot")]
    EmptySource,
}

/// A point-in-time capture of monitor state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    pub devices: Vec<Device>,
    /// Trailing event log, newest first, capped at [`TRAILING_EVENT_CAP`].
    pub events: Vec<Event>,
}

impl Snapshot {
    /// Captures the registry as it stands.
    #[must_use]
    pub fn capture(registry: &DeviceRegistry, now: DateTime<Utc>) -> Self {
        let mut events = registry.events_cloned();
        events.truncate(TRAILING_EVENT_CAP);
        Self {
            version: SNAPSHOT_VERSION,
            saved_at: now,
            devices: registry.devices_cloned(),
            events,
        }
    }

    /// Rebuilds a registry from this snapshot.
    ///
    /// Open sessions recorded in the snapshot are discarded: a session
    /// that was in progress when the process stopped cannot be resumed,
    /// only estimated later from its end event.
    #[must_use]
    pub fn restore(self) -> DeviceRegistry {
        DeviceRegistry::restore(self.devices, self.events)
    }
}

/// A persistence backend for snapshots.
///
/// `load` returns `Ok(None)` when the backing data simply does not exist
/// yet; corruption and I/O failures are errors so the caller can decide
/// whether to start empty.
pub trait SnapshotStore {
    fn load(&mut self) -> Result<Option<Snapshot>, StoreError>;
    fn save(&mut self, snapshot: &Snapshot) -> Result<(), StoreError>;
}

/// Snapshot store backed by a single JSON file.
///
/// Saves go through a sibling temp file and an atomic rename, so a crash
/// mid-write leaves the previous snapshot intact.
pub struct JsonStore {
    path: PathBuf,
}

impl JsonStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SnapshotStore for JsonStore {
    fn load(&mut self) -> Result<Option<Snapshot>, StoreError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no snapshot file");
                return Ok(None);
            }
            Err(err) => return Err(err.into()),
        };
        let snapshot: Snapshot =
            serde_json::from_str(&raw).map_err(|err| StoreError::Corrupt {
                message: err.to_string(),
            })?;
        Ok(Some(snapshot))
    }

    fn save(&mut self, snapshot: &Snapshot) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(snapshot)?)?;
        fs::rename(&tmp, &self.path)?;
        debug!(
            path = %self.path.display(),
            devices = snapshot.devices.len(),
            events = snapshot.events.len(),
            "snapshot saved"
        );
        Ok(())
    }
}

/// Copies the snapshot from one store into another.
///
/// Fails with [`StoreError::EmptySource`] when the source holds nothing,
/// so a mistyped path cannot silently produce an empty destination.
pub fn migrate(
    source: &mut dyn SnapshotStore,
    dest: &mut dyn SnapshotStore,
) -> Result<MigrateStats, StoreError> {
    let snapshot = source.load()?.ok_or(StoreError::EmptySource)?;
    dest.save(&snapshot)?;
    info!(
        devices = snapshot.devices.len(),
        events = snapshot.events.len(),
        "snapshot migrated"
    );
    Ok(MigrateStats {
        devices: snapshot.devices.len(),
        events: snapshot.events.len(),
    })
}

/// What a migration copied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrateStats {
    pub devices: usize,
    pub events: usize,
}
