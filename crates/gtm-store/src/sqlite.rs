//! SQLite snapshot backend.
//!
//! The snapshot is normalized into `devices`, `sessions` and `events`
//! tables so the history can also be inspected with ad-hoc SQL. Saves
//! replace the previous snapshot inside a single transaction.

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use gtm_core::{ClosedSession, Device, DeviceId, Event, EventKind, OpenSession, SessionId};
use rusqlite::{Connection, OptionalExtension, params};

use crate::{SNAPSHOT_VERSION, Snapshot, StoreError};

/// Snapshot store backed by a SQLite database file.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Opens the database at `path`, creating file and schema as needed.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.init()?;
        Ok(store)
    }

    /// Opens an in-memory database, mainly for tests and migration dry runs.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.init()?;
        Ok(store)
    }

    /// Idempotent schema setup.
    fn init(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            -- Devices: one row per known device, including presence and
            -- any session that was open when the snapshot was taken.
            CREATE TABLE IF NOT EXISTS devices (
                id TEXT PRIMARY KEY,
                display_name TEXT NOT NULL,
                is_online INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                total_ms INTEGER NOT NULL,
                open_start TEXT,
                open_session_id TEXT
            );

            -- Closed sessions, in recording order per device.
            CREATE TABLE IF NOT EXISTS sessions (
                device_id TEXT NOT NULL,
                position INTEGER NOT NULL,
                start_time TEXT NOT NULL,
                end_time TEXT NOT NULL,
                duration_ms INTEGER NOT NULL,
                session_id TEXT,
                estimated INTEGER NOT NULL,
                PRIMARY KEY (device_id, position),
                FOREIGN KEY (device_id) REFERENCES devices(id) ON DELETE CASCADE
            );

            -- Trailing event log, position 0 = newest.
            CREATE TABLE IF NOT EXISTS events (
                position INTEGER PRIMARY KEY,
                device_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                session_id TEXT,
                display_name TEXT,
                extra TEXT
            );
            ",
        )?;
        Ok(())
    }
}

impl crate::SnapshotStore for SqliteStore {
    fn load(&mut self) -> Result<Option<Snapshot>, StoreError> {
        let Some(saved_at) = self.read_meta("saved_at")? else {
            return Ok(None);
        };
        let saved_at = parse_timestamp(&saved_at)?;
        let version = match self.read_meta("version")? {
            Some(raw) => raw.parse::<u32>().map_err(|_| corrupt(format!(
                "bad snapshot version {raw:?}"
            )))?,
            None => SNAPSHOT_VERSION,
        };

        let mut sessions = self.load_sessions()?;
        let devices = self.load_devices(&mut sessions)?;
        let events = self.load_events()?;

        Ok(Some(Snapshot {
            version,
            saved_at,
            devices,
            events,
        }))
    }

    fn save(&mut self, snapshot: &Snapshot) -> Result<(), StoreError> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM events", [])?;
        tx.execute("DELETE FROM sessions", [])?;
        tx.execute("DELETE FROM devices", [])?;
        {
            let mut device_stmt = tx.prepare(
                "
                INSERT INTO devices
                (id, display_name, is_online, created_at, total_ms, open_start, open_session_id)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ",
            )?;
            let mut session_stmt = tx.prepare(
                "
                INSERT INTO sessions
                (device_id, position, start_time, end_time, duration_ms, session_id, estimated)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ",
            )?;
            for device in &snapshot.devices {
                device_stmt.execute(params![
                    device.id.as_str(),
                    device.display_name,
                    device.is_online,
                    format_timestamp(device.created_at),
                    device.total_ms,
                    device
                        .open_session
                        .as_ref()
                        .map(|open| format_timestamp(open.start_time)),
                    device
                        .open_session
                        .as_ref()
                        .and_then(|open| open.session_id.as_ref())
                        .map(SessionId::as_str),
                ])?;
                for (position, session) in device.closed_sessions.iter().enumerate() {
                    session_stmt.execute(params![
                        device.id.as_str(),
                        position as i64,
                        format_timestamp(session.start_time),
                        format_timestamp(session.end_time),
                        session.duration_ms,
                        session.session_id.as_ref().map(SessionId::as_str),
                        session.estimated,
                    ])?;
                }
            }
        }
        {
            let mut event_stmt = tx.prepare(
                "
                INSERT INTO events
                (position, device_id, kind, timestamp, session_id, display_name, extra)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ",
            )?;
            for (position, event) in snapshot.events.iter().enumerate() {
                let extra = event
                    .extra
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?;
                event_stmt.execute(params![
                    position as i64,
                    event.device_id.as_str(),
                    event.kind.as_str(),
                    format_timestamp(event.timestamp),
                    event.session_id.as_ref().map(SessionId::as_str),
                    event.display_name,
                    extra,
                ])?;
            }
        }
        {
            let mut meta_stmt =
                tx.prepare("INSERT OR REPLACE INTO meta (key, value) VALUES (?, ?)")?;
            meta_stmt.execute(params!["version", snapshot.version.to_string()])?;
            meta_stmt.execute(params!["saved_at", format_timestamp(snapshot.saved_at)])?;
        }
        tx.commit()?;
        Ok(())
    }
}

impl SqliteStore {
    fn read_meta(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .conn
            .query_row("SELECT value FROM meta WHERE key = ?", [key], |row| {
                row.get(0)
            })
            .optional()?)
    }

    fn load_devices(
        &self,
        sessions: &mut HashMap<String, Vec<ClosedSession>>,
    ) -> Result<Vec<Device>, StoreError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT id, display_name, is_online, created_at, total_ms, open_start, open_session_id
            FROM devices
            ORDER BY id ASC
            ",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, bool>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, Option<String>>(6)?,
            ))
        })?;

        let mut devices = Vec::new();
        for row in rows {
            let (id, display_name, is_online, created_at, total_ms, open_start, open_session_id) =
                row?;
            let open_session = open_start
                .map(|start| {
                    Ok::<_, StoreError>(OpenSession {
                        start_time: parse_timestamp(&start)?,
                        session_id: parse_session_id(open_session_id.as_deref())?,
                    })
                })
                .transpose()?;
            let closed_sessions = sessions.remove(&id).unwrap_or_default();
            devices.push(Device {
                id: parse_device_id(&id)?,
                display_name,
                is_online,
                open_session,
                closed_sessions,
                total_ms,
                created_at: parse_timestamp(&created_at)?,
            });
        }
        Ok(devices)
    }

    fn load_sessions(&self) -> Result<HashMap<String, Vec<ClosedSession>>, StoreError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT device_id, start_time, end_time, duration_ms, session_id, estimated
            FROM sessions
            ORDER BY device_id ASC, position ASC
            ",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, bool>(5)?,
            ))
        })?;

        let mut sessions: HashMap<String, Vec<ClosedSession>> = HashMap::new();
        for row in rows {
            let (device_id, start_time, end_time, duration_ms, session_id, estimated) = row?;
            sessions.entry(device_id).or_default().push(ClosedSession {
                start_time: parse_timestamp(&start_time)?,
                end_time: parse_timestamp(&end_time)?,
                duration_ms,
                session_id: parse_session_id(session_id.as_deref())?,
                estimated,
            });
        }
        Ok(sessions)
    }

    fn load_events(&self) -> Result<Vec<Event>, StoreError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT device_id, kind, timestamp, session_id, display_name, extra
            FROM events
            ORDER BY position ASC
            ",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, Option<String>>(5)?,
            ))
        })?;

        let mut events = Vec::new();
        for row in rows {
            let (device_id, kind, timestamp, session_id, display_name, extra) = row?;
            let extra = extra
                .map(|raw| {
                    serde_json::from_str(&raw).map_err(|err| corrupt(format!(
                        "bad event extra json: {err}"
                    )))
                })
                .transpose()?;
            events.push(Event {
                device_id: parse_device_id(&device_id)?,
                kind: EventKind::parse(&kind),
                timestamp: parse_timestamp(&timestamp)?,
                session_id: parse_session_id(session_id.as_deref())?,
                display_name,
                extra,
            });
        }
        Ok(events)
    }
}

fn corrupt(message: String) -> StoreError {
    StoreError::Corrupt { message }
}

fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|err| corrupt(format!("bad timestamp {raw:?}: {err}")))
}

fn parse_device_id(raw: &str) -> Result<DeviceId, StoreError> {
    DeviceId::new(raw).map_err(|err| corrupt(format!("bad device id {raw:?}: {err}")))
}

fn parse_session_id(raw: Option<&str>) -> Result<Option<SessionId>, StoreError> {
    raw.map(|raw| {
        SessionId::new(raw).map_err(|err| corrupt(format!("bad session id {raw:?}: {err}")))
    })
    .transpose()
}
