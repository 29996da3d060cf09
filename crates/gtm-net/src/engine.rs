//! The single-writer engine.
//!
//! One task owns the device registry and the snapshot store. Raw payloads
//! from the supervisor and queries from the CLI all arrive over channels
//! and are applied strictly in arrival order, so no interleaving can
//! observe or produce a half-applied state.
//!
//! Persistence is periodic (only when the state actually changed) plus a
//! final save when the engine shuts down.

use std::time::Duration;

use chrono::Utc;
use gtm_core::{
    Applied, DailyReport, DateRange, Device, DeviceId, DeviceRegistry, Event, daily_report,
    normalize,
};
use gtm_store::{Snapshot, SnapshotStore, StoreError};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Errors surfaced to engine callers.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine task has shut down.
    #[error("engine is not running")]
    Closed,
    #[error(transparent)]
    Store(#[from] StoreError),
}

enum Command {
    Report {
        range: DateRange,
        reply: oneshot::Sender<DailyReport>,
    },
    Devices {
        reply: oneshot::Sender<Vec<Device>>,
    },
    Events {
        limit: usize,
        reply: oneshot::Sender<Vec<Event>>,
    },
    Delete {
        device: DeviceId,
        reply: oneshot::Sender<bool>,
    },
    Save {
        reply: oneshot::Sender<Result<(), StoreError>>,
    },
}

/// Query/control half held by the rest of the application.
#[derive(Clone)]
pub struct EngineHandle {
    commands: mpsc::Sender<Command>,
}

impl EngineHandle {
    /// Daily aggregation over the current registry, bucketed in the local
    /// timezone.
    pub async fn report(&self, range: DateRange) -> Result<DailyReport, EngineError> {
        self.request(|reply| Command::Report { range, reply }).await
    }

    /// All known devices.
    pub async fn devices(&self) -> Result<Vec<Device>, EngineError> {
        self.request(|reply| Command::Devices { reply }).await
    }

    /// The newest `limit` entries of the trailing event log.
    pub async fn events(&self, limit: usize) -> Result<Vec<Event>, EngineError> {
        self.request(|reply| Command::Events { limit, reply }).await
    }

    /// Removes a device and its trailing-log entries. Returns whether the
    /// device existed.
    pub async fn delete(&self, device: DeviceId) -> Result<bool, EngineError> {
        self.request(|reply| Command::Delete { device, reply })
            .await
    }

    /// Forces a snapshot save regardless of the dirty flag.
    pub async fn save(&self) -> Result<(), EngineError> {
        self.request(|reply| Command::Save { reply }).await??;
        Ok(())
    }

    async fn request<R>(
        &self,
        command: impl FnOnce(oneshot::Sender<R>) -> Command,
    ) -> Result<R, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(command(reply_tx))
            .await
            .map_err(|_| EngineError::Closed)?;
        reply_rx.await.map_err(|_| EngineError::Closed)
    }
}

/// The engine task. Run it with [`Engine::run`] on its own task.
pub struct Engine {
    registry: DeviceRegistry,
    store: Box<dyn SnapshotStore + Send>,
    dirty: bool,
    save_interval: Duration,
    payloads: mpsc::Receiver<Vec<u8>>,
    commands: mpsc::Receiver<Command>,
}

/// Builds an engine and its handle.
///
/// The previous snapshot is loaded eagerly; a missing snapshot starts
/// empty, and a corrupt or unreadable one is logged and discarded rather
/// than taking the monitor down.
pub fn engine(
    mut store: Box<dyn SnapshotStore + Send>,
    save_interval: Duration,
    payloads: mpsc::Receiver<Vec<u8>>,
) -> (Engine, EngineHandle) {
    let registry = match store.load() {
        Ok(Some(snapshot)) => {
            let registry = snapshot.restore();
            info!(
                devices = registry.len(),
                "restored state from previous snapshot"
            );
            registry
        }
        Ok(None) => {
            debug!("no previous snapshot; starting empty");
            DeviceRegistry::new()
        }
        Err(err) => {
            warn!(%err, "snapshot unreadable; starting empty");
            DeviceRegistry::new()
        }
    };

    let (command_tx, command_rx) = mpsc::channel(32);
    (
        Engine {
            registry,
            store,
            dirty: false,
            save_interval,
            payloads,
            commands: command_rx,
        },
        EngineHandle {
            commands: command_tx,
        },
    )
}

impl Engine {
    /// Runs until every [`EngineHandle`] is dropped, then saves one last
    /// time.
    pub async fn run(mut self) {
        let mut save_tick = tokio::time::interval(self.save_interval);
        save_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        save_tick.tick().await; // the first tick is immediate

        let mut payloads_open = true;
        loop {
            tokio::select! {
                payload = self.payloads.recv(), if payloads_open => match payload {
                    Some(payload) => self.ingest(&payload),
                    None => payloads_open = false,
                },
                command = self.commands.recv() => match command {
                    Some(command) => self.handle(command),
                    None => break,
                },
                _ = save_tick.tick() => {
                    if self.dirty {
                        self.persist();
                    }
                }
            }
        }
        if self.dirty {
            self.persist();
        }
    }

    fn ingest(&mut self, payload: &[u8]) {
        match normalize(payload, Utc::now()) {
            Ok(event) => {
                let applied = gtm_core::apply(&mut self.registry, event);
                self.dirty = true;
                match applied {
                    Applied::SessionOpened { device, .. } => {
                        debug!(%device, "session opened");
                    }
                    Applied::SessionClosed {
                        device,
                        duration_ms,
                    } => debug!(%device, duration_ms, "session closed"),
                    Applied::SessionEstimated {
                        device,
                        duration_ms,
                    } => debug!(%device, duration_ms, "session estimated"),
                    Applied::StaleEnd { device } => debug!(%device, "stale end ignored"),
                    Applied::UnknownKind { device, kind } => {
                        debug!(%device, kind, "unhandled event kind");
                    }
                }
            }
            Err(err) => warn!(%err, "dropping malformed payload"),
        }
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Report { range, reply } => {
                let report = daily_report(
                    self.registry.devices(),
                    range,
                    Utc::now(),
                    &chrono::Local,
                );
                let _ = reply.send(report);
            }
            Command::Devices { reply } => {
                let _ = reply.send(self.registry.devices_cloned());
            }
            Command::Events { limit, reply } => {
                let events = self.registry.events().take(limit).cloned().collect();
                let _ = reply.send(events);
            }
            Command::Delete { device, reply } => {
                let removed = self.registry.delete_device(&device).is_some();
                if removed {
                    self.dirty = true;
                }
                let _ = reply.send(removed);
            }
            Command::Save { reply } => {
                let result = self.save_now();
                let _ = reply.send(result);
            }
        }
    }

    fn persist(&mut self) {
        if let Err(err) = self.save_now() {
            warn!(%err, "periodic snapshot save failed");
        }
    }

    fn save_now(&mut self) -> Result<(), StoreError> {
        let snapshot = Snapshot::capture(&self.registry, Utc::now());
        self.store.save(&snapshot)?;
        self.dirty = false;
        debug!(
            devices = snapshot.devices.len(),
            events = snapshot.events.len(),
            "snapshot saved"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gtm_store::JsonStore;

    fn spawn_engine(
        store: Box<dyn SnapshotStore + Send>,
    ) -> (EngineHandle, mpsc::Sender<Vec<u8>>, tokio::task::JoinHandle<()>) {
        let (payload_tx, payload_rx) = mpsc::channel(16);
        let (engine, handle) = engine(store, Duration::from_secs(60), payload_rx);
        let task = tokio::spawn(engine.run());
        (handle, payload_tx, task)
    }

    #[tokio::test]
    async fn ingests_payloads_and_answers_queries() {
        let dir = tempfile::tempdir().unwrap();
        let store = Box::new(JsonStore::new(dir.path().join("snapshot.json")));
        let (handle, payloads, _task) = spawn_engine(store);

        payloads
            .send(br#"{"playerId":"switch","event":"game_start"}"#.to_vec())
            .await
            .unwrap();
        payloads
            .send(br#"{"playerId":"switch","event":"game_end"}"#.to_vec())
            .await
            .unwrap();

        // Queries run on the same queue-draining task, so by the time the
        // reply arrives both payloads have been applied.
        let devices = handle.devices().await.unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].closed_sessions.len(), 1);

        let events = handle.events(10).await.unwrap();
        assert_eq!(events.len(), 2);

        let report = handle.report(DateRange::unbounded()).await.unwrap();
        assert_eq!(report.summary.device_count, 1);
    }

    #[tokio::test]
    async fn malformed_payloads_are_dropped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let store = Box::new(JsonStore::new(dir.path().join("snapshot.json")));
        let (handle, payloads, _task) = spawn_engine(store);

        payloads.send(b"not json at all".to_vec()).await.unwrap();
        payloads.send(b"[1,2,3]".to_vec()).await.unwrap();
        payloads
            .send(br#"{"playerId":"pc","event":"game_start"}"#.to_vec())
            .await
            .unwrap();

        let devices = handle.devices().await.unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].id.as_str(), "pc");
    }

    #[tokio::test]
    async fn delete_removes_device_and_reports_absence() {
        let dir = tempfile::tempdir().unwrap();
        let store = Box::new(JsonStore::new(dir.path().join("snapshot.json")));
        let (handle, payloads, _task) = spawn_engine(store);

        payloads
            .send(br#"{"playerId":"pc","event":"game_start"}"#.to_vec())
            .await
            .unwrap();

        let id = DeviceId::new("pc").unwrap();
        assert!(handle.delete(id.clone()).await.unwrap());
        assert!(!handle.delete(id).await.unwrap());

        assert!(handle.devices().await.unwrap().is_empty());
        assert!(handle.events(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn state_survives_a_restart_via_the_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.json");

        {
            let store = Box::new(JsonStore::new(&path));
            let (handle, payloads, task) = spawn_engine(store);
            payloads
                .send(br#"{"playerId":"switch","event":"game_start"}"#.to_vec())
                .await
                .unwrap();
            payloads
                .send(br#"{"playerId":"switch","event":"game_end"}"#.to_vec())
                .await
                .unwrap();
            handle.save().await.unwrap();
            drop(payloads);
            drop(handle);
            task.await.unwrap();
        }

        let store = Box::new(JsonStore::new(&path));
        let (handle, _payloads, _task) = spawn_engine(store);
        let devices = handle.devices().await.unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].closed_sessions.len(), 1);
    }

    #[tokio::test]
    async fn final_save_happens_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.json");

        {
            let store = Box::new(JsonStore::new(&path));
            let (handle, payloads, task) = spawn_engine(store);
            payloads
                .send(br#"{"playerId":"pc","event":"game_start"}"#.to_vec())
                .await
                .unwrap();
            // Make sure the payload was applied before shutting down.
            assert_eq!(handle.devices().await.unwrap().len(), 1);
            drop(payloads);
            drop(handle);
            task.await.unwrap();
        }

        let mut store = JsonStore::new(&path);
        let snapshot = store.load().unwrap().unwrap();
        assert_eq!(snapshot.devices.len(), 1);
    }

    #[tokio::test]
    async fn corrupt_snapshot_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.json");
        std::fs::write(&path, "{broken").unwrap();

        let store = Box::new(JsonStore::new(&path));
        let (handle, _payloads, _task) = spawn_engine(store);
        assert!(handle.devices().await.unwrap().is_empty());
    }
}
