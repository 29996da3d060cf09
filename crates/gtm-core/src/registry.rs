//! The device registry: all known devices plus a bounded trailing event log.

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};

use crate::device::Device;
use crate::event::Event;
use crate::types::DeviceId;

/// Maximum number of trailing events retained for display, newest first.
pub const TRAILING_EVENT_CAP: usize = 100;

/// All known devices, keyed by id, plus the trailing event log.
///
/// The registry is pure data: every mutation flows through
/// [`crate::reconstruct::apply`] (or the explicit administrative
/// [`Self::delete_device`]), which is what lets a single-writer queue
/// serialize concurrent delivery in front of it.
#[derive(Debug, Default, Clone)]
pub struct DeviceRegistry {
    devices: BTreeMap<DeviceId, Device>,
    /// Newest first, capped at [`TRAILING_EVENT_CAP`].
    events: VecDeque<Event>,
}

impl DeviceRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a registry from persisted devices and events.
    ///
    /// Open sessions are cleared while the online flag is preserved: a
    /// previously-online device is deliberately re-admitted in the
    /// "online, no session" state so its next end event is routed through
    /// the recovery path instead of being treated as a duplicate.
    /// Per-device totals are recomputed from the session lists, never
    /// trusted from the snapshot.
    #[must_use]
    pub fn restore(devices: Vec<Device>, events: Vec<Event>) -> Self {
        let mut registry = Self::new();
        for mut device in devices {
            if device.open_session.take().is_some() {
                tracing::debug!(device = %device.id, "cleared open session on reload");
            }
            device.recompute_total_ms();
            registry.devices.insert(device.id.clone(), device);
        }
        registry.events = events.into_iter().take(TRAILING_EVENT_CAP).collect();
        registry
    }

    /// All devices, in id order.
    pub fn devices(&self) -> impl Iterator<Item = &Device> {
        self.devices.values()
    }

    /// Looks up a single device.
    #[must_use]
    pub fn device(&self, id: &DeviceId) -> Option<&Device> {
        self.devices.get(id)
    }

    /// Number of known devices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// True when no device has been seen yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Number of devices currently online.
    #[must_use]
    pub fn online_count(&self) -> usize {
        self.devices.values().filter(|d| d.is_online).count()
    }

    /// The trailing event log, newest first.
    pub fn events(&self) -> impl Iterator<Item = &Event> {
        self.events.iter()
    }

    /// Point-in-time copy of all devices.
    #[must_use]
    pub fn devices_cloned(&self) -> Vec<Device> {
        self.devices.values().cloned().collect()
    }

    /// Point-in-time copy of the trailing event log, newest first.
    #[must_use]
    pub fn events_cloned(&self) -> Vec<Event> {
        self.events.iter().cloned().collect()
    }

    /// Removes a device and purges its trailing events.
    ///
    /// This is an administrative action; returns the removed device so the
    /// caller can report what was dropped.
    pub fn delete_device(&mut self, id: &DeviceId) -> Option<Device> {
        let removed = self.devices.remove(id)?;
        self.events.retain(|event| &event.device_id != id);
        tracing::info!(device = %id, sessions = removed.closed_sessions.len(), "device deleted");
        Some(removed)
    }

    pub(crate) fn device_entry(
        &mut self,
        id: &DeviceId,
        display_name: Option<&str>,
        first_seen: DateTime<Utc>,
    ) -> &mut Device {
        let device = self.devices.entry(id.clone()).or_insert_with(|| {
            tracing::debug!(device = %id, "new device");
            Device::new(id.clone(), display_name.map(str::to_string), first_seen)
        });
        // A later event may carry a better name than the id fallback.
        if let Some(name) = display_name {
            if !name.is_empty() && device.display_name != name {
                device.display_name = name.to_string();
            }
        }
        device
    }

    pub(crate) fn push_event(&mut self, event: Event) {
        self.events.push_front(event);
        self.events.truncate(TRAILING_EVENT_CAP);
    }
}
