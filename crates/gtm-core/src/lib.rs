//! Core domain logic for the game time monitor.
//!
//! This crate contains the fundamental types and logic for:
//! - Normalization: mapping heterogeneous device payloads into canonical events
//! - Reconstruction: rebuilding session boundaries from an unreliable event stream
//! - Aggregation: bucketing play time into calendar days, splitting at midnight
//! - Backoff: the pure reconnect policy driven by the connection supervisor
//!
//! Everything here is synchronous and I/O-free; the async plumbing lives in
//! `gtm-net` and persistence in `gtm-store`.

pub mod aggregate;
pub mod backoff;
pub mod device;
pub mod event;
pub mod normalize;
pub mod reconstruct;
pub mod registry;
pub mod types;

pub use aggregate::{
    DailyBucket, DailyReport, DateRange, DeviceDayStat, ReportSummary, daily_report,
};
pub use backoff::{Decision, ReconnectPolicy};
pub use device::{ClosedSession, Device, OpenSession};
pub use event::{Event, EventKind};
pub use normalize::{NormalizeError, normalize};
pub use reconstruct::{Applied, apply};
pub use registry::{DeviceRegistry, TRAILING_EVENT_CAP};
pub use types::{DeviceId, SessionId, ValidationError};
