//! Async plumbing for the play-time monitor.
//!
//! Three pieces, connected by channels:
//!
//! - [`transport`]: how bytes arrive. A [`Transport`] dials, its
//!   [`Connection`] subscribes to a channel and yields raw payloads.
//! - [`supervisor`]: keeps a connection alive. Exponential backoff on
//!   failure, manual disconnect, and an external "kick" that forces an
//!   immediate attempt.
//! - [`engine`]: the single writer. All payloads and queries funnel into
//!   one task that owns the registry and the snapshot store, so no state
//!   is ever touched from two tasks at once.

pub mod engine;
pub mod supervisor;
pub mod transport;

pub use engine::{Engine, EngineError, EngineHandle, engine};
pub use supervisor::{ConnState, Supervisor, SupervisorHandle, supervisor};
pub use transport::{Connection, Incoming, TcpLineTransport, Transport, TransportError};
