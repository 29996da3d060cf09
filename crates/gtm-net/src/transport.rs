//! Pluggable message transport.
//!
//! The monitor only needs two capabilities from its broker: subscribe to
//! a channel, then stream raw payload frames until the link drops. The
//! [`Transport`] / [`Connection`] traits capture exactly that, so the
//! supervisor and its tests never touch sockets directly.
//!
//! [`TcpLineTransport`] is the shipped implementation: newline-delimited
//! JSON over plain TCP, with a JSON control line for the subscription.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tracing::{debug, warn};
use uuid::Uuid;

/// Frames longer than this are dropped rather than forwarded.
const MAX_FRAME_BYTES: usize = 64 * 1024;

/// Transport-level errors.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connect to {endpoint} failed: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },
    #[error("connect to {endpoint} timed out after {timeout:?}")]
    ConnectTimeout { endpoint: String, timeout: Duration },
    #[error("subscribe to {channel} failed: {source}")]
    Subscribe {
        channel: String,
        #[source]
        source: std::io::Error,
    },
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// One read from an established connection.
#[derive(Debug, PartialEq, Eq)]
pub enum Incoming {
    /// A raw payload frame, not yet validated.
    Message(Vec<u8>),
    /// The peer closed the link cleanly.
    Closed,
}

/// Dials the broker. Each call produces a fresh connection.
pub trait Transport {
    type Conn: Connection + Send;

    fn connect(&mut self) -> impl Future<Output = Result<Self::Conn, TransportError>> + Send;
}

/// An established link to the broker.
pub trait Connection {
    fn subscribe(
        &mut self,
        channel: &str,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    fn next_event(&mut self) -> impl Future<Output = Result<Incoming, TransportError>> + Send;
}

/// Newline-delimited JSON over TCP.
pub struct TcpLineTransport {
    endpoint: String,
    connect_timeout: Duration,
    client_id: String,
}

impl TcpLineTransport {
    #[must_use]
    pub fn new(endpoint: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            connect_timeout,
            client_id: format!("gtm-{}", Uuid::new_v4()),
        }
    }
}

impl Transport for TcpLineTransport {
    type Conn = TcpLineConnection;

    fn connect(&mut self) -> impl Future<Output = Result<Self::Conn, TransportError>> + Send {
        let endpoint = self.endpoint.clone();
        let timeout = self.connect_timeout;
        let client_id = self.client_id.clone();
        async move {
            let stream = tokio::time::timeout(timeout, TcpStream::connect(&endpoint))
                .await
                .map_err(|_| TransportError::ConnectTimeout {
                    endpoint: endpoint.clone(),
                    timeout,
                })?
                .map_err(|source| TransportError::Connect {
                    endpoint: endpoint.clone(),
                    source,
                })?;
            debug!(%endpoint, client_id, "transport connected");
            let (read, write) = stream.into_split();
            Ok(TcpLineConnection {
                reader: BufReader::new(read),
                writer: write,
                client_id,
                buf: Vec::new(),
            })
        }
    }
}

#[derive(Debug)]
pub struct TcpLineConnection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    client_id: String,
    buf: Vec<u8>,
}

impl Connection for TcpLineConnection {
    fn subscribe(
        &mut self,
        channel: &str,
    ) -> impl Future<Output = Result<(), TransportError>> + Send {
        let control = serde_json::json!({
            "subscribe": channel,
            "client_id": self.client_id,
        });
        let channel = channel.to_string();
        async move {
            let mut frame = control.to_string();
            frame.push('\n');
            self.writer
                .write_all(frame.as_bytes())
                .await
                .map_err(|source| TransportError::Subscribe {
                    channel: channel.clone(),
                    source,
                })?;
            debug!(channel, "subscribed");
            Ok(())
        }
    }

    fn next_event(&mut self) -> impl Future<Output = Result<Incoming, TransportError>> + Send {
        async move {
            loop {
                // `read_until` appends, so a read cancelled mid-frame
                // leaves the partial bytes in `buf` and the next call
                // resumes where it left off. The buffer is only cleared
                // once a complete frame has been consumed.
                let read = self.reader.read_until(b'\n', &mut self.buf).await?;
                if read == 0 || self.buf.last() != Some(&b'\n') {
                    return Ok(Incoming::Closed);
                }
                let frame = self.buf.trim_ascii();
                if frame.is_empty() {
                    self.buf.clear();
                    continue;
                }
                if frame.len() > MAX_FRAME_BYTES {
                    warn!(bytes = frame.len(), "dropping oversized frame");
                    self.buf.clear();
                    continue;
                }
                let payload = frame.to_vec();
                self.buf.clear();
                return Ok(Incoming::Message(payload));
            }
        }
    }
}
