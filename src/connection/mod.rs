//! Client Connection Module
//!
//! This module manages a single pipelined connection to a Redis-compatible
//! server. All connection state lives inside a dedicated driver task; the
//! [`Connection`] handle is a cheap, cloneable front that re-dispatches
//! every operation onto that task.
//!
//! ## Connection Lifecycle
//!
//! ```text
//! 1. Connection::connect() called (no network I/O yet)
//!        │
//!        ▼
//! 2. Driver task spawned, TCP connect starts
//!        │
//!        ├── failure ──────────────────────────┐
//!        ▼                                     │
//! 3. (optional) AUTH sent and awaited          │
//!        │                                     │
//!        ├── rejected ─────────────────────────┤
//!        ▼                                     │
//! 4. ┌──────────────────────────────┐          │
//!    │      Connected Loop          │          │
//!    │                              │          │
//!    │  ┌─────────────────────────┐ │          │
//!    │  │ Receive submitted op    │ │          │
//!    │  └───────────┬─────────────┘ │          │
//!    │              ▼               │          │
//!    │  ┌─────────────────────────┐ │          │
//!    │  │ Flush queued commands   │ │          │
//!    │  └───────────┬─────────────┘ │          │
//!    │              ▼               │          │
//!    │  ┌─────────────────────────┐ │          │
//!    │  │ Decode replies, resolve │ │          │
//!    │  │ callbacks in FIFO order │ │          │
//!    │  └───────────┬─────────────┘ │          │
//!    │              ▼               │          │
//!    │         [Loop back]          │          │
//!    └──────────────────────────────┘          │
//!        │                                     │
//!        ▼                                     ▼
//! 5. Disconnect (explicit or transport) ── disconnect observer fires once
//! ```
//!
//! ## Ownership Model
//!
//! The driver task exclusively owns the socket, the reply decoder, the
//! pipeline queues, and the I/O watch flags. No locks protect any of it,
//! because no other context can reach it: command submission, observer
//! registration, and disconnect requests all travel through an ordered
//! operation channel and are applied on the driver. The only blocking
//! rendezvous is [`Connection::disconnect`], which waits for its request
//! to *reach* the driver, not for teardown to complete.
//!
//! ## Pipelining
//!
//! Commands may be submitted back-to-back without waiting for replies.
//! The server answers in submission order, so each decoded reply resolves
//! the oldest outstanding command. A stalled reply stalls everything
//! behind it; this head-of-line blocking is inherent to the protocol and
//! no per-command timeout is imposed here.
//!
//! ## Example
//!
//! ```ignore
//! use kvpipe::connection::{Connection, ConnectionConfig};
//! use kvpipe::protocol::encode_command;
//!
//! let conn = Connection::connect(ConnectionConfig::new("127.0.0.1:6379"));
//! conn.on_connect(|| println!("ready"));
//! conn.send_command(
//!     encode_command(&[b"SET", b"name", b"Ariz"]),
//!     |reply| println!("reply: {}", reply),
//!     |err| eprintln!("failed: {}", err),
//! );
//! ```

mod driver;
mod pipeline;

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::protocol::{ParseError, RespValue};
use driver::Driver;

/// Success continuation: receives the decoded typed reply.
pub type ReplyCallback = Box<dyn FnOnce(RespValue) + Send + 'static>;

/// Failure continuation: receives the decoded error payload or a
/// submission failure.
pub type FailureCallback = Box<dyn FnOnce(CommandError) + Send + 'static>;

pub(crate) type ConnectCallback = Box<dyn FnOnce() + Send + 'static>;
pub(crate) type DisconnectCallback = Box<dyn FnOnce(DisconnectReason) + Send + 'static>;

/// Why a single command failed.
///
/// Command failures never affect connection state; transport problems are
/// reported through the disconnect observer instead.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CommandError {
    /// The server rejected the command with an error reply.
    #[error("server error: {0}")]
    Server(String),

    /// The command was submitted after the connection had ended.
    #[error("connection closed")]
    ConnectionClosed,
}

/// Why the connection ended.
///
/// Every transport-level failure funnels into one of these and reaches the
/// caller through the disconnect observer, exactly once per connection.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DisconnectReason {
    /// `disconnect()` was called.
    #[error("disconnect requested")]
    Requested,

    /// The TCP connect attempt failed.
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    /// The server rejected the AUTH credentials.
    #[error("authentication rejected: {0}")]
    AuthRejected(String),

    /// The peer closed the connection.
    #[error("connection closed by peer")]
    PeerClosed,

    /// A socket read or write failed.
    #[error("io error: {0}")]
    Io(String),

    /// The inbound byte stream violated the protocol.
    #[error("protocol error: {0}")]
    Protocol(#[from] ParseError),

    /// Every `Connection` handle was dropped.
    #[error("all connection handles dropped")]
    HandlesDropped,
}

/// Lifecycle state of a connection.
///
/// `Connecting` is initial, `Ended` is terminal; nothing leaves `Ended`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// TCP connect (and AUTH, when configured) still in progress.
    Connecting,
    /// Ready; commands flow and replies resolve.
    Connected,
    /// Torn down, either explicitly or by a transport failure.
    Ended,
}

impl ConnectionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ConnectionState::Connecting,
            1 => ConnectionState::Connected,
            _ => ConnectionState::Ended,
        }
    }
}

/// Configuration for a single connection.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Server address, e.g. "127.0.0.1:6379".
    pub addr: String,
    /// Optional password; when set, AUTH is sent before the connection is
    /// announced as connected.
    pub password: Option<String>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            addr: format!("{}:{}", crate::DEFAULT_HOST, crate::DEFAULT_PORT),
            password: None,
        }
    }
}

impl ConnectionConfig {
    /// Creates a configuration for the given server address.
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            password: None,
        }
    }

    /// Attaches a password to authenticate with after connecting.
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }
}

/// Statistics for a single connection
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Commands handed to the driver and put on the wire
    pub commands_sent: AtomicU64,
    /// Replies decoded and resolved
    pub replies_received: AtomicU64,
    /// Total bytes read
    pub bytes_read: AtomicU64,
    /// Total bytes written
    pub bytes_written: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn command_sent(&self) {
        self.commands_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reply_received(&self) {
        self.replies_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_read(&self, count: usize) {
        self.bytes_read.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn bytes_written(&self, count: usize) {
        self.bytes_written
            .fetch_add(count as u64, Ordering::Relaxed);
    }
}

/// State mirrored out of the driver for observation through the handle.
///
/// The driver is the only writer; handles only ever read.
pub(crate) struct Shared {
    state: AtomicU8,
    pub(crate) stats: ConnectionStats,
}

impl Shared {
    pub(crate) fn new() -> Self {
        Self {
            state: AtomicU8::new(ConnectionState::Connecting as u8),
            stats: ConnectionStats::new(),
        }
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::Relaxed);
    }

    pub(crate) fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Relaxed))
    }
}

/// Operations re-dispatched onto the driver task.
pub(crate) enum Op {
    /// Submit a pre-framed command with its continuation pair.
    Command {
        frame: Bytes,
        on_reply: ReplyCallback,
        on_failure: FailureCallback,
    },
    /// Replace the connect observer (last writer wins).
    SetOnConnect(ConnectCallback),
    /// Replace the disconnect observer (last writer wins).
    SetOnDisconnect(DisconnectCallback),
    /// Request teardown; `issued` is signalled the moment the driver
    /// receives the request, before teardown completes.
    Disconnect { issued: std_mpsc::SyncSender<()> },
}

/// Handle to a single pipelined client connection.
///
/// Cloning is cheap and every clone refers to the same underlying
/// connection. The handle itself holds no connection state; it forwards
/// work to the driver task that does.
#[derive(Clone)]
pub struct Connection {
    ops: mpsc::UnboundedSender<Op>,
    shared: Arc<Shared>,
}

impl Connection {
    /// Creates the connection and schedules the TCP connect.
    ///
    /// Returns immediately; no network I/O happens on the calling context.
    /// Must be called from within a Tokio runtime, which hosts the driver
    /// task that owns the socket.
    pub fn connect(config: ConnectionConfig) -> Connection {
        let (ops_tx, ops_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared::new());

        let driver = Driver::new(config, ops_rx, Arc::clone(&shared));
        tokio::spawn(driver.run());

        Connection {
            ops: ops_tx,
            shared,
        }
    }

    /// Submits a pre-framed command.
    ///
    /// `frame` must already be RESP-encoded (see
    /// [`encode_command`](crate::protocol::encode_command)); this layer
    /// performs no encoding. Exactly one of the two callbacks will run
    /// when the server answers: `on_reply` for any normal reply,
    /// `on_failure` with the decoded payload for an error reply.
    ///
    /// Commands submitted before the connection is established are held
    /// and flushed once it is. Commands still unanswered when the
    /// connection ends are never resolved; watch the disconnect observer
    /// for that boundary. A command submitted *after* the connection has
    /// ended fails fast with [`CommandError::ConnectionClosed`].
    pub fn send_command(
        &self,
        frame: Bytes,
        on_reply: impl FnOnce(RespValue) + Send + 'static,
        on_failure: impl FnOnce(CommandError) + Send + 'static,
    ) {
        let op = Op::Command {
            frame,
            on_reply: Box::new(on_reply),
            on_failure: Box::new(on_failure),
        };
        if let Err(mpsc::error::SendError(op)) = self.ops.send(op) {
            // Driver already gone; resolve the failure on the spot rather
            // than dropping the callbacks silently.
            if let Op::Command { on_failure, .. } = op {
                on_failure(CommandError::ConnectionClosed);
            }
        }
    }

    /// Registers the connect observer.
    ///
    /// Runs once, on the driver, when the connection (including AUTH, when
    /// configured) is established. Last writer wins; a handler registered
    /// after the event has fired never runs.
    pub fn on_connect(&self, handler: impl FnOnce() + Send + 'static) {
        let _ = self.ops.send(Op::SetOnConnect(Box::new(handler)));
    }

    /// Registers the disconnect observer.
    ///
    /// Runs once, on the driver, when the connection ends for any reason:
    /// explicit disconnect, connect failure, peer close, I/O or protocol
    /// error. Last writer wins.
    pub fn on_disconnect(&self, handler: impl FnOnce(DisconnectReason) + Send + 'static) {
        let _ = self.ops.send(Op::SetOnDisconnect(Box::new(handler)));
    }

    /// Requests teardown and waits until the request has reached the
    /// driver task.
    ///
    /// This blocks the calling thread only until the driver has *received*
    /// the request, not until teardown completes; the disconnect observer
    /// reports completion. Safe to call from any thread and safe to call
    /// repeatedly (later calls are no-ops). From async code, wrap in
    /// `tokio::task::spawn_blocking` to avoid stalling the runtime.
    ///
    /// Calling this from inside one of this connection's own callbacks is
    /// fine: the request is already on the owning context, so the wait is
    /// skipped instead of deadlocking the driver against itself.
    pub fn disconnect(&self) {
        let (issued_tx, issued_rx) = std_mpsc::sync_channel(1);
        if self.ops.send(Op::Disconnect { issued: issued_tx }).is_err() {
            // Driver already gone; nothing to wait for.
            return;
        }
        let own_driver = driver::DRIVER_CONN
            .try_with(|id| *id == Arc::as_ptr(&self.shared) as usize)
            .unwrap_or(false);
        if own_driver {
            return;
        }
        let _ = issued_rx.recv();
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    /// Returns true once the connection is established and not yet ended.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Counters for this connection.
    pub fn stats(&self) -> &ConnectionStats {
        &self.shared.stats
    }
}
