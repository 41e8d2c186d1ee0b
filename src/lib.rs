//! # kvpipe - A Pipelined Client Connection for Redis-Compatible Stores
//!
//! kvpipe is the connection core of a Redis-style client: it manages one
//! TCP connection end to end, keeps many commands in flight at once, and
//! resolves every reply back to the exact command that asked for it, in
//! strict submission order.
//!
//! ## Features
//!
//! - **Pipelining**: Submit commands back-to-back; replies demultiplex in
//!   FIFO order, one reply per command
//! - **Callback Continuations**: Each command carries a success and a
//!   failure callback, exactly one of which runs
//! - **Single-Owner State**: A dedicated driver task owns all connection
//!   state, so no locks guard it
//! - **Async I/O**: Built on Tokio; readiness-driven reads and writes
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────────┐
//! │                              kvpipe                                │
//! │                                                                    │
//! │   Caller context(s)              │        Driver task              │
//! │                                  │                                 │
//! │  ┌──────────────┐   ops channel  │   ┌──────────────────────────┐  │
//! │  │ Connection   │───────────────────>│  Connection state machine│  │
//! │  │ (handle)     │                │   │  Connecting→Connected→   │  │
//! │  └──────────────┘                │   │  Ended                   │  │
//! │     send_command                 │   └──────┬──────────┬────────┘  │
//! │     on_connect / on_disconnect   │          │          │           │
//! │     disconnect (blocks until     │          ▼          ▼           │
//! │      request is received)        │   ┌───────────┐ ┌───────────┐  │
//! │                                  │   │ Pipeline  │ │ I/O watch │  │
//! │                                  │   │ queue +   │ │ flags →   │  │
//! │                                  │   │ demux     │ │ readiness │  │
//! │                                  │   └─────┬─────┘ └─────┬─────┘  │
//! │                                  │         │             │        │
//! │                                  │         ▼             ▼        │
//! │                                  │   ┌───────────┐ ┌───────────┐  │
//! │                                  │   │ RESP reply│ │ TcpStream │  │
//! │                                  │   │ decoder   │ │ (owned)   │  │
//! │                                  │   └───────────┘ └───────────┘  │
//! └────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use kvpipe::{Connection, ConnectionConfig};
//! use kvpipe::protocol::encode_command;
//!
//! #[tokio::main]
//! async fn main() {
//!     let conn = Connection::connect(ConnectionConfig::new("127.0.0.1:6379"));
//!
//!     conn.on_connect(|| println!("connected"));
//!     conn.on_disconnect(|reason| println!("disconnected: {}", reason));
//!
//!     conn.send_command(
//!         encode_command(&[b"SET", b"name", b"Ariz"]),
//!         |reply| println!("SET -> {}", reply),
//!         |err| eprintln!("SET failed: {}", err),
//!     );
//!     conn.send_command(
//!         encode_command(&[b"GET", b"name"]),
//!         |reply| println!("GET -> {}", reply),
//!         |err| eprintln!("GET failed: {}", err),
//!     );
//!
//!     // ... later, from a non-async context:
//!     // conn.disconnect();
//! }
//! ```
//!
//! ## Module Overview
//!
//! - [`protocol`]: RESP reply decoding and command framing
//! - [`connection`]: The connection handle, driver task, and pipeline
//!
//! ## Design Highlights
//!
//! ### One Owner, No Locks
//!
//! Every mutation of connection state happens on the driver task, which
//! owns the socket, the decoder, and the pipeline queues outright.
//! Callers interact through an ordered operation channel; the only
//! blocking rendezvous is `disconnect()`, which waits just long enough to
//! know the driver has received the request.
//!
//! ### Strict FIFO Demultiplexing
//!
//! The protocol answers commands in order, so the oldest outstanding
//! command owns the next decoded reply. The queue of success callbacks
//! and the queue of failure callbacks advance together; a reply with no
//! matching entry is treated as a fatal desynchronization, not an error
//! to report.
//!
//! ### One Funnel for Failure
//!
//! Connect errors, rejected credentials, peer closes, I/O errors, and
//! protocol violations all travel the same teardown path and surface
//! through the disconnect observer exactly once. Commands get failure
//! callbacks only for decoded error replies (and for submission after the
//! connection has ended); nothing is retried on the caller's behalf.

pub mod connection;
pub mod protocol;

// Re-export commonly used types for convenience
pub use connection::{
    CommandError, Connection, ConnectionConfig, ConnectionState, ConnectionStats,
    DisconnectReason,
};
pub use protocol::{encode_command, ParseError, RespParser, RespValue};

/// The default port Redis-compatible servers listen on
pub const DEFAULT_PORT: u16 = 6379;

/// The default host to connect to
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Version of kvpipe
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
