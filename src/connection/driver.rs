//! Connection Driver
//!
//! The driver is the owning execution context of a connection: a single
//! Tokio task that exclusively owns the socket, the reply decoder, the
//! pipeline queues, and the I/O watch flags. Everything else in the crate
//! talks to it through the operation channel.
//!
//! Each turn of the driver loop does one of two things, never both and
//! never suspending midway:
//!
//! - apply one submitted operation (command, observer registration,
//!   disconnect request), or
//! - handle one socket readiness event: flush buffered outbound bytes on
//!   write-readiness, or read everything available and feed it to the
//!   decoder on read-readiness, resolving each decoded reply against the
//!   oldest outstanding command.
//!
//! Every transport failure — connect error, rejected AUTH, peer close,
//! read/write error, protocol violation — funnels into the single
//! teardown path at the bottom of `run`, which fires the disconnect
//! observer at most once. The driver never retries anything.

use std::io;
use std::sync::Arc;

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::Interest;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::connection::pipeline::Pipeline;
use crate::connection::{
    CommandError, ConnectCallback, ConnectionConfig, ConnectionState, DisconnectCallback,
    DisconnectReason, FailureCallback, Op, ReplyCallback, Shared,
};
use crate::protocol::{encode_command, RespParser, RespValue};

/// Amount of spare capacity ensured before each read
const READ_CHUNK: usize = 4096;

tokio::task_local! {
    /// Identity of the connection whose driver is running on this task.
    ///
    /// `Connection::disconnect` consults this to detect a call made from
    /// inside one of this connection's own callbacks: the driver cannot
    /// signal the rendezvous while it is executing the caller, and the
    /// request is already on the owning context, so the wait is skipped.
    pub(crate) static DRIVER_CONN: usize;
}

/// Read/write watch flags mirrored into the reactor's interest.
///
/// This is the bridge between what the connection currently needs (read
/// while live, write while outbound bytes are buffered) and what the
/// reactor is asked to report. All toggles are idempotent, and toggling
/// after `disable_all` is a harmless no-op on plain flags.
#[derive(Debug, Default)]
struct IoWatch {
    read: bool,
    write: bool,
}

impl IoWatch {
    fn enable_reading(&mut self) {
        self.read = true;
    }

    fn disable_reading(&mut self) {
        self.read = false;
    }

    fn enable_writing(&mut self) {
        self.write = true;
    }

    fn disable_writing(&mut self) {
        self.write = false;
    }

    fn disable_all(&mut self) {
        self.disable_reading();
        self.disable_writing();
    }

    fn reading(&self) -> bool {
        self.read
    }

    fn writing(&self) -> bool {
        self.write
    }

    /// The readiness interest to wait for, or None when watching nothing.
    fn interest(&self) -> Option<Interest> {
        match (self.read, self.write) {
            (true, true) => Some(Interest::READABLE.add(Interest::WRITABLE)),
            (true, false) => Some(Interest::READABLE),
            (false, true) => Some(Interest::WRITABLE),
            (false, false) => None,
        }
    }
}

/// The task that owns one connection end to end.
pub(crate) struct Driver {
    config: ConnectionConfig,
    ops: mpsc::UnboundedReceiver<Op>,
    ops_open: bool,
    shared: Arc<Shared>,

    parser: RespParser,
    pipeline: Pipeline,
    read_buf: BytesMut,
    write_buf: BytesMut,
    watch: IoWatch,

    /// Commands submitted before the connection was established.
    staged: Vec<(Bytes, ReplyCallback, FailureCallback)>,
    /// True between the AUTH frame going out and its reply coming back.
    awaiting_auth: bool,
    /// Teardown has been requested; drain outbound bytes, then stop.
    disconnecting: bool,
    teardown: Option<DisconnectReason>,

    on_connect: Option<ConnectCallback>,
    on_disconnect: Option<DisconnectCallback>,
}

impl Driver {
    pub(crate) fn new(
        config: ConnectionConfig,
        ops: mpsc::UnboundedReceiver<Op>,
        shared: Arc<Shared>,
    ) -> Self {
        Self {
            config,
            ops,
            ops_open: true,
            shared,
            parser: RespParser::new(),
            pipeline: Pipeline::new(),
            read_buf: BytesMut::with_capacity(READ_CHUNK),
            write_buf: BytesMut::new(),
            watch: IoWatch::default(),
            staged: Vec::new(),
            awaiting_auth: false,
            disconnecting: false,
            teardown: None,
            on_connect: None,
            on_disconnect: None,
        }
    }

    /// Runs the connection to completion.
    pub(crate) async fn run(self) {
        let id = Arc::as_ptr(&self.shared) as usize;
        DRIVER_CONN.scope(id, self.run_inner()).await
    }

    async fn run_inner(mut self) {
        let reason = match self.establish().await {
            Ok(stream) => self.drive(stream).await,
            Err(reason) => reason,
        };
        self.finish(reason);
        self.drain_ops();
    }

    /// Opens the TCP connection while continuing to service submitted
    /// operations: observers apply immediately, commands are staged until
    /// the connection can carry them, and a disconnect request aborts the
    /// attempt.
    async fn establish(&mut self) -> Result<TcpStream, DisconnectReason> {
        debug!(addr = %self.config.addr, "Connecting");
        let connect = TcpStream::connect(self.config.addr.clone());
        tokio::pin!(connect);

        loop {
            tokio::select! {
                biased;

                op = self.ops.recv(), if self.ops_open => {
                    match op {
                        Some(Op::Command { frame, on_reply, on_failure }) => {
                            self.staged.push((frame, on_reply, on_failure));
                        }
                        Some(Op::SetOnConnect(callback)) => self.on_connect = Some(callback),
                        Some(Op::SetOnDisconnect(callback)) => self.on_disconnect = Some(callback),
                        Some(Op::Disconnect { issued }) => {
                            let _ = issued.send(());
                            return Err(DisconnectReason::Requested);
                        }
                        None => {
                            self.ops_open = false;
                            return Err(DisconnectReason::HandlesDropped);
                        }
                    }
                }

                result = &mut connect => {
                    return match result {
                        Ok(stream) => Ok(stream),
                        Err(e) => {
                            warn!(addr = %self.config.addr, error = %e, "Failed to connect");
                            Err(DisconnectReason::ConnectFailed(e.to_string()))
                        }
                    };
                }
            }
        }
    }

    /// The connected loop: one operation or one readiness event per turn.
    async fn drive(&mut self, stream: TcpStream) -> DisconnectReason {
        match stream.peer_addr() {
            Ok(peer) => info!(peer = %peer, "Connected"),
            Err(_) => info!("Connected"),
        }
        self.watch.enable_reading();

        if let Some(password) = self.config.password.clone() {
            // AUTH goes out first; staged user commands follow it on the
            // wire and their replies pair up after the AUTH reply.
            let frame = encode_command(&[b"AUTH", password.as_bytes()]);
            self.write_buf.extend_from_slice(&frame);
            self.awaiting_auth = true;
            debug!("Authenticating before announcing the connection");
        } else {
            self.announce_connected();
        }

        let staged: Vec<_> = self.staged.drain(..).collect();
        for (frame, on_reply, on_failure) in staged {
            self.enqueue(frame, on_reply, on_failure);
        }

        loop {
            if self.disconnecting && self.write_buf.is_empty() {
                // Outbound bytes drained after a teardown request:
                // unregister all interest, then release the socket.
                self.watch.disable_all();
                return self.teardown.take().unwrap_or(DisconnectReason::Requested);
            }

            // The write watch mirrors the outbound buffer exactly.
            if self.write_buf.is_empty() {
                self.watch.disable_writing();
            } else {
                self.watch.enable_writing();
            }
            let interest = match self.watch.interest() {
                Some(interest) => interest,
                None => return self.teardown.take().unwrap_or(DisconnectReason::Requested),
            };

            tokio::select! {
                biased;

                op = self.ops.recv(), if self.ops_open => {
                    self.apply_op(op);
                }

                ready = stream.ready(interest) => {
                    match ready {
                        Ok(ready) => {
                            if (ready.is_readable() || ready.is_read_closed())
                                && self.watch.reading()
                            {
                                if let Some(reason) = self.handle_readable(&stream) {
                                    return reason;
                                }
                            }
                            if (ready.is_writable() || ready.is_write_closed())
                                && self.watch.writing()
                            {
                                if let Some(reason) = self.handle_writable(&stream) {
                                    return reason;
                                }
                            }
                        }
                        Err(e) => return DisconnectReason::Io(e.to_string()),
                    }
                }
            }
        }
    }

    /// Applies one operation received on the driver.
    fn apply_op(&mut self, op: Option<Op>) {
        match op {
            Some(Op::Command {
                frame,
                on_reply,
                on_failure,
            }) => self.enqueue(frame, on_reply, on_failure),
            Some(Op::SetOnConnect(callback)) => self.on_connect = Some(callback),
            Some(Op::SetOnDisconnect(callback)) => self.on_disconnect = Some(callback),
            Some(Op::Disconnect { issued }) => {
                if !self.disconnecting {
                    debug!("Disconnect requested");
                    self.disconnecting = true;
                    self.teardown = Some(DisconnectReason::Requested);
                }
                // Signalled on receipt: the caller waits only for the
                // request to reach this task, not for teardown to finish.
                let _ = issued.send(());
            }
            None => {
                self.ops_open = false;
                if !self.disconnecting {
                    debug!("All connection handles dropped");
                    self.disconnecting = true;
                    self.teardown = Some(DisconnectReason::HandlesDropped);
                }
            }
        }
    }

    /// Queues a framed command and its continuation pair.
    fn enqueue(&mut self, frame: Bytes, on_reply: ReplyCallback, on_failure: FailureCallback) {
        if self.disconnecting {
            on_failure(CommandError::ConnectionClosed);
            return;
        }
        self.pipeline.push(on_reply, on_failure);
        self.write_buf.extend_from_slice(&frame);
        self.watch.enable_writing();
        self.shared.stats.command_sent();
        trace!(
            bytes = frame.len(),
            outstanding = self.pipeline.len(),
            "Command queued"
        );
    }

    /// Reads everything available without blocking and feeds the decoder.
    fn handle_readable(&mut self, stream: &TcpStream) -> Option<DisconnectReason> {
        loop {
            self.read_buf.reserve(READ_CHUNK);
            match stream.try_read_buf(&mut self.read_buf) {
                Ok(0) => {
                    // Peer closed; decode whatever already arrived first.
                    return Some(match self.drain_replies() {
                        Ok(()) => {
                            debug!("Connection closed by peer");
                            DisconnectReason::PeerClosed
                        }
                        Err(reason) => reason,
                    });
                }
                Ok(n) => {
                    self.shared.stats.bytes_read(n);
                    trace!(bytes = n, "Read data");
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Some(DisconnectReason::Io(e.to_string())),
            }
        }

        match self.drain_replies() {
            Ok(()) => None,
            Err(reason) => Some(reason),
        }
    }

    /// Decodes as many complete replies as the buffer holds and resolves
    /// each one.
    fn drain_replies(&mut self) -> Result<(), DisconnectReason> {
        while let Some((reply, consumed)) = self.parser.parse(&self.read_buf)? {
            let _ = self.read_buf.split_to(consumed);
            self.shared.stats.reply_received();
            self.route_reply(reply)?;
        }
        Ok(())
    }

    /// Routes one decoded reply: the AUTH handshake consumes the first
    /// reply while authenticating; everything else resolves the oldest
    /// outstanding command.
    fn route_reply(&mut self, reply: RespValue) -> Result<(), DisconnectReason> {
        if self.awaiting_auth {
            self.awaiting_auth = false;
            return match reply {
                RespValue::Error(message) => {
                    warn!(error = %message, "Authentication rejected");
                    Err(DisconnectReason::AuthRejected(message))
                }
                _ => {
                    self.announce_connected();
                    Ok(())
                }
            };
        }

        self.pipeline.resolve(reply);
        Ok(())
    }

    /// Flushes buffered outbound bytes until drained or the socket blocks.
    fn handle_writable(&mut self, stream: &TcpStream) -> Option<DisconnectReason> {
        while !self.write_buf.is_empty() {
            match stream.try_write(&self.write_buf) {
                Ok(n) => {
                    self.shared.stats.bytes_written(n);
                    self.write_buf.advance(n);
                    trace!(bytes = n, "Flushed data");
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return None,
                Err(e) => return Some(DisconnectReason::Io(e.to_string())),
            }
        }
        self.watch.disable_writing();
        None
    }

    fn announce_connected(&mut self) {
        self.shared.set_state(ConnectionState::Connected);
        info!("Connection established");
        if let Some(callback) = self.on_connect.take() {
            callback();
        }
    }

    /// The single teardown path; runs exactly once per connection.
    fn finish(&mut self, reason: DisconnectReason) {
        self.watch.disable_all();
        self.shared.set_state(ConnectionState::Ended);

        let unresolved = self.pipeline.len() + self.staged.len();
        if unresolved > 0 {
            // Commands outstanding at teardown never resolve; the
            // disconnect observer is the boundary callers watch instead.
            debug!(unresolved, "Dropping outstanding commands");
        }

        match &reason {
            DisconnectReason::Requested | DisconnectReason::HandlesDropped => {
                info!(reason = %reason, "Disconnected");
            }
            other => warn!(reason = %other, "Connection lost"),
        }

        if let Some(callback) = self.on_disconnect.take() {
            callback(reason);
        }
    }

    /// Closes the operation channel and resolves anything already queued,
    /// so late submissions fail fast instead of vanishing.
    fn drain_ops(&mut self) {
        self.ops.close();
        while let Ok(op) = self.ops.try_recv() {
            match op {
                Op::Command { on_failure, .. } => on_failure(CommandError::ConnectionClosed),
                // Dropping the sender wakes the blocked caller.
                Op::Disconnect { issued } => drop(issued),
                Op::SetOnConnect(_) | Op::SetOnDisconnect(_) => {}
            }
        }
    }
}
