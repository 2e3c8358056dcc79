//! Per-connection context and the registration set.
//!
//! A `Connection` owns its socket, its input/output buffers and a
//! role-specific attachment. It is handed by `&mut` to every listener
//! callback; only the loop thread ever touches it.

use crate::error::ConnectionError;
use crate::runtime::buffer::Buffer;
use mio::net::{TcpListener, TcpStream};
use mio::{Interest, Token};
use slab::Slab;
use std::io;
use std::net::SocketAddr;

/// Lifecycle of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnStatus {
    /// Outgoing connect has not completed yet.
    Connecting,
    /// Established; reads and writes are dispatched.
    Open,
    /// Marked for closing; the loop deregisters it after the callback.
    Closing,
    /// Deregistered and about to be dropped.
    Closed,
}

/// Result of a single read into the input buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Bytes appended to the input buffer.
    Read(usize),
    /// Nothing available right now.
    Pending,
    /// Peer closed its write side.
    Eof,
}

/// Result of a single write from the output buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Output buffer was empty.
    Idle,
    /// Everything buffered was written.
    Complete(usize),
    /// Only part was written; the rest stays buffered.
    Partial(usize),
    /// Transport would block; nothing was written.
    Blocked,
}

/// Readiness reported by the poller and not yet handled.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Readiness {
    pub readable: bool,
    pub writable: bool,
}

/// A single TCP connection.
pub struct Connection<A> {
    stream: TcpStream,
    token: Token,
    status: ConnStatus,
    interest: Interest,
    interest_changed: bool,
    peer: SocketAddr,
    input: Buffer,
    output: Buffer,
    attachment: A,
    /// Readiness carried between loop passes.
    pub(crate) ready: Readiness,
    /// Already in the dispatch queue for the next pass.
    pub(crate) queued: bool,
}

impl<A> Connection<A> {
    pub(crate) fn new(
        stream: TcpStream,
        token: Token,
        status: ConnStatus,
        interest: Interest,
        peer: SocketAddr,
        buffer_size: usize,
        attachment: A,
    ) -> Self {
        Self {
            stream,
            token,
            status,
            interest,
            interest_changed: false,
            peer,
            input: Buffer::new(buffer_size),
            output: Buffer::new(buffer_size),
            attachment,
            ready: Readiness::default(),
            queued: false,
        }
    }

    pub fn token(&self) -> Token {
        self.token
    }

    pub fn status(&self) -> ConnStatus {
        self.status
    }

    /// Remote address (the connect target while still connecting).
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.stream.local_addr().ok()
    }

    pub fn interest(&self) -> Interest {
        self.interest
    }

    /// Change the readiness this connection is dispatched for.
    ///
    /// Applied by the loop once the current callback returns.
    pub fn set_interest(&mut self, interest: Interest) {
        if interest != self.interest {
            self.interest = interest;
            self.interest_changed = true;
        }
    }

    pub(crate) fn take_interest_change(&mut self) -> Option<Interest> {
        if std::mem::take(&mut self.interest_changed) {
            Some(self.interest)
        } else {
            None
        }
    }

    /// Mark the connection for closing.
    ///
    /// The loop deregisters and drops it after the current callback; no
    /// further events are dispatched for it.
    pub fn close(&mut self) {
        if self.status != ConnStatus::Closed {
            self.status = ConnStatus::Closing;
        }
    }

    pub fn is_closing(&self) -> bool {
        matches!(self.status, ConnStatus::Closing | ConnStatus::Closed)
    }

    pub(crate) fn mark_open(&mut self) {
        self.status = ConnStatus::Open;
    }

    pub(crate) fn mark_closed(&mut self) {
        self.status = ConnStatus::Closed;
    }

    pub fn input(&self) -> &Buffer {
        &self.input
    }

    pub fn input_mut(&mut self) -> &mut Buffer {
        &mut self.input
    }

    pub fn output(&self) -> &Buffer {
        &self.output
    }

    pub fn output_mut(&mut self) -> &mut Buffer {
        &mut self.output
    }

    /// Both buffers at once, for moving bytes from input to output.
    pub fn buffers_mut(&mut self) -> (&mut Buffer, &mut Buffer) {
        (&mut self.input, &mut self.output)
    }

    pub fn attachment(&self) -> &A {
        &self.attachment
    }

    pub fn attachment_mut(&mut self) -> &mut A {
        &mut self.attachment
    }

    pub(crate) fn stream_mut(&mut self) -> &mut TcpStream {
        &mut self.stream
    }

    /// Read once from the socket into the input buffer's spare capacity.
    ///
    /// A full input buffer is `ConnectionError::InputFull`: the peer sent
    /// more than a frame can hold without a terminator.
    pub fn fill_input(&mut self) -> Result<ReadOutcome, ConnectionError> {
        if self.input.is_full() {
            return Err(ConnectionError::InputFull {
                capacity: self.input.capacity(),
            });
        }

        match self.input.fill_from(&mut self.stream) {
            Ok(0) => Ok(ReadOutcome::Eof),
            Ok(n) => {
                // More may be waiting; revisit on the next pass.
                self.ready.readable = true;
                Ok(ReadOutcome::Read(n))
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => Ok(ReadOutcome::Pending),
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {
                self.ready.readable = true;
                Ok(ReadOutcome::Pending)
            }
            Err(e) => Err(ConnectionError::Io(e)),
        }
    }

    /// Write once from the output buffer to the socket.
    ///
    /// Unsent bytes are compacted to the front of the output buffer and
    /// wait for the next writable event.
    pub fn flush_output(&mut self) -> Result<FlushOutcome, ConnectionError> {
        if self.output.is_empty() {
            return Ok(FlushOutcome::Idle);
        }

        match self.output.drain_into(&mut self.stream) {
            Ok(0) => Err(ConnectionError::Io(io::Error::new(
                io::ErrorKind::WriteZero,
                "write returned 0",
            ))),
            Ok(n) => {
                self.ready.writable = true;
                if self.output.is_empty() {
                    Ok(FlushOutcome::Complete(n))
                } else {
                    Ok(FlushOutcome::Partial(n))
                }
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => Ok(FlushOutcome::Blocked),
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {
                self.ready.writable = true;
                Ok(FlushOutcome::Blocked)
            }
            Err(e) => Err(ConnectionError::Io(e)),
        }
    }
}

impl<A> std::fmt::Debug for Connection<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("token", &self.token)
            .field("status", &self.status)
            .field("interest", &self.interest)
            .field("peer", &self.peer)
            .field("input", &self.input)
            .field("output", &self.output)
            .finish()
    }
}

/// Anything the loop has registered with the poller.
pub(crate) enum Registration<A> {
    /// Listening socket, dispatched as accept.
    Listener(TcpListener),
    /// Connection, dispatched as connect/read/write.
    Stream(Connection<A>),
}

/// Registry of registrations using slab allocation.
///
/// Slab keys double as poll tokens. Provides O(1) insert, lookup, and
/// remove operations.
pub(crate) struct Registry<A> {
    entries: Slab<Registration<A>>,
    max_entries: usize,
}

impl<A> Registry<A> {
    /// Create a new registry with specified maximum capacity.
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Slab::with_capacity(max_entries),
            max_entries,
        }
    }

    /// Token the next `insert` will receive.
    ///
    /// Returns `None` if the registry is at capacity.
    pub fn vacant_token(&self) -> Option<Token> {
        if self.entries.len() >= self.max_entries {
            return None;
        }
        Some(Token(self.entries.vacant_key()))
    }

    pub fn insert(&mut self, registration: Registration<A>) -> Token {
        Token(self.entries.insert(registration))
    }

    pub fn get(&self, token: Token) -> Option<&Registration<A>> {
        self.entries.get(token.0)
    }

    pub fn get_mut(&mut self, token: Token) -> Option<&mut Registration<A>> {
        self.entries.get_mut(token.0)
    }

    /// Mutable access to a connection, skipping listeners.
    pub fn connection_mut(&mut self, token: Token) -> Option<&mut Connection<A>> {
        match self.entries.get_mut(token.0) {
            Some(Registration::Stream(conn)) => Some(conn),
            _ => None,
        }
    }

    pub fn remove(&mut self, token: Token) -> Option<Registration<A>> {
        self.entries.try_remove(token.0)
    }

    pub fn contains(&self, token: Token) -> bool {
        self.entries.contains(token.0)
    }

    /// Number of registered connections (listeners excluded).
    pub fn connection_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|(_, r)| matches!(r, Registration::Stream(_)))
            .count()
    }
}
