//! mio event loop implementation.
//!
//! Readiness-based model: poll tells us when sockets are ready, then the
//! listener's callbacks perform non-blocking reads and writes. Uses epoll
//! on Linux, kqueue on macOS.
//!
//! ## Dispatch
//!
//! Each pass waits for readiness, then dispatches exactly one event
//! category per registration: connect, accept, read or write. mio is
//! edge-triggered, so every connection keeps the readiness it has not
//! handled yet. Readiness is cleared before a callback and re-armed by
//! `Connection::fill_input`/`flush_output` whenever the socket did not
//! report `WouldBlock`. Connections with readiness left over go to the
//! front of the next pass, which then polls without blocking.

use crate::error::{LoopError, RegistrationError};
use crate::runtime::buffer::DEFAULT_BUFFER_SIZE;
use crate::runtime::connection::{ConnStatus, Connection, Registration, Registry};
use crate::runtime::listener::{Control, Listener};
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token, Waker};
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

const WAKER_TOKEN: Token = Token(usize::MAX);

/// Consecutive poll failures after which the poller is considered unusable.
const MAX_POLL_FAILURES: usize = 8;

/// Event loop tuning.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Size of each connection's input and output buffer.
    pub buffer_size: usize,
    /// Maximum number of registrations (listeners and connections).
    pub max_connections: usize,
    /// Events fetched per poll.
    pub events_capacity: usize,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            max_connections: 1024,
            events_capacity: 1024,
        }
    }
}

/// Stops an `EventLoop` from any thread.
#[derive(Clone)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl StopHandle {
    /// Make `run` return after its current dispatch batch. Idempotent.
    pub fn stop(&self) {
        if !self.flag.swap(true, Ordering::AcqRel) {
            if let Err(e) = self.waker.wake() {
                warn!(error = %e, "Failed to wake event loop");
            }
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// Single-threaded reactor dispatching readiness to a `Listener`.
pub struct EventLoop<L: Listener> {
    poll: Poll,
    events: Events,
    registry: Registry<L::Attachment>,
    listener: L,
    config: LoopConfig,
    /// Connections with readiness left over from the previous pass.
    backlog: Vec<Token>,
    /// Registrations to dispatch in the current pass.
    batch: Vec<Token>,
    stop: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl<L: Listener> EventLoop<L> {
    /// Create a loop that dispatches into `listener`.
    pub fn new(listener: L, config: LoopConfig) -> Result<Self, RegistrationError> {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER_TOKEN)?);

        Ok(Self {
            poll,
            events: Events::with_capacity(config.events_capacity),
            registry: Registry::new(config.max_connections),
            listener,
            backlog: Vec::new(),
            batch: Vec::with_capacity(config.events_capacity),
            config,
            stop: Arc::new(AtomicBool::new(false)),
            waker,
        })
    }

    /// Bind a listening socket; accepted connections are dispatched to
    /// `on_accept`.
    pub fn bind(&mut self, addr: SocketAddr) -> Result<Token, RegistrationError> {
        let token = self
            .registry
            .vacant_token()
            .ok_or(RegistrationError::Full(self.config.max_connections))?;

        let listener =
            create_listener(addr).map_err(|source| RegistrationError::Bind { addr, source })?;
        let mut listener = TcpListener::from_std(listener);
        self.poll
            .registry()
            .register(&mut listener, token, Interest::READABLE)?;

        info!(addr = %listener.local_addr()?, "Listening");

        Ok(self.registry.insert(Registration::Listener(listener)))
    }

    /// Start a non-blocking connect; completion is dispatched to
    /// `on_connect`.
    pub fn connect(&mut self, addr: SocketAddr) -> Result<Token, RegistrationError> {
        let token = self
            .registry
            .vacant_token()
            .ok_or(RegistrationError::Full(self.config.max_connections))?;

        let mut stream =
            TcpStream::connect(addr).map_err(|source| RegistrationError::Connect { addr, source })?;
        // Connect completion is reported as writable
        self.poll
            .registry()
            .register(&mut stream, token, Interest::WRITABLE)?;

        let conn = Connection::new(
            stream,
            token,
            ConnStatus::Connecting,
            Interest::WRITABLE,
            addr,
            self.config.buffer_size,
            L::Attachment::default(),
        );

        debug!(addr = %addr, ?token, "Connecting");

        Ok(self.registry.insert(Registration::Stream(conn)))
    }

    /// Update the interest of an open connection.
    ///
    /// While a connect is pending the new interest is recorded but the
    /// connection is registered for reads and writes once it completes.
    pub fn register(&mut self, token: Token, interest: Interest) -> Result<(), RegistrationError> {
        let conn = match self.registry.connection_mut(token) {
            Some(conn) if !conn.is_closing() => conn,
            _ => return Err(RegistrationError::Closed(token)),
        };

        conn.set_interest(interest);
        if conn.status() == ConnStatus::Connecting {
            return Ok(());
        }
        if let Some(interest) = conn.take_interest_change() {
            self.poll
                .registry()
                .reregister(conn.stream_mut(), token, interest)?;
        }
        Ok(())
    }

    /// Explicitly close a registration.
    pub fn disconnect(&mut self, token: Token) -> Result<(), RegistrationError> {
        if !self.registry.contains(token) {
            return Err(RegistrationError::Closed(token));
        }
        self.reap(token);
        Ok(())
    }

    /// Make `run` return after its current dispatch batch. Idempotent.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// Handle for stopping the loop from another thread.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            flag: Arc::clone(&self.stop),
            waker: Arc::clone(&self.waker),
        }
    }

    /// Local address of a registration.
    pub fn local_addr(&self, token: Token) -> Option<SocketAddr> {
        match self.registry.get(token)? {
            Registration::Listener(listener) => listener.local_addr().ok(),
            Registration::Stream(conn) => conn.local_addr(),
        }
    }

    /// Number of registered connections (listeners excluded).
    pub fn connection_count(&self) -> usize {
        self.registry.connection_count()
    }

    pub fn listener(&self) -> &L {
        &self.listener
    }

    pub fn listener_mut(&mut self) -> &mut L {
        &mut self.listener
    }

    pub fn into_listener(self) -> L {
        self.listener
    }

    /// Run until stopped.
    ///
    /// Returns `LoopError::Fatal` once the poller fails repeatedly and
    /// `LoopError::Connect` if an outgoing connect fails.
    pub fn run(&mut self) -> Result<(), LoopError> {
        let mut failures = 0;

        while !self.stop.load(Ordering::Acquire) {
            let timeout = if self.backlog.is_empty() {
                None
            } else {
                Some(Duration::ZERO)
            };

            if let Err(e) = self.collect_ready(timeout) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                failures += 1;
                if failures >= MAX_POLL_FAILURES {
                    error!(error = %e, failures, "Poller unusable, stopping event loop");
                    return Err(LoopError::Fatal(e));
                }
                warn!(error = %e, failures, "Poll failed");
                continue;
            }
            failures = 0;

            self.dispatch_batch()?;
        }

        debug!("Event loop stopped");
        Ok(())
    }

    /// Wait for readiness and build the next batch: carried-over
    /// connections first, then in reported order.
    fn collect_ready(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.poll.poll(&mut self.events, timeout)?;

        self.batch.clear();
        self.batch.append(&mut self.backlog);

        for event in self.events.iter() {
            let token = event.token();
            match self.registry.get_mut(token) {
                Some(Registration::Stream(conn)) => {
                    conn.ready.readable |=
                        event.is_readable() || event.is_read_closed() || event.is_error();
                    conn.ready.writable |=
                        event.is_writable() || event.is_write_closed() || event.is_error();
                    if !conn.queued {
                        conn.queued = true;
                        self.batch.push(token);
                    }
                }
                Some(Registration::Listener(_)) => self.batch.push(token),
                // Waker, or closed since registration
                None => {}
            }
        }

        trace!(ready = self.batch.len(), "Dispatching batch");
        Ok(())
    }

    /// Dispatch every registration in the current batch.
    ///
    /// On error the undispatched rest of the batch goes back to the
    /// backlog so a later `run` still delivers it.
    fn dispatch_batch(&mut self) -> Result<(), LoopError> {
        let batch = std::mem::take(&mut self.batch);
        let mut result = Ok(());

        for (i, &token) in batch.iter().enumerate() {
            if let Err(e) = self.dispatch(token) {
                self.requeue(&batch[i + 1..]);
                result = Err(e);
                break;
            }
        }

        self.batch = batch;
        result
    }

    /// Put still-registered tokens back on the backlog.
    fn requeue(&mut self, tokens: &[Token]) {
        for &token in tokens {
            match self.registry.get_mut(token) {
                Some(Registration::Stream(conn)) => {
                    conn.queued = true;
                    self.backlog.push(token);
                }
                Some(Registration::Listener(_)) => self.backlog.push(token),
                None => {}
            }
        }
    }

    /// Deliver one event category to a registration.
    fn dispatch(&mut self, token: Token) -> Result<(), LoopError> {
        match self.registry.get(token) {
            // Invalidated since it was reported ready
            None => return Ok(()),
            Some(Registration::Listener(_)) => {
                self.accept(token);
                return Ok(());
            }
            Some(Registration::Stream(_)) => {}
        }

        let Some(conn) = self.registry.connection_mut(token) else {
            return Ok(());
        };
        conn.queued = false;

        let mut ctl = Control::default();

        if conn.status() == ConnStatus::Connecting {
            if !conn.ready.writable {
                conn.ready.readable = false;
                return Ok(());
            }
            conn.ready.writable = false;

            match finish_connect(conn) {
                Ok(true) => {}
                // Spurious wakeup, keep waiting
                Ok(false) => return Ok(()),
                Err(source) => {
                    let addr = conn.peer_addr();
                    self.reap(token);
                    return Err(LoopError::Connect { addr, source });
                }
            }

            let interest = Interest::READABLE | Interest::WRITABLE;
            conn.set_interest(interest);
            conn.take_interest_change();
            if let Err(source) = self
                .poll
                .registry()
                .reregister(conn.stream_mut(), token, interest)
            {
                let addr = conn.peer_addr();
                self.reap(token);
                return Err(LoopError::Connect { addr, source });
            }

            conn.mark_open();
            conn.ready.writable = true;
            info!(peer = %conn.peer_addr(), "Connected");

            self.listener.on_connect(conn, &mut ctl);
        } else if conn.ready.readable && conn.interest().is_readable() {
            conn.ready.readable = false;
            self.listener.on_read(conn, &mut ctl);
        } else if conn.ready.writable && conn.interest().is_writable() {
            conn.ready.writable = false;
            self.listener.on_write(conn, &mut ctl);
        } else {
            return Ok(());
        }

        self.after_callback(token, ctl);
        Ok(())
    }

    /// Accept every pending connection on a listening socket.
    fn accept(&mut self, token: Token) {
        loop {
            let Some(Registration::Listener(listener)) = self.registry.get(token) else {
                return;
            };

            match listener.accept() {
                Ok((mut stream, peer)) => {
                    let Some(conn_token) = self.registry.vacant_token() else {
                        warn!(peer = %peer, "Connection limit reached");
                        continue;
                    };

                    if let Err(e) =
                        self.poll
                            .registry()
                            .register(&mut stream, conn_token, Interest::READABLE)
                    {
                        error!(peer = %peer, error = %e, "Failed to register connection");
                        continue;
                    }

                    let conn = Connection::new(
                        stream,
                        conn_token,
                        ConnStatus::Open,
                        Interest::READABLE,
                        peer,
                        self.config.buffer_size,
                        L::Attachment::default(),
                    );
                    self.registry.insert(Registration::Stream(conn));

                    debug!(peer = %peer, token = conn_token.0, "Accepted connection");

                    let mut ctl = Control::default();
                    if let Some(conn) = self.registry.connection_mut(conn_token) {
                        self.listener.on_accept(conn, &mut ctl);
                    }
                    self.after_callback(conn_token, ctl);
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!(error = %e, "Accept error");
                    break;
                }
            }
        }
    }

    /// Apply what a callback asked for: stop, close, interest change, and
    /// carrying unhandled readiness to the next pass.
    fn after_callback(&mut self, token: Token, ctl: Control) {
        if ctl.is_stopping() {
            self.stop();
        }

        let Some(conn) = self.registry.connection_mut(token) else {
            return;
        };

        if conn.is_closing() {
            self.reap(token);
            return;
        }

        if let Some(interest) = conn.take_interest_change() {
            if let Err(e) = self
                .poll
                .registry()
                .reregister(conn.stream_mut(), token, interest)
            {
                warn!(token = token.0, error = %e, "Failed to update interest, closing");
                self.reap(token);
                return;
            }
        }

        let carry = (conn.ready.readable && conn.interest().is_readable())
            || (conn.ready.writable && conn.interest().is_writable());
        if carry && !conn.queued {
            conn.queued = true;
            self.backlog.push(token);
        }
    }

    /// Deregister and drop a registration.
    fn reap(&mut self, token: Token) {
        match self.registry.remove(token) {
            Some(Registration::Stream(mut conn)) => {
                let _ = self.poll.registry().deregister(conn.stream_mut());
                conn.mark_closed();
                debug!(peer = %conn.peer_addr(), token = token.0, "Connection closed");
            }
            Some(Registration::Listener(mut listener)) => {
                let _ = self.poll.registry().deregister(&mut listener);
                debug!(token = token.0, "Listener closed");
            }
            None => {}
        }
    }
}

/// Check whether a pending connect has completed.
///
/// `Ok(false)` means the connect is still in progress.
fn finish_connect<A>(conn: &mut Connection<A>) -> io::Result<bool> {
    if let Some(e) = conn.stream_mut().take_error()? {
        return Err(e);
    }
    match conn.stream_mut().peer_addr() {
        Ok(_) => Ok(true),
        Err(ref e) if e.kind() == io::ErrorKind::NotConnected => Ok(false),
        Err(e) => Err(e),
    }
}

/// Create a non-blocking TCP listener with SO_REUSEADDR.
fn create_listener(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;

    Ok(socket.into())
}
