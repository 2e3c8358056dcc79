//! Byte-transparent echo server.
//!
//! Every byte read from a client is written straight back, without
//! parsing frames. A client that cannot keep up with its own echoes is
//! dropped rather than buffered for.

use crate::error::{ConnectionError, RegistrationError};
use crate::runtime::{
    Connection, Control, EventLoop, FlushOutcome, Listener, LoopConfig, ReadOutcome,
};
use std::net::SocketAddr;
use tracing::{debug, info, warn};

/// Per-connection state.
#[derive(Debug, Default)]
pub struct Session {
    /// Set when the connection is accepted.
    pub peer: Option<SocketAddr>,
    /// Bytes written back to this client so far.
    pub bytes_echoed: u64,
}

/// Event loop driver for the echo server.
#[derive(Debug, Default)]
pub struct EchoServer {
    accepted: u64,
}

impl EchoServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total connections accepted.
    pub fn accepted(&self) -> u64 {
        self.accepted
    }

    /// Write everything buffered in input back to the peer.
    fn echo(conn: &mut Connection<Session>) -> Result<usize, ConnectionError> {
        let (input, output) = conn.buffers_mut();
        let pending = input.len();
        if !output.append(input.unread_bytes()) {
            return Err(ConnectionError::Backlogged {
                written: 0,
                pending: pending + output.len(),
            });
        }
        input.consume(pending);

        match conn.flush_output()? {
            FlushOutcome::Idle => Ok(0),
            FlushOutcome::Complete(n) => Ok(n),
            FlushOutcome::Partial(n) => Err(ConnectionError::Backlogged {
                written: n,
                pending: n + conn.output().len(),
            }),
            FlushOutcome::Blocked => Err(ConnectionError::Backlogged {
                written: 0,
                pending: conn.output().len(),
            }),
        }
    }
}

impl Listener for EchoServer {
    type Attachment = Session;

    fn on_accept(&mut self, conn: &mut Connection<Session>, _ctl: &mut Control) {
        self.accepted += 1;
        let peer = conn.peer_addr();
        conn.attachment_mut().peer = Some(peer);
        info!(peer = %peer, "Client connected");
    }

    fn on_read(&mut self, conn: &mut Connection<Session>, _ctl: &mut Control) {
        match conn.fill_input() {
            Ok(ReadOutcome::Read(n)) => {
                debug!(
                    peer = %conn.peer_addr(),
                    bytes = n,
                    data = %String::from_utf8_lossy(conn.input().unread_bytes()),
                    "Received"
                );
            }
            Ok(ReadOutcome::Pending) => return,
            Ok(ReadOutcome::Eof) => return disconnect(conn),
            Err(e) => {
                warn!(peer = %conn.peer_addr(), error = %e, "Read failed, dropping client");
                return disconnect(conn);
            }
        }

        match Self::echo(conn) {
            Ok(n) => conn.attachment_mut().bytes_echoed += n as u64,
            Err(e) => {
                warn!(peer = %conn.peer_addr(), error = %e, "Dropping client");
                disconnect(conn);
            }
        }
    }
}

fn disconnect(conn: &mut Connection<Session>) {
    let session = conn.attachment();
    info!(
        peer = ?session.peer,
        bytes_echoed = session.bytes_echoed,
        "Client disconnected"
    );
    conn.close();
}

/// Create an echo server event loop listening on `addr`.
pub fn bind(
    addr: SocketAddr,
    config: LoopConfig,
) -> Result<EventLoop<EchoServer>, RegistrationError> {
    let mut event_loop = EventLoop::new(EchoServer::new(), config)?;
    event_loop.bind(addr)?;
    Ok(event_loop)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::StopHandle;
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::TcpStream;
    use std::thread::{self, JoinHandle};
    use std::time::Duration;

    fn start() -> (SocketAddr, StopHandle, JoinHandle<EchoServer>) {
        let mut event_loop = EventLoop::new(EchoServer::new(), LoopConfig::default()).unwrap();
        let token = event_loop.bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let addr = event_loop.local_addr(token).unwrap();
        let handle = event_loop.stop_handle();

        let runner = thread::spawn(move || {
            event_loop.run().unwrap();
            event_loop.into_listener()
        });
        (addr, handle, runner)
    }

    fn connect(addr: SocketAddr) -> TcpStream {
        let stream = TcpStream::connect(addr).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        stream
    }

    #[test]
    fn test_echoes_bytes_unchanged() {
        let (addr, handle, runner) = start();

        let mut stream = connect(addr);
        let sent: &[u8] = b"100*1*hello\nnot a frame\n\xff\x00raw";
        stream.write_all(sent).unwrap();

        let mut echoed = vec![0u8; sent.len()];
        stream.read_exact(&mut echoed).unwrap();
        assert_eq!(echoed, sent);

        handle.stop();
        assert_eq!(runner.join().unwrap().accepted(), 1);
    }

    #[test]
    fn test_clients_are_isolated() {
        let (addr, handle, runner) = start();

        let mut first = BufReader::new(connect(addr));
        let mut second = BufReader::new(connect(addr));

        first.get_mut().write_all(b"first\n").unwrap();
        second.get_mut().write_all(b"second\n").unwrap();

        let mut line = String::new();
        second.read_line(&mut line).unwrap();
        assert_eq!(line, "second\n");

        line.clear();
        first.read_line(&mut line).unwrap();
        assert_eq!(line, "first\n");

        // Closing one client leaves the other served
        drop(first);
        second.get_mut().write_all(b"again\n").unwrap();
        line.clear();
        second.read_line(&mut line).unwrap();
        assert_eq!(line, "again\n");

        handle.stop();
        assert_eq!(runner.join().unwrap().accepted(), 2);
    }

    #[test]
    fn test_bind_conflict() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = taken.local_addr().unwrap();
        match bind(addr, LoopConfig::default()) {
            Err(RegistrationError::Bind { addr: failed, .. }) => assert_eq!(failed, addr),
            Err(other) => panic!("unexpected: {:?}", other),
            Ok(_) => panic!("unexpected: bound {addr} twice"),
        }
    }
}
