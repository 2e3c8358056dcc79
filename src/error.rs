//! Error taxonomy.
//!
//! Errors are split by the scope they affect:
//! - `ConnectionError` and `FrameError`: recovered locally by closing (or
//!   skipping a frame on) the offending connection.
//! - `RegistrationError`: setup failures, fatal to the process at startup.
//! - `LoopError`: the event loop itself cannot continue.
//! - `ClientError`: why an echo client run did not complete.
//!
//! Every `Display` starts with the category so a single log line carries
//! both category and cause.

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;

use mio::Token;
use thiserror::Error;

/// Failure scoped to a single connection.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Read or write failed at the transport.
    #[error("connection error: {0}")]
    Io(#[from] io::Error),

    /// Peer closed its side of the connection.
    #[error("connection error: peer closed the connection")]
    PeerClosed,

    /// Input buffer filled up without yielding a complete frame.
    #[error("frame too large: input buffer full ({capacity} bytes) without a terminator")]
    InputFull { capacity: usize },

    /// Peer did not accept everything we tried to write.
    #[error("connection error: peer accepted {written} of {pending} bytes")]
    Backlogged { written: usize, pending: usize },
}

/// Failure decoding or encoding a single frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// The frame was discarded; the connection stays usable.
    #[error("malformed frame: {reason}")]
    Malformed { reason: &'static str },

    /// Frame exceeds the protocol maximum; fatal to the connection.
    #[error("frame too large: {len} bytes (max: {max})")]
    TooLarge { len: usize, max: usize },
}

impl FrameError {
    /// Whether the connection must be closed after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, FrameError::TooLarge { .. })
    }
}

/// Failure creating or updating a registration.
#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("registration error: failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("registration error: failed to connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// Token is unknown or its connection is already closing.
    #[error("registration error: {0:?} is closed")]
    Closed(Token),

    /// Registration set is at capacity.
    #[error("registration error: connection limit of {0} reached")]
    Full(usize),

    #[error("registration error: {0}")]
    Io(#[from] io::Error),
}

/// Failure that terminates `EventLoop::run`.
#[derive(Debug, Error)]
pub enum LoopError {
    /// The readiness mechanism is unusable.
    #[error("event loop fatal: {0}")]
    Fatal(#[source] io::Error),

    /// An outgoing connection could not be established.
    #[error("event loop fatal: connect to {addr} failed: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
}

/// Failure of an echo client run.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Line source could not be opened.
    #[error("source error: failed to open '{}': {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Line source failed mid-run.
    #[error("source error: failed to read next line: {0}")]
    Source(#[source] io::Error),

    #[error(transparent)]
    Registration(#[from] RegistrationError),

    #[error(transparent)]
    Loop(#[from] LoopError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Frame(#[from] FrameError),

    /// Loop stopped before the final echo arrived.
    #[error("connection error: run ended after {processed} echoes, before the final one")]
    Incomplete { processed: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_names_category() {
        let err = FrameError::TooLarge { len: 5000, max: 4096 };
        assert_eq!(err.to_string(), "frame too large: 5000 bytes (max: 4096)");

        let err = ConnectionError::PeerClosed;
        assert!(err.to_string().starts_with("connection error"));

        let err = RegistrationError::Closed(Token(3));
        assert!(err.to_string().starts_with("registration error"));
    }

    #[test]
    fn test_frame_error_fatality() {
        assert!(!FrameError::Malformed { reason: "x" }.is_fatal());
        assert!(FrameError::TooLarge { len: 1, max: 0 }.is_fatal());
    }
}
