//! Single-threaded reactor for non-blocking TCP.
//!
//! Readiness-based I/O using mio (epoll on Linux, kqueue on macOS).
//!
//! - `Buffer`: fixed-capacity input/output windows with explicit compaction
//! - `Connection`: per-connection context handed to every callback
//! - `Listener`: callback surface with no-op defaults
//! - `EventLoop`: waits for readiness and dispatches one event per
//!   registration per pass

mod buffer;
mod connection;
mod event_loop;
mod listener;

pub use buffer::{Buffer, DEFAULT_BUFFER_SIZE};
pub use connection::{ConnStatus, Connection, FlushOutcome, ReadOutcome};
pub use event_loop::{EventLoop, LoopConfig, StopHandle};
pub use listener::{Control, Listener};
pub use mio::{Interest, Token};
