//! Line-framed echo protocol.
//!
//! A text protocol for measuring round-trip latency and throughput:
//! - Client sends one frame per source line
//! - Server echoes the bytes back unchanged
//! - Client decodes the echo and computes lag from the embedded timestamp
//!
//! ## Protocol Format
//!
//! Each frame is `*`-separated text terminated by a newline, at most
//! 4096 bytes long including the terminator:
//!
//! ```text
//! <timestamp>*<sequence>*<payload>\n
//!
//! Example:
//! 1210630906171*22*This is a message\n
//! 1210630906171*23*\n
//! ```
//!
//! The payload may be empty, but the separator before it is still sent.
//! There is no length prefix, binary encoding or compression.

pub mod codec;
pub mod parser;

pub use codec::{append_frame, decode, encode, now_millis, Append, Frames};
pub use parser::{Message, MAX_FRAME_LEN};
