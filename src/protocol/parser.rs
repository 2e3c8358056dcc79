//! Frame parser.

use crate::error::FrameError;
use bytes::Bytes;
use std::borrow::Cow;
use std::str::FromStr;

/// Maximum frame length, separators and terminator included.
pub const MAX_FRAME_LEN: usize = 4 * 1024;

/// Field separator.
pub const SEPARATOR: u8 = b'*';

/// Frame terminator.
pub const TERMINATOR: u8 = b'\n';

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Sender's wall clock at encode time, in milliseconds since the epoch.
    pub sent_timestamp: i64,
    /// Per-connection sequence number assigned by the sender.
    pub sequence: u64,
    /// Payload bytes; empty when the field is empty or absent.
    pub payload: Bytes,
}

impl Message {
    /// Payload as text, replacing invalid UTF-8.
    pub fn payload_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

/// Parse one frame, given without its terminator.
///
/// The frame is split on the first two separators; anything after the
/// second separator (further separators included) is payload.
pub fn parse(frame: &[u8]) -> Result<Message, FrameError> {
    let mut fields = frame.splitn(3, |&b| b == SEPARATOR);

    let timestamp = fields.next().unwrap_or(&[]);
    let sequence = fields.next().ok_or(FrameError::Malformed {
        reason: "missing sequence field",
    })?;
    let payload = fields.next().unwrap_or(&[]);

    let sent_timestamp = parse_number(timestamp).ok_or(FrameError::Malformed {
        reason: "invalid timestamp",
    })?;
    let sequence = parse_number(sequence).ok_or(FrameError::Malformed {
        reason: "invalid sequence number",
    })?;

    Ok(Message {
        sent_timestamp,
        sequence,
        payload: Bytes::copy_from_slice(payload),
    })
}

fn parse_number<T: FromStr>(field: &[u8]) -> Option<T> {
    std::str::from_utf8(field).ok()?.parse().ok()
}

/// Find the terminator, returning its position.
pub fn find_terminator(buffer: &[u8]) -> Option<usize> {
    buffer.iter().position(|&b| b == TERMINATOR)
}
