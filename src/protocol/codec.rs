//! Streaming frame codec.
//!
//! Decoding works directly on a connection's input `Buffer`: complete
//! frames are consumed as they are yielded and a trailing partial frame
//! stays buffered for the next read. Encoding appends to an output
//! `Buffer` only when the whole frame fits.

use crate::error::FrameError;
use crate::protocol::parser::{self, Message, MAX_FRAME_LEN, SEPARATOR, TERMINATOR};
use crate::runtime::Buffer;
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt::Write;

/// Milliseconds since the Unix epoch, as carried in frames.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Lazily decode the complete frames in `buf`.
///
/// Each item is one frame: malformed frames are yielded as errors and
/// skipped, so iteration can continue past them. `FrameError::TooLarge`
/// ends the iteration. Dropping the iterator compacts `buf`.
pub fn decode(buf: &mut Buffer) -> Frames<'_> {
    Frames { buf, done: false }
}

/// Iterator returned by [`decode`].
pub struct Frames<'a> {
    buf: &'a mut Buffer,
    done: bool,
}

impl Iterator for Frames<'_> {
    type Item = Result<Message, FrameError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let unread = self.buf.unread_bytes();
        match parser::find_terminator(unread) {
            Some(pos) if pos + 1 > MAX_FRAME_LEN => {
                self.done = true;
                Some(Err(FrameError::TooLarge {
                    len: pos + 1,
                    max: MAX_FRAME_LEN,
                }))
            }
            Some(pos) => {
                let result = parser::parse(&unread[..pos]);
                self.buf.consume(pos + 1);
                Some(result)
            }
            // A terminator can no longer arrive in time
            None if unread.len() >= MAX_FRAME_LEN => {
                self.done = true;
                Some(Err(FrameError::TooLarge {
                    len: unread.len(),
                    max: MAX_FRAME_LEN,
                }))
            }
            None => {
                self.done = true;
                None
            }
        }
    }
}

impl Drop for Frames<'_> {
    fn drop(&mut self) {
        self.buf.compact();
    }
}

/// Encode a frame: `<timestamp>*<sequence>*<payload>\n`.
pub fn encode(timestamp: i64, sequence: u64, payload: &[u8]) -> Result<Bytes, FrameError> {
    if payload.contains(&TERMINATOR) {
        return Err(FrameError::Malformed {
            reason: "payload contains the terminator",
        });
    }

    let mut frame = BytesMut::with_capacity(payload.len() + 32);
    // Writing into BytesMut cannot fail
    let _ = write!(frame, "{timestamp}");
    frame.put_u8(SEPARATOR);
    let _ = write!(frame, "{sequence}");
    frame.put_u8(SEPARATOR);
    frame.put_slice(payload);
    frame.put_u8(TERMINATOR);

    if frame.len() > MAX_FRAME_LEN {
        return Err(FrameError::TooLarge {
            len: frame.len(),
            max: MAX_FRAME_LEN,
        });
    }

    Ok(frame.freeze())
}

/// Outcome of [`append_frame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Append {
    /// Frame of this many bytes was appended.
    Written(usize),
    /// Not enough room; nothing was appended.
    Full,
}

/// Encode a frame stamped with the current time and append it to `out`
/// if it fits in full.
pub fn append_frame(out: &mut Buffer, sequence: u64, payload: &[u8]) -> Result<Append, FrameError> {
    let frame = encode(now_millis(), sequence, payload)?;
    if out.append(&frame) {
        Ok(Append::Written(frame.len()))
    } else {
        Ok(Append::Full)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer_with(bytes: &[u8]) -> Buffer {
        let mut buf = Buffer::new(8 * 1024);
        assert!(buf.append(bytes));
        buf
    }

    /// Decode `stream` delivered in the given chunk sizes.
    fn decode_chunked(stream: &[u8], chunks: &[usize]) -> Vec<Result<Message, FrameError>> {
        let mut buf = Buffer::new(8 * 1024);
        let mut out = Vec::new();
        let mut offset = 0;
        for &size in chunks {
            let end = (offset + size).min(stream.len());
            assert!(buf.append(&stream[offset..end]));
            offset = end;
            out.extend(decode(&mut buf));
        }
        assert!(buf.append(&stream[offset..]));
        out.extend(decode(&mut buf));
        out
    }

    #[test]
    fn test_decode_three_frames() {
        let mut buf = buffer_with(b"100*1*hello\n100*2*\n100*3*world\n");
        let msgs: Vec<Message> = decode(&mut buf).map(Result::unwrap).collect();

        assert_eq!(msgs.len(), 3);
        assert_eq!((msgs[0].sequence, &msgs[0].payload[..]), (1, &b"hello"[..]));
        assert_eq!((msgs[1].sequence, &msgs[1].payload[..]), (2, &b""[..]));
        assert_eq!((msgs[2].sequence, &msgs[2].payload[..]), (3, &b"world"[..]));
        assert!(msgs.iter().all(|m| m.sent_timestamp == 100));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_keeps_partial_frame() {
        let mut buf = buffer_with(b"100*1*hello\n100*2*wor");

        let msgs: Vec<_> = decode(&mut buf).collect();
        assert_eq!(msgs.len(), 1);
        assert_eq!(buf.unread_bytes(), b"100*2*wor");
        // Compacted on drop
        assert_eq!(buf.appendable_capacity(), buf.capacity() - 9);

        assert!(buf.append(b"ld\n"));
        let msg = decode(&mut buf).next().unwrap().unwrap();
        assert_eq!(msg.sequence, 2);
        assert_eq!(msg.payload_str(), "world");
    }

    #[test]
    fn test_decode_is_chunk_invariant() {
        let stream = b"100*1*hello\n101*2*\n102*3*world\n103*4*a*b\n";
        let whole = decode_chunked(stream, &[]);
        assert_eq!(whole.len(), 4);

        for split in 1..stream.len() {
            assert_eq!(decode_chunked(stream, &[split]), whole, "split at {split}");
        }
        assert_eq!(decode_chunked(stream, &[1; 64]), whole);
        assert_eq!(decode_chunked(stream, &[3, 7, 2, 11, 5]), whole);
    }

    #[test]
    fn test_malformed_frame_is_skipped() {
        let mut buf = buffer_with(b"100*1*first\ngarbage\n100*2*second\n");
        let results: Vec<_> = decode(&mut buf).collect();

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().unwrap().sequence, 1);
        assert!(matches!(results[1], Err(FrameError::Malformed { .. })));
        assert_eq!(results[2].as_ref().unwrap().sequence, 2);

        // Buffer stays usable after the bad frame
        assert!(buf.append(b"100*3*third\n"));
        let msg = decode(&mut buf).next().unwrap().unwrap();
        assert_eq!(msg.sequence, 3);
    }

    #[test]
    fn test_unterminated_oversize_frame() {
        let mut buf = buffer_with(&vec![b'x'; MAX_FRAME_LEN]);
        let mut frames = decode(&mut buf);
        match frames.next() {
            Some(Err(FrameError::TooLarge { len, max })) => {
                assert_eq!(len, MAX_FRAME_LEN);
                assert_eq!(max, MAX_FRAME_LEN);
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert!(frames.next().is_none());
    }

    #[test]
    fn test_terminated_oversize_frame() {
        let mut bytes = b"100*1*".to_vec();
        bytes.resize(MAX_FRAME_LEN, b'y');
        bytes.push(b'\n');
        let mut buf = buffer_with(&bytes);

        match decode(&mut buf).next() {
            Some(Err(FrameError::TooLarge { len, .. })) => assert_eq!(len, MAX_FRAME_LEN + 1),
            other => panic!("unexpected: {:?}", other),
        };
    }

    #[test]
    fn test_max_size_frame_decodes() {
        let mut bytes = b"100*1*".to_vec();
        bytes.resize(MAX_FRAME_LEN - 1, b'z');
        bytes.push(b'\n');
        let mut buf = buffer_with(&bytes);

        let msg = decode(&mut buf).next().unwrap().unwrap();
        assert_eq!(msg.payload.len(), MAX_FRAME_LEN - 7);
    }

    #[test]
    fn test_encode_format() {
        let frame = encode(1210630906171, 22, b"This is a message").unwrap();
        assert_eq!(&frame[..], b"1210630906171*22*This is a message\n");

        let frame = encode(1210630906171, 23, b"").unwrap();
        assert_eq!(&frame[..], b"1210630906171*23*\n");
    }

    #[test]
    fn test_encode_rejects_bad_payloads() {
        assert!(matches!(
            encode(1, 1, b"two\nlines"),
            Err(FrameError::Malformed { .. })
        ));
        assert!(matches!(
            encode(1, 1, &vec![b'a'; MAX_FRAME_LEN]),
            Err(FrameError::TooLarge { .. })
        ));
    }

    #[test]
    fn test_round_trip() {
        let before = now_millis();
        let mut buf = Buffer::new(8 * 1024);
        assert!(matches!(
            append_frame(&mut buf, 42, b"round trip").unwrap(),
            Append::Written(_)
        ));

        let msg = decode(&mut buf).next().unwrap().unwrap();
        assert_eq!(msg.sequence, 42);
        assert_eq!(msg.payload_str(), "round trip");
        assert!(msg.sent_timestamp >= before);
        assert!(msg.sent_timestamp <= now_millis());
    }

    #[test]
    fn test_append_frame_when_full() {
        let mut buf = Buffer::new(32);
        assert!(matches!(
            append_frame(&mut buf, 1, b"abc").unwrap(),
            Append::Written(_)
        ));
        let before = buf.len();

        assert_eq!(append_frame(&mut buf, 2, b"abcdef").unwrap(), Append::Full);
        assert_eq!(buf.len(), before);
    }
}
