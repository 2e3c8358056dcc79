//! Fixed-capacity byte buffers for connection I/O.
//!
//! Each connection owns one input and one output `Buffer`. The capacity is
//! fixed at construction and never grows: data that cannot fit is the
//! protocol's problem, not the buffer's.
//!
//! ## Layout
//!
//! ```text
//! [ consumed | unread (pending) | spare ]
//! 0        start              end    capacity
//! ```
//!
//! `fill_from` and `drain_into` compact before returning, so after every
//! read or write adjustment the unread region starts at offset 0.

use std::io::{self, Read, Write};

/// Default buffer size (8 KiB).
pub const DEFAULT_BUFFER_SIZE: usize = 8 * 1024;

/// A fixed-size byte window with a readable region and spare capacity.
pub struct Buffer {
    /// Backing storage.
    data: Box<[u8]>,
    /// Offset of the first unread byte.
    start: usize,
    /// Offset one past the last unread byte.
    end: usize,
}

impl Buffer {
    /// Create a buffer with `capacity` bytes of storage.
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity].into_boxed_slice(),
            start: 0,
            end: 0,
        }
    }

    /// Total size of the backing storage.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Number of unread bytes.
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Bytes that can be appended without compacting first.
    pub fn appendable_capacity(&self) -> usize {
        self.data.len() - self.end
    }

    /// True when no byte can be appended even after compaction.
    pub fn is_full(&self) -> bool {
        self.len() == self.capacity()
    }

    /// The unread region.
    pub fn unread_bytes(&self) -> &[u8] {
        &self.data[self.start..self.end]
    }

    /// Mark `n` unread bytes as consumed.
    ///
    /// # Panics
    /// Panics if `n` exceeds the number of unread bytes.
    pub fn consume(&mut self, n: usize) {
        assert!(n <= self.len(), "consume past end of buffer");
        self.start += n;
        if self.start == self.end {
            self.start = 0;
            self.end = 0;
        }
    }

    /// Shift the unread region to offset 0, preserving order.
    pub fn compact(&mut self) {
        if self.start == 0 {
            return;
        }
        self.data.copy_within(self.start..self.end, 0);
        self.end -= self.start;
        self.start = 0;
    }

    /// Append `bytes` if they fit, compacting first if needed.
    ///
    /// Returns `false` and leaves the buffer untouched if they do not fit.
    pub fn append(&mut self, bytes: &[u8]) -> bool {
        if bytes.len() > self.capacity() - self.len() {
            return false;
        }
        if bytes.len() > self.appendable_capacity() {
            self.compact();
        }
        self.data[self.end..self.end + bytes.len()].copy_from_slice(bytes);
        self.end += bytes.len();
        true
    }

    /// Spare capacity for writing directly into the buffer.
    ///
    /// Follow with `commit` for the number of bytes actually written.
    pub fn spare_mut(&mut self) -> &mut [u8] {
        &mut self.data[self.end..]
    }

    /// Make `n` bytes written through `spare_mut` part of the unread region.
    pub fn commit(&mut self, n: usize) {
        assert!(n <= self.appendable_capacity(), "commit past capacity");
        self.end += n;
    }

    /// Drop all unread bytes.
    pub fn clear(&mut self) {
        self.start = 0;
        self.end = 0;
    }

    /// Perform a single read from `reader` into the spare capacity.
    ///
    /// Returns the byte count reported by the reader (0 means EOF). Callers
    /// must check `is_full` first; a full buffer reads zero bytes.
    pub fn fill_from<R: Read>(&mut self, reader: &mut R) -> io::Result<usize> {
        self.compact();
        let n = reader.read(&mut self.data[self.end..])?;
        self.end += n;
        Ok(n)
    }

    /// Perform a single write of the unread region to `writer`.
    ///
    /// Accepted bytes are consumed; the remainder is compacted to the front
    /// and kept for the next call.
    pub fn drain_into<W: Write>(&mut self, writer: &mut W) -> io::Result<usize> {
        if self.is_empty() {
            return Ok(0);
        }
        let n = writer.write(self.unread_bytes())?;
        self.consume(n);
        self.compact();
        Ok(n)
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("capacity", &self.capacity())
            .field("start", &self.start)
            .field("end", &self.end)
            .finish()
    }
}

impl Default for Buffer {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_SIZE)
    }
}
