//! Byte buffers for streaming parsers and emitted frames
//!
//! `ByteAccumulator` is the read side: parsers append raw input with
//! [`ByteAccumulator::add`] and consume recognized frames with
//! [`ByteAccumulator::consume`]. Consumption only advances a logical
//! offset; the backing allocation is compacted once the dead prefix
//! exceeds one chunk, which bounds memory under streaming input.
//!
//! `Buffer` is the write side: an immutable, cheaply clonable payload
//! handed from parser to packetizer to muxer.

use bytes::{Bytes, BytesMut};

/// Compaction granularity for the accumulator
const CHUNK_SIZE: usize = 128 * 1024;

/// An immutable, reference-counted payload buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Buffer {
    data: Bytes,
}

impl Buffer {
    /// Create a buffer from a vector
    pub fn from_vec(vec: Vec<u8>) -> Self {
        Buffer {
            data: Bytes::from(vec),
        }
    }

    /// Create a buffer from a slice (copies)
    pub fn from_slice(slice: &[u8]) -> Self {
        Buffer {
            data: Bytes::copy_from_slice(slice),
        }
    }

    /// Create an empty buffer
    pub fn empty() -> Self {
        Buffer { data: Bytes::new() }
    }

    /// Get the length of the buffer
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if the buffer is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Get a slice of the buffer data
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }
}

/// Growable byte accumulator with amortized O(1) append and periodic
/// front compaction
#[derive(Debug)]
pub struct ByteAccumulator {
    data: BytesMut,
    /// Logical start of unconsumed data within `data`
    offset: usize,
}

impl ByteAccumulator {
    /// Create an empty accumulator
    pub fn new() -> Self {
        ByteAccumulator {
            data: BytesMut::with_capacity(CHUNK_SIZE),
            offset: 0,
        }
    }

    /// Append bytes to the end of the accumulator
    pub fn add(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Number of unconsumed bytes
    pub fn len(&self) -> usize {
        self.data.len() - self.offset
    }

    /// Check whether all data has been consumed
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// View of the unconsumed bytes
    pub fn as_slice(&self) -> &[u8] {
        &self.data[self.offset..]
    }

    /// Consume `n` bytes from the front, compacting when the dead
    /// prefix exceeds one chunk. Consuming more than is available
    /// clears the accumulator.
    pub fn consume(&mut self, n: usize) {
        self.offset = (self.offset + n).min(self.data.len());
        if self.offset >= CHUNK_SIZE {
            self.trim();
        }
    }

    /// Copy the first `n` unconsumed bytes out as an owned payload
    pub fn peek_buffer(&self, n: usize) -> Buffer {
        Buffer::from_slice(&self.as_slice()[..n.min(self.len())])
    }

    /// Drop the dead prefix immediately
    pub fn trim(&mut self) {
        if self.offset == 0 {
            return;
        }
        let remaining = self.data.split_off(self.offset);
        self.data = remaining;
        self.offset = 0;
    }

    /// Discard everything, consumed or not
    pub fn clear(&mut self) {
        self.data.clear();
        self.offset = 0;
    }
}

impl Default for ByteAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_consume() {
        let mut acc = ByteAccumulator::new();
        acc.add(&[1, 2, 3, 4, 5]);
        assert_eq!(acc.len(), 5);

        acc.consume(2);
        assert_eq!(acc.len(), 3);
        assert_eq!(acc.as_slice(), &[3, 4, 5]);
    }

    #[test]
    fn test_consume_past_end_clears() {
        let mut acc = ByteAccumulator::new();
        acc.add(&[1, 2, 3]);
        acc.consume(10);
        assert!(acc.is_empty());
    }

    #[test]
    fn test_trim_preserves_content() {
        let mut acc = ByteAccumulator::new();
        acc.add(&[0u8; 1000]);
        acc.add(&[7, 8, 9]);
        acc.consume(1000);
        acc.trim();
        assert_eq!(acc.as_slice(), &[7, 8, 9]);

        acc.add(&[10]);
        assert_eq!(acc.as_slice(), &[7, 8, 9, 10]);
    }

    #[test]
    fn test_compaction_bounds_memory() {
        let mut acc = ByteAccumulator::new();
        let block = vec![0u8; CHUNK_SIZE];
        for _ in 0..16 {
            acc.add(&block);
            acc.consume(CHUNK_SIZE);
        }
        assert!(acc.is_empty());
        // The dead prefix never exceeds one chunk after a consume
        assert!(acc.data.len() < 2 * CHUNK_SIZE);
    }

    #[test]
    fn test_peek_buffer() {
        let mut acc = ByteAccumulator::new();
        acc.add(&[1, 2, 3, 4]);
        acc.consume(1);
        let buf = acc.peek_buffer(2);
        assert_eq!(buf.as_slice(), &[2, 3]);
    }
}
