//! Bit-level reading and writing over fixed buffers
//!
//! Both reader and writer use MSB-first (big-endian) bit ordering, the
//! convention of every bitstream handled by this crate.

use crate::error::{Error, Result};

/// Bitstream reader over a fixed byte slice.
///
/// Reads fields of up to 32 bits across byte boundaries and fails with
/// `Error::InsufficientBits` instead of reading past the end.
pub struct BitReader<'a> {
    data: &'a [u8],
    /// Current bit position from the start of `data`
    bit_pos: usize,
}

impl<'a> BitReader<'a> {
    /// Create a new reader over a byte slice
    #[inline]
    pub fn new(data: &'a [u8]) -> Self {
        BitReader { data, bit_pos: 0 }
    }

    /// Number of unread bits
    #[inline]
    pub fn remaining(&self) -> usize {
        self.data.len() * 8 - self.bit_pos
    }

    /// Current bit position
    #[inline]
    pub fn position(&self) -> usize {
        self.bit_pos
    }

    /// Read a single bit
    #[inline]
    pub fn read_bit(&mut self) -> Result<bool> {
        if self.bit_pos >= self.data.len() * 8 {
            return Err(Error::InsufficientBits {
                need: 1,
                have: 0,
            });
        }

        let byte_idx = self.bit_pos / 8;
        let bit_idx = 7 - (self.bit_pos % 8);
        let bit = (self.data[byte_idx] >> bit_idx) & 1;
        self.bit_pos += 1;
        Ok(bit != 0)
    }

    /// Read an `n`-bit unsigned field (n <= 32)
    #[inline]
    pub fn read_bits(&mut self, n: u8) -> Result<u32> {
        if n == 0 {
            return Ok(0);
        }
        if n > 32 {
            return Err(Error::invalid_input("cannot read more than 32 bits at once"));
        }
        if (n as usize) > self.remaining() {
            return Err(Error::InsufficientBits {
                need: n as usize,
                have: self.remaining(),
            });
        }

        let mut result: u32 = 0;
        for _ in 0..n {
            result = (result << 1) | (self.read_bit()? as u32);
        }
        Ok(result)
    }

    /// Peek at the next `n` bits without advancing
    #[inline]
    pub fn peek_bits(&self, n: u8) -> Result<u32> {
        let mut copy = BitReader {
            data: self.data,
            bit_pos: self.bit_pos,
        };
        copy.read_bits(n)
    }

    /// Skip `n` bits
    #[inline]
    pub fn skip_bits(&mut self, n: usize) -> Result<()> {
        if n > self.remaining() {
            return Err(Error::InsufficientBits {
                need: n,
                have: self.remaining(),
            });
        }
        self.bit_pos += n;
        Ok(())
    }

    /// Advance to the next byte boundary
    #[inline]
    pub fn byte_align(&mut self) {
        let rem = self.bit_pos % 8;
        if rem != 0 {
            self.bit_pos += 8 - rem;
        }
    }
}

/// Bitstream writer accumulating into an owned byte vector
pub struct BitWriter {
    data: Vec<u8>,
    /// Bits used in the final, partially filled byte
    bit_pos: u8,
}

impl BitWriter {
    /// Create an empty writer
    pub fn new() -> Self {
        BitWriter {
            data: Vec::new(),
            bit_pos: 0,
        }
    }

    /// Write the low `n` bits of `value`, MSB first
    pub fn write_bits(&mut self, value: u32, n: u8) {
        for i in (0..n).rev() {
            let bit = (value >> i) & 1;
            if self.bit_pos == 0 {
                self.data.push(0);
            }
            let last = self.data.len() - 1;
            self.data[last] |= (bit as u8) << (7 - self.bit_pos);
            self.bit_pos = (self.bit_pos + 1) % 8;
        }
    }

    /// Number of whole or partial bytes written so far
    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    /// Finish, zero-padding the final byte
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

impl Default for BitWriter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_bits_across_bytes() {
        let data = [0b1011_0001, 0b0101_0101];
        let mut br = BitReader::new(&data);
        assert_eq!(br.read_bits(3).unwrap(), 0b101);
        assert_eq!(br.read_bits(7).unwrap(), 0b1000_101);
        assert_eq!(br.remaining(), 6);
    }

    #[test]
    fn test_read_past_end_fails() {
        let data = [0xFF];
        let mut br = BitReader::new(&data);
        br.read_bits(6).unwrap();
        assert!(matches!(
            br.read_bits(4),
            Err(Error::InsufficientBits { need: 4, have: 2 })
        ));
    }

    #[test]
    fn test_peek_does_not_advance() {
        let data = [0xA5];
        let br = BitReader::new(&data);
        assert_eq!(br.peek_bits(4).unwrap(), 0xA);
        assert_eq!(br.position(), 0);
    }

    #[test]
    fn test_byte_align() {
        let data = [0xFF, 0x0F];
        let mut br = BitReader::new(&data);
        br.read_bits(3).unwrap();
        br.byte_align();
        assert_eq!(br.read_bits(8).unwrap(), 0x0F);
    }

    #[test]
    fn test_writer_round_trip() {
        let mut bw = BitWriter::new();
        bw.write_bits(0b10110, 5);
        bw.write_bits(0x2b7, 11);
        let bytes = bw.into_bytes();

        let mut br = BitReader::new(&bytes);
        assert_eq!(br.read_bits(5).unwrap(), 0b10110);
        assert_eq!(br.read_bits(11).unwrap(), 0x2b7);
    }
}
