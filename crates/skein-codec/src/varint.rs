//! Variable-length integer codec.
//!
//! Unsigned integers are written as little-endian groups of 7 bits; the high
//! bit of every byte is set when another group follows. Signed integers are
//! zig-zag mapped first so the sign lands in the low bit of the first group
//! and small negative numbers stay as compact as small positive ones.
//!
//! ```text
//! 1      -> 01
//! 127    -> 7f
//! 128    -> 80 01
//! 300    -> ac 02
//! -1     -> 01   (zig-zag 1)
//! ```

use crate::error::{CodecError, Result};

/// Maps a signed integer onto an unsigned one with the sign in bit 0.
#[inline]
pub fn zigzag(n: i64) -> u64 {
    ((n << 1) ^ (n >> 63)) as u64
}

/// Inverse of [`zigzag`].
#[inline]
pub fn unzigzag(n: u64) -> i64 {
    ((n >> 1) as i64) ^ -((n & 1) as i64)
}

/// Growable output buffer with varint writers.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Encoder {
    buf: Vec<u8>,
}

impl Encoder {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    /// Number of bytes written so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// Write a single byte.
    pub fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    /// Write raw bytes without a length prefix.
    pub fn write_raw(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Write an unsigned integer as base-128 groups.
    pub fn write_var_uint(&mut self, mut value: u64) {
        while value >= 0x80 {
            self.buf.push((value as u8 & 0x7f) | 0x80);
            value >>= 7;
        }
        self.buf.push(value as u8);
    }

    /// Write a signed integer (zig-zag, then base-128).
    pub fn write_var_int(&mut self, value: i64) {
        self.write_var_uint(zigzag(value));
    }

    /// Write a byte array prefixed by its length.
    pub fn write_var_buf(&mut self, bytes: &[u8]) {
        self.write_var_uint(bytes.len() as u64);
        self.write_raw(bytes);
    }

    /// Write a UTF-8 string prefixed by its byte length.
    pub fn write_var_string(&mut self, value: &str) {
        self.write_var_buf(value.as_bytes());
    }

    /// Write a float as 8 big-endian bytes.
    pub fn write_f64(&mut self, value: f64) {
        self.write_raw(&value.to_be_bytes());
    }

    pub fn to_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Forward-only cursor over a borrowed byte slice.
#[derive(Clone, Debug)]
pub struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Current read offset.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// True while unread bytes remain.
    pub fn has_more(&self) -> bool {
        self.pos < self.buf.len()
    }

    /// The unread tail of the input.
    pub fn remaining(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let byte = *self
            .buf
            .get(self.pos)
            .ok_or(CodecError::TruncatedInput { offset: self.pos })?;
        self.pos += 1;
        Ok(byte)
    }

    /// Read `len` raw bytes.
    pub fn read_raw(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.buf.len())
            .ok_or(CodecError::TruncatedInput { offset: self.pos })?;
        let bytes = &self.buf[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    pub fn read_var_uint(&mut self) -> Result<u64> {
        let start = self.pos;
        let mut value = 0u64;
        let mut shift = 0u32;
        loop {
            let byte = self.read_u8()?;
            let group = (byte & 0x7f) as u64;
            if shift > 63 || (shift == 63 && group > 1) {
                return Err(CodecError::VarintOverflow { offset: start });
            }
            value |= group << shift;
            if byte < 0x80 {
                return Ok(value);
            }
            shift += 7;
        }
    }

    pub fn read_var_int(&mut self) -> Result<i64> {
        Ok(unzigzag(self.read_var_uint()?))
    }

    /// Read a length-prefixed byte array without copying.
    pub fn read_var_buf(&mut self) -> Result<&'a [u8]> {
        let offset = self.pos;
        let len = usize::try_from(self.read_var_uint()?)
            .map_err(|_| CodecError::TruncatedInput { offset })?;
        self.read_raw(len)
    }

    /// Read a length-prefixed string without copying.
    pub fn read_var_str(&mut self) -> Result<&'a str> {
        let offset = self.pos;
        let bytes = self.read_var_buf()?;
        std::str::from_utf8(bytes).map_err(|_| CodecError::InvalidUtf8 { offset })
    }

    pub fn read_var_string(&mut self) -> Result<String> {
        self.read_var_str().map(str::to_owned)
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        let bytes = self.read_raw(8)?;
        let mut array = [0u8; 8];
        array.copy_from_slice(bytes);
        Ok(f64::from_be_bytes(array))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_uint_layouts() {
        let cases: [(u64, &[u8]); 5] = [
            (0, &[0x00]),
            (1, &[0x01]),
            (127, &[0x7f]),
            (128, &[0x80, 0x01]),
            (300, &[0xac, 0x02]),
        ];
        for (value, expected) in cases {
            let mut encoder = Encoder::new();
            encoder.write_var_uint(value);
            assert_eq!(encoder.as_slice(), expected, "value {}", value);
        }
    }

    #[test]
    fn test_zigzag_keeps_small_negatives_compact() {
        assert_eq!(zigzag(0), 0);
        assert_eq!(zigzag(-1), 1);
        assert_eq!(zigzag(1), 2);
        assert_eq!(zigzag(-64), 127);

        let mut encoder = Encoder::new();
        encoder.write_var_int(-64);
        assert_eq!(encoder.len(), 1);
    }

    #[test]
    fn test_extreme_values() {
        let mut encoder = Encoder::new();
        encoder.write_var_uint(u64::MAX);
        encoder.write_var_int(i64::MIN);
        encoder.write_var_int(i64::MAX);
        let bytes = encoder.to_bytes();

        let mut decoder = Decoder::new(&bytes);
        assert_eq!(decoder.read_var_uint().unwrap(), u64::MAX);
        assert_eq!(decoder.read_var_int().unwrap(), i64::MIN);
        assert_eq!(decoder.read_var_int().unwrap(), i64::MAX);
        assert!(!decoder.has_more());
    }

    #[test]
    fn test_truncated_varint() {
        let mut decoder = Decoder::new(&[0x80, 0x80]);
        assert_eq!(
            decoder.read_var_uint(),
            Err(CodecError::TruncatedInput { offset: 2 })
        );
    }

    #[test]
    fn test_overlong_varint_is_rejected() {
        let bytes = [0xff; 11];
        let mut decoder = Decoder::new(&bytes);
        assert_eq!(
            decoder.read_var_uint(),
            Err(CodecError::VarintOverflow { offset: 0 })
        );
    }

    #[test]
    fn test_buffer_length_past_end() {
        let mut encoder = Encoder::new();
        encoder.write_var_uint(10);
        encoder.write_raw(b"abc");
        let bytes = encoder.to_bytes();

        let mut decoder = Decoder::new(&bytes);
        assert!(matches!(
            decoder.read_var_buf(),
            Err(CodecError::TruncatedInput { .. })
        ));
    }

    #[test]
    fn test_invalid_utf8() {
        let mut encoder = Encoder::new();
        encoder.write_var_buf(&[0xff, 0xfe]);
        let bytes = encoder.to_bytes();

        let mut decoder = Decoder::new(&bytes);
        assert_eq!(
            decoder.read_var_string(),
            Err(CodecError::InvalidUtf8 { offset: 0 })
        );
    }

    #[test]
    fn test_mixed_sequence() {
        let mut encoder = Encoder::new();
        encoder.write_u8(7);
        encoder.write_var_string("héllo");
        encoder.write_f64(-2.5);
        encoder.write_var_buf(&[1, 2, 3]);
        let bytes = encoder.to_bytes();

        let mut decoder = Decoder::new(&bytes);
        assert_eq!(decoder.read_u8().unwrap(), 7);
        assert_eq!(decoder.read_var_str().unwrap(), "héllo");
        assert_eq!(decoder.read_f64().unwrap(), -2.5);
        assert_eq!(decoder.read_var_buf().unwrap(), &[1, 2, 3]);
        assert!(decoder.remaining().is_empty());
    }
}
