//! Compressing column codecs.
//!
//! Each encoder accumulates one logical column of an update payload and
//! each decoder is a pull-based cursor over the bytes of that column. The
//! run-length variants write a repeat count only once the next different
//! value arrives, so a column that ends in the middle of a run carries no
//! trailing count: its decoder repeats the last value forever.
//!
//! | Codec | Values | Layout |
//! |---|---|---|
//! | [`RleEncoder`] | `u8` | `value`, `count-1`, `value`, ... |
//! | [`IntDiffEncoder`] | `i64` | `varint(v - prev)` per value |
//! | [`RleIntDiffEncoder`] | `i64` | `varint(run - prev_run)`, `count-1`, ... |
//! | [`UintOptRleEncoder`] | `u64` up to `2^63-1` | `v<<1` or `v<<1 | 1`, `count-2` |
//! | [`StringEncoder`] | `&str` | one varstring, then char lengths as `UintOptRle` |

use crate::error::{CodecError, Result};
use crate::varint::{Decoder, Encoder};

/// Write side of a column codec.
pub trait StreamEncoder<T> {
    fn write(&mut self, value: T);

    fn to_bytes(self) -> Vec<u8>;
}

/// Read side of a column codec.
pub trait StreamDecoder<T> {
    /// True while another value can be read.
    ///
    /// Run-length decoders whose input ended mid-run always report `true`.
    fn has_more(&self) -> bool;

    fn read_next(&mut self) -> Result<T>;
}

/// Decodes a run length written as `count - offset`.
fn read_run_length(decoder: &mut Decoder<'_>, offset: u64) -> Result<u64> {
    let count = decoder
        .read_var_uint()?
        .checked_add(offset)
        .ok_or(CodecError::InvalidRunLength)?;
    debug_assert!(count > 0);
    Ok(count)
}

/// Remaining repetitions of the current run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Run {
    Finite(u64),
    Unbounded,
}

impl Run {
    fn is_exhausted(self) -> bool {
        self == Run::Finite(0)
    }

    fn consume(&mut self) {
        if let Run::Finite(count) = self {
            *count -= 1;
        }
    }
}

// ============================================================================
// Run-length encoding of bytes
// ============================================================================

#[derive(Clone, Debug, Default)]
pub struct RleEncoder {
    encoder: Encoder,
    last: Option<u8>,
    count: u64,
}

impl RleEncoder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StreamEncoder<u8> for RleEncoder {
    fn write(&mut self, value: u8) {
        if self.last == Some(value) {
            self.count += 1;
            return;
        }
        if self.count > 0 {
            self.encoder.write_var_uint(self.count - 1);
        }
        self.count = 1;
        self.encoder.write_u8(value);
        self.last = Some(value);
    }

    fn to_bytes(self) -> Vec<u8> {
        self.encoder.to_bytes()
    }
}

#[derive(Clone, Debug)]
pub struct RleDecoder<'a> {
    decoder: Decoder<'a>,
    last: u8,
    run: Run,
}

impl<'a> RleDecoder<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self {
            decoder: Decoder::new(bytes),
            last: 0,
            run: Run::Finite(0),
        }
    }
}

impl StreamDecoder<u8> for RleDecoder<'_> {
    fn has_more(&self) -> bool {
        !self.run.is_exhausted() || self.decoder.has_more()
    }

    fn read_next(&mut self) -> Result<u8> {
        if self.run.is_exhausted() {
            self.last = self.decoder.read_u8()?;
            self.run = if self.decoder.has_more() {
                Run::Finite(read_run_length(&mut self.decoder, 1)?)
            } else {
                Run::Unbounded
            };
        }
        self.run.consume();
        Ok(self.last)
    }
}

// ============================================================================
// Integer diff
// ============================================================================

#[derive(Clone, Debug, Default)]
pub struct IntDiffEncoder {
    encoder: Encoder,
    last: i64,
}

impl IntDiffEncoder {
    /// Create an encoder whose first value is written relative to `start`.
    pub fn new(start: i64) -> Self {
        Self {
            encoder: Encoder::new(),
            last: start,
        }
    }
}

impl StreamEncoder<i64> for IntDiffEncoder {
    fn write(&mut self, value: i64) {
        self.encoder.write_var_int(value.wrapping_sub(self.last));
        self.last = value;
    }

    fn to_bytes(self) -> Vec<u8> {
        self.encoder.to_bytes()
    }
}

#[derive(Clone, Debug)]
pub struct IntDiffDecoder<'a> {
    decoder: Decoder<'a>,
    last: i64,
}

impl<'a> IntDiffDecoder<'a> {
    pub fn new(bytes: &'a [u8], start: i64) -> Self {
        Self {
            decoder: Decoder::new(bytes),
            last: start,
        }
    }
}

impl StreamDecoder<i64> for IntDiffDecoder<'_> {
    fn has_more(&self) -> bool {
        self.decoder.has_more()
    }

    fn read_next(&mut self) -> Result<i64> {
        self.last = self.last.wrapping_add(self.decoder.read_var_int()?);
        Ok(self.last)
    }
}

// ============================================================================
// Run-length over integer diff
// ============================================================================

/// Run-length encoding whose run heads are stored as diffs.
///
/// `[1, 1, 1, 2, 3, 4, 5, 6]` from start `0` is written as diff `1`,
/// count `2` (three ones), then diff `1` with count `0` for each of the
/// following values; the final run carries no count.
#[derive(Clone, Debug, Default)]
pub struct RleIntDiffEncoder {
    encoder: Encoder,
    last: i64,
    count: u64,
}

impl RleIntDiffEncoder {
    pub fn new(start: i64) -> Self {
        Self {
            encoder: Encoder::new(),
            last: start,
            count: 0,
        }
    }
}

impl StreamEncoder<i64> for RleIntDiffEncoder {
    fn write(&mut self, value: i64) {
        if self.count > 0 && self.last == value {
            self.count += 1;
            return;
        }
        if self.count > 0 {
            self.encoder.write_var_uint(self.count - 1);
        }
        self.count = 1;
        self.encoder.write_var_int(value.wrapping_sub(self.last));
        self.last = value;
    }

    fn to_bytes(self) -> Vec<u8> {
        self.encoder.to_bytes()
    }
}

#[derive(Clone, Debug)]
pub struct RleIntDiffDecoder<'a> {
    decoder: Decoder<'a>,
    last: i64,
    run: Run,
}

impl<'a> RleIntDiffDecoder<'a> {
    pub fn new(bytes: &'a [u8], start: i64) -> Self {
        Self {
            decoder: Decoder::new(bytes),
            last: start,
            run: Run::Finite(0),
        }
    }
}

impl StreamDecoder<i64> for RleIntDiffDecoder<'_> {
    fn has_more(&self) -> bool {
        !self.run.is_exhausted() || self.decoder.has_more()
    }

    fn read_next(&mut self) -> Result<i64> {
        if self.run.is_exhausted() {
            self.last = self.last.wrapping_add(self.decoder.read_var_int()?);
            self.run = if self.decoder.has_more() {
                Run::Finite(read_run_length(&mut self.decoder, 1)?)
            } else {
                Run::Unbounded
            };
        }
        self.run.consume();
        Ok(self.last)
    }
}

// ============================================================================
// Optional run-length unsigned integers
// ============================================================================

/// Largest value a [`UintOptRleEncoder`] can carry; bit 0 of the encoded
/// varint is taken by the run flag.
pub const UINT_OPT_RLE_MAX: u64 = u64::MAX >> 1;

/// Run-length encoding for unsigned integers that only pays for a count when
/// a value actually repeats. Bit 0 of the written value flags a run, so
/// values are limited to [`UINT_OPT_RLE_MAX`].
#[derive(Clone, Debug, Default)]
pub struct UintOptRleEncoder {
    encoder: Encoder,
    last: u64,
    count: u64,
}

impl UintOptRleEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    fn flush(&mut self) {
        match self.count {
            0 => {}
            1 => self.encoder.write_var_uint(self.last << 1),
            count => {
                self.encoder.write_var_uint((self.last << 1) | 1);
                self.encoder.write_var_uint(count - 2);
            }
        }
    }
}

impl StreamEncoder<u64> for UintOptRleEncoder {
    fn write(&mut self, value: u64) {
        debug_assert!(
            value <= UINT_OPT_RLE_MAX,
            "{value} does not fit a UintOptRle column"
        );
        if self.count > 0 && self.last == value {
            self.count += 1;
            return;
        }
        self.flush();
        self.last = value;
        self.count = 1;
    }

    fn to_bytes(mut self) -> Vec<u8> {
        self.flush();
        self.encoder.to_bytes()
    }
}

#[derive(Clone, Debug)]
pub struct UintOptRleDecoder<'a> {
    decoder: Decoder<'a>,
    last: u64,
    count: u64,
}

impl<'a> UintOptRleDecoder<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self {
            decoder: Decoder::new(bytes),
            last: 0,
            count: 0,
        }
    }
}

impl StreamDecoder<u64> for UintOptRleDecoder<'_> {
    fn has_more(&self) -> bool {
        self.count > 0 || self.decoder.has_more()
    }

    fn read_next(&mut self) -> Result<u64> {
        if self.count == 0 {
            let raw = self.decoder.read_var_uint()?;
            self.last = raw >> 1;
            self.count = if raw & 1 == 1 {
                read_run_length(&mut self.decoder, 2)?
            } else {
                1
            };
        }
        self.count -= 1;
        Ok(self.last)
    }
}

// ============================================================================
// Packed strings
// ============================================================================

/// Packs many short strings into a single varstring plus a length column.
#[derive(Clone, Debug, Default)]
pub struct StringEncoder {
    text: String,
    lens: UintOptRleEncoder,
}

impl StringEncoder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StreamEncoder<&str> for StringEncoder {
    fn write(&mut self, value: &str) {
        self.text.push_str(value);
        self.lens.write(value.chars().count() as u64);
    }

    fn to_bytes(self) -> Vec<u8> {
        let mut encoder = Encoder::with_capacity(self.text.len() + 8);
        encoder.write_var_string(&self.text);
        encoder.write_raw(&self.lens.to_bytes());
        encoder.to_bytes()
    }
}

#[derive(Clone, Debug)]
pub struct StringDecoder<'a> {
    text: &'a str,
    pos: usize,
    lens: UintOptRleDecoder<'a>,
}

impl<'a> StringDecoder<'a> {
    pub fn new(bytes: &'a [u8]) -> Result<Self> {
        let mut decoder = Decoder::new(bytes);
        let text = decoder.read_var_str()?;
        Ok(Self {
            text,
            pos: 0,
            lens: UintOptRleDecoder::new(decoder.remaining()),
        })
    }

    /// An empty column, used when a payload carries no strings at all.
    pub fn empty() -> Self {
        Self {
            text: "",
            pos: 0,
            lens: UintOptRleDecoder::new(&[]),
        }
    }
}

impl<'a> StreamDecoder<&'a str> for StringDecoder<'a> {
    fn has_more(&self) -> bool {
        self.lens.has_more()
    }

    fn read_next(&mut self) -> Result<&'a str> {
        let chars = self.lens.read_next()?;
        let rest = &self.text[self.pos..];
        let mut end = 0;
        let mut taken = 0u64;
        for (offset, ch) in rest.char_indices() {
            if taken == chars {
                break;
            }
            end = offset + ch.len_utf8();
            taken += 1;
        }
        if taken < chars {
            return Err(CodecError::TruncatedInput { offset: self.pos });
        }
        self.pos += end;
        Ok(&rest[..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain<T, D: StreamDecoder<T>>(decoder: &mut D, n: usize) -> Vec<T> {
        (0..n).map(|_| decoder.read_next().unwrap()).collect()
    }

    #[test]
    fn test_rle_omits_trailing_count() {
        let mut encoder = RleEncoder::new();
        for v in [5, 5, 5, 9] {
            encoder.write(v);
        }
        let bytes = encoder.to_bytes();
        // 5, count-1 = 2, 9 (no count)
        assert_eq!(bytes, vec![5, 2, 9]);

        let mut decoder = RleDecoder::new(&bytes);
        assert_eq!(drain(&mut decoder, 4), vec![5, 5, 5, 9]);
        // mid-run at end of stream: repeats forever
        assert!(decoder.has_more());
        assert_eq!(decoder.read_next().unwrap(), 9);
    }

    #[test]
    fn test_rle_int_diff_layout() {
        let mut encoder = RleIntDiffEncoder::new(0);
        for v in [1, 1, 1, 2, 3, 4, 5, 6] {
            encoder.write(v);
        }
        let bytes = encoder.to_bytes();
        assert_eq!(
            bytes,
            vec![0x02, 0x02, 0x02, 0x00, 0x02, 0x00, 0x02, 0x00, 0x02, 0x00, 0x02]
        );

        let mut decoder = RleIntDiffDecoder::new(&bytes, 0);
        assert_eq!(drain(&mut decoder, 8), vec![1, 1, 1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_int_diff_from_start() {
        let mut encoder = IntDiffEncoder::new(100);
        for v in [101, 102, 90] {
            encoder.write(v);
        }
        let bytes = encoder.to_bytes();
        // +1, +1, -12
        assert_eq!(bytes, vec![0x02, 0x02, 0x17]);

        let mut decoder = IntDiffDecoder::new(&bytes, 100);
        assert_eq!(drain(&mut decoder, 3), vec![101, 102, 90]);
        assert!(!decoder.has_more());
    }

    #[test]
    fn test_uint_opt_rle_largest_value() {
        let mut encoder = UintOptRleEncoder::new();
        for v in [UINT_OPT_RLE_MAX, UINT_OPT_RLE_MAX, 7, UINT_OPT_RLE_MAX] {
            encoder.write(v);
        }
        let bytes = encoder.to_bytes();
        let mut decoder = UintOptRleDecoder::new(&bytes);
        assert_eq!(
            drain(&mut decoder, 4),
            vec![UINT_OPT_RLE_MAX, UINT_OPT_RLE_MAX, 7, UINT_OPT_RLE_MAX]
        );
        assert!(!decoder.has_more());
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "does not fit a UintOptRle column")]
    fn test_uint_opt_rle_rejects_top_bit() {
        let mut encoder = UintOptRleEncoder::new();
        encoder.write((1 << 63) + 5);
    }

    #[test]
    fn test_uint_opt_rle_single_values_have_no_count() {
        let mut encoder = UintOptRleEncoder::new();
        for v in [3, 4, 4, 4, 0] {
            encoder.write(v);
        }
        let bytes = encoder.to_bytes();
        // 3 -> 6; run of three 4s -> 9, count-2 = 1; 0 -> 0
        assert_eq!(bytes, vec![6, 9, 1, 0]);

        let mut decoder = UintOptRleDecoder::new(&bytes);
        assert_eq!(drain(&mut decoder, 5), vec![3, 4, 4, 4, 0]);
        assert!(!decoder.has_more());
        assert!(decoder.read_next().is_err());
    }

    #[test]
    fn test_string_packing() {
        let mut encoder = StringEncoder::new();
        for s in ["ab", "", "ü€", "x"] {
            encoder.write(s);
        }
        let bytes = encoder.to_bytes();

        let mut decoder = StringDecoder::new(&bytes).unwrap();
        assert_eq!(drain(&mut decoder, 4), vec!["ab", "", "ü€", "x"]);
        assert!(!decoder.has_more());
    }

    #[test]
    fn test_string_lengths_past_text() {
        let mut lens = UintOptRleEncoder::new();
        lens.write(10);
        let mut encoder = Encoder::new();
        encoder.write_var_string("abc");
        encoder.write_raw(&lens.to_bytes());
        let bytes = encoder.to_bytes();

        let mut decoder = StringDecoder::new(&bytes).unwrap();
        assert!(matches!(
            decoder.read_next(),
            Err(CodecError::TruncatedInput { .. })
        ));
    }

    #[test]
    fn test_huge_run_length_is_rejected() {
        let mut encoder = Encoder::new();
        encoder.write_var_uint(3);
        encoder.write_var_uint(u64::MAX);
        let bytes = encoder.to_bytes();

        let mut decoder = UintOptRleDecoder::new(&bytes);
        assert_eq!(decoder.read_next(), Err(CodecError::InvalidRunLength));
    }
}
