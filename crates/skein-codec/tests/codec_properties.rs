//! Round-trip properties for the varint codec and every column codec.
//!
//! A column is decoded by reading exactly as many values as were written,
//! the way the update decoder does; run-length columns may keep reporting
//! `has_more` after the last value.

use proptest::prelude::*;
use skein_codec::{
    Decoder, Encoder, IntDiffDecoder, IntDiffEncoder, RleDecoder, RleEncoder, RleIntDiffDecoder,
    RleIntDiffEncoder, StreamDecoder, StreamEncoder, StringDecoder, StringEncoder,
    UintOptRleDecoder, UintOptRleEncoder, UINT_OPT_RLE_MAX,
};

/// Sequences with long runs, which is what the column codecs are built for.
fn clustered_u64() -> impl Strategy<Value = Vec<u64>> {
    prop::collection::vec((0u64..6, 1usize..5), 0..40).prop_map(|runs| {
        runs.into_iter()
            .flat_map(|(value, repeat)| std::iter::repeat(value).take(repeat))
            .collect()
    })
}

/// Runs drawn from the whole range a `UintOptRle` column accepts, with the
/// boundaries over-represented.
fn clustered_wide_u64() -> impl Strategy<Value = Vec<u64>> {
    let value = prop_oneof![
        Just(0u64),
        Just(UINT_OPT_RLE_MAX),
        (UINT_OPT_RLE_MAX - 8)..=UINT_OPT_RLE_MAX,
        0..=UINT_OPT_RLE_MAX,
    ];
    prop::collection::vec((value, 1usize..5), 0..40).prop_map(|runs| {
        runs.into_iter()
            .flat_map(|(value, repeat)| std::iter::repeat(value).take(repeat))
            .collect()
    })
}

proptest! {
    #[test]
    fn var_uint_round_trips(values in prop::collection::vec(any::<u64>(), 0..50)) {
        let mut encoder = Encoder::new();
        for v in &values {
            encoder.write_var_uint(*v);
        }
        let bytes = encoder.to_bytes();
        let mut decoder = Decoder::new(&bytes);
        for v in &values {
            prop_assert_eq!(decoder.read_var_uint().unwrap(), *v);
        }
        prop_assert!(!decoder.has_more());
    }

    #[test]
    fn var_int_round_trips(values in prop::collection::vec(any::<i64>(), 0..50)) {
        let mut encoder = Encoder::new();
        for v in &values {
            encoder.write_var_int(*v);
        }
        let bytes = encoder.to_bytes();
        let mut decoder = Decoder::new(&bytes);
        for v in &values {
            prop_assert_eq!(decoder.read_var_int().unwrap(), *v);
        }
    }

    #[test]
    fn strings_and_buffers_round_trip(
        text in ".{0,40}",
        blob in prop::collection::vec(any::<u8>(), 0..64)
    ) {
        let mut encoder = Encoder::new();
        encoder.write_var_string(&text);
        encoder.write_var_buf(&blob);
        let bytes = encoder.to_bytes();
        let mut decoder = Decoder::new(&bytes);
        prop_assert_eq!(decoder.read_var_string().unwrap(), text);
        prop_assert_eq!(decoder.read_var_buf().unwrap(), blob.as_slice());
    }

    #[test]
    fn any_prefix_of_a_payload_is_rejected(
        values in prop::collection::vec(any::<u64>(), 1..10),
        cut in 1usize..8
    ) {
        let mut encoder = Encoder::new();
        encoder.write_var_uint(values.len() as u64);
        for v in &values {
            encoder.write_var_uint(*v);
        }
        let bytes = encoder.to_bytes();
        let truncated = &bytes[..bytes.len().saturating_sub(cut)];

        let mut decoder = Decoder::new(truncated);
        let result = (|| {
            let n = decoder.read_var_uint()?;
            for _ in 0..n {
                decoder.read_var_uint()?;
            }
            Ok::<_, skein_codec::CodecError>(())
        })();
        prop_assert!(result.is_err());
    }

    #[test]
    fn rle_round_trips(values in clustered_u64()) {
        let mut encoder = RleEncoder::new();
        for v in &values {
            encoder.write(*v as u8);
        }
        let bytes = encoder.to_bytes();
        let mut decoder = RleDecoder::new(&bytes);
        for v in &values {
            prop_assert_eq!(decoder.read_next().unwrap(), *v as u8);
        }
    }

    #[test]
    fn int_diff_round_trips(
        start in -1000i64..1000,
        values in prop::collection::vec(any::<i64>(), 0..40)
    ) {
        let mut encoder = IntDiffEncoder::new(start);
        for v in &values {
            encoder.write(*v);
        }
        let bytes = encoder.to_bytes();
        let mut decoder = IntDiffDecoder::new(&bytes, start);
        for v in &values {
            prop_assert_eq!(decoder.read_next().unwrap(), *v);
        }
        prop_assert!(!decoder.has_more());
    }

    #[test]
    fn rle_int_diff_round_trips(values in clustered_u64()) {
        let mut encoder = RleIntDiffEncoder::new(0);
        for v in &values {
            encoder.write(*v as i64);
        }
        let bytes = encoder.to_bytes();
        let mut decoder = RleIntDiffDecoder::new(&bytes, 0);
        for v in &values {
            prop_assert_eq!(decoder.read_next().unwrap(), *v as i64);
        }
    }

    #[test]
    fn uint_opt_rle_round_trips(values in clustered_u64()) {
        let mut encoder = UintOptRleEncoder::new();
        for v in &values {
            encoder.write(*v);
        }
        let bytes = encoder.to_bytes();
        let mut decoder = UintOptRleDecoder::new(&bytes);
        for v in &values {
            prop_assert_eq!(decoder.read_next().unwrap(), *v);
        }
        prop_assert!(!decoder.has_more());
    }

    #[test]
    fn uint_opt_rle_round_trips_full_range(values in clustered_wide_u64()) {
        let mut encoder = UintOptRleEncoder::new();
        for v in &values {
            encoder.write(*v);
        }
        let bytes = encoder.to_bytes();
        let mut decoder = UintOptRleDecoder::new(&bytes);
        for v in &values {
            prop_assert_eq!(decoder.read_next().unwrap(), *v);
        }
        prop_assert!(!decoder.has_more());
    }

    #[test]
    fn string_column_round_trips(values in prop::collection::vec(".{0,6}", 0..20)) {
        let mut encoder = StringEncoder::new();
        for v in &values {
            encoder.write(v.as_str());
        }
        let bytes = encoder.to_bytes();
        let mut decoder = StringDecoder::new(&bytes).unwrap();
        for v in &values {
            prop_assert_eq!(decoder.read_next().unwrap(), v.as_str());
        }
        prop_assert!(!decoder.has_more());
    }
}
