//! # skein-codec
//!
//! Binary primitives shared by every part of the Skein update format.
//!
//! - [`varint`]: base-128 variable-length integers, zig-zag signed integers,
//!   length-prefixed strings and byte arrays.
//! - [`stream`]: column encoders layered on the varint codec (run-length,
//!   integer diff, run-length over diff, optional run-length unsigned
//!   integers and a packed string column).
//!
//! ## Example
//!
//! ```rust
//! use skein_codec::{Decoder, Encoder};
//!
//! let mut encoder = Encoder::new();
//! encoder.write_var_uint(300);
//! encoder.write_var_string("hello");
//! let bytes = encoder.to_bytes();
//!
//! let mut decoder = Decoder::new(&bytes);
//! assert_eq!(decoder.read_var_uint().unwrap(), 300);
//! assert_eq!(decoder.read_var_string().unwrap(), "hello");
//! assert!(!decoder.has_more());
//! ```

pub mod error;
pub mod stream;
pub mod varint;

pub use error::{CodecError, Result};
pub use stream::{
    IntDiffDecoder, IntDiffEncoder, RleDecoder, RleEncoder, RleIntDiffDecoder, RleIntDiffEncoder,
    StreamDecoder, StreamEncoder, StringDecoder, StringEncoder, UintOptRleDecoder,
    UintOptRleEncoder, UINT_OPT_RLE_MAX,
};
pub use varint::{Decoder, Encoder};
