//! # skein-db
//!
//! Document layer of the Skein CRDT engine.
//!
//! This crate provides:
//! - [`Document`]: a replica of named root types
//! - [`Transaction`]: scoped mutation with change events on commit
//! - [`TextRef`], [`ArrayRef`], [`MapRef`]: shared type handles
//! - [`update`]: the binary update format exchanged between replicas
//!
//! ## Example
//!
//! ```rust
//! use skein_db::Document;
//!
//! let mut alice = Document::with_client_id(1);
//! let text = alice.get_or_insert_text("notes").unwrap();
//! {
//!     let mut txn = alice.transact();
//!     text.insert(&mut txn, 0, "hello").unwrap();
//! }
//!
//! let mut bob = Document::with_client_id(2);
//! let update = alice.encode_state_as_update(&bob.state_vector());
//! bob.apply_update(&update, None).unwrap();
//! assert_eq!(bob.get_or_insert_text("notes").unwrap().get_string(&bob), "hello");
//! ```

pub mod array;
pub mod document;
pub mod error;
pub mod event;
pub mod map;
mod sequence;
pub mod text;
pub mod transaction;
pub mod update;

pub use array::ArrayRef;
pub use document::Document;
pub use error::{DbError, Result};
pub use event::{
    apply_text_delta, Chunk, Delta, EntryChange, Origin, Subscription, TransactionEvent, TypeEvent,
};
pub use map::MapRef;
pub use text::TextRef;
pub use transaction::{ReadTxn, Transaction};
pub use update::{decode_update, encode_update, Update};

pub use skein_core::{ClientId, DeleteSet, Lattice, StateVector, Value, ID};
