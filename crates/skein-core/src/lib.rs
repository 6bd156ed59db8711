//! # skein-core
//!
//! The replicated operation log behind every Skein document.
//!
//! - [`id`]: `(client, clock)` identifiers
//! - [`state_vector`] / [`delete_set`]: the two join-semilattices exchanged
//!   during sync
//! - [`content`] / [`item`]: operation records and their payloads
//! - [`store`]: per-client item log, shared-type roots and splitting
//! - [`integrate`]: the YATA conflict-resolution algorithm
//! - [`pending`]: records waiting for missing dependencies

pub mod branch;
pub mod content;
pub mod delete_set;
pub mod id;
pub mod integrate;
pub mod item;
pub mod lattice;
pub mod pending;
pub mod state_vector;
pub mod store;

pub use branch::{Branch, BranchId, Branches, TypeKind};
pub use content::{Content, Value};
pub use delete_set::{DeleteSet, IdRange};
pub use id::{ClientId, ID, MAX_CLIENT_ID};
pub use item::{Item, ItemPtr, ItemRecord};
pub use lattice::Lattice;
pub use pending::Pending;
pub use state_vector::StateVector;
pub use store::{BlockStore, ChangeLog, Store};
