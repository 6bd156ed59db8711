//! Skein SDK - keeping Skein documents in sync over a network
//!
//! This crate layers the sync handshake and a sequencing/resync protocol on
//! top of any broadcast [`Transport`], and ships an in-memory relay for tests
//! and simulations.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use skein_sdk::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn demo() -> skein_sdk::Result<()> {
//! let hub = MemoryHub::new(NetworkConfig::default());
//! let doc = shared(Document::new());
//! let notes = TextDoc::new(doc.clone(), "notes")?;
//!
//! let peer = PeerId::random();
//! let transport = Arc::new(hub.transport(peer.clone()));
//! let sync = SyncManager::new(transport, peer, doc, SyncConfig::default())
//!     .spawn()
//!     .await?;
//!
//! notes.insert(0, "# Meeting Notes\n")?;
//! sync.shutdown().await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Architecture
//!
//! - [`protocol`] - the three-message sync handshake
//! - [`sequencer`] - ordered, exactly-once frame delivery per connection epoch
//! - [`sync`] - the connection driver tying both to a transport
//! - [`network`] - transport abstraction and the in-memory relay
//! - [`document`] - shared document handles
//! - [`error`] - Error types

pub mod document;
pub mod error;
pub mod network;
pub mod protocol;
pub mod sequencer;
pub mod sync;

// Re-exports for convenience
pub use document::{shared, SharedDoc, TextDoc};
pub use error::{Result, SdkError};
pub use network::{
    create_network, MemoryHub, MemoryTransport, NetworkConfig, NetworkError, PeerId, Transport,
    TransportEvent,
};
pub use protocol::{SyncMessage, SyncProtocol, SyncState};
pub use sequencer::{SequencedFrame, Sequencer};
pub use sync::{SyncConfig, SyncConfigBuilder, SyncHandle, SyncManager, REMOTE_ORIGIN};

// Re-export commonly used types from skein-db
pub use skein_db::{Document, Origin, StateVector, TransactionEvent};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::document::{shared, SharedDoc, TextDoc};
    pub use crate::error::SdkError;
    pub use crate::network::{MemoryHub, NetworkConfig, PeerId, Transport};
    pub use crate::sync::{SyncConfig, SyncManager};
    pub use skein_db::Document;
}
