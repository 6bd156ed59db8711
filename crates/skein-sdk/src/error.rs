//! Error types for the Skein SDK.

use crate::network::NetworkError;
use skein_codec::CodecError;
use skein_db::DbError;
use thiserror::Error;

/// Error type for SDK operations.
#[derive(Error, Debug)]
pub enum SdkError {
    /// A sync envelope carried a tag this peer does not understand.
    #[error("Unknown sync message type: {0}")]
    UnknownMessageType(u64),

    #[error("Document error: {0}")]
    Db(#[from] DbError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Invalid base64 frame: {0}")]
    Base64(#[from] base64::DecodeError),

    /// Sending while the sequencer has no open connection epoch.
    #[error("Not connected")]
    NotConnected,

    #[error("Sync task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Result type for SDK operations.
pub type Result<T> = std::result::Result<T, SdkError>;
