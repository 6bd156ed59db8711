//! Error types for the document layer.

use skein_codec::CodecError;
use skein_core::TypeKind;
use thiserror::Error;

/// Errors that can occur in document operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DbError {
    #[error("Type mismatch for '{name}': expected {expected}, found {found}")]
    TypeMismatch {
        name: String,
        expected: TypeKind,
        found: TypeKind,
    },

    #[error("Invalid index: {index} (length: {length})")]
    IndexOutOfBounds { index: usize, length: usize },

    #[error("Unsupported update version: {0}")]
    UnsupportedVersion(u8),

    #[error("Unknown content reference: {0}")]
    UnknownContentRef(u8),

    #[error("Unknown value tag: {0}")]
    UnknownValueTag(u8),

    #[error("Item {0} has neither a parent nor a neighbour")]
    MissingParent(skein_core::ID),

    #[error("Malformed update: {0}")]
    MalformedUpdate(&'static str),

    #[error("Transaction was aborted by an earlier failed operation")]
    TransactionAborted,

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
}

pub type Result<T> = std::result::Result<T, DbError>;
