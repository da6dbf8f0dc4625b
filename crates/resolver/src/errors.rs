//! Error types for the resolution engine.

use pidgate_store::StoreError;
use pidgate_types::{Operation, ValueError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("handle not found: {handle}")]
    NotFound { handle: String },

    #[error("handle already exists: {handle}")]
    AlreadyExists { handle: String },

    #[error("invalid administrative record: {reason}")]
    InvalidAdmin { reason: String },

    #[error("invalid value: {0}")]
    InvalidValue(#[from] ValueError),

    #[error("administrative chain broken for {handle}: {reason}")]
    AdminChainBroken { handle: String, reason: String },

    // Deliberately says nothing beyond the operation name; the shape of the
    // administrative chain must not leak to the caller.
    #[error("permission denied for operation {operation}")]
    PermissionDenied { operation: Operation },

    #[error("store operation timed out; the mutation may or may not have been applied")]
    StoreTimeout,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("internal engine failure: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, ResolveError>;
