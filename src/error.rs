//! Error types for ollie.
//!
//! One `thiserror` enum covers the whole application: configuration
//! problems, server connectivity, missing conversations, and malformed
//! import files, plus transparent wrappers around the library errors that
//! pass straight through (`diesel`, IO, JSON, HTTP).

use thiserror::Error;

/// Main error type for ollie operations.
#[derive(Error, Debug)]
pub enum OllieError {
    /// Configuration-related errors (missing model, bad config file).
    #[error("configuration error: {0}")]
    Config(String),

    /// Model server connectivity errors (listing models, opening a stream).
    #[error("server error: {0}")]
    Server(String),

    /// A conversation id that does not exist in the store.
    #[error("conversation {0} not found")]
    NotFound(i32),

    /// An export file that cannot be deserialized into a conversation.
    #[error("invalid conversation file: {0}")]
    Import(String),

    /// A role string in the database that is neither `user` nor `assistant`.
    #[error("unrecognized message role: {0:?}")]
    Role(String),

    /// Database errors.
    #[error(transparent)]
    Database(#[from] diesel::result::Error),

    /// Database connection errors.
    #[error(transparent)]
    Connection(#[from] diesel::result::ConnectionError),

    /// Filesystem errors (export/import files).
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON serialization errors (export files).
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Convenience result type used throughout the crate.
pub type Result<T> = std::result::Result<T, OllieError>;
