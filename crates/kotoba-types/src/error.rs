//! Error types for the kotoba engine.
//!
//! Provides [`KotobaError`] as the top-level error type. Model-client
//! failures have their own richer taxonomies in `kotoba-llm`; this type
//! covers everything above that layer (configuration, dialog-tree
//! integrity, persistence).

use thiserror::Error;

/// Top-level error type for the kotoba engine.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum KotobaError {
    /// Configuration is malformed or semantically invalid.
    #[error("invalid config: {reason}")]
    ConfigInvalid {
        /// What is wrong with the configuration.
        reason: String,
    },

    /// A dialog tree references a node that does not exist, or has no
    /// root. This is fatal: the tree cannot be navigated.
    #[error("invalid dialog tree '{tree_id}': {reason}")]
    InvalidTree {
        /// The offending tree.
        tree_id: String,
        /// Which integrity rule was violated.
        reason: String,
    },

    /// The requested dialog tree is not registered.
    #[error("unknown dialog tree: {0}")]
    UnknownTree(String),

    /// A conversation identifier failed validation.
    #[error("invalid conversation id: {reason}")]
    InvalidConversationId {
        /// Why the id was rejected.
        reason: String,
    },

    /// An operation exceeded its deadline.
    #[error("operation timed out: {operation}")]
    Timeout {
        /// Human-readable name of the operation that timed out.
        operation: String,
    },

    /// Underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization / deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML deserialization error (configuration, profiles).
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// A convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, KotobaError>;
