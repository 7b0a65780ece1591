//! Error taxonomy for the conversation engine.
//!
//! Infrastructure failures (provider, I/O, database) and business-rule
//! violations are kept apart: the former may be retried or recovered
//! locally, the latter are always surfaced to the caller. Transient
//! provider failures are represented as [`EngineError::ProviderUnavailable`]
//! and retried with bounded backoff before being returned; everything in
//! [`EngineError::Configuration`] is fatal and never retried.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Missing or invalid credential, model name, or tunable. Fatal.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Upstream provider kept failing after bounded retries (or timed out).
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// An index build was attempted with no usable catalog text.
    #[error("empty corpus: the catalog produced no chunks to index")]
    EmptyCorpus,

    /// A persisted index is unreadable or does not match the configured
    /// embedding dimensionality.
    #[error("corrupt index: {0}")]
    CorruptIndex(String),

    /// Append attempted on a closed conversation.
    #[error("conversation {0} is closed")]
    ConversationClosed(i32),

    /// A single catalog document could not be read. Logged and skipped
    /// during a build; never aborts the build as a whole.
    #[error("unreadable document {path}: {reason}")]
    UnreadableDocument { path: String, reason: String },

    /// A status change that would move the lifecycle backwards.
    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    /// A stored or submitted record failed schema validation
    /// (unknown role, unknown status, empty message content).
    #[error("invalid record: {0}")]
    InvalidRecord(String),

    #[error("store error: {0}")]
    Store(#[from] diesel::result::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
