//! # Guichet (library root)
//!
//! Retrieval-augmented conversation engine for customer support:
//!
//! - Catalog document loading and chunking (`catalog`).
//! - Embedding provider seam and OpenAI-backed implementation
//!   (`embedding`, `provider`).
//! - HNSW vector index with persistence (`vector_index`) and the
//!   per-credential cache that realizes it lazily (`index_cache`).
//! - Append-only conversation store over SQLite (`store`, `models`,
//!   `schema`).
//! - Token-bounded context assembly (`context`) and turn orchestration
//!   (`chat`).
//! - Configuration, templates, errors, and the CLI surface (`config`,
//!   `template`, `error`, `commands`).
//!
//! The flow per turn: the orchestrator asks the cache for the catalog
//! index (built on first use from the documents in `catalog_dir`), the
//! assembler retrieves the best passages and formats prior history under
//! a token budget, the chat model is called once, and both sides of the
//! exchange are appended to the conversation.

use directories::ProjectDirs;

pub mod catalog;
pub mod chat;
pub mod commands;
pub mod config;
pub mod context;
pub mod embedding;
pub mod error;
pub mod index_cache;
pub mod models;
pub mod provider;
pub mod schema;
pub mod store;
pub mod template;
pub mod vector_index;

use error::{EngineError, Result};

/// Return the per-platform configuration directory used by guichet.
///
/// Uses [`directories::ProjectDirs`] so the location follows each OS's
/// conventions (e.g. `~/.config/guichet` on Linux via XDG). The directory
/// is **not** created by this function; callers that need it should create
/// it with `fs::create_dir_all`.
///
/// # Errors
/// Returns an error if the platform configuration directory cannot be
/// determined (rare, but possible in heavily sandboxed environments).
pub fn config_dir() -> Result<std::path::PathBuf> {
    let proj_dirs = ProjectDirs::from("com", "guichet", "guichet").ok_or_else(|| {
        EngineError::Configuration("unable to determine config directory".to_string())
    })?;
    Ok(proj_dirs.config_dir().to_path_buf())
}
