//! Loading and validation of the application's configuration.
//!
//! The `GuichetConfig` struct holds every knob the engine needs: the
//! OpenAI-compatible endpoint and credential, the chat and embedding model
//! names, the catalog/index/session paths, and the token budgets. It is
//! loaded from a YAML file with [`load_config`].
//!
//! # Examples
//!
//! ```no_run
//! use guichet::config::{GuichetConfig, load_config};
//!
//! let config: GuichetConfig = load_config("/path/to/config.yaml").unwrap();
//! println!("{:?}", config);
//! ```

use diesel::{Connection, SqliteConnection};
use serde::{Deserialize, Serialize};
use std::{fs, thread, time::Duration};
use tracing::warn;

use crate::error::{EngineError, Result};

/// Attempt ceiling for opening the session database.
const DB_CONNECT_ATTEMPTS: u32 = 3;
/// Base delay for the database connection backoff, doubled per attempt.
const DB_CONNECT_BASE_DELAY_MS: u64 = 200;

/// Represents the application's configuration.
///
/// Constructed by loading a YAML configuration file with [`load_config`].
/// Only the endpoint, credential, model, and paths are mandatory; every
/// tunable has a serde default matching the deployment this engine was
/// sized for.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct GuichetConfig {
    /// The API key used to authenticate requests to the provider. Also the
    /// key under which the catalog index is cached and persisted.
    pub api_key: String,

    /// Base URL of the OpenAI-compatible endpoint.
    pub api_base: String,

    /// Chat model used for completions and hand-off summaries.
    pub model: String,

    /// Embedding model used to vectorize catalog chunks and queries.
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    /// Output dimensionality of the embedding model. Fixed per model;
    /// the index and every query must agree on it.
    #[serde(default = "default_embedding_dimensions")]
    pub embedding_dimensions: usize,

    /// Directory of catalog documents (PDF, txt, md).
    pub catalog_dir: String,

    /// Directory where realized indexes are persisted.
    pub index_dir: String,

    // Session database url (SQLite)
    pub session_db_url: String,

    // The context size of the model.
    #[serde(default = "default_context_max_tokens")]
    pub context_max_tokens: u16,

    // Minimum context size reserved for the assistant's reply.
    #[serde(default = "default_assistant_minimum_context_tokens")]
    pub assistant_minimum_context_tokens: i32,

    /// Cap on the assistant's reply length, in tokens.
    #[serde(default = "default_response_max_tokens")]
    pub response_max_tokens: u16,

    /// How many passages to retrieve per query.
    #[serde(default = "default_retrieval_top_k")]
    pub retrieval_top_k: usize,

    /// Chunking window size, in characters.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Overlap between consecutive chunks, in characters.
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,

    /// Attempt ceiling for transient provider failures.
    #[serde(default = "default_provider_max_attempts")]
    pub provider_max_attempts: u32,

    /// Deadline for a single outbound provider call, in seconds.
    #[serde(default = "default_provider_timeout_secs")]
    pub provider_timeout_secs: u64,
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_embedding_dimensions() -> usize {
    1536
}

fn default_context_max_tokens() -> u16 {
    8192
}

fn default_assistant_minimum_context_tokens() -> i32 {
    2048
}

fn default_response_max_tokens() -> u16 {
    500
}

fn default_retrieval_top_k() -> usize {
    4
}

fn default_chunk_size() -> usize {
    1500
}

fn default_chunk_overlap() -> usize {
    200
}

fn default_provider_max_attempts() -> u32 {
    3
}

fn default_provider_timeout_secs() -> u64 {
    30
}

impl GuichetConfig {
    /// Check the fields that would otherwise fail deep inside a request.
    ///
    /// A missing credential or model name is a [`EngineError::Configuration`]
    /// error: fatal, surfaced immediately, never retried.
    pub fn validate(&self) -> Result<()> {
        if self.api_key.trim().is_empty() {
            return Err(EngineError::Configuration(
                "api_key is not set; the provider credential is required".to_string(),
            ));
        }
        if self.model.trim().is_empty() {
            return Err(EngineError::Configuration("model is not set".to_string()));
        }
        if self.embedding_model.trim().is_empty() {
            return Err(EngineError::Configuration(
                "embedding_model is not set".to_string(),
            ));
        }
        if self.embedding_dimensions == 0 {
            return Err(EngineError::Configuration(
                "embedding_dimensions must be greater than zero".to_string(),
            ));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(EngineError::Configuration(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if self.context_budget() == 0 {
            return Err(EngineError::Configuration(format!(
                "context_max_tokens ({}) leaves no room after the assistant reserve ({})",
                self.context_max_tokens, self.assistant_minimum_context_tokens
            )));
        }
        Ok(())
    }

    /// Token budget available to the assembled context
    /// (`context_max_tokens - assistant_minimum_context_tokens`).
    pub fn context_budget(&self) -> usize {
        (i64::from(self.context_max_tokens) - i64::from(self.assistant_minimum_context_tokens))
            .max(0) as usize
    }

    /// Deadline for a single outbound provider call.
    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }
}

/// Loads the application's configuration from a YAML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or the YAML does not
/// deserialize into a [`GuichetConfig`].
pub fn load_config(file: &str) -> Result<GuichetConfig> {
    let content = fs::read_to_string(file)?;
    let config: GuichetConfig = serde_yaml::from_str(&content)?;
    Ok(config)
}

/// Open the session database, retrying with bounded exponential backoff.
///
/// SQLite rarely refuses a connection, but the same discipline applies as
/// for any database bootstrap: a hard attempt ceiling, backoff between
/// attempts, and a fatal [`EngineError::Configuration`] once exhausted.
pub fn establish_connection(db_url: &str) -> Result<SqliteConnection> {
    let mut attempt = 1u32;
    loop {
        match SqliteConnection::establish(db_url) {
            Ok(connection) => return Ok(connection),
            Err(err) if attempt < DB_CONNECT_ATTEMPTS => {
                let delay = Duration::from_millis(DB_CONNECT_BASE_DELAY_MS << (attempt - 1));
                warn!(
                    "session database {} not reachable (attempt {}): {}; retrying in {:?}",
                    db_url, attempt, err, delay
                );
                thread::sleep(delay);
                attempt += 1;
            }
            Err(err) => {
                return Err(EngineError::Configuration(format!(
                    "cannot open session database {db_url}: {err}"
                )));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn minimal_yaml() -> &'static str {
        r#"
api_key: "example_api_key"
api_base: "http://example.com/v1"
model: "example_model"
catalog_dir: "catalog"
index_dir: "index"
session_db_url: "guichet.db"
"#
    }

    #[test]
    fn test_load_config_valid_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "{}", minimal_yaml()).unwrap();

        let config = load_config(temp_file.path().to_str().unwrap());

        assert!(config.is_ok());
        let config = config.unwrap();
        assert_eq!(config.api_key, "example_api_key");
        assert_eq!(config.api_base, "http://example.com/v1");
        assert_eq!(config.model, "example_model");
        assert_eq!(config.session_db_url, "guichet.db");
        // Tunables come from the serde defaults.
        assert_eq!(config.retrieval_top_k, 4);
        assert_eq!(config.chunk_size, 1500);
        assert_eq!(config.chunk_overlap, 200);
        assert_eq!(config.provider_max_attempts, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_config_invalid_file() {
        let config = load_config("non/existent/path");
        assert!(config.is_err());
    }

    #[test]
    fn test_load_config_invalid_format() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, r#"invalid: config: format"#).unwrap();

        let config = load_config(temp_file.path().to_str().unwrap());
        assert!(config.is_err());
    }

    #[test]
    fn test_validate_rejects_missing_credential() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "{}", minimal_yaml().replace("example_api_key", "")).unwrap();

        let config = load_config(temp_file.path().to_str().unwrap()).unwrap();
        let err = config.validate().unwrap_err();
        assert!(matches!(err, EngineError::Configuration(_)));
    }

    #[test]
    fn test_context_budget() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, "{}", minimal_yaml()).unwrap();
        let config = load_config(temp_file.path().to_str().unwrap()).unwrap();

        assert_eq!(config.context_budget(), 8192 - 2048);
    }
}
