//! # Template loading and structure
//!
//! A template is a small YAML document that specifies the static
//! instructions for the assistant:
//!
//! - a `system_prompt` to steer its behavior,
//! - optional `pre_user_message_content` / `post_user_message_content`
//!   strings that are prepended/appended to every user message at runtime.
//!
//! Templates are stored per-user under the application's configuration
//! directory, inside a `templates/` subfolder:
//!
//! ```text
//! <config_dir>/templates/<name>.yaml
//! ```
//!
//! ## Minimal YAML example
//!
//! ```yaml
//! system_prompt: "You are a professional after-sales support assistant."
//! # pre_user_message_content: "Keep it under 3 sentences."
//! # post_user_message_content: "Answer in the client's language."
//! ```

use serde::{Deserialize, Serialize};
use std::fs;

use crate::error::Result;

/// Static instructions applied to every turn.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ChatTemplate {
    /// Global instruction used as the session's system message.
    pub system_prompt: String,

    /// Extra text automatically added **before** each user message at send time.
    pub pre_user_message_content: Option<String>,

    /// Extra text automatically added **after** each user message at send time.
    pub post_user_message_content: Option<String>,
}

impl ChatTemplate {
    /// Apply the optional pre/post decorations to a user message.
    pub fn decorate(&self, message: &str) -> String {
        let mut decorated = message.to_string();
        if let Some(prepend) = &self.pre_user_message_content {
            decorated = format!("{prepend} {decorated}");
        }
        if let Some(append) = &self.post_user_message_content {
            decorated = format!("{decorated} {append}");
        }
        decorated
    }
}

/// The built-in support template used when no named template is configured.
pub fn default_template() -> ChatTemplate {
    ChatTemplate {
        system_prompt: "You are a professional after-sales support assistant. \
                        Ground your answers in the catalog passages provided, \
                        stay courteous, and keep replies concise."
            .to_string(),
        pre_user_message_content: None,
        post_user_message_content: None,
    }
}

/// Load a chat template by name from the user's config directory.
///
/// Resolves `<config_dir>/templates/<name>.yaml`, reads the file, and
/// deserializes into a [`ChatTemplate`].
///
/// ### Errors
/// Returns an error if the config directory cannot be determined, the file
/// does not exist, or the YAML does not deserialize.
pub async fn load_template(name: &str) -> Result<ChatTemplate> {
    let path = format!("templates/{}.yaml", name);
    let config_path = crate::config_dir()?.join(&path);

    tracing::info!("Loading template: {}", config_path.display());

    let content = fs::read_to_string(config_path)?;
    let template: ChatTemplate = serde_yaml::from_str(&content)?;
    Ok(template)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_yaml_round_trip() {
        let yaml = r#"
system_prompt: "You are a helpful support assistant."
pre_user_message_content: "Client says:"
"#;
        let template: ChatTemplate = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(template.system_prompt, "You are a helpful support assistant.");
        assert_eq!(
            template.pre_user_message_content.as_deref(),
            Some("Client says:")
        );
        assert!(template.post_user_message_content.is_none());
    }

    #[test]
    fn test_decorate_wraps_user_message() {
        let template = ChatTemplate {
            system_prompt: "Be helpful".into(),
            pre_user_message_content: Some("Client says:".into()),
            post_user_message_content: Some("(reply briefly)".into()),
        };
        assert_eq!(
            template.decorate("my door squeaks"),
            "Client says: my door squeaks (reply briefly)"
        );
    }

    #[tokio::test]
    async fn test_load_template_missing_file() {
        let template = load_template("non/existent/path").await;
        assert!(template.is_err(), "Expected error for missing template");
    }
}
