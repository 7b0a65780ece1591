//! # Database models
//!
//! Data structures that map to the project's SQLite schema via **Diesel**,
//! plus the validated enums layered on top of the stored strings.
//!
//! - [`Conversation`]: a support thread with a client name, lifecycle
//!   status, optional hand-off summary, and timestamps.
//! - [`Message`]: one turn (system/user/assistant) within a conversation,
//!   optionally carrying an image reference.
//!
//! History is append-only: messages are never updated or deleted while a
//! conversation is active, and a `closed` conversation accepts no further
//! appends. Both invariants are enforced by [`crate::store::ConversationStore`].
//!
//! ## Diesel expectations
//!
//! This module assumes the `conversations` and `messages` tables exist (see
//! `crate::schema`); the store creates them on open. Each struct derives
//! the appropriate Diesel traits and is annotated with
//! `#[diesel(table_name = ...)]` and `#[diesel(belongs_to(...))]` where
//! needed.

use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{EngineError, Result};

/// Sender of a [`Message`]. Stored lowercase in the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl MessageRole {
    /// The database representation (`"user"`, `"assistant"`, `"system"`).
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::System => "system",
        }
    }

    /// The label used when rendering history (`"User"`, `"Assistant"`,
    /// `"System"`).
    pub fn label(&self) -> &'static str {
        match self {
            MessageRole::User => "User",
            MessageRole::Assistant => "Assistant",
            MessageRole::System => "System",
        }
    }

    /// Parse a stored role string, rejecting anything outside the schema.
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "user" => Ok(MessageRole::User),
            "assistant" => Ok(MessageRole::Assistant),
            "system" => Ok(MessageRole::System),
            other => Err(EngineError::InvalidRecord(format!(
                "unknown message role: {other}"
            ))),
        }
    }
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a [`Conversation`].
///
/// The variant order is the lifecycle order: `new < in_progress < closed`.
/// Transitions may only move forward, and `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConversationStatus {
    New,
    InProgress,
    Closed,
}

impl ConversationStatus {
    /// The database representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationStatus::New => "new",
            ConversationStatus::InProgress => "in_progress",
            ConversationStatus::Closed => "closed",
        }
    }

    /// Parse a stored status string, rejecting anything outside the schema.
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "new" => Ok(ConversationStatus::New),
            "in_progress" => Ok(ConversationStatus::InProgress),
            "closed" => Ok(ConversationStatus::Closed),
            other => Err(EngineError::InvalidRecord(format!(
                "unknown conversation status: {other}"
            ))),
        }
    }
}

impl fmt::Display for ConversationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A support conversation with one client.
///
/// ### Table
/// - `conversations`
#[derive(Queryable, Identifiable, Insertable, Debug, Selectable, Clone)]
#[diesel(table_name = crate::schema::conversations)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Conversation {
    /// Auto-increment primary key (set by the DB on insert).
    #[diesel(deserialize_as = i32)]
    pub id: Option<i32>,
    /// Display name of the client this thread belongs to.
    pub client_name: String,
    /// Lifecycle status string; see [`ConversationStatus`].
    pub status: String,
    /// Hand-off summary written when the conversation is closed.
    pub summary: Option<String>,
    /// Owning user account, when the conversation is not anonymous.
    pub user_id: Option<i32>,
    pub created_at: NaiveDateTime,
    /// Advances monotonically with every mutation.
    pub updated_at: NaiveDateTime,
}

impl Conversation {
    /// Convenience accessor for the assigned primary key.
    ///
    /// Returns `Some(id)` once the row has been inserted.
    #[inline]
    pub fn id(&self) -> Option<i32> {
        self.id
    }

    /// The validated lifecycle status.
    pub fn status(&self) -> Result<ConversationStatus> {
        ConversationStatus::parse(&self.status)
    }
}

/// One turn in a conversation.
///
/// ### Table
/// - `messages`
///
/// ### Notes
/// - `image_path` carries the stored location of an uploaded photo when the
///   turn originated from an image post.
/// - Rows are immutable once inserted.
#[derive(Queryable, Associations, Insertable, Debug, Selectable, Clone)]
#[diesel(belongs_to(Conversation))]
#[diesel(table_name = crate::schema::messages)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Message {
    /// Auto-increment primary key (set by the DB on insert).
    #[diesel(deserialize_as = i32)]
    pub id: Option<i32>,
    /// Foreign key to the owning [`Conversation`].
    pub conversation_id: i32,
    /// Sender role: `"system"`, `"user"`, or `"assistant"`.
    pub role: String,
    /// Raw message text.
    pub content: String,
    /// Optional reference to an uploaded image.
    pub image_path: Option<String>,
    pub created_at: NaiveDateTime,
}

impl Message {
    /// The validated sender role.
    pub fn role(&self) -> Result<MessageRole> {
        MessageRole::parse(&self.role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_round_trips_through_storage_form() {
        for role in [MessageRole::User, MessageRole::Assistant, MessageRole::System] {
            assert_eq!(MessageRole::parse(role.as_str()).unwrap(), role);
        }
        assert!(MessageRole::parse("operator").is_err());
    }

    #[test]
    fn role_labels() {
        assert_eq!(MessageRole::User.label(), "User");
        assert_eq!(MessageRole::Assistant.label(), "Assistant");
        assert_eq!(MessageRole::System.label(), "System");
    }

    #[test]
    fn status_order_matches_lifecycle() {
        assert!(ConversationStatus::New < ConversationStatus::InProgress);
        assert!(ConversationStatus::InProgress < ConversationStatus::Closed);
        assert!(ConversationStatus::parse("abandoned").is_err());
    }
}
