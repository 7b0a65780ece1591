//! # Conversation Store
//!
//! Manages the lifecycle of support conversations and their append-only
//! message history, persisted to SQLite via Diesel.
//!
//! ## What this module owns
//! - A `ConversationStore` struct wrapping a live connection; the schema
//!   is created on open.
//! - Get-or-create resolution of conversation references.
//! - Atomic appends: a message lands together with the `updated_at`
//!   advance, or not at all. The exchange form writes the user and
//!   assistant messages in one transaction, so a failed turn appends
//!   nothing.
//! - The monotonic lifecycle `new → in_progress → closed`; `closed` is
//!   terminal and rejects every further append with
//!   [`EngineError::ConversationClosed`].
//!
//! Cross-conversation operations take no extra locks; the orchestrator
//! serializes turns per conversation id (see [`crate::chat`]).

use chrono::{Duration as ChronoDuration, NaiveDateTime, Utc};
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use tracing::{debug, warn};

use crate::config::establish_connection;
use crate::error::{EngineError, Result};
use crate::models::{Conversation, ConversationStatus, Message, MessageRole};
use crate::schema::{conversations, messages};

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS conversations (
    id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
    client_name TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'new',
    summary TEXT,
    user_id INTEGER,
    created_at TIMESTAMP NOT NULL,
    updated_at TIMESTAMP NOT NULL
);
CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
    conversation_id INTEGER NOT NULL REFERENCES conversations(id),
    role TEXT NOT NULL,
    content TEXT NOT NULL,
    image_path TEXT,
    created_at TIMESTAMP NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(conversation_id);
"#;

/// Store for conversations and messages over one SQLite connection.
pub struct ConversationStore {
    connection: SqliteConnection,
}

impl ConversationStore {
    /// Open (and if necessary create) the session database at `db_url`.
    pub fn open(db_url: &str) -> Result<Self> {
        let mut connection = establish_connection(db_url)?;
        connection
            .batch_execute(SCHEMA_SQL)
            .map_err(EngineError::Store)?;
        Ok(Self { connection })
    }

    /// Timestamp for the next mutation: strictly after `previous` so
    /// `updated_at` advances even within one clock tick.
    fn next_mutation_stamp(previous: NaiveDateTime) -> NaiveDateTime {
        let now = Utc::now().naive_utc();
        if now > previous {
            now
        } else {
            previous + ChronoDuration::microseconds(1)
        }
    }

    fn fetch(conn: &mut SqliteConnection, conversation_id: i32) -> Result<Conversation> {
        Ok(conversations::table
            .find(conversation_id)
            .first::<Conversation>(conn)?)
    }

    fn reject_closed(conversation: &Conversation) -> Result<()> {
        if conversation.status()? == ConversationStatus::Closed {
            return Err(EngineError::ConversationClosed(
                conversation.id().unwrap_or_default(),
            ));
        }
        Ok(())
    }

    fn insert_message(
        conn: &mut SqliteConnection,
        conversation_id: i32,
        role: MessageRole,
        content: &str,
        image_path: Option<&str>,
        stamp: NaiveDateTime,
    ) -> Result<Message> {
        let row = Message {
            id: None,
            conversation_id,
            role: role.as_str().to_string(),
            content: content.to_string(),
            image_path: image_path.map(str::to_string),
            created_at: stamp,
        };
        Ok(diesel::insert_into(messages::table)
            .values(&row)
            .returning(Message::as_returning())
            .get_result(conn)?)
    }

    fn touch(
        conn: &mut SqliteConnection,
        conversation_id: i32,
        stamp: NaiveDateTime,
    ) -> Result<()> {
        diesel::update(conversations::table.find(conversation_id))
            .set(conversations::updated_at.eq(stamp))
            .execute(conn)?;
        Ok(())
    }

    /// Fetch a conversation by id.
    pub fn get(&mut self, conversation_id: i32) -> Result<Conversation> {
        Self::fetch(&mut self.connection, conversation_id)
    }

    /// Resolve a conversation reference, or start a fresh one.
    ///
    /// A reference resolves only when the row exists and is owned
    /// appropriately (same `user_id`, or unowned). Anything else (absent
    /// reference, unknown id, foreign owner) yields a new conversation
    /// with status `new` and the given default client name.
    pub fn get_or_create(
        &mut self,
        user_id: Option<i32>,
        conversation_ref: Option<i32>,
        default_client_name: &str,
    ) -> Result<Conversation> {
        let now = Utc::now().naive_utc();
        self.connection.transaction::<_, EngineError, _>(|conn| {
            if let Some(ref_id) = conversation_ref {
                let existing: Option<Conversation> = conversations::table
                    .find(ref_id)
                    .first(conn)
                    .optional()?;
                if let Some(conversation) = existing {
                    let owned = match (conversation.user_id, user_id) {
                        (Some(owner), Some(caller)) => owner == caller,
                        (Some(_), None) => false,
                        (None, _) => true,
                    };
                    if owned {
                        return Ok(conversation);
                    }
                    warn!("conversation {ref_id} is owned by another user; starting a new one");
                }
            }

            let fresh = Conversation {
                id: None,
                client_name: default_client_name.to_string(),
                status: ConversationStatus::New.as_str().to_string(),
                summary: None,
                user_id,
                created_at: now,
                updated_at: now,
            };
            Ok(diesel::insert_into(conversations::table)
                .values(&fresh)
                .returning(Conversation::as_returning())
                .get_result(conn)?)
        })
    }

    /// Append one message to an open conversation.
    ///
    /// Atomic: the row insert and the `updated_at` advance commit
    /// together, or the conversation is untouched. Fails with
    /// [`EngineError::ConversationClosed`] on a closed conversation.
    pub fn append_message(
        &mut self,
        conversation_id: i32,
        role: MessageRole,
        content: &str,
        image_path: Option<&str>,
    ) -> Result<Message> {
        self.connection.transaction::<_, EngineError, _>(|conn| {
            let conversation = Self::fetch(conn, conversation_id)?;
            Self::reject_closed(&conversation)?;

            let stamp = Self::next_mutation_stamp(conversation.updated_at);
            let message =
                Self::insert_message(conn, conversation_id, role, content, image_path, stamp)?;
            Self::touch(conn, conversation_id, stamp)?;
            debug!("appended {} message to conversation {conversation_id}", role);
            Ok(message)
        })
    }

    /// Append a user message and the assistant's reply in one transaction.
    ///
    /// Either both messages land, or neither does; a failed turn must not
    /// leave only half of the exchange behind.
    pub fn append_exchange(
        &mut self,
        conversation_id: i32,
        user_content: &str,
        image_path: Option<&str>,
        assistant_content: &str,
    ) -> Result<(Message, Message)> {
        self.connection.transaction::<_, EngineError, _>(|conn| {
            let conversation = Self::fetch(conn, conversation_id)?;
            Self::reject_closed(&conversation)?;

            let stamp = Self::next_mutation_stamp(conversation.updated_at);
            let user_message = Self::insert_message(
                conn,
                conversation_id,
                MessageRole::User,
                user_content,
                image_path,
                stamp,
            )?;
            let assistant_message = Self::insert_message(
                conn,
                conversation_id,
                MessageRole::Assistant,
                assistant_content,
                None,
                stamp,
            )?;
            Self::touch(conn, conversation_id, stamp)?;
            Ok((user_message, assistant_message))
        })
    }

    /// Move a conversation along the lifecycle `new → in_progress → closed`.
    ///
    /// Transitions may only go forward; setting the current status again is
    /// a no-op. A transition into `closed` is terminal.
    pub fn set_status(
        &mut self,
        conversation_id: i32,
        next: ConversationStatus,
    ) -> Result<Conversation> {
        self.connection.transaction::<_, EngineError, _>(|conn| {
            let conversation = Self::fetch(conn, conversation_id)?;
            let current = conversation.status()?;

            if next == current {
                return Ok(conversation);
            }
            if next < current {
                return Err(EngineError::InvalidTransition {
                    from: current.as_str().to_string(),
                    to: next.as_str().to_string(),
                });
            }

            let stamp = Self::next_mutation_stamp(conversation.updated_at);
            Ok(diesel::update(conversations::table.find(conversation_id))
                .set((
                    conversations::status.eq(next.as_str()),
                    conversations::updated_at.eq(stamp),
                ))
                .returning(Conversation::as_returning())
                .get_result(conn)?)
        })
    }

    /// Update the client display name on an open conversation.
    pub fn rename_client(&mut self, conversation_id: i32, name: &str) -> Result<Conversation> {
        self.connection.transaction::<_, EngineError, _>(|conn| {
            let conversation = Self::fetch(conn, conversation_id)?;
            Self::reject_closed(&conversation)?;

            let stamp = Self::next_mutation_stamp(conversation.updated_at);
            Ok(diesel::update(conversations::table.find(conversation_id))
                .set((
                    conversations::client_name.eq(name),
                    conversations::updated_at.eq(stamp),
                ))
                .returning(Conversation::as_returning())
                .get_result(conn)?)
        })
    }

    /// Store the hand-off summary (written as part of closing).
    pub fn set_summary(&mut self, conversation_id: i32, summary: &str) -> Result<()> {
        self.connection.transaction::<_, EngineError, _>(|conn| {
            let conversation = Self::fetch(conn, conversation_id)?;
            let stamp = Self::next_mutation_stamp(conversation.updated_at);
            diesel::update(conversations::table.find(conversation_id))
                .set((
                    conversations::summary.eq(summary),
                    conversations::updated_at.eq(stamp),
                ))
                .execute(conn)?;
            Ok(())
        })
    }

    /// Full message history of a conversation, in append order.
    pub fn history(&mut self, conversation_id: i32) -> Result<Vec<Message>> {
        Ok(messages::table
            .filter(messages::conversation_id.eq(conversation_id))
            .order(messages::id.asc())
            .load(&mut self.connection)?)
    }

    /// Does the conversation hold any real user/assistant content?
    ///
    /// Conversations without substantive messages are deleted rather than
    /// closed.
    pub fn has_substantive_messages(&mut self, conversation_id: i32) -> Result<bool> {
        let count: i64 = messages::table
            .filter(messages::conversation_id.eq(conversation_id))
            .filter(messages::role.eq_any(vec![
                MessageRole::User.as_str(),
                MessageRole::Assistant.as_str(),
            ]))
            .filter(messages::content.ne(""))
            .count()
            .get_result(&mut self.connection)?;
        Ok(count > 0)
    }

    /// Conversations belonging to `user_id`, newest activity first,
    /// optionally filtered by status.
    pub fn list_for_user(
        &mut self,
        user_id: i32,
        status: Option<ConversationStatus>,
    ) -> Result<Vec<Conversation>> {
        let mut query = conversations::table
            .filter(conversations::user_id.eq(user_id))
            .into_boxed();
        if let Some(status) = status {
            query = query.filter(conversations::status.eq(status.as_str()));
        }
        Ok(query
            .order(conversations::updated_at.desc())
            .load(&mut self.connection)?)
    }

    /// Remove a conversation and its messages.
    pub fn delete(&mut self, conversation_id: i32) -> Result<()> {
        self.connection.transaction::<_, EngineError, _>(|conn| {
            diesel::delete(messages::table.filter(messages::conversation_id.eq(conversation_id)))
                .execute(conn)?;
            diesel::delete(conversations::table.find(conversation_id)).execute(conn)?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> (ConversationStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("sessions.db");
        let store = ConversationStore::open(db_path.to_str().unwrap()).unwrap();
        (store, dir)
    }

    #[test]
    fn get_or_create_is_idempotent_for_a_valid_ref() {
        let (mut store, _dir) = test_store();

        let first = store.get_or_create(Some(7), None, "Martin Dupont").unwrap();
        let again = store
            .get_or_create(Some(7), first.id(), "ignored default")
            .unwrap();

        assert_eq!(first.id(), again.id());
        assert_eq!(again.client_name, "Martin Dupont");
        assert_eq!(again.status().unwrap(), ConversationStatus::New);
    }

    #[test]
    fn foreign_owner_ref_does_not_resolve() {
        let (mut store, _dir) = test_store();

        let owned = store.get_or_create(Some(1), None, "Client A").unwrap();
        let other = store
            .get_or_create(Some(2), owned.id(), "Client B")
            .unwrap();

        assert_ne!(owned.id(), other.id());
        assert_eq!(other.client_name, "Client B");
    }

    #[test]
    fn append_advances_updated_at_and_history() {
        let (mut store, _dir) = test_store();
        let conversation = store.get_or_create(None, None, "Client").unwrap();
        let id = conversation.id().unwrap();

        store
            .append_message(id, MessageRole::User, "Salut", None)
            .unwrap();
        let after_first = store.get(id).unwrap();
        assert!(after_first.updated_at > conversation.updated_at);

        store
            .append_message(id, MessageRole::Assistant, "Bonjour", None)
            .unwrap();
        let after_second = store.get(id).unwrap();
        assert!(after_second.updated_at > after_first.updated_at);

        let history = store.history(id).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content, "Salut");
        assert_eq!(history[1].content, "Bonjour");
    }

    #[test]
    fn closed_conversation_rejects_appends_and_history_is_unchanged() {
        let (mut store, _dir) = test_store();
        let conversation = store.get_or_create(None, None, "Client").unwrap();
        let id = conversation.id().unwrap();

        store
            .append_message(id, MessageRole::User, "Salut", None)
            .unwrap();
        store.set_status(id, ConversationStatus::Closed).unwrap();

        let err = store
            .append_message(id, MessageRole::User, "encore là ?", None)
            .unwrap_err();
        assert!(matches!(err, EngineError::ConversationClosed(_)));

        let err = store
            .append_exchange(id, "encore là ?", None, "...")
            .unwrap_err();
        assert!(matches!(err, EngineError::ConversationClosed(_)));

        assert_eq!(store.history(id).unwrap().len(), 1);
    }

    #[test]
    fn append_exchange_writes_both_messages_together() {
        let (mut store, _dir) = test_store();
        let conversation = store.get_or_create(None, None, "Client").unwrap();
        let id = conversation.id().unwrap();

        let (user, assistant) = store
            .append_exchange(id, "Ma porte grince", None, "Essayez de graisser le gond.")
            .unwrap();

        assert_eq!(user.role().unwrap(), MessageRole::User);
        assert_eq!(assistant.role().unwrap(), MessageRole::Assistant);
        assert_eq!(store.history(id).unwrap().len(), 2);
    }

    #[test]
    fn lifecycle_is_monotonic() {
        let (mut store, _dir) = test_store();
        let conversation = store.get_or_create(None, None, "Client").unwrap();
        let id = conversation.id().unwrap();

        store
            .set_status(id, ConversationStatus::InProgress)
            .unwrap();
        let err = store.set_status(id, ConversationStatus::New).unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition { .. }));

        store.set_status(id, ConversationStatus::Closed).unwrap();
        let err = store
            .set_status(id, ConversationStatus::InProgress)
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition { .. }));
    }

    #[test]
    fn rename_and_list_by_status() {
        let (mut store, _dir) = test_store();
        let first = store.get_or_create(Some(9), None, "Anonyme").unwrap();
        let second = store.get_or_create(Some(9), None, "Anonyme").unwrap();

        store
            .rename_client(first.id().unwrap(), "Claire Moreau")
            .unwrap();
        store
            .set_status(second.id().unwrap(), ConversationStatus::Closed)
            .unwrap();

        let open = store
            .list_for_user(9, Some(ConversationStatus::New))
            .unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].client_name, "Claire Moreau");

        let all = store.list_for_user(9, None).unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn delete_removes_conversation_and_messages() {
        let (mut store, _dir) = test_store();
        let conversation = store.get_or_create(None, None, "Client").unwrap();
        let id = conversation.id().unwrap();
        store
            .append_message(id, MessageRole::User, "Salut", None)
            .unwrap();

        assert!(store.has_substantive_messages(id).unwrap());
        store.delete(id).unwrap();

        assert!(store.get(id).is_err());
        assert!(store.history(id).unwrap().is_empty());
    }
}
