//! # Data model
//!
//! Data structures shared across the store, the streaming client, and the
//! session controller:
//!
//! - [`Role`] / [`ChatMessage`]: the `{role, content}` message shape used on
//!   the wire, in memory, and in exported conversation files.
//! - [`Conversation`] / [`StoredMessage`]: rows mapping to the SQLite schema
//!   via **Diesel** (see `crate::schema`).
//!
//! ## Diesel expectations
//!
//! The `conversations` and `messages` tables are created by
//! [`crate::store::ChatStore::open`]; the row structs derive the usual
//! Diesel traits (`Queryable`, `Insertable`, `Associations`, `Identifiable`,
//! `Selectable`) and use an `Option<i32>` primary key so the same struct
//! works for inserts (`id: None` lets SQLite assign it) and for loads.

use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::OllieError;

/// Who produced a message: the human or the model.
///
/// Serialized in lowercase (`"user"` / `"assistant"`) everywhere the role
/// crosses a boundary: the chat endpoint, the database `role` column, and
/// exported conversation files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// The lowercase wire/database form of the role.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    /// Parse a role stored as text, e.g. from the `messages.role` column.
    ///
    /// # Errors
    /// Returns [`OllieError::Role`] for anything other than `"user"` or
    /// `"assistant"`.
    pub fn parse(role: &str) -> Result<Role, OllieError> {
        match role {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(OllieError::Role(other.to_string())),
        }
    }
}

/// One `{role, content}` exchange message.
///
/// This is the shape sent to the chat endpoint, mirrored in session memory,
/// and written to export files. It carries no ids or timestamps; those
/// belong to [`StoredMessage`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    /// A user-authored message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// A model-authored message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A saved chat thread.
///
/// ### Table
/// - `conversations`
///
/// ### Notes
/// - `id` is optional for `Insertable` convenience; SQLite assigns it on
///   insert and `#[diesel(deserialize_as = i32)]` guarantees it is present
///   on loaded rows.
/// - Rows are never updated after creation; deletion cascades over the
///   conversation's messages in [`crate::store::ChatStore::delete_conversation`].
#[derive(Queryable, Identifiable, Insertable, Debug, Selectable, Clone, PartialEq)]
#[diesel(table_name = crate::schema::conversations)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Conversation {
    /// Auto-increment primary key (set by the DB on insert).
    #[diesel(deserialize_as = i32)]
    pub id: Option<i32>,
    /// Short title derived from the first prompt of the conversation.
    pub title: String,
    /// Model identifier the conversation was held with.
    pub model: String,
    /// Creation instant (UTC), also the sort key for listing.
    pub created_at: NaiveDateTime,
}

impl Conversation {
    /// Convenience accessor for the assigned primary key.
    ///
    /// Returns `Some(id)` once the row has been inserted.
    #[inline]
    pub fn id(&self) -> Option<i32> {
        self.id
    }
}

/// One persisted turn-half within a conversation.
///
/// ### Table
/// - `messages`
///
/// ### Role values
/// - `"user"`: user input
/// - `"assistant"`: completed model output
///
/// ### Notes
/// - Rows are append-only and ordered by `(created_at, id)` on retrieval.
/// - `conversation_id` is not FK-enforced by the engine; the store is
///   deliberately permissive about orphaned rows.
#[derive(Queryable, Associations, Insertable, Debug, Selectable, Clone)]
#[diesel(belongs_to(Conversation))]
#[diesel(table_name = crate::schema::messages)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct StoredMessage {
    /// Auto-increment primary key (set by the DB on insert).
    #[diesel(deserialize_as = i32)]
    pub id: Option<i32>,
    /// The conversation this message belongs to.
    pub conversation_id: i32,
    /// Sender role: `"user"` or `"assistant"`.
    pub role: String,
    /// Raw message text.
    pub content: String,
    /// Creation instant (UTC); message order within a conversation.
    pub created_at: NaiveDateTime,
}

impl StoredMessage {
    /// Convert a stored row into the exchange shape.
    ///
    /// # Errors
    /// Returns [`OllieError::Role`] if the row carries an unknown role.
    pub fn into_chat_message(self) -> Result<ChatMessage, OllieError> {
        Ok(ChatMessage {
            role: Role::parse(&self.role)?,
            content: self.content,
        })
    }
}
