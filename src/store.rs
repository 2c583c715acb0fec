//! # Conversation Store
//!
//! Durable record of conversations and their messages, backed by SQLite via
//! Diesel. This module owns every read and write of the history database:
//!
//! - Creating conversations and appending messages (one row per turn-half).
//! - Loading a conversation with its messages in creation order.
//! - Listing conversation metadata, newest first.
//! - Idempotent deletion.
//! - Export to / import from pretty-printed JSON files.
//!
//! ## Connection discipline
//! Connections are acquired per operation via
//! [`crate::config::establish_connection`] and released when the operation
//! returns, so no lock is held across turns. Multi-statement operations
//! (delete, import) run inside a Diesel transaction.
//!
//! ## Referential integrity
//! `add_message` does not verify that the conversation id exists. An id
//! that references nothing inserts an orphaned, unreachable row rather than
//! failing; callers are expected to pass ids they obtained from this store.

use chrono::{Local, Utc};
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::debug;

use crate::{
    config::establish_connection,
    error::{OllieError, Result},
    models::{ChatMessage, Conversation, Role, StoredMessage},
    schema::{conversations, messages},
};

/// A loaded conversation: metadata plus its messages in creation order.
#[derive(Debug, Clone)]
pub struct ConversationRecord {
    pub conversation: Conversation,
    pub messages: Vec<ChatMessage>,
}

/// Serialized shape of an exported conversation file.
///
/// `id` and `created_at` are informational: import regenerates both.
#[derive(Debug, Serialize)]
struct ConversationExport {
    id: i32,
    title: String,
    model: String,
    created_at: chrono::NaiveDateTime,
    messages: Vec<ChatMessage>,
}

/// The fields import actually requires. Anything else in the file
/// (`id`, `created_at`) is ignored.
#[derive(Debug, Deserialize)]
struct ConversationImport {
    title: String,
    model: String,
    messages: Vec<ChatMessage>,
}

/// Handle to the conversation database.
///
/// Holds only the database location; see the module docs for the
/// per-operation connection discipline.
pub struct ChatStore {
    db_url: String,
}

impl ChatStore {
    /// Open the store at `db_path`, creating the schema if needed.
    ///
    /// # Errors
    /// Returns a connection or migration error if the database cannot be
    /// opened or the tables cannot be created.
    pub fn open(db_path: &str) -> Result<Self> {
        let mut conn = establish_connection(db_path)?;
        conn.batch_execute(
            "CREATE TABLE IF NOT EXISTS conversations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title TEXT NOT NULL,
                model TEXT NOT NULL,
                created_at TIMESTAMP NOT NULL
            );
            CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                conversation_id INTEGER NOT NULL,
                role TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TIMESTAMP NOT NULL
            );",
        )?;

        Ok(Self {
            db_url: db_path.to_string(),
        })
    }

    fn connect(&self) -> Result<SqliteConnection> {
        establish_connection(&self.db_url)
    }

    /// Insert a new conversation and return its freshly assigned id.
    pub fn create_conversation(&self, title: &str, model: &str) -> Result<i32> {
        let mut conn = self.connect()?;
        let row = Conversation {
            id: None,
            title: title.to_string(),
            model: model.to_string(),
            created_at: Utc::now().naive_utc(),
        };

        let inserted: Conversation = conn.transaction(|conn| {
            diesel::insert_into(conversations::table)
                .values(&row)
                .returning(Conversation::as_returning())
                .get_result(conn)
        })?;

        debug!("created conversation {:?}", inserted.id);
        Ok(inserted.id.expect("inserted conversation has an id"))
    }

    /// Append one message row to a conversation.
    ///
    /// The conversation id is not validated; see the module docs.
    pub fn add_message(&self, conversation_id: i32, role: Role, content: &str) -> Result<()> {
        let mut conn = self.connect()?;
        let row = StoredMessage {
            id: None,
            conversation_id,
            role: role.as_str().to_string(),
            content: content.to_string(),
            created_at: Utc::now().naive_utc(),
        };

        conn.transaction(|conn| {
            diesel::insert_into(messages::table)
                .values(&row)
                .execute(conn)
        })?;
        Ok(())
    }

    /// Load a conversation and its messages in creation order.
    ///
    /// Returns `Ok(None)` when the id does not exist.
    pub fn get_conversation(&self, id: i32) -> Result<Option<ConversationRecord>> {
        let mut conn = self.connect()?;

        let conversation: Option<Conversation> = conversations::table
            .find(id)
            .first(&mut conn)
            .optional()?;
        let Some(conversation) = conversation else {
            return Ok(None);
        };

        let rows: Vec<StoredMessage> = messages::table
            .filter(messages::conversation_id.eq(id))
            .order((messages::created_at.asc(), messages::id.asc()))
            .load(&mut conn)?;

        let messages = rows
            .into_iter()
            .map(StoredMessage::into_chat_message)
            .collect::<Result<Vec<_>>>()?;

        Ok(Some(ConversationRecord {
            conversation,
            messages,
        }))
    }

    /// All conversations, newest-created first, metadata only.
    pub fn list_conversations(&self) -> Result<Vec<Conversation>> {
        let mut conn = self.connect()?;
        Ok(conversations::table
            .order((
                conversations::created_at.desc(),
                conversations::id.desc(),
            ))
            .load(&mut conn)?)
    }

    /// Remove a conversation and all of its messages.
    ///
    /// Deleting an id that does not exist is a no-op, not an error.
    pub fn delete_conversation(&self, id: i32) -> Result<()> {
        let mut conn = self.connect()?;
        conn.transaction(|conn| {
            diesel::delete(messages::table.filter(messages::conversation_id.eq(id)))
                .execute(conn)?;
            diesel::delete(conversations::table.find(id)).execute(conn)?;
            Ok::<_, diesel::result::Error>(())
        })?;
        Ok(())
    }

    /// Serialize a full conversation to a pretty-printed JSON file.
    ///
    /// # Errors
    /// Returns [`OllieError::NotFound`] when the id does not exist; no file
    /// is written in that case.
    pub fn export_conversation(&self, id: i32, path: &Path) -> Result<()> {
        let record = self
            .get_conversation(id)?
            .ok_or(OllieError::NotFound(id))?;

        let export = ConversationExport {
            id: record.conversation.id.expect("loaded conversation has an id"),
            title: record.conversation.title,
            model: record.conversation.model,
            created_at: record.conversation.created_at,
            messages: record.messages,
        };

        fs::write(path, serde_json::to_string_pretty(&export)?)?;
        debug!("exported conversation {id} to {}", path.display());
        Ok(())
    }

    /// Recreate a conversation from a file produced by
    /// [`export_conversation`], under a new id.
    ///
    /// Creation and message replay run in one transaction, so a mid-import
    /// failure leaves no partial conversation behind.
    ///
    /// # Errors
    /// Returns [`OllieError::Import`] when the file is malformed or missing
    /// `title`, `model`, or `messages`.
    pub fn import_conversation(&self, path: &Path) -> Result<i32> {
        let content = fs::read_to_string(path)?;
        let import: ConversationImport =
            serde_json::from_str(&content).map_err(|e| OllieError::Import(e.to_string()))?;

        let mut conn = self.connect()?;
        let row = Conversation {
            id: None,
            title: import.title,
            model: import.model,
            created_at: Utc::now().naive_utc(),
        };

        let id = conn.transaction(|conn| {
            let inserted: Conversation = diesel::insert_into(conversations::table)
                .values(&row)
                .returning(Conversation::as_returning())
                .get_result(conn)?;
            let id = inserted.id.expect("inserted conversation has an id");

            for message in &import.messages {
                let row = StoredMessage {
                    id: None,
                    conversation_id: id,
                    role: message.role.as_str().to_string(),
                    content: message.content.clone(),
                    created_at: Utc::now().naive_utc(),
                };
                diesel::insert_into(messages::table)
                    .values(&row)
                    .execute(conn)?;
            }
            Ok::<_, diesel::result::Error>(id)
        })?;

        debug!("imported conversation {id} from {}", path.display());
        Ok(id)
    }
}

/// Default export location: `{base_dir}/conversation_{id}_{stamp}.json`.
///
/// The directory is created if missing.
pub fn default_export_path(base_dir: &Path, conversation_id: i32) -> Result<PathBuf> {
    fs::create_dir_all(base_dir)?;
    let stamp = Local::now().format("%Y%m%d_%H%M%S");
    Ok(base_dir.join(format!("conversation_{conversation_id}_{stamp}.json")))
}
