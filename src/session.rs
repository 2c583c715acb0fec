//! # Session Controller
//!
//! Orchestrates turn-taking between the user, the streaming client, and the
//! conversation store. A [`Session`] owns the transient state of one chat:
//! the current conversation id (none until the first prompt is sent), the
//! in-memory message list mirroring the persisted one, the target server
//! address, and the selected model.
//!
//! ## State machine
//!
//! ```text
//! Idle/AwaitingInput --submit--> Streaming --final snapshot--> Committing
//!        ^                                                        |
//!        '--------------------- always ---------------------------'
//! ```
//!
//! While `Streaming`, every snapshot updates the visible partial response
//! (with a trailing cursor marker to signal "still producing"); nothing
//! partial is persisted. On the final snapshot the assistant message is
//! committed to the store and memory, or, for the failure sentinel, a fixed
//! failure notice is shown and nothing is persisted. `Committing` always
//! returns to `AwaitingInput`, whatever the outcome.
//!
//! Display updates flow through the [`TurnView`] trait so the terminal
//! front end (and tests) can render them however they like.

use futures::StreamExt;
use tracing::debug;

use crate::{
    api::OllamaClient,
    error::{OllieError, Result},
    models::{ChatMessage, Role},
    store::ChatStore,
};

/// Appended to partial responses to indicate the model is still producing.
pub const CURSOR_MARKER: &str = "▌";

/// Shown when a stream fails; the turn persists nothing for the assistant.
pub const FAILURE_NOTICE: &str = "❌ failed to get a response; check the server connection.";

const TITLE_MAX_CHARS: usize = 20;

/// Where the session currently is in its turn cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No active conversation.
    Idle,
    /// A conversation exists; waiting for the next prompt.
    AwaitingInput,
    /// A response stream is being consumed.
    Streaming,
    /// The final snapshot is being reconciled into the store.
    Committing,
}

/// Sink for the display updates of one turn.
pub trait TurnView {
    /// The partial response so far, cursor marker included.
    fn partial(&mut self, text: &str);
    /// The completed response, rendered without the cursor marker.
    fn completed(&mut self, text: &str);
    /// The stream failed; render [`FAILURE_NOTICE`].
    fn failed(&mut self);
}

/// Transient, process-lifetime chat state plus its durable backing store.
pub struct Session {
    state: SessionState,
    server_addr: String,
    model: Option<String>,
    conversation_id: Option<i32>,
    messages: Vec<ChatMessage>,
    store: ChatStore,
}

impl Session {
    /// Create an idle session against `store` and `server_addr`.
    pub fn new(store: ChatStore, server_addr: String, model: Option<String>) -> Self {
        Self {
            state: SessionState::Idle,
            server_addr,
            model,
            conversation_id: None,
            messages: Vec::new(),
            store,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn server_addr(&self) -> &str {
        &self.server_addr
    }

    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    pub fn conversation_id(&self) -> Option<i32> {
        self.conversation_id
    }

    /// The in-memory message list, mirroring the persisted conversation.
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// The durable store backing this session.
    pub fn store(&self) -> &ChatStore {
        &self.store
    }

    /// Point the session at a different server.
    ///
    /// Model names are server-specific, so the selected model is cleared;
    /// the front end re-fetches the listing and selects anew.
    pub fn set_server_addr(&mut self, addr: &str) {
        if self.server_addr != addr {
            self.server_addr = addr.to_string();
            self.model = None;
        }
    }

    /// Select a model. Switching models starts a new conversation.
    pub fn set_model(&mut self, model: &str) {
        if self.model.as_deref() != Some(model) {
            self.model = Some(model.to_string());
            self.start_new_conversation();
        }
    }

    /// Drop the in-memory conversation and return to `Idle`.
    ///
    /// An explicit user-triggered reset, allowed from any state. Persisted
    /// history is untouched.
    pub fn start_new_conversation(&mut self) {
        self.messages.clear();
        self.conversation_id = None;
        self.state = SessionState::Idle;
    }

    /// Load a stored conversation into the session, restoring its model.
    ///
    /// # Errors
    /// Returns [`OllieError::NotFound`] when the id does not exist.
    pub fn open_conversation(&mut self, id: i32) -> Result<()> {
        let record = self
            .store
            .get_conversation(id)?
            .ok_or(OllieError::NotFound(id))?;

        self.messages = record.messages;
        self.model = Some(record.conversation.model);
        self.conversation_id = Some(id);
        self.state = SessionState::AwaitingInput;
        Ok(())
    }

    /// Run one full turn for `prompt`.
    ///
    /// Creates the conversation on the first turn (title derived from the
    /// prompt), persists the user message, streams the response through
    /// `view`, and commits the assistant message once the stream completes.
    /// The state always ends at `AwaitingInput`.
    ///
    /// # Errors
    /// Returns [`OllieError::Config`] when no model is selected, or a store
    /// error if persistence fails. Stream failures are not errors; they
    /// surface through [`TurnView::failed`].
    pub async fn submit(&mut self, prompt: &str, view: &mut dyn TurnView) -> Result<()> {
        let model = self
            .model
            .clone()
            .ok_or_else(|| OllieError::Config("no model selected".to_string()))?;

        self.state = SessionState::Streaming;
        let outcome = self.run_turn(&model, prompt, view).await;
        self.state = SessionState::AwaitingInput;
        outcome
    }

    async fn run_turn(
        &mut self,
        model: &str,
        prompt: &str,
        view: &mut dyn TurnView,
    ) -> Result<()> {
        let client = OllamaClient::new(&self.server_addr)?;

        let conversation_id = match self.conversation_id {
            Some(id) => id,
            None => {
                let title = derive_title(prompt);
                let id = self.store.create_conversation(&title, model)?;
                debug!("started conversation {id} ({title:?})");
                self.conversation_id = Some(id);
                id
            }
        };

        // The request carries the prior history; the client appends the new
        // prompt itself. Snapshot the history before mirroring the prompt.
        let history = self.messages.clone();
        self.store.add_message(conversation_id, Role::User, prompt)?;
        self.messages.push(ChatMessage::user(prompt));

        let mut stream = client.stream_chat(model, &history, prompt).await;

        while let Some(snapshot) = stream.next().await {
            if snapshot.is_final {
                self.state = SessionState::Committing;
                match snapshot.content {
                    Some(text) => {
                        self.store
                            .add_message(conversation_id, Role::Assistant, &text)?;
                        self.messages.push(ChatMessage::assistant(text.clone()));
                        view.completed(&text);
                    }
                    None => view.failed(),
                }
            } else if let Some(text) = snapshot.content {
                view.partial(&format!("{text}{CURSOR_MARKER}"));
            }
        }

        Ok(())
    }
}

/// Derive a conversation title from its first prompt: the first 20
/// characters, trimmed, with `...` appended when the prompt is longer.
pub fn derive_title(prompt: &str) -> String {
    let title: String = prompt.chars().take(TITLE_MAX_CHARS).collect();
    let mut title = title.trim().to_string();
    if prompt.chars().count() > TITLE_MAX_CHARS {
        title.push_str("...");
    }
    title
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ChatStore;
    use httpmock::prelude::*;
    use tempfile::TempDir;

    fn setup() {
        let _ = tracing_subscriber::fmt::try_init();
    }

    fn test_store() -> (ChatStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("test.db");
        (ChatStore::open(db.to_str().unwrap()).unwrap(), dir)
    }

    #[derive(Default)]
    struct RecordingView {
        partials: Vec<String>,
        completed: Option<String>,
        failed: bool,
    }

    impl TurnView for RecordingView {
        fn partial(&mut self, text: &str) {
            self.partials.push(text.to_string());
        }

        fn completed(&mut self, text: &str) {
            self.completed = Some(text.to_string());
        }

        fn failed(&mut self) {
            self.failed = true;
        }
    }

    #[test]
    fn test_title_short_prompt_unchanged() {
        assert_eq!(derive_title("hey ollama"), "hey ollama");
    }

    #[test]
    fn test_title_long_prompt_truncated_with_ellipsis() {
        let prompt = "abcdefghijklmnopqrstuvwxyz1234"; // 30 chars
        assert_eq!(derive_title(prompt), "abcdefghijklmnopqrst...");
    }

    #[test]
    fn test_title_exactly_twenty_chars_unchanged() {
        let prompt = "abcdefghijklmnopqrst";
        assert_eq!(derive_title(prompt), prompt);
    }

    #[test]
    fn test_new_session_is_idle() {
        let (store, _dir) = test_store();
        let session = Session::new(store, "localhost:11434".to_string(), None);
        assert_eq!(session.state(), SessionState::Idle);
        assert!(session.messages().is_empty());
        assert!(session.conversation_id().is_none());
    }

    #[test]
    fn test_switching_model_starts_new_conversation() {
        let (store, _dir) = test_store();
        let mut session = Session::new(store, "localhost:11434".to_string(), None);
        session.set_model("llama3.2");
        assert_eq!(session.model(), Some("llama3.2"));
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[test]
    fn test_changing_server_clears_model() {
        let (store, _dir) = test_store();
        let mut session = Session::new(
            store,
            "localhost:11434".to_string(),
            Some("llama3.2".to_string()),
        );
        session.set_server_addr("otherbox:11434");
        assert!(session.model().is_none());
    }

    #[test]
    fn test_open_missing_conversation_is_not_found() {
        let (store, _dir) = test_store();
        let mut session = Session::new(store, "localhost:11434".to_string(), None);
        assert!(matches!(
            session.open_conversation(5),
            Err(OllieError::NotFound(5))
        ));
    }

    #[tokio::test]
    async fn test_submit_without_model_is_rejected() {
        setup();
        let (store, _dir) = test_store();
        let mut session = Session::new(store, "localhost:11434".to_string(), None);
        let mut view = RecordingView::default();

        let result = session.submit("hi", &mut view).await;
        assert!(matches!(result, Err(OllieError::Config(_))));
    }

    #[tokio::test]
    async fn test_submit_streams_and_commits_turn() {
        setup();
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/chat");
                then.status(200).body(concat!(
                    "{\"message\":{\"content\":\"Hel\"}}\n",
                    "{\"message\":{\"content\":\"lo\"}}\n",
                    "{\"done\":true}\n",
                ));
            })
            .await;

        let (store, _dir) = test_store();
        let mut session = Session::new(
            store,
            server.address().to_string(),
            Some("llama3.2".to_string()),
        );
        let mut view = RecordingView::default();

        session.submit("say hello please", &mut view).await.unwrap();

        // Partial snapshots carry the cursor marker; the final render does not.
        assert_eq!(
            view.partials,
            vec![format!("Hel{CURSOR_MARKER}"), format!("Hello{CURSOR_MARKER}")]
        );
        assert_eq!(view.completed.as_deref(), Some("Hello"));
        assert!(!view.failed);
        assert_eq!(session.state(), SessionState::AwaitingInput);

        // Store and memory mirror each other exactly.
        let id = session.conversation_id().unwrap();
        let record = session.store().get_conversation(id).unwrap().unwrap();
        assert_eq!(record.conversation.title, "say hello please");
        assert_eq!(record.conversation.model, "llama3.2");
        assert_eq!(record.messages, session.messages());
        assert_eq!(record.messages.len(), 2);
        assert_eq!(record.messages[0], ChatMessage::user("say hello please"));
        assert_eq!(record.messages[1], ChatMessage::assistant("Hello"));
    }

    #[tokio::test]
    async fn test_second_turn_reuses_conversation() {
        setup();
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/api/chat");
                then.status(200).body(concat!(
                    "{\"message\":{\"content\":\"ok\"}}\n",
                    "{\"done\":true}\n",
                ));
            })
            .await;

        let (store, _dir) = test_store();
        let mut session = Session::new(
            store,
            server.address().to_string(),
            Some("m".to_string()),
        );
        let mut view = RecordingView::default();

        session.submit("first", &mut view).await.unwrap();
        let first_id = session.conversation_id().unwrap();
        session.submit("second", &mut view).await.unwrap();

        assert_eq!(session.conversation_id(), Some(first_id));
        assert_eq!(session.store().list_conversations().unwrap().len(), 1);
        assert_eq!(session.messages().len(), 4);
    }

    #[tokio::test]
    async fn test_failed_stream_persists_nothing_for_assistant() {
        setup();
        let (store, _dir) = test_store();
        // Nothing listens on discard; the stream yields the failure sentinel.
        let mut session = Session::new(
            store,
            "127.0.0.1:9".to_string(),
            Some("m".to_string()),
        );
        let mut view = RecordingView::default();

        session.submit("hello?", &mut view).await.unwrap();

        assert!(view.failed);
        assert!(view.completed.is_none());
        assert_eq!(session.state(), SessionState::AwaitingInput);

        // The user half of the turn is persisted; the assistant half is not.
        let id = session.conversation_id().unwrap();
        let record = session.store().get_conversation(id).unwrap().unwrap();
        assert_eq!(record.messages, vec![ChatMessage::user("hello?")]);
        assert_eq!(record.messages, session.messages());
    }

    #[tokio::test]
    async fn test_open_conversation_restores_messages_and_model() {
        setup();
        let (store, _dir) = test_store();
        let id = store.create_conversation("older", "qwen2.5").unwrap();
        store.add_message(id, Role::User, "q").unwrap();
        store.add_message(id, Role::Assistant, "a").unwrap();

        let mut session = Session::new(store, "localhost:11434".to_string(), None);
        session.open_conversation(id).unwrap();

        assert_eq!(session.state(), SessionState::AwaitingInput);
        assert_eq!(session.model(), Some("qwen2.5"));
        assert_eq!(session.conversation_id(), Some(id));
        assert_eq!(
            session.messages(),
            &[ChatMessage::user("q"), ChatMessage::assistant("a")]
        );
    }

    #[test]
    fn test_start_new_conversation_resets_from_any_state() {
        let (store, _dir) = test_store();
        let id = store.create_conversation("t", "m").unwrap();
        store.add_message(id, Role::User, "q").unwrap();

        let mut session = Session::new(store, "localhost:11434".to_string(), None);
        session.open_conversation(id).unwrap();
        assert!(!session.messages().is_empty());

        session.start_new_conversation();
        assert_eq!(session.state(), SessionState::Idle);
        assert!(session.messages().is_empty());
        assert!(session.conversation_id().is_none());
    }
}
