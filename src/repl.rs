//! Interactive chat loop and in-session commands.
//!
//! This is the presentation layer: a plain terminal REPL over a
//! [`Session`]. Regular input is sent to the model; lines starting with `/`
//! are session commands (switch server or model, browse/open/delete saved
//! conversations, export/import, start a new conversation).
//!
//! Streaming output is rendered by [`TerminalView`], which repaints the
//! growing partial response followed by the cursor marker and drops the
//! marker once the turn completes. Every failure is reported and contained;
//! the loop keeps running.

use std::{
    io::{Write, stdin, stdout},
    path::{Path, PathBuf},
};

use crossterm::{
    ExecutableCommand,
    style::{Attribute, Color, SetAttribute, SetForegroundColor},
};

use crate::{
    api::OllamaClient,
    config::OllieConfig,
    error::Result,
    models::{ChatMessage, Role},
    session::{CURSOR_MARKER, FAILURE_NOTICE, Session, TurnView},
    store::{ChatStore, default_export_path},
};

/// A parsed in-session command.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplCommand {
    /// Start a new conversation.
    New,
    /// List the models the server offers.
    Models,
    /// Switch to a model by name.
    Model(String),
    /// Point the session at a different server address.
    Server(String),
    /// List saved conversations.
    List,
    /// Load a saved conversation.
    Open(i32),
    /// Delete a saved conversation.
    Delete(i32),
    /// Export the current conversation, optionally to an explicit path.
    Export(Option<PathBuf>),
    /// Import a conversation from a file.
    Import(PathBuf),
    /// Show the command summary.
    Help,
    /// Leave the chat.
    Quit,
    /// Report a parsing problem back to the user.
    Invalid(String),
}

/// Parses user input for slash commands.
///
/// Returns `Some(ReplCommand)` if the input is a command, or `None` if it
/// should be sent to the model as a prompt.
///
/// # Examples
///
/// ```
/// # use ollie::repl::parse_command;
/// assert!(parse_command("/quit").is_some());
/// assert!(parse_command("/model llama3.2:latest").is_some());
/// assert!(parse_command("Hello there!").is_none());
/// ```
pub fn parse_command(input: &str) -> Option<ReplCommand> {
    let input = input.trim();
    if !input.starts_with('/') {
        return None;
    }

    let mut parts = input[1..].splitn(2, ' ');
    let command = parts.next()?.to_lowercase();
    let argument = parts.next().map(|s| s.trim()).filter(|s| !s.is_empty());

    let result = match command.as_str() {
        "new" => ReplCommand::New,
        "models" => ReplCommand::Models,
        "model" => match argument {
            Some(model) => ReplCommand::Model(model.to_string()),
            None => ReplCommand::Invalid("/model requires a model name".to_string()),
        },
        "server" => match argument {
            Some(addr) => ReplCommand::Server(addr.to_string()),
            None => ReplCommand::Invalid("/server requires a host:port address".to_string()),
        },
        "list" => ReplCommand::List,
        "open" => match argument.and_then(|arg| arg.parse().ok()) {
            Some(id) => ReplCommand::Open(id),
            None => ReplCommand::Invalid("/open requires a conversation id".to_string()),
        },
        "delete" => match argument.and_then(|arg| arg.parse().ok()) {
            Some(id) => ReplCommand::Delete(id),
            None => ReplCommand::Invalid("/delete requires a conversation id".to_string()),
        },
        "export" => ReplCommand::Export(argument.map(PathBuf::from)),
        "import" => match argument {
            Some(path) => ReplCommand::Import(PathBuf::from(path)),
            None => ReplCommand::Invalid("/import requires a file path".to_string()),
        },
        "help" | "?" => ReplCommand::Help,
        "quit" | "exit" | "q" => ReplCommand::Quit,
        unknown => ReplCommand::Invalid(format!("unknown command /{unknown}; try /help")),
    };

    Some(result)
}

/// The command summary printed by `/help`.
pub fn help_text() -> &'static str {
    "\
/new                 start a new conversation
/models              list models available on the server
/model <name>        switch model (starts a new conversation)
/server <host:port>  point at a different server
/list                list saved conversations
/open <id>           load a saved conversation
/delete <id>         delete a saved conversation
/export [path]       export the current conversation to JSON
/import <path>       import a conversation from a JSON export
/help                show this help
/quit                leave the chat"
}

/// Streaming renderer for one terminal turn.
///
/// Keeps track of what is already on screen so each snapshot only prints
/// the new suffix, with the cursor marker after it. If a snapshot is not an
/// extension of the previous one (the sanitizer can rewrite earlier text),
/// the whole response is reprinted on a fresh line.
pub struct TerminalView {
    shown: String,
    marker_shown: bool,
}

impl TerminalView {
    pub fn new() -> Self {
        Self {
            shown: String::new(),
            marker_shown: false,
        }
    }

    fn erase_marker(&mut self, out: &mut impl Write) {
        if self.marker_shown {
            let _ = write!(out, "\u{8} \u{8}");
            self.marker_shown = false;
        }
    }
}

impl Default for TerminalView {
    fn default() -> Self {
        Self::new()
    }
}

impl TurnView for TerminalView {
    fn partial(&mut self, text: &str) {
        let body = text.strip_suffix(CURSOR_MARKER).unwrap_or(text);
        let mut out = stdout();
        self.erase_marker(&mut out);
        if let Some(suffix) = body.strip_prefix(self.shown.as_str()) {
            let _ = write!(out, "{suffix}");
        } else {
            let _ = write!(out, "\n{body}");
        }
        let _ = write!(out, "{CURSOR_MARKER}");
        let _ = out.flush();
        self.marker_shown = true;
        self.shown = body.to_string();
    }

    fn completed(&mut self, text: &str) {
        let mut out = stdout();
        self.erase_marker(&mut out);
        if let Some(suffix) = text.strip_prefix(self.shown.as_str()) {
            let _ = write!(out, "{suffix}");
        } else {
            let _ = write!(out, "\n{text}");
        }
        let _ = writeln!(out);
        let _ = out.flush();
        self.shown.clear();
    }

    fn failed(&mut self) {
        let mut out = stdout();
        self.erase_marker(&mut out);
        let _ = out.execute(SetAttribute(Attribute::Reset));
        let _ = out.execute(SetForegroundColor(Color::Red));
        let _ = writeln!(out, "\n{FAILURE_NOTICE}");
        let _ = out.execute(SetForegroundColor(Color::Reset));
        let _ = out.flush();
        self.shown.clear();
    }
}

enum Flow {
    Continue,
    Quit,
}

/// Run the interactive chat loop until the user quits.
///
/// Fatal setup problems (the store cannot be opened) are errors; everything
/// that happens inside the loop is reported and survived.
pub async fn run(config: OllieConfig) -> Result<()> {
    let store = ChatStore::open(&config.db_path)?;
    let mut session = Session::new(store, config.server_addr.clone(), config.model.clone());
    let export_dir = PathBuf::from(&config.export_dir);

    println!("ollie - chatting with {}", session.server_addr());
    println!("type /help for commands\n");
    refresh_models(&mut session).await;

    loop {
        prompt_label()?;
        let mut input = String::new();
        if stdin().read_line(&mut input)? == 0 {
            break;
        }
        let input = input.trim();
        if input.is_empty() {
            continue;
        }

        if let Some(command) = parse_command(input) {
            match handle_command(command, &mut session, &export_dir).await {
                Flow::Continue => continue,
                Flow::Quit => break,
            }
        }

        if session.model().is_none() {
            print_error("no model selected; check the server address and use /models");
            continue;
        }

        let mut out = stdout();
        out.execute(SetForegroundColor(Color::Blue))?;
        out.execute(SetAttribute(Attribute::Bold))?;
        let mut view = TerminalView::new();
        let outcome = session.submit(input, &mut view).await;
        out.execute(SetAttribute(Attribute::Reset))?;
        out.execute(SetForegroundColor(Color::Reset))?;
        if let Err(e) = outcome {
            print_error(&e.to_string());
        }
    }

    Ok(())
}

/// Print the colored `You:` prompt.
fn prompt_label() -> Result<()> {
    let mut out = stdout();
    out.execute(SetForegroundColor(Color::Green))?;
    write!(out, "\nYou: ")?;
    out.execute(SetForegroundColor(Color::Reset))?;
    out.flush()?;
    Ok(())
}

fn print_error(message: &str) {
    let mut out = stdout();
    let _ = out.execute(SetForegroundColor(Color::Red));
    let _ = writeln!(out, "error: {message}");
    let _ = out.execute(SetForegroundColor(Color::Reset));
}

/// Fetch the model listing, auto-selecting the first model when none is
/// selected. A listing failure leaves the selection empty, which blocks
/// sending until the server is reachable again.
async fn refresh_models(session: &mut Session) {
    let models = match OllamaClient::new(session.server_addr()) {
        Ok(client) => client.list_models().await,
        Err(e) => Err(e),
    };

    match models {
        Ok(models) if models.is_empty() => {
            print_error("the server reports no models");
        }
        Ok(models) => {
            if session.model().is_none() {
                session.set_model(&models[0]);
            }
            println!("models: {}", models.join(", "));
            println!("using {}", session.model().unwrap_or_default());
        }
        Err(e) => {
            print_error(&format!("failed to list models: {e}"));
        }
    }
}

/// Replay a loaded conversation's history to the terminal.
fn print_history(messages: &[ChatMessage]) {
    let mut out = stdout();
    for message in messages {
        let (label, color) = match message.role {
            Role::User => ("You:", Color::Green),
            Role::Assistant => ("Assistant:", Color::Blue),
        };
        let _ = out.execute(SetForegroundColor(color));
        let _ = write!(out, "{label} ");
        let _ = out.execute(SetForegroundColor(Color::Reset));
        let _ = writeln!(out, "{}", message.content);
    }
}

async fn handle_command(command: ReplCommand, session: &mut Session, export_dir: &Path) -> Flow {
    match command {
        ReplCommand::New => {
            session.start_new_conversation();
            println!("started a new conversation");
        }
        ReplCommand::Models => {
            refresh_models(session).await;
        }
        ReplCommand::Model(name) => match OllamaClient::new(session.server_addr()) {
            Ok(client) => match client.list_models().await {
                Ok(models) if models.iter().any(|m| m == &name) => {
                    session.set_model(&name);
                    println!("using {name} (new conversation)");
                }
                Ok(_) => print_error(&format!("the server does not offer {name:?}")),
                Err(e) => print_error(&e.to_string()),
            },
            Err(e) => print_error(&e.to_string()),
        },
        ReplCommand::Server(addr) => {
            session.set_server_addr(&addr);
            println!("server set to {addr}");
            refresh_models(session).await;
        }
        ReplCommand::List => match session.store().list_conversations() {
            Ok(conversations) if conversations.is_empty() => {
                println!("no saved conversations");
            }
            Ok(conversations) => {
                for conversation in conversations {
                    println!(
                        "{:>4}  {}  [{}] {}",
                        conversation.id.unwrap_or_default(),
                        conversation.created_at.format("%Y-%m-%d %H:%M:%S"),
                        conversation.model,
                        conversation.title,
                    );
                }
            }
            Err(e) => print_error(&e.to_string()),
        },
        ReplCommand::Open(id) => match session.open_conversation(id) {
            Ok(()) => {
                println!("opened conversation {id} (model {})\n", session.model().unwrap_or_default());
                print_history(session.messages());
            }
            Err(e) => print_error(&e.to_string()),
        },
        ReplCommand::Delete(id) => match session.store().delete_conversation(id) {
            Ok(()) => {
                if session.conversation_id() == Some(id) {
                    session.start_new_conversation();
                }
                println!("deleted conversation {id}");
            }
            Err(e) => print_error(&e.to_string()),
        },
        ReplCommand::Export(path) => match session.conversation_id() {
            Some(id) => {
                let path = match path {
                    Some(path) => Ok(path),
                    None => default_export_path(export_dir, id),
                };
                match path.and_then(|path| {
                    session.store().export_conversation(id, &path).map(|_| path)
                }) {
                    Ok(path) => println!("exported to {}", path.display()),
                    Err(e) => print_error(&e.to_string()),
                }
            }
            None => print_error("no active conversation to export"),
        },
        ReplCommand::Import(path) => match session.store().import_conversation(&path) {
            Ok(id) => println!("imported as conversation {id}; /open {id} to continue it"),
            Err(e) => print_error(&e.to_string()),
        },
        ReplCommand::Help => println!("{}", help_text()),
        ReplCommand::Quit => return Flow::Quit,
        ReplCommand::Invalid(message) => print_error(&message),
    }
    Flow::Continue
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_is_not_a_command() {
        assert_eq!(parse_command("tell me about rust"), None);
        assert_eq!(parse_command(""), None);
    }

    #[test]
    fn test_simple_commands() {
        assert_eq!(parse_command("/new"), Some(ReplCommand::New));
        assert_eq!(parse_command("/models"), Some(ReplCommand::Models));
        assert_eq!(parse_command("/list"), Some(ReplCommand::List));
        assert_eq!(parse_command("/help"), Some(ReplCommand::Help));
        assert_eq!(parse_command("/quit"), Some(ReplCommand::Quit));
        assert_eq!(parse_command("/exit"), Some(ReplCommand::Quit));
    }

    #[test]
    fn test_commands_with_arguments() {
        assert_eq!(
            parse_command("/model llama3.2:latest"),
            Some(ReplCommand::Model("llama3.2:latest".to_string()))
        );
        assert_eq!(
            parse_command("/server otherbox:11434"),
            Some(ReplCommand::Server("otherbox:11434".to_string()))
        );
        assert_eq!(parse_command("/open 3"), Some(ReplCommand::Open(3)));
        assert_eq!(parse_command("/delete 12"), Some(ReplCommand::Delete(12)));
        assert_eq!(
            parse_command("/import backup.json"),
            Some(ReplCommand::Import(PathBuf::from("backup.json")))
        );
    }

    #[test]
    fn test_export_path_is_optional() {
        assert_eq!(parse_command("/export"), Some(ReplCommand::Export(None)));
        assert_eq!(
            parse_command("/export out.json"),
            Some(ReplCommand::Export(Some(PathBuf::from("out.json"))))
        );
    }

    #[test]
    fn test_missing_or_bad_arguments_are_invalid() {
        assert!(matches!(
            parse_command("/model"),
            Some(ReplCommand::Invalid(_))
        ));
        assert!(matches!(
            parse_command("/open abc"),
            Some(ReplCommand::Invalid(_))
        ));
        assert!(matches!(
            parse_command("/bogus"),
            Some(ReplCommand::Invalid(_))
        ));
    }
}
