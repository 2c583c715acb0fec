//! Main module for the ollie CLI application.
//!
//! Handles command parsing, configuration loading, and tracing
//! initialization, then invokes the appropriate functionality based on the
//! provided command-line arguments.
//!
//! # Examples
//!
//! Starting an interactive chat against the default server:
//!
//! ```sh
//! ollie chat
//! ```
//!
//! Exporting a saved conversation:
//!
//! ```sh
//! ollie export 3 backup.json
//! ```

use clap::Parser;
use once_cell::sync::OnceCell;
use std::{error::Error, fs, path::Path};
use tracing::debug;

use ollie::{
    commands::{Cli, Commands},
    config::{self, OllieConfig},
    repl,
    store::{ChatStore, default_export_path},
};

static TRACING: OnceCell<()> = OnceCell::new();

fn main() -> Result<(), Box<dyn Error>> {
    TRACING.get_or_init(|| {
        tracing_subscriber::fmt::init();
    });
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run())
}

/// Main asynchronous function of the ollie CLI application.
///
/// Loads configuration, parses command-line arguments, and executes the
/// requested command.
async fn run() -> Result<(), Box<dyn Error>> {
    let config_path = ollie::config_dir()?.join("config.yaml");
    debug!("loading config from {}", config_path.display());
    let mut config = config::load_or_default(&config_path)?;
    let cli = Cli::parse();

    match cli.command {
        Commands::Chat { server, model } => {
            if let Some(server) = server {
                config.server_addr = server;
            }
            if let Some(model) = model {
                config.model = Some(model);
            }
            repl::run(config).await?;
        }
        Commands::List => {
            let store = ChatStore::open(&config.db_path)?;
            let conversations = store.list_conversations()?;
            if conversations.is_empty() {
                println!("no saved conversations");
            }
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
        Commands::Export { id, path } => {
            let store = ChatStore::open(&config.db_path)?;
            let path = match path {
                Some(path) => path,
                None => default_export_path(Path::new(&config.export_dir), id)?,
            };
            store.export_conversation(id, &path)?;
            println!("exported conversation {id} to {}", path.display());
        }
        Commands::Import { path } => {
            let store = ChatStore::open(&config.db_path)?;
            let id = store.import_conversation(&path)?;
            println!("imported as conversation {id}");
        }
        Commands::Delete { id } => {
            let store = ChatStore::open(&config.db_path)?;
            store.delete_conversation(id)?;
            println!("deleted conversation {id}");
        }
        Commands::Init => init(&config_path)?,
    }

    Ok(())
}

/// Write a default configuration file for editing.
fn init(config_path: &Path) -> Result<(), Box<dyn Error>> {
    let config_dir = ollie::config_dir()?;
    fs::create_dir_all(&config_dir)?;

    let config = OllieConfig::default();
    fs::write(config_path, serde_yaml::to_string(&config)?)?;
    println!("wrote {}", config_path.display());
    Ok(())
}
