//! This module defines the command-line interface for the application using `clap`.
//!
//! It provides a `Cli` struct that represents the parsed command-line
//! arguments, and a `Commands` enum that represents the available
//! subcommands and their options. `chat` is the interactive session;
//! the rest operate on the conversation database directly.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Represents the parsed command-line arguments.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, propagate_version = true, color = clap::ColorChoice::Always)]
pub struct Cli {
    /// The parsed subcommand and its options.
    #[command(subcommand)]
    pub command: Commands,
}

/// Represents the available subcommands and their options.
#[derive(Subcommand, Debug)]
#[command(about, long_about = None, color = clap::ColorChoice::Always)]
pub enum Commands {
    /// Start an interactive chat session.
    #[clap(name = "chat", alias = "c")]
    Chat {
        /// Server address as host:port; overrides the configuration file.
        #[arg(name = "server", short = 's', long = "server")]
        server: Option<String>,

        /// Model to chat with; overrides the configuration file.
        #[arg(name = "model", short = 'm', long = "model")]
        model: Option<String>,
    },

    /// List saved conversations, newest first.
    #[clap(name = "list", alias = "ls")]
    List,

    /// Export a conversation to a JSON file.
    Export {
        /// Conversation id (see `list`).
        id: i32,

        /// Output path; defaults to a stamped file in the export directory.
        path: Option<PathBuf>,
    },

    /// Import a conversation from a JSON export file.
    Import {
        /// Path to a file produced by `export`.
        path: PathBuf,
    },

    /// Delete a conversation and all of its messages.
    Delete {
        /// Conversation id (see `list`).
        id: i32,
    },

    /// Write a default configuration file.
    Init,
}
