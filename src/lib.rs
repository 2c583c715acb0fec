//! # ollie (library root)
//!
//! This crate provides the plumbing for the **ollie** chat CLI:
//! - Streaming client for Ollama-compatible model servers (`api`).
//! - Durable conversation history with JSON export/import (`store`,
//!   `models`, `schema`).
//! - Turn orchestration and session state (`session`).
//! - Display-safe transformation of model output (`sanitize`).
//! - Terminal front end and in-session commands (`repl`).
//! - CLI parsing, configuration, and error types (`commands`, `config`,
//!   `error`).
//!
//! In addition, this module exposes [`config_dir`] for discovering the
//! per-platform configuration directory where `config.yaml` lives.

use directories::ProjectDirs;
use std::path::PathBuf;

pub mod api;
pub mod commands;
pub mod config;
pub mod error;
pub mod models;
pub mod repl;
pub mod sanitize;
pub mod schema;
pub mod session;
pub mod store;

use crate::error::{OllieError, Result};

/// Return the per-platform configuration directory used by ollie.
///
/// This uses [`directories::ProjectDirs`] with the application triple
/// `("com", "ollie", "ollie")`, so you get the right place on each OS
/// (e.g., `~/.config/ollie` on Linux under XDG).
///
/// The directory is **not** created by this function; callers that need it
/// should create it with `fs::create_dir_all`.
///
/// # Errors
/// Returns an error if the platform configuration directory cannot be
/// determined (rare, but possible in heavily sandboxed environments).
pub fn config_dir() -> Result<PathBuf> {
    let proj_dirs = ProjectDirs::from("com", "ollie", "ollie")
        .ok_or_else(|| OllieError::Config("unable to determine config directory".to_string()))?;
    Ok(proj_dirs.config_dir().to_path_buf())
}
