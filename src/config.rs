//! This module provides functionality for loading and handling the application's configuration.
//!
//! It defines the `OllieConfig` struct, which holds the configuration
//! parameters, and loaders for the YAML configuration file. Every field has
//! a default, so a missing configuration file is not an error: the server
//! address falls back to the `OLLAMA_HOST` environment override (or
//! `localhost`) combined with the fixed Ollama port, and the database and
//! export locations fall back to paths in the working directory.
//!
//! # Examples
//!
//! Loading the configuration from a file:
//!
//! ```no_run
//! use std::path::Path;
//! use ollie::config::load_config;
//!
//! let config = load_config(Path::new("/path/to/config.yaml")).unwrap();
//! println!("{:?}", config);
//! ```

use diesel::{Connection, SqliteConnection};
use serde::{Deserialize, Serialize};
use std::{env, fs, path::Path};

use crate::error::{OllieError, Result};

/// The fixed port an Ollama server listens on.
pub const DEFAULT_PORT: u16 = 11434;

/// Represents the application's configuration.
///
/// Constructed by deserializing a YAML file via [`load_config`], or from
/// [`Default`] when no file exists. The server address is the only setting
/// that is also mutable at runtime (through the in-session `/server`
/// command); the rest is fixed for the lifetime of the process.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct OllieConfig {
    /// Model server address as `host:port`.
    #[serde(default = "default_server_addr")]
    pub server_addr: String,

    /// Preferred model identifier. When unset, the first model reported by
    /// the server is selected on entering chat mode.
    #[serde(default)]
    pub model: Option<String>,

    /// SQLite database path holding conversation history.
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Directory that exported conversation files are written into.
    #[serde(default = "default_export_dir")]
    pub export_dir: String,
}

impl Default for OllieConfig {
    fn default() -> Self {
        Self {
            server_addr: default_server_addr(),
            model: None,
            db_path: default_db_path(),
            export_dir: default_export_dir(),
        }
    }
}

/// `$OLLAMA_HOST` (default `localhost`) combined with the fixed port.
fn default_server_addr() -> String {
    let host = env::var("OLLAMA_HOST").unwrap_or_else(|_| "localhost".to_string());
    format!("{host}:{DEFAULT_PORT}")
}

fn default_db_path() -> String {
    "chat_history.db".to_string()
}

fn default_export_dir() -> String {
    "exports".to_string()
}

/// Loads the application's configuration from a YAML file.
///
/// # Parameters
/// - `file`: The path to the YAML configuration file.
///
/// # Errors
/// Returns [`OllieError::Io`] when the file cannot be read and
/// [`OllieError::Config`] when the YAML does not parse.
pub fn load_config(file: &Path) -> Result<OllieConfig> {
    let content = fs::read_to_string(file)?;
    let config = serde_yaml::from_str(&content)
        .map_err(|e| OllieError::Config(format!("{}: {e}", file.display())))?;
    Ok(config)
}

/// Loads the configuration file if it exists, falling back to defaults.
pub fn load_or_default(file: &Path) -> Result<OllieConfig> {
    if file.exists() {
        load_config(file)
    } else {
        Ok(OllieConfig::default())
    }
}

/// Open a SQLite connection to `db_url`.
///
/// Connections are deliberately short-lived: the store acquires one per
/// operation and drops it when the operation completes.
pub fn establish_connection(db_url: &str) -> Result<SqliteConnection> {
    Ok(SqliteConnection::establish(db_url)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_config_valid_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(
            temp_file,
            r#"
server_addr: "box:11434"
model: "llama3.2:latest"
db_path: "history.db"
export_dir: "out"
"#
        )
        .unwrap();

        let config = load_config(temp_file.path()).unwrap();
        assert_eq!(config.server_addr, "box:11434");
        assert_eq!(config.model.as_deref(), Some("llama3.2:latest"));
        assert_eq!(config.db_path, "history.db");
        assert_eq!(config.export_dir, "out");
    }

    #[test]
    fn test_partial_file_uses_field_defaults() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, r#"model: "mistral:latest""#).unwrap();

        let config = load_config(temp_file.path()).unwrap();
        assert_eq!(config.model.as_deref(), Some("mistral:latest"));
        assert_eq!(config.db_path, "chat_history.db");
        assert!(config.server_addr.ends_with(":11434"));
    }

    #[test]
    fn test_load_config_missing_file() {
        let config = load_config(Path::new("non/existent/path"));
        assert!(config.is_err());
    }

    #[test]
    fn test_load_config_invalid_format() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, r#"server_addr: [not, a, string, map"#).unwrap();

        let config = load_config(temp_file.path());
        assert!(matches!(config, Err(OllieError::Config(_))));
    }

    #[test]
    fn test_load_or_default_without_file() {
        let config = load_or_default(Path::new("non/existent/path")).unwrap();
        assert!(config.server_addr.ends_with(":11434"));
        assert!(config.model.is_none());
    }
}
