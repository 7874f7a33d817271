//! Custom error types for Rogue
//!
//! Every fallible operation in the library reports one of a small set of
//! error kinds so callers can tell a missing file from a corrupt one.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Main error type for Rogue operations
#[derive(Error, Debug)]
pub enum RogueError {
    /// Filesystem unavailable or unwritable
    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Key or certificate generation/parsing failure
    #[error("Crypto error while {context}: {reason}")]
    Crypto { context: String, reason: String },

    /// Malformed PEM or malformed session document
    #[error("Format error: {0}")]
    Format(String),

    /// Missing certificate files or session file
    #[error("Not found: {}", .0.display())]
    NotFound(PathBuf),

    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Append attempted on a session that was already closed
    #[error("Session {0} is closed")]
    SessionClosed(String),

    /// Message body could not be drained for capture
    #[error("Failed to read message body: {0}")]
    Body(String),
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {path}")]
    ReadError {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to write configuration file: {path}")]
    WriteError {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Invalid configuration value: {field} - {reason}")]
    ValidationError { field: String, reason: String },

    #[error("Configuration file not found: {0}")]
    NotFound(String),
}

impl RogueError {
    /// Wrap an I/O error, mapping `NotFound` onto the dedicated variant
    pub fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        let path = path.as_ref().to_path_buf();
        if source.kind() == io::ErrorKind::NotFound {
            RogueError::NotFound(path)
        } else {
            RogueError::Io { path, source }
        }
    }

    /// Wrap an I/O error that must stay an I/O error, even for missing paths
    ///
    /// Writes into a directory that vanished are an unwritable destination,
    /// not a missing input.
    pub fn write(path: impl AsRef<Path>, source: io::Error) -> Self {
        RogueError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Create a crypto error with context
    pub fn crypto(context: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        RogueError::Crypto {
            context: context.into(),
            reason: reason.to_string(),
        }
    }

    /// Get a user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            RogueError::Io { path, source } => {
                format!("File system issue at '{}': {}", path.display(), source)
            }
            RogueError::Crypto { .. } => format!("Certificate issue: {}", self.user_hint()),
            RogueError::Format(_) => format!("Malformed input: {}", self.user_hint()),
            RogueError::NotFound(_) => self.user_hint(),
            RogueError::Config(e) => format!("Configuration problem: {}", e.user_hint()),
            RogueError::SessionClosed(name) => format!("Session '{}' is no longer recording", name),
            RogueError::Body(reason) => format!("Body was not captured: {}", reason),
        }
    }
}

/// Trait for providing user-friendly hints
pub trait UserHint {
    fn user_hint(&self) -> String;
}

impl UserHint for RogueError {
    fn user_hint(&self) -> String {
        match self {
            RogueError::NotFound(path) => {
                format!("'{}' does not exist. Run `rogue ca init` or check the session name.", path.display())
            }
            RogueError::Crypto { context, .. } => {
                format!("Failed while {}. Remove the CA files to regenerate them.", context)
            }
            RogueError::Format(reason) => reason.clone(),
            _ => self.to_string(),
        }
    }
}

impl UserHint for ConfigError {
    fn user_hint(&self) -> String {
        match self {
            ConfigError::ReadError { path, .. } => {
                format!("Could not read '{}'. Check if the file exists and you have read permissions.", path)
            }
            ConfigError::WriteError { path, .. } => {
                format!("Could not write '{}'. Check that the directory is writable.", path)
            }
            ConfigError::ParseError(_) => {
                "The configuration file has invalid syntax. Check for TOML formatting errors.".into()
            }
            ConfigError::ValidationError { field, reason } => {
                format!("Invalid value for '{}': {}", field, reason)
            }
            ConfigError::NotFound(path) => {
                format!("Configuration file '{}' not found. Run `rogue config generate` to create one.", path)
            }
        }
    }
}

/// Result alias used across the library
pub type Result<T, E = RogueError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_not_found_maps_to_not_found() {
        let err = RogueError::io("missing.json", io::Error::from(io::ErrorKind::NotFound));
        assert!(matches!(err, RogueError::NotFound(p) if p == Path::new("missing.json")));
    }

    #[test]
    fn test_write_keeps_io_kind() {
        let err = RogueError::write("logs", io::Error::from(io::ErrorKind::NotFound));
        assert!(matches!(err, RogueError::Io { .. }));
    }

    #[test]
    fn test_user_message_mentions_context() {
        let err = RogueError::crypto("generating root key", "entropy exhausted");
        assert!(err.to_string().contains("generating root key"));
        assert!(err.user_message().contains("Remove the CA files"));
    }
}
