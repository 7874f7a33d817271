//! Lookup of persisted session documents

use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use super::SESSION_EXTENSION;
use crate::error::{Result, RogueError};

/// Read-only view over a session directory
#[derive(Debug, Clone)]
pub struct SessionStore {
    dir: PathBuf,
}

impl SessionStore {
    pub fn new(session_dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: session_dir.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Names of all session documents, sorted
    ///
    /// A missing directory yields an empty list.
    pub fn list(&self) -> Result<Vec<String>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(RogueError::io(&self.dir, e)),
        };

        let mut sessions = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| RogueError::io(&self.dir, e))?;
            let is_file = entry
                .file_type()
                .map(|t| t.is_file())
                .unwrap_or(false);
            let path = entry.path();
            let is_session = path.extension().and_then(|e| e.to_str()) == Some(SESSION_EXTENSION);

            if is_file && is_session {
                if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                    sessions.push(name.to_string());
                }
            }
        }

        sessions.sort();
        Ok(sessions)
    }

    /// Raw bytes of the named document
    pub fn load(&self, name: &str) -> Result<Vec<u8>> {
        let path = self.path_of(name)?;
        fs::read(&path).map_err(|e| RogueError::io(&path, e))
    }

    /// Path of the named document
    ///
    /// Names must be plain file names; anything that would leave the
    /// directory is reported as not found.
    pub fn path_of(&self, name: &str) -> Result<PathBuf> {
        let mut components = Path::new(name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(_)), None) => Ok(self.dir.join(name)),
            _ => Err(RogueError::NotFound(self.dir.join(name))),
        }
    }
}
