//! Report Generation Module
//!
//! Turns a recorded session document into a human-readable report.

pub mod decode;
pub mod formats;

use std::fs;
use std::path::Path;

use crate::error::{Result, RogueError};
use crate::session::{SessionEntry, SessionStore};

/// Renders persisted sessions as Markdown reports
#[derive(Debug, Clone)]
pub struct SessionExporter {
    store: SessionStore,
}

impl SessionExporter {
    pub fn new(store: SessionStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Recognised entries of a session, in document order
    pub fn entries(&self, name: &str) -> Result<Vec<SessionEntry>> {
        let raw = self.store.load(name)?;
        decode::decode(&raw)
    }

    /// Render a session report in memory
    pub fn render_to_string(&self, name: &str) -> Result<String> {
        let entries = self.entries(name)?;
        Ok(formats::markdown::generate(name, &entries))
    }

    /// Render a session report to `output`, overwriting it
    ///
    /// The report is built completely before the file is touched, so a
    /// failed export leaves no partial output. Returns the number of
    /// sections written.
    pub fn render(&self, name: &str, output: &Path) -> Result<usize> {
        let entries = self.entries(name)?;
        let report = formats::markdown::generate(name, &entries);

        fs::write(output, report).map_err(|e| RogueError::write(output, e))?;

        tracing::info!(
            session = %name,
            sections = entries.len(),
            "Exported report to {}",
            output.display()
        );
        Ok(entries.len())
    }
}
