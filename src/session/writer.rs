//! Append-only session document writer

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::Local;
use parking_lot::Mutex;

use super::SessionEntry;
use crate::error::{Result, RogueError};

/// File extension of session documents
pub const SESSION_EXTENSION: &str = "json";

const DOCUMENT_OPEN: &[u8] = b"[\n";
const ENTRY_SEPARATOR: &[u8] = b",\n";
const DOCUMENT_CLOSE: &[u8] = b"\n]\n";

/// Numbered suffixes tried after the plain name is taken
const MAX_NAME_SUFFIX: u32 = 1000;

/// Writer for the session document of a single proxy run
///
/// One instance is shared (behind an `Arc`) by every hook of the run. The
/// document stays a valid JSON array only once [`close`](Self::close) has
/// written the closing bracket.
pub struct SessionLogWriter {
    /// Generated file name
    name: String,

    /// Full path of the document
    path: PathBuf,

    /// Open file plus separator bookkeeping; `file` is `None` once closed
    state: Mutex<WriterState>,
}

struct WriterState {
    file: Option<File>,
    first_entry: bool,
    entries: usize,
}

impl SessionLogWriter {
    /// Create a new session document in `session_dir`
    ///
    /// The directory is created if needed. The file is named
    /// `session_YYYYMMDD_HHMMSS.json` after the local time, or
    /// `session_YYYYMMDD_HHMMSS_N.json` when that name is taken. Files are
    /// created exclusively, so an existing document is never truncated.
    pub fn open(session_dir: impl AsRef<Path>) -> Result<Self> {
        let dir = session_dir.as_ref();
        fs::create_dir_all(dir).map_err(|e| RogueError::write(dir, e))?;

        let stamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
        let (name, path, mut file) = create_document(dir, &stamp)?;

        file.write_all(DOCUMENT_OPEN)
            .map_err(|e| RogueError::write(&path, e))?;

        tracing::info!(session = %name, "Recording session to {}", path.display());

        Ok(Self {
            name,
            path,
            state: Mutex::new(WriterState {
                file: Some(file),
                first_entry: true,
                entries: 0,
            }),
        })
    }

    /// Append one entry
    ///
    /// The separator decision and the write happen under one lock, so
    /// concurrent callers never interleave bytes or both skip the separator.
    /// A failed write may leave a partial entry behind; the document is then
    /// no longer valid JSON, and later entries still get their separator.
    pub fn append(&self, entry: &SessionEntry) -> Result<()> {
        let encoded = serde_json::to_vec_pretty(entry).map_err(|e| {
            RogueError::Format(format!("failed to encode {} entry: {}", entry.kind(), e))
        })?;

        let mut guard = self.state.lock();
        let state = &mut *guard;
        let file = state
            .file
            .as_mut()
            .ok_or_else(|| RogueError::SessionClosed(self.name.clone()))?;

        write_entry(file, &mut state.first_entry, &encoded)
            .map_err(|e| RogueError::write(&self.path, e))?;

        state.entries += 1;
        Ok(())
    }

    /// Write the closing bracket and release the file
    ///
    /// Closing twice is a no-op.
    pub fn close(&self) -> Result<()> {
        let mut state = self.state.lock();
        let Some(mut file) = state.file.take() else {
            return Ok(());
        };

        file.write_all(DOCUMENT_CLOSE)
            .and_then(|_| file.flush())
            .map_err(|e| RogueError::write(&self.path, e))?;

        tracing::info!(
            session = %self.name,
            entries = state.entries,
            "Closed session log"
        );
        Ok(())
    }

    /// Generated file name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Full path of the document
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of entries written so far
    pub fn entry_count(&self) -> usize {
        self.state.lock().entries
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().file.is_none()
    }
}

impl Drop for SessionLogWriter {
    fn drop(&mut self) {
        if self.state.get_mut().file.is_some() {
            tracing::warn!(
                session = %self.name,
                "Session log dropped without close; document is left unterminated"
            );
        }
    }
}

impl std::fmt::Debug for SessionLogWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionLogWriter")
            .field("name", &self.name)
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// Create the first free `session_<stamp>[_N].json` in `dir`
fn create_document(dir: &Path, stamp: &str) -> Result<(String, PathBuf, File)> {
    for suffix in 0..=MAX_NAME_SUFFIX {
        let name = match suffix {
            0 => format!("session_{}.{}", stamp, SESSION_EXTENSION),
            n => format!("session_{}_{}.{}", stamp, n, SESSION_EXTENSION),
        };
        let path = dir.join(&name);

        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((name, path, file)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                tracing::debug!("Session name {} taken", name);
            }
            Err(e) => return Err(RogueError::write(&path, e)),
        }
    }

    Err(RogueError::write(
        dir,
        io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("no free session name for {}", stamp),
        ),
    ))
}

/// Write one entry, preceded by a separator unless it is the first
///
/// `first_entry` is cleared as soon as any byte of the entry reaches `out`,
/// so an entry that failed part way is still followed by a separator.
fn write_entry<W: Write>(out: &mut W, first_entry: &mut bool, encoded: &[u8]) -> io::Result<()> {
    let mut chunk = Vec::with_capacity(encoded.len() + ENTRY_SEPARATOR.len() + 1);
    if !*first_entry {
        chunk.extend_from_slice(ENTRY_SEPARATOR);
    }
    chunk.extend_from_slice(encoded);
    chunk.push(b'\n');

    let mut written = 0;
    let result = loop {
        if written == chunk.len() {
            break Ok(());
        }
        match out.write(&chunk[written..]) {
            Ok(0) => break Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => written += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => break Err(e),
        }
    };

    if written > 0 {
        *first_entry = false;
    }
    result
}
