//! Session document decoding
//!
//! Two encodings are accepted: a JSON array of entries, as written by
//! [`SessionLogWriter`](crate::session::SessionLogWriter), and a bare sequence
//! of back-to-back entries. A document cut off inside its last entry still
//! decodes up to the last complete one.

use serde_json::error::Category;
use serde_json::{Deserializer, Value};

use crate::error::{Result, RogueError};
use crate::session::SessionEntry;

/// On-disk encoding of a session document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// `[` entry `,` entry ... `]`
    Array,
    /// entry entry ...
    Sequence,
}

/// Detect the encoding from the first non-whitespace byte
pub fn sniff(raw: &[u8]) -> Encoding {
    match raw.iter().find(|b| !b.is_ascii_whitespace()) {
        Some(b'[') => Encoding::Array,
        _ => Encoding::Sequence,
    }
}

/// Decode a session document into its recognised entries, in document order
pub fn decode(raw: &[u8]) -> Result<Vec<SessionEntry>> {
    let values = match sniff(raw) {
        Encoding::Array => decode_array(raw)?,
        Encoding::Sequence => scan(raw, 0, false)?,
    };

    let total = values.len();
    let entries: Vec<SessionEntry> = values
        .into_iter()
        .filter_map(SessionEntry::from_value)
        .collect();

    if entries.len() < total {
        tracing::debug!("Skipped {} unrecognised entries", total - entries.len());
    }
    Ok(entries)
}

fn decode_array(raw: &[u8]) -> Result<Vec<Value>> {
    match serde_json::from_slice::<Vec<Value>>(raw) {
        Ok(values) => Ok(values),
        Err(e) if e.classify() == Category::Eof => {
            tracing::warn!("Session document is not terminated, reading entries up to the end");
            let start = raw
                .iter()
                .position(|b| *b == b'[')
                .map_or(0, |open| open + 1);
            scan(raw, start, true)
        }
        Err(e) => Err(RogueError::Format(format!("malformed session document: {}", e))),
    }
}

/// Read values one by one from `pos`
///
/// Inside an array, commas between values are skipped and `]` ends the scan.
/// A value cut off by the end of input ends the scan; any other syntax error
/// fails it.
fn scan(raw: &[u8], mut pos: usize, in_array: bool) -> Result<Vec<Value>> {
    let mut values = Vec::new();

    loop {
        while pos < raw.len()
            && (raw[pos].is_ascii_whitespace() || (in_array && raw[pos] == b','))
        {
            pos += 1;
        }
        if pos >= raw.len() || (in_array && raw[pos] == b']') {
            break;
        }

        let mut stream = Deserializer::from_slice(&raw[pos..]).into_iter::<Value>();
        match stream.next() {
            Some(Ok(value)) => {
                pos += stream.byte_offset();
                values.push(value);
            }
            Some(Err(e)) if e.is_eof() => {
                tracing::warn!("Dropping truncated entry at byte {}", pos);
                break;
            }
            Some(Err(e)) => {
                return Err(RogueError::Format(format!(
                    "malformed session entry at byte {}: {}",
                    pos, e
                )));
            }
            None => break,
        }
    }

    Ok(values)
}
