//! Session recording
//!
//! A session document is the append-only log of one proxy run. Each entry is
//! either a captured request or a captured response, written as
//! `{"type": "request"|"response", "data": {...}}`.

mod store;
mod writer;

pub use store::SessionStore;
pub use writer::{SessionLogWriter, SESSION_EXTENSION};

use std::collections::BTreeMap;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Header map as recorded: first value per header name
pub type HeaderMap = BTreeMap<String, String>;

/// Current time as recorded in entries (RFC 3339, UTC)
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// A captured request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestRecord {
    /// Kept as written so reports show the recorded value
    #[serde(default)]
    pub timestamp: String,

    #[serde(default)]
    pub method: String,

    /// Full request URL
    #[serde(default)]
    pub url: String,

    /// Present only when header logging is enabled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<HeaderMap>,

    /// Present only when body logging is enabled; truncated to the ceiling
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,

    /// Correlation identifier shared with the matching response
    #[serde(default)]
    pub request_id: String,
}

/// A captured response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseRecord {
    #[serde(default)]
    pub timestamp: String,

    #[serde(default)]
    pub status_code: u16,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<HeaderMap>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,

    /// Missing when no request hook stamped the exchange
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

/// One entry of a session document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum SessionEntry {
    Request(RequestRecord),
    Response(ResponseRecord),
}

impl SessionEntry {
    /// Decode one raw document value
    ///
    /// Returns `None` only for values that are not `{type, data}` objects with
    /// a recognised `type` and an object `data`. Within a recognised entry,
    /// missing or mistyped fields read as empty.
    pub fn from_value(value: Value) -> Option<Self> {
        let kind = value.get("type")?.as_str()?;
        let data = value.get("data")?.as_object()?;

        match kind {
            "request" => Some(SessionEntry::Request(RequestRecord {
                timestamp: string_field(data, "timestamp"),
                method: string_field(data, "method"),
                url: string_field(data, "url"),
                headers: headers_field(data),
                body: data.get("body").and_then(Value::as_str).map(str::to_owned),
                request_id: string_field(data, "request_id"),
            })),
            "response" => Some(SessionEntry::Response(ResponseRecord {
                timestamp: string_field(data, "timestamp"),
                status_code: status_field(data),
                headers: headers_field(data),
                body: data.get("body").and_then(Value::as_str).map(str::to_owned),
                request_id: data
                    .get("request_id")
                    .and_then(Value::as_str)
                    .map(str::to_owned),
            })),
            other => {
                tracing::debug!("Skipping entry of unknown type {:?}", other);
                None
            }
        }
    }

    /// Entry kind as written in the `type` discriminator
    pub fn kind(&self) -> &'static str {
        match self {
            SessionEntry::Request(_) => "request",
            SessionEntry::Response(_) => "response",
        }
    }

    /// Correlation identifier, if the entry carries one
    pub fn request_id(&self) -> Option<&str> {
        match self {
            SessionEntry::Request(r) => Some(&r.request_id),
            SessionEntry::Response(r) => r.request_id.as_deref(),
        }
    }

    /// Recorded timestamp, as written
    pub fn timestamp(&self) -> &str {
        match self {
            SessionEntry::Request(r) => &r.timestamp,
            SessionEntry::Response(r) => &r.timestamp,
        }
    }
}

fn string_field(data: &Map<String, Value>, key: &str) -> String {
    data.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned()
}

/// Status code stored as an integer or a float; anything else reads as 0
fn status_field(data: &Map<String, Value>) -> u16 {
    let status = data.get("status_code");
    status
        .and_then(Value::as_u64)
        .or_else(|| status.and_then(Value::as_f64).map(|f| f as u64))
        .and_then(|code| u16::try_from(code).ok())
        .unwrap_or(0)
}

/// Header object, with non-string values rendered as JSON
fn headers_field(data: &Map<String, Value>) -> Option<HeaderMap> {
    let headers = data.get("headers")?.as_object()?;
    Some(
        headers
            .iter()
            .map(|(key, value)| {
                let value = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (key.clone(), value)
            })
            .collect(),
    )
}

impl From<RequestRecord> for SessionEntry {
    fn from(record: RequestRecord) -> Self {
        SessionEntry::Request(record)
    }
}

impl From<ResponseRecord> for SessionEntry {
    fn from(record: ResponseRecord) -> Self {
        SessionEntry::Response(record)
    }
}
