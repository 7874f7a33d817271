//! Request and response hooks invoked by the proxy engine
//!
//! The engine calls the request chain before forwarding a request upstream
//! and the response chain once the upstream reply arrived. Hooks take the
//! message by value and hand back the message to forward, so a hook that
//! reads the body must give back a fresh one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use hyper::header::{HeaderMap, HeaderName, HeaderValue, HOST};
use hyper::{Request, Response, Uri};

use super::body::{self, ProxyBody};
use crate::app::LoggingConfig;
use crate::error::RogueError;
use crate::session::{self, RequestRecord, ResponseRecord, SessionLogWriter};

/// Synthetic header carrying the correlation identifier
pub const REQUEST_ID_HEADER: &str = "x-rogue-request-id";

/// Message returned by a hook, with what the hook observed
pub struct Intercepted<T> {
    /// Message to forward
    pub message: T,

    /// Correlation identifier stamped on or read from the exchange
    pub correlation_id: Option<String>,

    /// Logging failures; the message is forwarded regardless
    pub errors: Vec<RogueError>,
}

impl<T> Intercepted<T> {
    pub fn new(message: T) -> Self {
        Self {
            message,
            correlation_id: None,
            errors: Vec::new(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Hook run before a request is forwarded upstream
#[async_trait]
pub trait RequestHook: Send + Sync {
    async fn on_request(&self, request: Request<ProxyBody>) -> Intercepted<Request<ProxyBody>>;
}

/// Hook run after the upstream response is received
#[async_trait]
pub trait ResponseHook: Send + Sync {
    /// `request_headers` are the headers of the request as it was forwarded
    async fn on_response(
        &self,
        request_headers: &HeaderMap,
        response: Response<ProxyBody>,
    ) -> Intercepted<Response<ProxyBody>>;
}

/// What a recorder copies out of each message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureSettings {
    pub headers: bool,
    pub body: bool,

    /// Body capture ceiling in bytes
    pub max_body_size: usize,
}

impl From<&LoggingConfig> for CaptureSettings {
    fn from(config: &LoggingConfig) -> Self {
        Self {
            headers: config.log_headers,
            body: config.log_body,
            max_body_size: config.max_body_size,
        }
    }
}

/// Hook pair that stamps correlation identifiers and records every exchange
/// into the session document
pub struct SessionRecorder {
    writer: Arc<SessionLogWriter>,
    capture: CaptureSettings,

    /// Last identifier handed out
    last_id: AtomicU64,
}

impl SessionRecorder {
    pub fn new(writer: Arc<SessionLogWriter>, capture: CaptureSettings) -> Self {
        Self {
            writer,
            capture,
            last_id: AtomicU64::new(0),
        }
    }

    pub fn capture(&self) -> CaptureSettings {
        self.capture
    }

    /// Nanosecond timestamp, bumped past the previous identifier on collision
    fn next_request_id(&self) -> u64 {
        let now = Utc::now()
            .timestamp_nanos_opt()
            .and_then(|nanos| u64::try_from(nanos).ok())
            .unwrap_or(0);

        let previous = match self.last_id.fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
            Some(now.max(last + 1))
        }) {
            Ok(previous) | Err(previous) => previous,
        };
        now.max(previous + 1)
    }

    /// Drain, capture and restore a body when body capture is on
    async fn capture_body(
        &self,
        body: ProxyBody,
        errors: &mut Vec<RogueError>,
    ) -> (ProxyBody, Option<String>) {
        if !self.capture.body {
            return (body, None);
        }

        match body::drain(body).await {
            Ok(drained) => {
                let limit = drained.bytes.len().min(self.capture.max_body_size);
                let text = String::from_utf8_lossy(&drained.bytes[..limit]).into_owned();
                (body::restore(drained), Some(text))
            }
            Err(e) => {
                errors.push(RogueError::Body(e.to_string()));
                (body::failed(e), None)
            }
        }
    }

    fn capture_headers(&self, headers: &HeaderMap) -> Option<session::HeaderMap> {
        self.capture.headers.then(|| first_values(headers))
    }

    fn record(&self, entry: session::SessionEntry, errors: &mut Vec<RogueError>) {
        if let Err(e) = self.writer.append(&entry) {
            errors.push(e);
        }
    }
}

#[async_trait]
impl RequestHook for SessionRecorder {
    async fn on_request(&self, request: Request<ProxyBody>) -> Intercepted<Request<ProxyBody>> {
        let timestamp = session::now_timestamp();
        let mut errors = Vec::new();
        let (mut parts, body) = request.into_parts();

        let request_id = self.next_request_id();
        parts.headers.insert(
            HeaderName::from_static(REQUEST_ID_HEADER),
            HeaderValue::from(request_id),
        );

        let (body, captured) = self.capture_body(body, &mut errors).await;
        let request_id = request_id.to_string();

        let record = RequestRecord {
            timestamp,
            method: parts.method.to_string(),
            url: full_url(&parts.uri, &parts.headers),
            headers: self.capture_headers(&parts.headers),
            body: captured,
            request_id: request_id.clone(),
        };
        tracing::debug!(request_id = %request_id, "{} {}", record.method, record.url);
        self.record(record.into(), &mut errors);

        Intercepted {
            message: Request::from_parts(parts, body),
            correlation_id: Some(request_id),
            errors,
        }
    }
}

#[async_trait]
impl ResponseHook for SessionRecorder {
    async fn on_response(
        &self,
        request_headers: &HeaderMap,
        response: Response<ProxyBody>,
    ) -> Intercepted<Response<ProxyBody>> {
        let timestamp = session::now_timestamp();
        let mut errors = Vec::new();
        let (parts, body) = response.into_parts();

        let request_id = request_headers
            .get(REQUEST_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);

        let (body, captured) = self.capture_body(body, &mut errors).await;

        let record = ResponseRecord {
            timestamp,
            status_code: parts.status.as_u16(),
            headers: self.capture_headers(&parts.headers),
            body: captured,
            request_id: request_id.clone(),
        };
        tracing::debug!(
            request_id = request_id.as_deref().unwrap_or("-"),
            "response {}",
            record.status_code
        );
        self.record(record.into(), &mut errors);

        Intercepted {
            message: Response::from_parts(parts, body),
            correlation_id: request_id,
            errors,
        }
    }
}

/// First value of every header, keyed by lowercase name
fn first_values(headers: &HeaderMap) -> session::HeaderMap {
    let mut captured = session::HeaderMap::new();
    for (name, value) in headers {
        captured
            .entry(name.as_str().to_string())
            .or_insert_with(|| String::from_utf8_lossy(value.as_bytes()).into_owned());
    }
    captured
}

/// Absolute URL of a request
///
/// Engines hand over absolute-form URIs for proxied requests; origin-form
/// ones are completed from the `Host` header.
fn full_url(uri: &Uri, headers: &HeaderMap) -> String {
    if uri.authority().is_some() {
        return uri.to_string();
    }

    match headers.get(HOST).and_then(|h| h.to_str().ok()) {
        Some(host) => {
            let scheme = uri.scheme_str().unwrap_or("http");
            let path = uri
                .path_and_query()
                .map(|pq| pq.as_str())
                .unwrap_or("/");
            format!("{}://{}{}", scheme, host, path)
        }
        None => uri.to_string(),
    }
}

/// Ordered request and response hooks
///
/// Hooks run in registration order. A hook's errors are logged and collected;
/// the message always continues down the chain.
#[derive(Clone, Default)]
pub struct HookChain {
    request_hooks: Vec<Arc<dyn RequestHook>>,
    response_hooks: Vec<Arc<dyn ResponseHook>>,
}

impl HookChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_request_hook(&mut self, hook: Arc<dyn RequestHook>) {
        self.request_hooks.push(hook);
    }

    pub fn add_response_hook(&mut self, hook: Arc<dyn ResponseHook>) {
        self.response_hooks.push(hook);
    }

    pub fn request_hook_count(&self) -> usize {
        self.request_hooks.len()
    }

    pub fn response_hook_count(&self) -> usize {
        self.response_hooks.len()
    }

    pub async fn on_request(&self, request: Request<ProxyBody>) -> Intercepted<Request<ProxyBody>> {
        let mut outcome = Intercepted::new(request);
        for hook in &self.request_hooks {
            let step = hook.on_request(outcome.message).await;
            outcome = merge(outcome.correlation_id, outcome.errors, step, "request");
        }
        outcome
    }

    pub async fn on_response(
        &self,
        request_headers: &HeaderMap,
        response: Response<ProxyBody>,
    ) -> Intercepted<Response<ProxyBody>> {
        let mut outcome = Intercepted::new(response);
        for hook in &self.response_hooks {
            let step = hook.on_response(request_headers, outcome.message).await;
            outcome = merge(outcome.correlation_id, outcome.errors, step, "response");
        }
        outcome
    }
}

fn merge<T>(
    correlation_id: Option<String>,
    mut errors: Vec<RogueError>,
    step: Intercepted<T>,
    stage: &str,
) -> Intercepted<T> {
    for e in &step.errors {
        tracing::warn!(
            request_id = step.correlation_id.as_deref().unwrap_or("-"),
            "Failed to log {}: {}",
            stage,
            e
        );
    }
    errors.extend(step.errors);

    Intercepted {
        message: step.message,
        correlation_id: step.correlation_id.or(correlation_id),
        errors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::body::{drain, BoxError};
    use http_body_util::{BodyExt, Full};
    use hyper::body::Bytes;
    use hyper::StatusCode;
    use parking_lot::Mutex;
    use serde_json::Value;
    use std::fs;
    use tempfile::{tempdir, TempDir};

    fn capture_all(max_body_size: usize) -> CaptureSettings {
        CaptureSettings {
            headers: true,
            body: true,
            max_body_size,
        }
    }

    fn recorder(dir: &TempDir, capture: CaptureSettings) -> (Arc<SessionLogWriter>, SessionRecorder) {
        let writer = Arc::new(SessionLogWriter::open(dir.path()).unwrap());
        let recorder = SessionRecorder::new(Arc::clone(&writer), capture);
        (writer, recorder)
    }

    fn written_entries(writer: &SessionLogWriter) -> Vec<Value> {
        writer.close().unwrap();
        serde_json::from_slice(&fs::read(writer.path()).unwrap()).unwrap()
    }

    fn get(uri: &str) -> Request<ProxyBody> {
        Request::get(uri)
            .header("accept", "text/html")
            .body(body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_request_is_stamped_and_recorded() {
        let dir = tempdir().unwrap();
        let (writer, recorder) = recorder(&dir, capture_all(1024));

        let outcome = recorder.on_request(get("http://example.com/index")).await;
        assert!(outcome.is_ok());

        let id = outcome.correlation_id.clone().unwrap();
        let header = outcome.message.headers().get(REQUEST_ID_HEADER).unwrap();
        assert_eq!(header.to_str().unwrap(), id);

        let entries = written_entries(&writer);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0]["type"], "request");
        assert_eq!(entries[0]["data"]["method"], "GET");
        assert_eq!(entries[0]["data"]["url"], "http://example.com/index");
        assert_eq!(entries[0]["data"]["request_id"], id.as_str());
        assert_eq!(entries[0]["data"]["headers"]["accept"], "text/html");
        assert_eq!(entries[0]["data"]["body"], "");
    }

    #[tokio::test]
    async fn test_body_truncated_in_log_but_forwarded_whole() {
        let dir = tempdir().unwrap();
        let (writer, recorder) = recorder(&dir, capture_all(16));

        let payload = "a".repeat(16) + "overflow";
        let request = Request::post("http://example.com/upload")
            .body(body::full(payload.clone()))
            .unwrap();

        let outcome = recorder.on_request(request).await;
        let forwarded = drain(outcome.message.into_body()).await.unwrap();
        assert_eq!(forwarded.bytes, Bytes::from(payload));

        let entries = written_entries(&writer);
        assert_eq!(entries[0]["data"]["body"], "a".repeat(16));
    }

    #[tokio::test]
    async fn test_disabled_capture_omits_fields() {
        let dir = tempdir().unwrap();
        let capture = CaptureSettings {
            headers: false,
            body: false,
            max_body_size: 1024,
        };
        let (writer, recorder) = recorder(&dir, capture);

        let request = Request::post("http://example.com/")
            .header("cookie", "secret")
            .body(body::full("data"))
            .unwrap();
        let outcome = recorder.on_request(request).await;
        let forwarded = drain(outcome.message.into_body()).await.unwrap();
        assert_eq!(forwarded.bytes, Bytes::from_static(b"data"));

        let entries = written_entries(&writer);
        let data = entries[0]["data"].as_object().unwrap();
        assert!(!data.contains_key("headers"));
        assert!(!data.contains_key("body"));
    }

    #[tokio::test]
    async fn test_response_shares_request_id() {
        let dir = tempdir().unwrap();
        let (writer, recorder) = recorder(&dir, capture_all(1024));

        let forwarded = recorder.on_request(get("http://example.com/")).await;
        let request_headers = forwarded.message.headers().clone();

        let response = Response::builder()
            .status(StatusCode::NOT_FOUND)
            .header("content-type", "text/plain")
            .body(body::full("missing"))
            .unwrap();
        let outcome = recorder.on_response(&request_headers, response).await;
        assert_eq!(outcome.correlation_id, forwarded.correlation_id);
        assert_eq!(outcome.message.status(), StatusCode::NOT_FOUND);

        let entries = written_entries(&writer);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1]["type"], "response");
        assert_eq!(entries[1]["data"]["status_code"], 404);
        assert_eq!(entries[1]["data"]["body"], "missing");
        assert_eq!(entries[1]["data"]["request_id"], entries[0]["data"]["request_id"]);
    }

    #[tokio::test]
    async fn test_response_without_request_id() {
        let dir = tempdir().unwrap();
        let (writer, recorder) = recorder(&dir, capture_all(1024));

        let response = Response::new(body::empty());
        let outcome = recorder.on_response(&HeaderMap::new(), response).await;
        assert!(outcome.correlation_id.is_none());

        let entries = written_entries(&writer);
        assert!(entries[0]["data"].get("request_id").is_none());
    }

    #[tokio::test]
    async fn test_drain_failure_is_reported_and_replayed() {
        let dir = tempdir().unwrap();
        let (writer, recorder) = recorder(&dir, capture_all(1024));

        let request = Request::post("http://example.com/")
            .body(body::failed("connection reset".into()))
            .unwrap();
        let outcome = recorder.on_request(request).await;
        assert!(matches!(outcome.errors.as_slice(), [RogueError::Body(_)]));

        let err = drain(outcome.message.into_body()).await.unwrap_err();
        assert_eq!(err.to_string(), "connection reset");

        let entries = written_entries(&writer);
        assert!(entries[0]["data"].get("body").is_none());
    }

    #[tokio::test]
    async fn test_trailers_survive_capture() {
        let dir = tempdir().unwrap();
        let (writer, recorder) = recorder(&dir, capture_all(1024));

        let mut trailers = HeaderMap::new();
        trailers.insert("grpc-status", HeaderValue::from_static("0"));
        let body = Full::new(Bytes::from_static(b"chunked"))
            .map_err(|never| -> BoxError { match never {} })
            .with_trailers(std::future::ready(Some(Ok(trailers.clone()))))
            .boxed();

        let outcome = recorder
            .on_response(&HeaderMap::new(), Response::new(body))
            .await;
        let forwarded = drain(outcome.message.into_body()).await.unwrap();
        assert_eq!(forwarded.bytes, Bytes::from_static(b"chunked"));
        assert_eq!(forwarded.trailers, Some(trailers));

        writer.close().unwrap();
    }

    #[tokio::test]
    async fn test_closed_writer_does_not_block_forwarding() {
        let dir = tempdir().unwrap();
        let (writer, recorder) = recorder(&dir, capture_all(1024));
        writer.close().unwrap();

        let request = Request::post("http://example.com/")
            .body(body::full("still sent"))
            .unwrap();
        let outcome = recorder.on_request(request).await;
        assert!(matches!(outcome.errors.as_slice(), [RogueError::SessionClosed(_)]));

        let forwarded = drain(outcome.message.into_body()).await.unwrap();
        assert_eq!(forwarded.bytes, Bytes::from_static(b"still sent"));
    }

    #[test]
    fn test_request_ids_are_unique_and_increasing() {
        let dir = tempdir().unwrap();
        let (writer, recorder) = recorder(&dir, capture_all(1024));

        let ids: Vec<u64> = (0..1000).map(|_| recorder.next_request_id()).collect();
        assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));

        writer.close().unwrap();
    }

    #[test]
    fn test_origin_form_url_uses_host_header() {
        let uri: Uri = "/search?q=rust".parse().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(HOST, HeaderValue::from_static("example.com"));
        assert_eq!(full_url(&uri, &headers), "http://example.com/search?q=rust");
    }

    #[test]
    fn test_first_header_value_wins() {
        let mut headers = HeaderMap::new();
        headers.append("set-cookie", HeaderValue::from_static("a=1"));
        headers.append("set-cookie", HeaderValue::from_static("b=2"));

        let captured = first_values(&headers);
        assert_eq!(captured.get("set-cookie").map(String::as_str), Some("a=1"));
    }

    struct Tracer {
        label: &'static str,
        seen: Arc<Mutex<Vec<&'static str>>>,
        fail: bool,
    }

    #[async_trait]
    impl RequestHook for Tracer {
        async fn on_request(&self, request: Request<ProxyBody>) -> Intercepted<Request<ProxyBody>> {
            self.seen.lock().push(self.label);
            let mut outcome = Intercepted::new(request);
            if self.fail {
                outcome.errors.push(RogueError::SessionClosed(self.label.to_string()));
            }
            outcome
        }
    }

    #[tokio::test]
    async fn test_chain_runs_hooks_in_order_past_errors() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut chain = HookChain::new();
        for (label, fail) in [("first", true), ("second", false)] {
            chain.add_request_hook(Arc::new(Tracer {
                label,
                seen: Arc::clone(&seen),
                fail,
            }));
        }

        let outcome = chain.on_request(get("http://example.com/")).await;
        assert_eq!(*seen.lock(), vec!["first", "second"]);
        assert_eq!(outcome.errors.len(), 1);
    }

    #[tokio::test]
    async fn test_chain_keeps_recorder_correlation_id() {
        let dir = tempdir().unwrap();
        let (writer, recorder) = recorder(&dir, capture_all(1024));
        let recorder = Arc::new(recorder);

        let mut chain = HookChain::new();
        chain.add_request_hook(recorder.clone());
        chain.add_request_hook(Arc::new(Tracer {
            label: "after",
            seen: Arc::new(Mutex::new(Vec::new())),
            fail: false,
        }));
        chain.add_response_hook(recorder);

        let request = chain.on_request(get("http://example.com/")).await;
        assert!(request.correlation_id.is_some());

        let response = chain
            .on_response(request.message.headers(), Response::new(body::empty()))
            .await;
        assert_eq!(response.correlation_id, request.correlation_id);

        writer.close().unwrap();
    }
}
