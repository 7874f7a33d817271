//! Run state of the interception core

use std::sync::Arc;

use crate::app::Config;
use crate::error::Result;
use crate::proxy::{
    CaptureSettings, CertificateAuthority, HookChain, RootIdentity, RootSubject, SessionRecorder,
};
use crate::session::{SessionLogWriter, SessionStore};

/// Everything the proxy engine needs for one run
///
/// Built once at start-up. Failing to obtain the root identity or to open
/// the session document is fatal: no traffic is served without trust
/// material or a place to record it.
pub struct App {
    config: Config,

    /// Root signing identity for MITM certificates
    identity: RootIdentity,

    /// Session document of this run, shared with the recorder
    writer: Arc<SessionLogWriter>,

    /// Hooks the engine runs on every exchange
    hooks: HookChain,
}

impl App {
    pub fn start(config: Config) -> Result<Self> {
        config.validate()?;

        let ca = CertificateAuthority::from_config(&config.certificate);
        if config.certificate.auto_generate {
            ca.ensure(&RootSubject::from(&config.certificate))?;
        } else if !ca.exists() {
            tracing::error!(
                "CA files missing at {} and {}, and auto_generate is off",
                ca.cert_path().display(),
                ca.key_path().display()
            );
        }
        let identity = ca.load()?;

        let writer = Arc::new(SessionLogWriter::open(&config.logging.session_dir)?);
        let hooks = build_hooks(&config, &writer);

        tracing::info!(
            session = %writer.name(),
            request_hooks = hooks.request_hook_count(),
            response_hooks = hooks.response_hook_count(),
            "Interception core ready"
        );

        Ok(Self {
            config,
            identity,
            writer,
            hooks,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn identity(&self) -> &RootIdentity {
        &self.identity
    }

    pub fn hooks(&self) -> &HookChain {
        &self.hooks
    }

    /// File name of the session document being recorded
    pub fn session_name(&self) -> &str {
        self.writer.name()
    }

    pub fn session_store(&self) -> SessionStore {
        SessionStore::new(&self.config.logging.session_dir)
    }

    /// Finish the session document
    pub fn shutdown(self) -> Result<()> {
        tracing::info!(session = %self.writer.name(), "Shutting down interception core");
        self.writer.close()
    }
}

fn build_hooks(config: &Config, writer: &Arc<SessionLogWriter>) -> HookChain {
    let mut hooks = HookChain::new();
    let logging = &config.logging;
    if !logging.log_requests && !logging.log_responses {
        return hooks;
    }

    let recorder = Arc::new(SessionRecorder::new(
        Arc::clone(writer),
        CaptureSettings::from(logging),
    ));
    if logging.log_requests {
        hooks.add_request_hook(recorder.clone());
    }
    if logging.log_responses {
        hooks.add_response_hook(recorder);
    }
    hooks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RogueError;
    use crate::proxy::body::{self, drain};
    use crate::reporting::SessionExporter;
    use hyper::{Request, Response, StatusCode};
    use std::path::Path;
    use tempfile::tempdir;

    fn config_in(dir: &Path) -> Config {
        let mut config = Config::default();
        config.certificate.organization = "Acme".to_string();
        config.certificate.common_name = "Acme CA".to_string();
        config.certificate.cert_path = dir.join("ca.crt");
        config.certificate.key_path = dir.join("ca.key");
        config.logging.session_dir = dir.join("logs");
        config
    }

    #[tokio::test]
    async fn test_get_through_hooks_exports_two_sections() {
        let dir = tempdir().unwrap();
        let app = App::start(config_in(dir.path())).unwrap();
        assert!(dir.path().join("ca.crt").exists());
        assert!(dir.path().join("ca.key").exists());
        assert_eq!(app.identity().info().common_name.as_deref(), Some("Acme CA"));

        let request = Request::get("http://example.com/")
            .body(body::empty())
            .unwrap();
        let forwarded = app.hooks().on_request(request).await;
        assert!(forwarded.is_ok());
        let request_id = forwarded.correlation_id.clone().unwrap();

        let response = Response::builder()
            .status(StatusCode::OK)
            .body(body::full("<html></html>"))
            .unwrap();
        let returned = app
            .hooks()
            .on_response(forwarded.message.headers(), response)
            .await;
        assert!(returned.is_ok());
        let delivered = drain(returned.message.into_body()).await.unwrap();
        assert_eq!(&delivered.bytes[..], b"<html></html>");

        let name = app.session_name().to_string();
        let exporter = SessionExporter::new(app.session_store());
        app.shutdown().unwrap();

        let entries = exporter.entries(&name).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].kind(), "request");
        assert_eq!(entries[1].kind(), "response");
        assert_eq!(entries[0].request_id(), Some(request_id.as_str()));
        assert_eq!(entries[1].request_id(), Some(request_id.as_str()));

        let report = exporter.render_to_string(&name).unwrap();
        let request_at = report.find(&format!("## Request {}", request_id)).unwrap();
        let rule_at = report.find("---\n").unwrap();
        let response_at = report.find(&format!("## Response {}", request_id)).unwrap();
        assert!(request_at < rule_at && rule_at < response_at);
        assert_eq!(report.matches("---\n\n").count(), 2);
        assert!(report.contains("`GET http://example.com/`"));
    }

    #[tokio::test]
    async fn test_request_logging_off_leaves_responses_uncorrelated() {
        let dir = tempdir().unwrap();
        let mut config = config_in(dir.path());
        config.logging.log_requests = false;

        let app = App::start(config).unwrap();
        assert_eq!(app.hooks().request_hook_count(), 0);
        assert_eq!(app.hooks().response_hook_count(), 1);

        let forwarded = app
            .hooks()
            .on_request(Request::get("http://example.com/").body(body::empty()).unwrap())
            .await;
        assert!(forwarded.correlation_id.is_none());

        let returned = app
            .hooks()
            .on_response(forwarded.message.headers(), Response::new(body::empty()))
            .await;
        assert!(returned.correlation_id.is_none());

        let name = app.session_name().to_string();
        let store = app.session_store();
        app.shutdown().unwrap();

        let entries = SessionExporter::new(store).entries(&name).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind(), "response");
        assert_eq!(entries[0].request_id(), None);
    }

    #[test]
    fn test_missing_ca_without_auto_generate_is_fatal() {
        let dir = tempdir().unwrap();
        let mut config = config_in(dir.path());
        config.certificate.auto_generate = false;

        assert!(matches!(App::start(config), Err(RogueError::NotFound(_))));
        assert!(!dir.path().join("logs").exists());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let dir = tempdir().unwrap();
        let mut config = config_in(dir.path());
        config.proxy.port = 0;

        assert!(matches!(App::start(config), Err(RogueError::Config(_))));
        assert!(!dir.path().join("ca.crt").exists());
    }
}
