//! Application core module
//!
//! Handles configuration and the start-up/shutdown lifecycle of the
//! interception core.

mod config;
mod state;

pub use config::{CertificateConfig, Config, LoggingConfig, ProxyConfig, DEFAULT_CONFIG_FILE};
pub use state::App;
