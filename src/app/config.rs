//! Application configuration management

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

/// File looked up in the working directory when no path is given
pub const DEFAULT_CONFIG_FILE: &str = "rogue.toml";

/// Main application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Listener settings handed to the proxy engine
    pub proxy: ProxyConfig,

    /// Root certificate authority settings
    pub certificate: CertificateConfig,

    /// Session recording settings
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Proxy listen address
    pub host: String,

    /// Proxy listen port
    pub port: u16,

    /// Upstream timeout in seconds
    pub timeout: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CertificateConfig {
    /// Generate the root CA at start-up when it is missing
    pub auto_generate: bool,

    /// Subject organization of the root certificate
    pub organization: String,

    /// Subject common name of the root certificate
    pub common_name: String,

    /// Validity window in days
    pub valid_days: u32,

    /// CA certificate path (PEM)
    pub cert_path: PathBuf,

    /// CA private key path (PKCS#8 PEM)
    pub key_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Directory holding session documents
    pub session_dir: PathBuf,

    /// Record requests
    pub log_requests: bool,

    /// Record responses
    pub log_responses: bool,

    /// Record header maps
    pub log_headers: bool,

    /// Record bodies
    pub log_body: bool,

    /// Body capture ceiling in bytes
    pub max_body_size: usize,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            timeout: 30,
        }
    }
}

impl Default for CertificateConfig {
    fn default() -> Self {
        Self {
            auto_generate: true,
            organization: "Rogue Proxy".to_string(),
            common_name: "Rogue CA".to_string(),
            valid_days: 365,
            cert_path: PathBuf::from("certs/ca.crt"),
            key_path: PathBuf::from("certs/ca.key"),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            session_dir: PathBuf::from("logs"),
            log_requests: true,
            log_responses: true,
            log_headers: true,
            log_body: true,
            max_body_size: 1024 * 1024, // 1MB
        }
    }
}

impl Config {
    /// Load configuration from file
    ///
    /// An explicit path must exist. Without one, `rogue.toml` in the working
    /// directory is used when present and defaults otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config_path = match path {
            Some(p) => {
                if !p.exists() {
                    return Err(ConfigError::NotFound(p.display().to_string()));
                }
                p.to_path_buf()
            }
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if !config_path.exists() {
            tracing::info!("No configuration file found, using defaults");
            return Ok(Self::default());
        }

        let contents =
            std::fs::read_to_string(&config_path).map_err(|source| ConfigError::ReadError {
                path: config_path.display().to_string(),
                source,
            })?;

        let config = Self::from_toml(&contents)?;
        tracing::info!("Loaded configuration from {:?}", config_path);
        Ok(config)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Render configuration as TOML
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let write_err = |source| ConfigError::WriteError {
            path: path.display().to_string(),
            source,
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(write_err)?;
            }
        }

        std::fs::write(path, self.to_toml()?).map_err(write_err)?;

        tracing::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.proxy.port == 0 {
            return Err(invalid("proxy.port", "cannot be 0"));
        }

        if self.certificate.valid_days == 0 {
            return Err(invalid("certificate.valid_days", "must be at least 1"));
        }

        if self.certificate.cert_path.as_os_str().is_empty() {
            return Err(invalid("certificate.cert_path", "cannot be empty"));
        }

        if self.certificate.key_path.as_os_str().is_empty() {
            return Err(invalid("certificate.key_path", "cannot be empty"));
        }

        if self.certificate.cert_path == self.certificate.key_path {
            return Err(invalid(
                "certificate.key_path",
                "must differ from certificate.cert_path",
            ));
        }

        if self.logging.session_dir.as_os_str().is_empty() {
            return Err(invalid("logging.session_dir", "cannot be empty"));
        }

        Ok(())
    }
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::ValidationError {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}
