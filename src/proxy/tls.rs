//! Root certificate authority for HTTPS interception
//!
//! The proxy engine needs a self-signed root to mint per-host certificates.
//! The root is generated once, written as PEM, and reused on every later run
//! for as long as both files exist, so clients only ever trust it once.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rand::RngCore;
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose,
    IsCa, KeyPair, KeyUsagePurpose, SerialNumber, PKCS_RSA_SHA256,
};
use rsa::pkcs8::{EncodePrivateKey, LineEnding};
use rsa::RsaPrivateKey;
use rustls_pki_types::pem::PemObject;
use rustls_pki_types::{CertificateDer, PrivatePkcs8KeyDer};
use time::OffsetDateTime;
use x509_parser::certificate::X509Certificate;
use x509_parser::prelude::FromDer;

use crate::app::CertificateConfig;
use crate::error::{ConfigError, Result, RogueError};

/// RSA modulus size of generated roots
pub const ROOT_KEY_BITS: usize = 2048;

/// Serial number length in bytes (the RFC 5280 maximum)
const SERIAL_BYTES: usize = 20;

/// Subject and lifetime of a root to generate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootSubject {
    pub organization: String,
    pub common_name: String,
    pub valid_days: u32,
}

impl RootSubject {
    pub fn new(organization: impl Into<String>, common_name: impl Into<String>, valid_days: u32) -> Self {
        Self {
            organization: organization.into(),
            common_name: common_name.into(),
            valid_days,
        }
    }
}

impl From<&CertificateConfig> for RootSubject {
    fn from(config: &CertificateConfig) -> Self {
        Self::new(
            config.organization.clone(),
            config.common_name.clone(),
            config.valid_days,
        )
    }
}

/// Certificate Authority backed by a certificate/key file pair
#[derive(Debug, Clone)]
pub struct CertificateAuthority {
    /// CA certificate (PEM, `CERTIFICATE` block)
    cert_path: PathBuf,

    /// CA private key (PEM, `PRIVATE KEY` block, PKCS#8)
    key_path: PathBuf,
}

impl CertificateAuthority {
    pub fn new(cert_path: impl Into<PathBuf>, key_path: impl Into<PathBuf>) -> Self {
        Self {
            cert_path: cert_path.into(),
            key_path: key_path.into(),
        }
    }

    pub fn from_config(config: &CertificateConfig) -> Self {
        Self::new(&config.cert_path, &config.key_path)
    }

    pub fn cert_path(&self) -> &Path {
        &self.cert_path
    }

    pub fn key_path(&self) -> &Path {
        &self.key_path
    }

    /// Whether both the certificate and the key file exist
    pub fn exists(&self) -> bool {
        self.cert_path.exists() && self.key_path.exists()
    }

    /// Generate and persist a root unless both files already exist
    ///
    /// Returns `true` when a new root was written. Existing material is never
    /// touched; a lone certificate or key is replaced together with its
    /// missing counterpart.
    pub fn ensure(&self, subject: &RootSubject) -> Result<bool> {
        if self.exists() {
            tracing::debug!(
                "CA material present at {} and {}",
                self.cert_path.display(),
                self.key_path.display()
            );
            return Ok(false);
        }

        if self.cert_path.exists() || self.key_path.exists() {
            tracing::warn!(
                "Only one of {} and {} exists, regenerating both",
                self.cert_path.display(),
                self.key_path.display()
            );
        }

        let root = generate_root(subject)?;
        write_pem(&self.cert_path, root.cert_pem.as_bytes(), false)?;
        write_pem(&self.key_path, root.key_pem.as_bytes(), true)?;

        tracing::info!(
            organization = %subject.organization,
            common_name = %subject.common_name,
            valid_days = subject.valid_days,
            "Generated root CA at {}",
            self.cert_path.display()
        );
        Ok(true)
    }

    /// Parse the persisted certificate and key
    pub fn load(&self) -> Result<RootIdentity> {
        let cert_pem = fs::read(&self.cert_path).map_err(|e| RogueError::io(&self.cert_path, e))?;
        let key_pem = fs::read(&self.key_path).map_err(|e| RogueError::io(&self.key_path, e))?;

        let cert_der = CertificateDer::from_pem_slice(&cert_pem).map_err(|e| {
            RogueError::Format(format!(
                "no valid CERTIFICATE block in {}: {}",
                self.cert_path.display(),
                e
            ))
        })?;
        let key_der = PrivatePkcs8KeyDer::from_pem_slice(&key_pem).map_err(|e| {
            RogueError::Format(format!(
                "no valid PRIVATE KEY block in {}: {}",
                self.key_path.display(),
                e
            ))
        })?;

        let info = CertificateInfo::from_der(&cert_der)?;

        let key_pair = KeyPair::try_from(key_der.secret_pkcs8_der())
            .map_err(|e| RogueError::crypto("parsing root private key", e))?;
        if key_pair.public_key_raw() != info.public_key.as_slice() {
            return Err(RogueError::crypto(
                "matching root key to certificate",
                format!(
                    "{} does not hold the key of {}",
                    self.key_path.display(),
                    self.cert_path.display()
                ),
            ));
        }

        Ok(RootIdentity {
            cert_pem: String::from_utf8_lossy(&cert_pem).into_owned(),
            cert_der,
            key_der,
            info,
        })
    }
}

/// A loaded root: certificate, private key and parsed certificate details
pub struct RootIdentity {
    cert_pem: String,
    cert_der: CertificateDer<'static>,
    key_der: PrivatePkcs8KeyDer<'static>,
    info: CertificateInfo,
}

impl RootIdentity {
    /// Parsed certificate details
    pub fn info(&self) -> &CertificateInfo {
        &self.info
    }

    /// Certificate as stored on disk
    pub fn certificate_pem(&self) -> &str {
        &self.cert_pem
    }

    pub fn certificate_der(&self) -> &CertificateDer<'static> {
        &self.cert_der
    }

    pub fn private_key_der(&self) -> &PrivatePkcs8KeyDer<'static> {
        &self.key_der
    }

    /// Signing key for minting per-host certificates
    pub fn key_pair(&self) -> Result<KeyPair> {
        KeyPair::try_from(self.key_der.secret_pkcs8_der())
            .map_err(|e| RogueError::crypto("parsing root private key", e))
    }
}

impl std::fmt::Debug for RootIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RootIdentity")
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

/// Details read back from a root certificate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateInfo {
    pub organization: Option<String>,
    pub common_name: Option<String>,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,

    /// Colon separated hex
    pub serial: String,

    /// Basic constraints CA flag
    pub is_ca: bool,

    /// Key usage includes certificate signing
    pub can_sign_certificates: bool,

    /// Raw subject public key
    pub public_key: Vec<u8>,
}

impl CertificateInfo {
    /// Parse a DER encoded X.509 certificate
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let (_, cert) = X509Certificate::from_der(der)
            .map_err(|e| RogueError::crypto("parsing root certificate", e))?;

        let subject = cert.subject();
        let organization = subject
            .iter_organization()
            .next()
            .and_then(|attr| attr.as_str().ok())
            .map(str::to_owned);
        let common_name = subject
            .iter_common_name()
            .next()
            .and_then(|attr| attr.as_str().ok())
            .map(str::to_owned);

        let validity = cert.validity();
        let not_before = utc_from_timestamp(validity.not_before.timestamp())?;
        let not_after = utc_from_timestamp(validity.not_after.timestamp())?;

        let is_ca = matches!(cert.basic_constraints(), Ok(Some(bc)) if bc.value.ca);
        let can_sign_certificates =
            matches!(cert.key_usage(), Ok(Some(ku)) if ku.value.key_cert_sign());

        Ok(Self {
            organization,
            common_name,
            not_before,
            not_after,
            serial: cert.raw_serial_as_string(),
            is_ca,
            can_sign_certificates,
            public_key: cert.public_key().subject_public_key.data.to_vec(),
        })
    }

    /// Length of the validity window in whole days
    pub fn validity_days(&self) -> i64 {
        (self.not_after - self.not_before).num_days()
    }
}

fn utc_from_timestamp(secs: i64) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(secs, 0)
        .ok_or_else(|| RogueError::crypto("reading certificate validity", "timestamp out of range"))
}

/// Freshly generated root material
struct GeneratedRoot {
    cert_pem: String,
    key_pem: String,
}

fn generate_root(subject: &RootSubject) -> Result<GeneratedRoot> {
    if subject.valid_days == 0 {
        return Err(ConfigError::ValidationError {
            field: "certificate.valid_days".to_string(),
            reason: "must be at least 1".to_string(),
        }
        .into());
    }

    let mut rng = rand::thread_rng();
    let private_key = RsaPrivateKey::new(&mut rng, ROOT_KEY_BITS)
        .map_err(|e| RogueError::crypto("generating root key", e))?;
    let key_pem = private_key
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| RogueError::crypto("encoding root key", e))?;
    let key_pair = KeyPair::from_pem_and_sign_algo(&key_pem, &PKCS_RSA_SHA256)
        .map_err(|e| RogueError::crypto("loading root key for signing", e))?;

    let params = root_params(subject, random_serial(&mut rng))?;
    let cert = params
        .self_signed(&key_pair)
        .map_err(|e| RogueError::crypto("self-signing root certificate", e))?;

    Ok(GeneratedRoot {
        cert_pem: cert.pem(),
        key_pem: key_pem.as_str().to_owned(),
    })
}

fn root_params(subject: &RootSubject, serial: SerialNumber) -> Result<CertificateParams> {
    let mut params = CertificateParams::default();

    let mut dn = DistinguishedName::new();
    dn.push(DnType::OrganizationName, subject.organization.clone());
    dn.push(DnType::CommonName, subject.common_name.clone());
    params.distinguished_name = dn;

    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];
    params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
    params.serial_number = Some(serial);

    // X.509 times have second precision
    let not_before = OffsetDateTime::from_unix_timestamp(OffsetDateTime::now_utc().unix_timestamp())
        .map_err(|e| RogueError::crypto("computing validity window", e))?;
    let not_after = not_before
        .checked_add(time::Duration::days(i64::from(subject.valid_days)))
        .ok_or_else(|| {
            RogueError::crypto("computing validity window", "valid_days is too large")
        })?;
    params.not_before = not_before;
    params.not_after = not_after;

    Ok(params)
}

fn random_serial(rng: &mut impl RngCore) -> SerialNumber {
    let mut bytes = [0u8; SERIAL_BYTES];
    rng.fill_bytes(&mut bytes);
    // positive, with a non-zero leading byte
    bytes[0] = (bytes[0] & 0x7f) | 0x40;
    SerialNumber::from_slice(&bytes)
}

fn write_pem(path: &Path, contents: &[u8], private: bool) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| RogueError::write(parent, e))?;
        }
    }

    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    if private {
        owner_only(&mut options);
    }

    let mut file = options.open(path).map_err(|e| RogueError::write(path, e))?;
    file.write_all(contents)
        .map_err(|e| RogueError::write(path, e))
}

#[cfg(unix)]
fn owner_only(options: &mut OpenOptions) {
    use std::os::unix::fs::OpenOptionsExt;
    options.mode(0o600);
}

#[cfg(not(unix))]
fn owner_only(_options: &mut OpenOptions) {}
