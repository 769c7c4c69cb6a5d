//! Configuration types
//!
//! [`OidcConfig`] carries everything the verifier, key store, and claims
//! resolver consume. It can be built in code, or loaded from a TOML/YAML/JSON
//! file and/or environment variables with the `OIDC_` prefix:
//!
//! ```text
//! OIDC_ISSUER_URL=https://login.example.com/tenant/v2.0
//! OIDC_CLIENT_ID=3dd21f62-c836-4689-84f6-6780958cf002
//! OIDC_KEY_STORE__REFRESH_INTERVAL_SECS=1800
//! OIDC_VERIFICATION__CLOCK_SKEW_SECS=30
//! ```

use std::path::PathBuf;
use std::time::Duration;

use jsonwebtoken::Algorithm;
use serde::{Deserialize, Serialize};
use url::Url;

/// Environment variable prefix used by [`OidcConfig::from_env`] and [`OidcConfig::from_file`]
pub const ENV_PREFIX: &str = "OIDC";

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Config file not found
    #[error("Configuration file not found: {0}")]
    FileNotFound(PathBuf),

    /// Unsupported file format
    #[error("Unsupported configuration file format. Use .toml, .yaml, .yml, or .json")]
    UnsupportedFormat,

    /// Configuration parsing error
    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] config::ConfigError),

    /// Required field missing or blank
    #[error("Missing required setting: {0}")]
    MissingField(&'static str),

    /// Issuer URL unusable
    #[error("Invalid issuer URL: {0}")]
    InvalidIssuer(String),

    /// Algorithm allow-list unusable
    #[error("Invalid algorithm allow-list: {0}")]
    InvalidAlgorithms(String),

    /// Refresh/expiry/timeout settings inconsistent
    #[error("Invalid key schedule: {0}")]
    InvalidSchedule(String),
}

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OidcConfig {
    /// Issuer URL; must equal the `iss` claim exactly
    pub issuer_url: String,
    /// Expected audience (OAuth2 client ID)
    #[serde(default)]
    pub client_id: String,
    /// Token verification settings
    #[serde(default)]
    pub verification: VerificationConfig,
    /// Key cache settings
    #[serde(default)]
    pub key_store: KeyStoreConfig,
    /// Claims-to-user mapping settings
    #[serde(default)]
    pub identity: IdentityConfig,
}

/// Token verification settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VerificationConfig {
    /// Allowed signing algorithms (default: RS256 only)
    #[serde(default = "default_algorithms")]
    pub allowed_algorithms: Vec<Algorithm>,
    /// Clock skew tolerance for `exp`/`nbf`/`iat` in seconds (default: 60)
    #[serde(default = "default_clock_skew_secs")]
    pub clock_skew_secs: u64,
    /// Disable the `aud` check entirely
    #[serde(default)]
    pub skip_audience_check: bool,
    /// How long a verification may wait on key fetching, in seconds (default: 10)
    #[serde(default = "default_key_fetch_timeout_secs")]
    pub key_fetch_timeout_secs: u64,
}

/// Key cache settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KeyStoreConfig {
    /// Background refresh period in seconds (default: 1 hour)
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
    /// Maximum age of a cached key in seconds (default: 12 hours)
    #[serde(default = "default_key_expiry_secs")]
    pub key_expiry_secs: u64,
    /// Minimum gap between remote fetches triggered by unknown key IDs (default: 5s, 0 disables)
    #[serde(default = "default_min_fetch_interval_secs")]
    pub min_fetch_interval_secs: u64,
    /// HTTP timeout for discovery and JWKS requests in seconds (default: 10)
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
}

/// Claims-to-user mapping settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IdentityConfig {
    /// Primary identity claim copied into `User::email`
    #[serde(default = "default_identity_claim")]
    pub identity_claim: String,
    /// Display name claim
    #[serde(default = "default_name_claim")]
    pub name_claim: String,
    /// Subject claim copied into `User::subject_id`
    #[serde(default = "default_subject_claim")]
    pub subject_claim: String,
    /// Stable subject claim used when the identity claim is blank
    #[serde(default = "default_fallback_subject_claim")]
    pub fallback_subject_claim: String,
    /// Client authentication method claim gating the fallback
    #[serde(default = "default_auth_context_claim")]
    pub auth_context_claim: String,
    /// Auth context values that permit the fallback ("1" client secret, "2" certificate)
    #[serde(default = "default_allowed_auth_contexts")]
    pub allowed_auth_contexts: Vec<String>,
}

fn default_algorithms() -> Vec<Algorithm> {
    vec![Algorithm::RS256]
}

fn default_clock_skew_secs() -> u64 {
    60
}

fn default_key_fetch_timeout_secs() -> u64 {
    10
}

fn default_refresh_interval_secs() -> u64 {
    3600
}

fn default_key_expiry_secs() -> u64 {
    12 * 3600
}

fn default_min_fetch_interval_secs() -> u64 {
    5
}

fn default_http_timeout_secs() -> u64 {
    10
}

fn default_identity_claim() -> String {
    "preferred_username".to_string()
}

fn default_name_claim() -> String {
    "name".to_string()
}

fn default_subject_claim() -> String {
    "sub".to_string()
}

fn default_fallback_subject_claim() -> String {
    "oid".to_string()
}

fn default_auth_context_claim() -> String {
    "azpacr".to_string()
}

fn default_allowed_auth_contexts() -> Vec<String> {
    vec!["1".to_string(), "2".to_string()]
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            allowed_algorithms: default_algorithms(),
            clock_skew_secs: default_clock_skew_secs(),
            skip_audience_check: false,
            key_fetch_timeout_secs: default_key_fetch_timeout_secs(),
        }
    }
}

impl VerificationConfig {
    /// Clock skew tolerance
    pub fn clock_skew(&self) -> Duration {
        Duration::from_secs(self.clock_skew_secs)
    }

    /// Key fetch timeout
    pub fn key_fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.key_fetch_timeout_secs)
    }
}

impl Default for KeyStoreConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: default_refresh_interval_secs(),
            key_expiry_secs: default_key_expiry_secs(),
            min_fetch_interval_secs: default_min_fetch_interval_secs(),
            http_timeout_secs: default_http_timeout_secs(),
        }
    }
}

impl KeyStoreConfig {
    /// Background refresh period
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    /// Maximum cached key age
    pub fn key_expiry(&self) -> Duration {
        Duration::from_secs(self.key_expiry_secs)
    }

    /// Negative-lookup throttle window
    pub fn min_fetch_interval(&self) -> Duration {
        Duration::from_secs(self.min_fetch_interval_secs)
    }

    /// HTTP request timeout
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// Check the refresh/expiry relationship
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidSchedule`] if any period is zero or the
    /// refresh interval is not shorter than the expiry window.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.refresh_interval_secs == 0 || self.key_expiry_secs == 0 {
            return Err(ConfigError::InvalidSchedule(
                "refresh interval and key expiry must be non-zero".to_string(),
            ));
        }
        if self.http_timeout_secs == 0 {
            return Err(ConfigError::InvalidSchedule(
                "HTTP timeout must be non-zero".to_string(),
            ));
        }
        // Keys still published must be refreshed before they age out
        if self.refresh_interval_secs >= self.key_expiry_secs {
            return Err(ConfigError::InvalidSchedule(format!(
                "refresh interval ({}s) must be shorter than key expiry ({}s)",
                self.refresh_interval_secs, self.key_expiry_secs
            )));
        }
        Ok(())
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            identity_claim: default_identity_claim(),
            name_claim: default_name_claim(),
            subject_claim: default_subject_claim(),
            fallback_subject_claim: default_fallback_subject_claim(),
            auth_context_claim: default_auth_context_claim(),
            allowed_auth_contexts: default_allowed_auth_contexts(),
        }
    }
}

impl OidcConfig {
    /// Create a configuration with defaults for everything but issuer and client ID
    pub fn new(issuer_url: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            issuer_url: issuer_url.into(),
            client_id: client_id.into(),
            verification: VerificationConfig::default(),
            key_store: KeyStoreConfig::default(),
            identity: IdentityConfig::default(),
        }
    }

    /// Load configuration from a file (TOML, YAML, or JSON)
    ///
    /// The format is chosen from the file extension. Environment variables with
    /// the `OIDC_` prefix override file settings, using `__` for nesting
    /// (`OIDC_KEY_STORE__KEY_EXPIRY_SECS`).
    ///
    /// # Errors
    ///
    /// Returns an error if the file doesn't exist, has an unsupported
    /// extension, or contains invalid configuration.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        use config::{Config, File, FileFormat};

        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }

        let format = match path.extension().and_then(|s| s.to_str()) {
            Some("toml") => FileFormat::Toml,
            Some("yaml") | Some("yml") => FileFormat::Yaml,
            Some("json") => FileFormat::Json,
            _ => return Err(ConfigError::UnsupportedFormat),
        };

        let config = Config::builder()
            .add_source(File::new(
                path.to_str().ok_or(ConfigError::UnsupportedFormat)?,
                format,
            ))
            .add_source(Self::environment())
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Load configuration from `OIDC_*` environment variables only
    ///
    /// # Errors
    ///
    /// Returns an error if required variables are missing or unparseable.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = config::Config::builder()
            .add_source(Self::environment())
            .build()?;

        Ok(config.try_deserialize()?)
    }

    fn environment() -> config::Environment {
        config::Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .try_parsing(true)
    }

    /// Validate the configuration before building anything from it
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.issuer_url.trim().is_empty() {
            return Err(ConfigError::MissingField("issuer_url"));
        }
        validate_issuer_url(&self.issuer_url)?;

        if !self.verification.skip_audience_check && self.client_id.trim().is_empty() {
            return Err(ConfigError::MissingField("client_id"));
        }

        let algorithms = &self.verification.allowed_algorithms;
        if algorithms.is_empty() {
            return Err(ConfigError::InvalidAlgorithms(
                "at least one algorithm must be allowed".to_string(),
            ));
        }
        if let Some(alg) = algorithms.iter().find(|alg| is_symmetric(**alg)) {
            return Err(ConfigError::InvalidAlgorithms(format!(
                "symmetric algorithm {alg:?} cannot verify issuer-signed tokens"
            )));
        }

        if self.verification.key_fetch_timeout_secs == 0 {
            return Err(ConfigError::InvalidSchedule(
                "key fetch timeout must be non-zero".to_string(),
            ));
        }

        self.key_store.validate()
    }
}

/// HMAC algorithms share one secret between signer and verifier
pub(crate) fn is_symmetric(alg: Algorithm) -> bool {
    matches!(alg, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512)
}

/// HTTPS only, except loopback hosts (local development and tests)
fn validate_issuer_url(issuer: &str) -> Result<(), ConfigError> {
    let url = Url::parse(issuer)
        .map_err(|e| ConfigError::InvalidIssuer(format!("{issuer}: {e}")))?;

    match url.scheme() {
        "https" => Ok(()),
        "http" if is_loopback(&url) => Ok(()),
        other => Err(ConfigError::InvalidIssuer(format!(
            "{issuer}: scheme '{other}' not allowed (HTTPS required)"
        ))),
    }
}

fn is_loopback(url: &Url) -> bool {
    match url.host() {
        Some(url::Host::Domain(domain)) => domain == "localhost",
        Some(url::Host::Ipv4(ip)) => ip.is_loopback(),
        Some(url::Host::Ipv6(ip)) => ip.is_loopback(),
        None => false,
    }
}
