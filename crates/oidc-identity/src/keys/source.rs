//! Signing keys and where they come from
//!
//! [`KeySource`] is the seam between the [`KeyStore`](super::KeyStore) and the
//! network. [`RemoteKeySource`] is the production implementation: OIDC
//! discovery followed by a JWKS fetch. Tests substitute their own sources.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use jsonwebtoken::jwk::{Jwk, KeyAlgorithm, PublicKeyUse};
use jsonwebtoken::{Algorithm, DecodingKey};
use serde::Deserialize;
use tokio::sync::OnceCell;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::discovery;
use crate::error::KeyFetchError;

/// A published verification key
///
/// Immutable once built. Cloning is cheap; clones share the key material.
#[derive(Clone)]
pub struct SigningKey {
    key_id: String,
    algorithm: Option<Algorithm>,
    material: Arc<DecodingKey>,
}

// Manual Debug impl: key material is not printable and not useful in logs
impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKey")
            .field("key_id", &self.key_id)
            .field("algorithm", &self.algorithm)
            .field("material", &"<public key>")
            .finish()
    }
}

/// Two keys are equal when they are the same installed key, not merely the same ID
impl PartialEq for SigningKey {
    fn eq(&self, other: &Self) -> bool {
        self.key_id == other.key_id
            && self.algorithm == other.algorithm
            && Arc::ptr_eq(&self.material, &other.material)
    }
}

impl SigningKey {
    /// Create a signing key from already-decoded material
    pub fn new(key_id: impl Into<String>, algorithm: Option<Algorithm>, material: DecodingKey) -> Self {
        Self {
            key_id: key_id.into(),
            algorithm,
            material: Arc::new(material),
        }
    }

    /// Build a key from an RSA modulus/exponent pair (base64url, as in a JWK)
    ///
    /// # Errors
    ///
    /// Returns [`KeyFetchError::InvalidKeySet`] if the components do not decode.
    pub fn from_rsa_components(
        key_id: impl Into<String>,
        algorithm: Option<Algorithm>,
        modulus: &str,
        exponent: &str,
    ) -> Result<Self, KeyFetchError> {
        let material = DecodingKey::from_rsa_components(modulus, exponent)
            .map_err(|e| KeyFetchError::InvalidKeySet(format!("invalid RSA components: {e}")))?;
        Ok(Self::new(key_id, algorithm, material))
    }

    /// Build a key from a JWK
    ///
    /// # Errors
    ///
    /// Returns [`KeyFetchError::InvalidKeySet`] if the JWK has no `kid`, is
    /// marked for encryption, or its material cannot be decoded.
    pub fn from_jwk(jwk: &Jwk) -> Result<Self, KeyFetchError> {
        let key_id = jwk
            .common
            .key_id
            .clone()
            .ok_or_else(|| KeyFetchError::InvalidKeySet("JWK has no kid".to_string()))?;

        if matches!(jwk.common.public_key_use, Some(PublicKeyUse::Encryption)) {
            return Err(KeyFetchError::InvalidKeySet(format!(
                "JWK '{key_id}' is an encryption key"
            )));
        }

        let algorithm = jwk.common.key_algorithm.clone().and_then(signing_algorithm);

        let material = DecodingKey::from_jwk(jwk).map_err(|e| {
            KeyFetchError::InvalidKeySet(format!("JWK '{key_id}' has unusable material: {e}"))
        })?;

        Ok(Self::new(key_id, algorithm, material))
    }

    /// Key identifier (`kid`)
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Algorithm the key is published for, if the JWK declared one
    pub fn algorithm(&self) -> Option<Algorithm> {
        self.algorithm
    }

    /// Verification key material
    pub fn decoding_key(&self) -> &DecodingKey {
        &self.material
    }
}

/// JWK `alg` values that name a JWS signing algorithm
fn signing_algorithm(alg: KeyAlgorithm) -> Option<Algorithm> {
    match alg {
        KeyAlgorithm::HS256 => Some(Algorithm::HS256),
        KeyAlgorithm::HS384 => Some(Algorithm::HS384),
        KeyAlgorithm::HS512 => Some(Algorithm::HS512),
        KeyAlgorithm::ES256 => Some(Algorithm::ES256),
        KeyAlgorithm::ES384 => Some(Algorithm::ES384),
        KeyAlgorithm::RS256 => Some(Algorithm::RS256),
        KeyAlgorithm::RS384 => Some(Algorithm::RS384),
        KeyAlgorithm::RS512 => Some(Algorithm::RS512),
        KeyAlgorithm::PS256 => Some(Algorithm::PS256),
        KeyAlgorithm::PS384 => Some(Algorithm::PS384),
        KeyAlgorithm::PS512 => Some(Algorithm::PS512),
        KeyAlgorithm::EdDSA => Some(Algorithm::EdDSA),
        _ => None,
    }
}

/// Something that can produce the issuer's current set of signing keys
#[async_trait]
pub trait KeySource: Send + Sync {
    /// Fetch the full published key set
    ///
    /// # Errors
    ///
    /// Returns a [`KeyFetchError`] when the keys cannot be obtained. The
    /// store surfaces this to its caller and does not retry.
    async fn fetch_keys(&self) -> Result<Vec<SigningKey>, KeyFetchError>;
}

/// Raw JWKS document; keys are decoded one at a time so that a single
/// unsupported key does not poison the whole set
#[derive(Debug, Deserialize)]
struct RawJwkSet {
    keys: Vec<serde_json::Value>,
}

/// Key source backed by the issuer's discovery document and JWKS endpoint
///
/// # Example
///
/// ```rust,no_run
/// # use oidc_identity::keys::{KeySource, RemoteKeySource};
/// # use std::time::Duration;
/// # tokio_test::block_on(async {
/// let source = RemoteKeySource::new(
///     "https://login.microsoftonline.com/common/v2.0",
///     Duration::from_secs(10),
/// )?;
///
/// let keys = source.fetch_keys().await?;
/// println!("issuer publishes {} keys", keys.len());
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// # });
/// ```
pub struct RemoteKeySource {
    /// Issuer URL used for discovery
    issuer: String,
    /// HTTP client
    http_client: reqwest::Client,
    /// Per-request timeout the client was built with
    http_timeout: Duration,
    /// JWKS URI (discovered once, then reused)
    jwks_uri: OnceCell<String>,
}

impl std::fmt::Debug for RemoteKeySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteKeySource")
            .field("issuer", &self.issuer)
            .field("jwks_uri", &self.jwks_uri.get())
            .field("http_timeout", &self.http_timeout)
            .finish()
    }
}

impl RemoteKeySource {
    /// Create a key source that discovers the JWKS URI from the issuer
    ///
    /// # Errors
    ///
    /// Returns [`KeyFetchError::Http`] if the HTTP client cannot be built.
    pub fn new(issuer: impl Into<String>, http_timeout: Duration) -> Result<Self, KeyFetchError> {
        Ok(Self {
            issuer: issuer.into(),
            http_client: build_http_client(http_timeout)?,
            http_timeout,
            jwks_uri: OnceCell::new(),
        })
    }

    /// Create a key source with a known JWKS URI (no discovery roundtrip)
    ///
    /// # Errors
    ///
    /// Returns [`KeyFetchError::Http`] if the HTTP client cannot be built.
    pub fn with_jwks_uri(
        issuer: impl Into<String>,
        jwks_uri: impl Into<String>,
        http_timeout: Duration,
    ) -> Result<Self, KeyFetchError> {
        Ok(Self {
            issuer: issuer.into(),
            http_client: build_http_client(http_timeout)?,
            http_timeout,
            jwks_uri: OnceCell::new_with(Some(jwks_uri.into())),
        })
    }

    /// Issuer this source serves
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// The JWKS URI, discovering it on first use
    ///
    /// # Errors
    ///
    /// Returns [`KeyFetchError::Discovery`] if discovery fails, or
    /// [`KeyFetchError::Timeout`] if it exceeds the HTTP timeout. A failed
    /// discovery is not cached; the next call tries again.
    pub async fn jwks_uri(&self) -> Result<&str, KeyFetchError> {
        self.jwks_uri
            .get_or_try_init(|| async {
                discovery::fetch_document(&self.http_client, &self.issuer, self.http_timeout)
                    .await
                    .map(|doc| doc.jwks_uri)
            })
            .await
            .map(String::as_str)
    }

    /// Fetch the key set, allowing the request at most `budget`
    async fn fetch_jwks(
        &self,
        jwks_uri: &str,
        budget: Duration,
    ) -> Result<Vec<SigningKey>, KeyFetchError> {
        info!(jwks_uri = %jwks_uri, "Fetching JWKS from endpoint");

        let response = self
            .http_client
            .get(jwks_uri)
            .header(reqwest::header::ACCEPT, "application/json")
            .timeout(budget)
            .send()
            .await
            .map_err(|e| {
                error!(jwks_uri = %jwks_uri, error = %e, "Failed to fetch JWKS");
                if e.is_timeout() {
                    KeyFetchError::Timeout(self.http_timeout)
                } else {
                    KeyFetchError::Http(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            error!(jwks_uri = %jwks_uri, status = %status, "JWKS endpoint returned error status");
            return Err(KeyFetchError::Status(status.as_u16()));
        }

        let raw: RawJwkSet = response.json().await.map_err(|e| {
            error!(jwks_uri = %jwks_uri, error = %e, "Failed to parse JWKS JSON");
            if e.is_timeout() {
                KeyFetchError::Timeout(self.http_timeout)
            } else {
                KeyFetchError::InvalidKeySet(e.to_string())
            }
        })?;

        let published = raw.keys.len();
        let keys: Vec<SigningKey> = raw
            .keys
            .into_iter()
            .filter_map(|value| {
                let decoded = serde_json::from_value::<Jwk>(value)
                    .map_err(|e| KeyFetchError::InvalidKeySet(e.to_string()))
                    .and_then(|jwk| SigningKey::from_jwk(&jwk));
                match decoded {
                    Ok(key) => Some(key),
                    Err(e) => {
                        warn!(jwks_uri = %jwks_uri, error = %e, "Skipping unusable JWK");
                        None
                    }
                }
            })
            .collect();

        if keys.is_empty() {
            warn!(jwks_uri = %jwks_uri, published, "JWKS contains no usable signing keys");
        } else {
            info!(
                jwks_uri = %jwks_uri,
                published,
                usable = keys.len(),
                "Successfully fetched JWKS"
            );
        }

        Ok(keys)
    }
}

/// Discovery and the key set request share one `http_timeout` deadline
#[async_trait]
impl KeySource for RemoteKeySource {
    async fn fetch_keys(&self) -> Result<Vec<SigningKey>, KeyFetchError> {
        let deadline = Instant::now() + self.http_timeout;
        let jwks_uri = self.jwks_uri().await?;
        debug!(issuer = %self.issuer, jwks_uri = %jwks_uri, "Resolved JWKS URI");

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            warn!(issuer = %self.issuer, "HTTP timeout spent on discovery, not fetching JWKS");
            return Err(KeyFetchError::Timeout(self.http_timeout));
        }
        self.fetch_jwks(jwks_uri, remaining).await
    }
}

fn build_http_client(timeout: Duration) -> Result<reqwest::Client, KeyFetchError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(format!("oidc-identity/{}", env!("CARGO_PKG_VERSION")))
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .map_err(|e| KeyFetchError::Http(format!("Failed to create HTTP client: {e}")))
}
