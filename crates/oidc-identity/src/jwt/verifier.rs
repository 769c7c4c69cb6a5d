//! Staged token verification
//!
//! Every stage is a hard gate; the first failure aborts with its own
//! [`VerificationError`] variant:
//!
//! 1. Decode: three base64url segments, JSON header and payload
//! 2. Algorithm: the header `alg` must be on the server-side allow-list.
//!    `none` and HMAC algorithms are never accepted.
//! 3. Key: the header `kid` is resolved through the [`KeyStore`], bounded by a timeout
//! 4. Signature: checked with `jsonwebtoken` against the resolved key
//! 5. Claims: `iss`, `aud`, `exp`, `nbf`, `iat`
//!
//! The algorithm is never inferred from the token or the key; a token only
//! reaches key resolution once its declared algorithm has been allowed.

use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, Validation};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::claims::VerifiedClaims;
use super::decode_segments;
use crate::config::{OidcConfig, VerificationConfig, is_symmetric};
use crate::error::VerificationError;
use crate::keys::{KeyStore, SigningKey};
use crate::metrics;

/// Token verifier bound to one issuer and audience
///
/// # Example
///
/// ```rust,no_run
/// # use oidc_identity::jwt::TokenVerifier;
/// # use oidc_identity::keys::{KeyStore, RemoteKeySource};
/// # use oidc_identity::OidcConfig;
/// # use std::sync::Arc;
/// # tokio_test::block_on(async {
/// let config = OidcConfig::new("https://issuer.example.com", "my-client-id");
/// let source = RemoteKeySource::new(&config.issuer_url, config.key_store.http_timeout())?;
/// let store = KeyStore::new(Arc::new(source), config.key_store.clone());
/// let verifier = TokenVerifier::from_config(&config, store);
///
/// match verifier.verify("eyJ0eXAi...").await {
///     Ok(claims) => println!("token for {:?}", claims.subject()),
///     Err(e) => println!("rejected ({}): {e}", e.kind()),
/// }
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// # });
/// ```
#[derive(Debug)]
pub struct TokenVerifier {
    /// Expected `iss`
    issuer: String,
    /// Expected member of `aud`
    client_id: String,
    /// Algorithm allow-list, skew, timeout
    settings: VerificationConfig,
    /// Signing key cache
    key_store: Arc<KeyStore>,
}

impl TokenVerifier {
    /// Create a verifier
    pub fn new(
        issuer: impl Into<String>,
        client_id: impl Into<String>,
        settings: VerificationConfig,
        key_store: Arc<KeyStore>,
    ) -> Self {
        Self {
            issuer: issuer.into(),
            client_id: client_id.into(),
            settings,
            key_store,
        }
    }

    /// Create a verifier from the issuer, client ID, and verification settings of `config`
    pub fn from_config(config: &OidcConfig, key_store: Arc<KeyStore>) -> Self {
        Self::new(
            config.issuer_url.clone(),
            config.client_id.clone(),
            config.verification.clone(),
            key_store,
        )
    }

    /// Expected issuer
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Expected audience
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Key store consulted for signing keys
    pub fn key_store(&self) -> &Arc<KeyStore> {
        &self.key_store
    }

    /// Verify a raw token, waiting at most the configured key-fetch timeout for keys
    ///
    /// # Errors
    ///
    /// Returns the [`VerificationError`] of the first stage that fails.
    pub async fn verify(&self, raw_token: &str) -> Result<VerifiedClaims, VerificationError> {
        self.verify_with_timeout(raw_token, self.settings.key_fetch_timeout())
            .await
    }

    /// Verify a raw token, waiting at most `timeout` for key resolution
    ///
    /// If the key fetch hangs past `timeout` the attempt is abandoned with
    /// [`VerificationError::KeyFetchTimeout`]. The fetch keeps running only
    /// while other lookups still await it; otherwise it is dropped and the
    /// next verification starts a new one.
    ///
    /// # Errors
    ///
    /// Returns the [`VerificationError`] of the first stage that fails.
    pub async fn verify_with_timeout(
        &self,
        raw_token: &str,
        timeout: Duration,
    ) -> Result<VerifiedClaims, VerificationError> {
        let started = Instant::now();
        let result = self.run_pipeline(raw_token, timeout).await;
        let elapsed = started.elapsed().as_secs_f64();

        match &result {
            Ok(claims) => {
                metrics::record_verification("success", elapsed);
                debug!(
                    issuer = %self.issuer,
                    subject = ?claims.subject(),
                    "Token verified"
                );
            }
            Err(e) => {
                metrics::record_verification(e.kind(), elapsed);
                warn!(
                    issuer = %self.issuer,
                    reason = e.kind(),
                    error = %e,
                    "Token verification failed"
                );
            }
        }

        result
    }

    async fn run_pipeline(
        &self,
        raw_token: &str,
        timeout: Duration,
    ) -> Result<VerifiedClaims, VerificationError> {
        let decoded = decode_segments(raw_token)?;
        let header = decoded.header;

        let algorithm = self.check_algorithm(&header.algorithm)?;

        let key_id = header
            .key_id
            .as_deref()
            .filter(|kid| !kid.is_empty())
            .ok_or(VerificationError::MissingKeyId)?;

        let key = self.resolve_key(key_id, timeout).await?;

        if let Some(published) = key.algorithm()
            && published != algorithm
        {
            return Err(VerificationError::UnsupportedAlgorithm(format!(
                "token declares {algorithm:?} but key '{key_id}' is published for {published:?}"
            )));
        }

        let claims = verify_signature(raw_token, &key, algorithm)?;
        self.check_claims(&claims, unix_now())?;
        Ok(claims)
    }

    /// Map the header `alg` onto the allow-list
    fn check_algorithm(&self, declared: &str) -> Result<Algorithm, VerificationError> {
        let algorithm = Algorithm::from_str(declared)
            .map_err(|_| VerificationError::UnsupportedAlgorithm(declared.to_string()))?;

        if is_symmetric(algorithm) || !self.settings.allowed_algorithms.contains(&algorithm) {
            return Err(VerificationError::UnsupportedAlgorithm(declared.to_string()));
        }
        Ok(algorithm)
    }

    async fn resolve_key(
        &self,
        key_id: &str,
        timeout: Duration,
    ) -> Result<SigningKey, VerificationError> {
        match tokio::time::timeout(timeout, self.key_store.lookup(key_id)).await {
            Ok(lookup) => {
                lookup?.ok_or_else(|| VerificationError::UnknownSigningKey(key_id.to_string()))
            }
            Err(_) => Err(VerificationError::KeyFetchTimeout(timeout)),
        }
    }

    /// `iss`, `aud`, and lifetime checks against `now` (seconds since the epoch)
    fn check_claims(&self, claims: &VerifiedClaims, now: i64) -> Result<(), VerificationError> {
        match claims.issuer() {
            Some(issuer) if issuer == self.issuer => {}
            found => {
                return Err(VerificationError::IssuerMismatch {
                    expected: self.issuer.clone(),
                    found: found.map(str::to_string),
                });
            }
        }

        if !self.settings.skip_audience_check
            && !claims.audiences().contains(&self.client_id.as_str())
        {
            return Err(VerificationError::AudienceMismatch {
                expected: self.client_id.clone(),
            });
        }

        let skew = i64::try_from(self.settings.clock_skew_secs).unwrap_or(i64::MAX);

        let expires_at = claims.expires_at().ok_or(VerificationError::TokenExpired)?;
        if now >= expires_at.saturating_add(skew) {
            return Err(VerificationError::TokenExpired);
        }

        for not_before in [claims.not_before(), claims.issued_at()].into_iter().flatten() {
            if not_before > now.saturating_add(skew) {
                return Err(VerificationError::TokenNotYetValid);
            }
        }

        Ok(())
    }
}

/// Signature check only; claim checks are done separately with typed errors
fn verify_signature(
    raw_token: &str,
    key: &SigningKey,
    algorithm: Algorithm,
) -> Result<VerifiedClaims, VerificationError> {
    let mut validation = Validation::new(algorithm);
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    let data = jsonwebtoken::decode::<Map<String, Value>>(raw_token, key.decoding_key(), &validation)
        .map_err(|e| match e.kind() {
            ErrorKind::InvalidAlgorithm => {
                VerificationError::UnsupportedAlgorithm(format!("{algorithm:?}"))
            }
            ErrorKind::InvalidToken
            | ErrorKind::Base64(_)
            | ErrorKind::Json(_)
            | ErrorKind::Utf8(_) => VerificationError::MalformedToken(e.to_string()),
            // Bad signature or key material that cannot verify it
            _ => VerificationError::InvalidSignature,
        })?;

    Ok(VerifiedClaims::from_verified(data.claims))
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}
