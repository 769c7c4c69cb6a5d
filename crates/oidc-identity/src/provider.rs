//! OIDC identity provider
//!
//! Assembles a [`KeyStore`], [`TokenVerifier`], and [`ClaimsResolver`] from
//! one [`OidcConfig`] and exposes the combined "raw token in, user out" call
//! that an authentication layer sits on.

use std::sync::Arc;

use tracing::info;

use crate::config::OidcConfig;
use crate::error::{Error, Result};
use crate::identity::{ClaimsResolver, User};
use crate::jwt::{TokenVerifier, VerifiedClaims};
use crate::keys::{KeySource, KeyStore, RemoteKeySource};

/// Provider name reported by [`OidcProvider::name`]
pub const PROVIDER_NAME: &str = "oidc";

/// Verifies bearer tokens from one issuer and resolves them into users
///
/// # Example
///
/// ```rust,no_run
/// use oidc_identity::{OidcConfig, OidcProvider};
///
/// # tokio_test::block_on(async {
/// let config = OidcConfig::new(
///     "https://login.microsoftonline.com/9188040d-6c67-4c5b-b112-36a304b66dad/v2.0",
///     "3dd21f62-c836-4689-84f6-6780958cf002",
/// );
/// let provider = OidcProvider::setup(config)?;
///
/// let user = provider.get_user("eyJ0eXAi...").await?;
/// println!("signed in as {}", user.email);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// # });
/// ```
#[derive(Debug)]
pub struct OidcProvider {
    config: OidcConfig,
    key_store: Arc<KeyStore>,
    verifier: TokenVerifier,
    resolver: ClaimsResolver,
}

impl OidcProvider {
    /// Build a provider that fetches keys from the issuer's discovery endpoint
    ///
    /// Starts the key store's background refresh task when called inside a
    /// Tokio runtime. No network call is made until the first token arrives.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the configuration is invalid, or
    /// [`Error::Verification`] if the HTTP client cannot be created.
    pub fn setup(config: OidcConfig) -> Result<Self> {
        config.validate()?;
        let source = RemoteKeySource::new(&config.issuer_url, config.key_store.http_timeout())
            .map_err(|e| Error::Verification(e.into()))?;
        Self::assemble(config, Arc::new(source))
    }

    /// Build a provider around a caller-supplied key source
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the configuration is invalid.
    pub fn with_key_source(config: OidcConfig, source: Arc<dyn KeySource>) -> Result<Self> {
        config.validate()?;
        Self::assemble(config, source)
    }

    fn assemble(config: OidcConfig, source: Arc<dyn KeySource>) -> Result<Self> {
        let key_store = KeyStore::new(source, config.key_store.clone());
        let verifier = TokenVerifier::from_config(&config, Arc::clone(&key_store));
        let resolver = ClaimsResolver::new(config.identity.clone());

        info!(
            issuer = %config.issuer_url,
            client_id = %config.client_id,
            algorithms = ?config.verification.allowed_algorithms,
            "OIDC provider configured"
        );

        Ok(Self {
            config,
            key_store,
            verifier,
            resolver,
        })
    }

    /// Provider name
    pub fn name(&self) -> &str {
        PROVIDER_NAME
    }

    /// Configuration the provider was built from
    pub fn config(&self) -> &OidcConfig {
        &self.config
    }

    /// The underlying key store
    pub fn key_store(&self) -> &Arc<KeyStore> {
        &self.key_store
    }

    /// The underlying verifier
    pub fn verifier(&self) -> &TokenVerifier {
        &self.verifier
    }

    /// The underlying resolver
    pub fn resolver(&self) -> &ClaimsResolver {
        &self.resolver
    }

    /// Verify a raw token and return its claims
    ///
    /// # Errors
    ///
    /// Returns [`Error::Verification`] if any verification stage fails.
    pub async fn verify(&self, raw_token: &str) -> Result<VerifiedClaims> {
        Ok(self.verifier.verify(raw_token).await?)
    }

    /// Verify a raw token and resolve it into a user
    ///
    /// # Errors
    ///
    /// Returns [`Error::Verification`] if the token is rejected, or
    /// [`Error::Resolution`] if it verified but carries no usable identity.
    pub async fn get_user(&self, raw_token: &str) -> Result<User> {
        let claims = self.verifier.verify(raw_token).await?;
        Ok(self.resolver.resolve(&claims)?)
    }

    /// Stop background key refresh
    pub fn shutdown(&self) {
        self.key_store.shutdown();
    }
}
