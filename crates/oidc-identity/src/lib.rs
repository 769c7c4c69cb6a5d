//! # OIDC Identity - Token Verification and User Resolution
//!
//! Verifies OpenID Connect ID tokens against an issuer's rotating signing keys,
//! then resolves the verified claims into a stable application-level [`User`].
//!
//! ## Design Principles
//!
//! - **Fail Closed**: every verification stage is a hard gate with its own error
//! - **Server-Side Algorithm Policy**: the allow-list decides, never the token
//! - **Explicit Key Store**: no process-wide cache; inject fake key sources in tests
//! - **Typed Claims**: absent, wrong-type, and empty claims are handled by one rule
//!
//! ## Architecture
//!
//! - [`keys`] - Key discovery, fetching, and the caching [`KeyStore`]
//!   - `discovery` - issuer URL to JWKS URI
//!   - `source` - [`KeySource`] seam and [`RemoteKeySource`]
//!   - `store` - lazy fetch, coalescing, expiry, background refresh
//! - [`jwt`] - Header decoding, [`VerifiedClaims`], and the [`TokenVerifier`] pipeline
//! - [`identity`] - [`ClaimsResolver`] and the [`User`] it produces
//! - [`provider`] - [`OidcProvider`], assembling all of the above from an [`OidcConfig`]
//! - [`config`] - Configuration types, file and environment loading
//! - [`error`] - Error taxonomy and [`ErrorCategory`]
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use oidc_identity::{ErrorCategory, OidcConfig, OidcProvider};
//!
//! # tokio_test::block_on(async {
//! let config = OidcConfig::new("https://issuer.example.com", "my-client-id");
//! let provider = OidcProvider::setup(config)?;
//!
//! # let bearer = "eyJ0eXAi...";
//! match provider.get_user(bearer).await {
//!     Ok(user) => println!("{} ({})", user.email, user.subject_id),
//!     Err(e) if e.category() == ErrorCategory::Infrastructure => {
//!         eprintln!("could not reach the issuer, try again: {e}")
//!     }
//!     Err(e) => eprintln!("rejected: {e}"),
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```
//!
//! ## Feature Flags
//!
//! - `metrics` - Counters and histograms through the `metrics` facade
//!
//! ## Standards Compliance
//!
//! - **RFC 7515** - JSON Web Signature (JWS)
//! - **RFC 7517** - JSON Web Key (JWK)
//! - **RFC 7519** - JSON Web Token (JWT)
//! - **RFC 8725** - JWT Best Current Practices (algorithm allow-listing)
//! - **OpenID Connect Discovery 1.0**

// Submodules
pub mod config;
pub mod error;
pub mod identity;
pub mod jwt;
pub mod keys;
pub mod metrics;
pub mod provider;

// Re-export configuration types
#[doc(inline)]
pub use crate::config::{ConfigError, IdentityConfig, KeyStoreConfig, OidcConfig, VerificationConfig};

// Re-export error types
#[doc(inline)]
pub use error::{Error, ErrorCategory, KeyFetchError, ResolutionError, Result, VerificationError};

// Re-export the verification pipeline
#[doc(inline)]
pub use identity::{ClaimsResolver, User};
#[doc(inline)]
pub use jwt::{TokenHeader, TokenVerifier, VerifiedClaims};
#[doc(inline)]
pub use keys::{KeySource, KeyStore, RemoteKeySource, SigningKey};
#[doc(inline)]
pub use provider::OidcProvider;

pub use crate::metrics::init_metrics;

/// Signing algorithm identifiers used in configuration
pub use jsonwebtoken::Algorithm;
