//! Error types for token verification, key fetching, and identity resolution
//!
//! Every failure is terminal for the call that produced it. Nothing here is
//! retried internally; callers decide whether a failure warrants a retry by
//! looking at [`ErrorCategory`].

use std::time::Duration;

use thiserror::Error;

use crate::config::ConfigError;

/// Coarse classification of a failure, for logging and alerting
///
/// Access-denial decisions belong to the caller; this only tells them what
/// kind of problem they are looking at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// The token is malformed, forged, stale, or meant for someone else
    Rejected,
    /// Key material could not be obtained (transient, worth retrying later)
    Infrastructure,
    /// The token verified but no application identity could be derived
    Identity,
    /// The local configuration is unusable
    Configuration,
}

/// Key source failures
///
/// `Clone` so that a single coalesced fetch can hand the same outcome to
/// every waiter.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KeyFetchError {
    /// Discovery document could not be fetched or was inconsistent
    #[error("OIDC discovery failed: {0}")]
    Discovery(String),

    /// HTTP transport failed
    #[error("Key set request failed: {0}")]
    Http(String),

    /// Endpoint answered with a non-success status
    #[error("Key set endpoint returned status {0}")]
    Status(u16),

    /// Response body was not a usable JWK set
    #[error("Invalid key set: {0}")]
    InvalidKeySet(String),

    /// The fetch did not finish in time
    #[error("Key fetch timed out after {0:?}")]
    Timeout(Duration),
}

/// Token verification failures, one variant per pipeline gate
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VerificationError {
    /// Wrong segment count, bad base64url, or bad JSON
    #[error("Malformed token: {0}")]
    MalformedToken(String),

    /// Header algorithm is not on the allow-list (or is `none`/symmetric)
    #[error("Unsupported signing algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// Header carries no `kid`
    #[error("Token header has no key ID")]
    MissingKeyId,

    /// No published key matches the header `kid`
    #[error("No signing key published for key ID '{0}'")]
    UnknownSigningKey(String),

    /// Signature does not verify against the resolved key
    #[error("Invalid token signature")]
    InvalidSignature,

    /// `iss` differs from the configured issuer
    #[error("Issuer mismatch: expected '{expected}', found {found:?}")]
    IssuerMismatch {
        /// Configured issuer
        expected: String,
        /// Issuer carried by the token, if any
        found: Option<String>,
    },

    /// `aud` does not contain the configured client ID
    #[error("Audience mismatch: token is not intended for '{expected}'")]
    AudienceMismatch {
        /// Configured client ID
        expected: String,
    },

    /// `exp` is in the past (or absent)
    #[error("Token expired")]
    TokenExpired,

    /// `nbf` or `iat` is in the future beyond the skew tolerance
    #[error("Token not yet valid")]
    TokenNotYetValid,

    /// Key fetch exceeded the caller's timeout
    #[error("Timed out fetching signing keys after {0:?}")]
    KeyFetchTimeout(Duration),

    /// Key fetch failed outright
    #[error("Failed to fetch signing keys: {0}")]
    KeyFetchFailed(#[source] KeyFetchError),
}

impl VerificationError {
    /// Classify this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::KeyFetchTimeout(_) | Self::KeyFetchFailed(_) => ErrorCategory::Infrastructure,
            _ => ErrorCategory::Rejected,
        }
    }

    /// Short stable label, used for metrics and structured logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MalformedToken(_) => "malformed_token",
            Self::UnsupportedAlgorithm(_) => "unsupported_algorithm",
            Self::MissingKeyId => "missing_key_id",
            Self::UnknownSigningKey(_) => "unknown_signing_key",
            Self::InvalidSignature => "invalid_signature",
            Self::IssuerMismatch { .. } => "issuer_mismatch",
            Self::AudienceMismatch { .. } => "audience_mismatch",
            Self::TokenExpired => "token_expired",
            Self::TokenNotYetValid => "token_not_yet_valid",
            Self::KeyFetchTimeout(_) => "key_fetch_timeout",
            Self::KeyFetchFailed(_) => "key_fetch_failed",
        }
    }
}

impl From<KeyFetchError> for VerificationError {
    fn from(err: KeyFetchError) -> Self {
        match err {
            KeyFetchError::Timeout(after) => Self::KeyFetchTimeout(after),
            other => Self::KeyFetchFailed(other),
        }
    }
}

/// Claims-to-user resolution failures
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolutionError {
    /// Identity claim is blank and the client authentication method does not
    /// justify the subject fallback
    #[error("Invalid client authentication context: {0:?}")]
    InvalidAuthContext(Option<String>),

    /// Neither the identity claim nor the fallback subject claim is usable
    #[error("No usable identity claim in token")]
    MissingIdentity,
}

impl ResolutionError {
    /// Classify this error
    pub fn category(&self) -> ErrorCategory {
        ErrorCategory::Identity
    }
}

/// Crate-level error returned by [`crate::OidcProvider`]
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration rejected
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Token failed verification
    #[error(transparent)]
    Verification(#[from] VerificationError),

    /// Verified claims could not be mapped to a user
    #[error(transparent)]
    Resolution(#[from] ResolutionError),
}

impl Error {
    /// Classify this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Config(_) => ErrorCategory::Configuration,
            Self::Verification(e) => e.category(),
            Self::Resolution(e) => e.category(),
        }
    }
}

/// Result alias for provider-level operations
pub type Result<T> = std::result::Result<T, Error>;
