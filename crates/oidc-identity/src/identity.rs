//! Mapping verified claims onto an application user
//!
//! Interactive sign-ins carry a human identity claim (`preferred_username` by
//! default) that becomes [`User::email`]. Service principals authenticating
//! with client credentials carry none; for them the stable object ID (`oid`)
//! is substituted, but only when the client authentication method (`azpacr`)
//! shows a client secret ("1") or certificate ("2") was used.
//!
//! A claim counts as blank when it is absent, not a string, or the empty
//! string. Whitespace is not trimmed.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::IdentityConfig;
use crate::error::ResolutionError;
use crate::jwt::VerifiedClaims;
use crate::metrics;

/// Application-level identity derived from verified claims
///
/// `email` is never empty on a successfully resolved user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct User {
    /// Human identity claim, or the stable subject ID for service principals
    pub email: String,
    /// Display name (empty if the token carries none)
    pub name: String,
    /// Issuer-scoped subject identifier (empty if the token carries none)
    pub subject_id: String,
}

/// Resolves [`VerifiedClaims`] into a [`User`]
#[derive(Debug, Clone, Default)]
pub struct ClaimsResolver {
    config: IdentityConfig,
}

impl ClaimsResolver {
    /// Create a resolver with the given claim names and fallback policy
    pub fn new(config: IdentityConfig) -> Self {
        Self { config }
    }

    /// Claim names and fallback policy in use
    pub fn config(&self) -> &IdentityConfig {
        &self.config
    }

    /// Resolve verified claims into a user
    ///
    /// # Errors
    ///
    /// - [`ResolutionError::InvalidAuthContext`] if the identity claim is blank
    ///   and the auth context claim is not one of the allowed values
    /// - [`ResolutionError::MissingIdentity`] if the fallback is allowed but the
    ///   fallback subject claim is blank as well
    pub fn resolve(&self, claims: &VerifiedClaims) -> Result<User, ResolutionError> {
        let name = non_blank(claims, &self.config.name_claim).unwrap_or_default();
        let subject_id = non_blank(claims, &self.config.subject_claim).unwrap_or_default();

        if let Some(email) = non_blank(claims, &self.config.identity_claim) {
            metrics::record_resolution("primary");
            debug!(subject_id = %subject_id, "Resolved user from identity claim");
            return Ok(User {
                email: email.to_string(),
                name: name.to_string(),
                subject_id: subject_id.to_string(),
            });
        }

        let auth_context = claims.get_str(&self.config.auth_context_claim);
        let fallback_allowed = auth_context.is_some_and(|ctx| {
            self.config
                .allowed_auth_contexts
                .iter()
                .any(|allowed| allowed == ctx)
        });
        if !fallback_allowed {
            metrics::record_resolution("invalid_auth_context");
            warn!(
                auth_context = ?auth_context,
                claim = %self.config.auth_context_claim,
                "Identity claim blank and auth context does not permit fallback"
            );
            return Err(ResolutionError::InvalidAuthContext(
                auth_context.map(str::to_string),
            ));
        }

        let Some(fallback) = non_blank(claims, &self.config.fallback_subject_claim) else {
            metrics::record_resolution("missing_identity");
            warn!(
                claim = %self.config.fallback_subject_claim,
                "Identity and fallback subject claims are both blank"
            );
            return Err(ResolutionError::MissingIdentity);
        };

        metrics::record_resolution("fallback");
        debug!(
            subject_id = %subject_id,
            auth_context = ?auth_context,
            "Resolved service principal from fallback subject claim"
        );
        Ok(User {
            email: fallback.to_string(),
            name: name.to_string(),
            subject_id: subject_id.to_string(),
        })
    }
}

fn non_blank<'a>(claims: &'a VerifiedClaims, name: &str) -> Option<&'a str> {
    claims.get_str(name).filter(|value| !value.is_empty())
}
