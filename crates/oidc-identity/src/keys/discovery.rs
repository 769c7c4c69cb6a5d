//! OpenID Connect Discovery 1.0
//!
//! Resolves an issuer URL to its provider metadata, of which the key store
//! only needs `jwks_uri`. The document's `issuer` must equal the configured
//! issuer exactly, so a misconfigured or hijacked discovery endpoint cannot
//! point verification at someone else's keys.

use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::KeyFetchError;

/// Well-known path appended to the issuer
pub const WELL_KNOWN_PATH: &str = "/.well-known/openid-configuration";

/// The subset of the OIDC provider metadata this crate reads
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DiscoveryDocument {
    /// REQUIRED. Issuer identifier; must match the configured issuer
    pub issuer: String,
    /// REQUIRED. JWK Set document URL
    pub jwks_uri: String,
    /// Authorization endpoint (used by the excluded OAuth2 flow)
    #[serde(default)]
    pub authorization_endpoint: Option<String>,
    /// Token endpoint (used by the excluded OAuth2 flow)
    #[serde(default)]
    pub token_endpoint: Option<String>,
    /// ID token signing algorithms the provider advertises
    #[serde(default)]
    pub id_token_signing_alg_values_supported: Vec<String>,
}

/// Discovery URL for an issuer (`{issuer}/.well-known/openid-configuration`)
pub fn discovery_url(issuer: &str) -> String {
    format!("{}{}", issuer.trim_end_matches('/'), WELL_KNOWN_PATH)
}

/// Fetch and check the discovery document for `issuer` within `timeout`
///
/// # Errors
///
/// Returns [`KeyFetchError::Timeout`] if the document is not received within
/// `timeout`. Returns [`KeyFetchError::Discovery`] if the request fails, the
/// endpoint returns a non-success status, the body is not a discovery
/// document, or the document names a different issuer.
pub async fn fetch_document(
    client: &reqwest::Client,
    issuer: &str,
    timeout: Duration,
) -> Result<DiscoveryDocument, KeyFetchError> {
    let url = discovery_url(issuer);
    debug!(issuer = issuer, discovery_url = %url, "Attempting OIDC discovery");

    let response = client
        .get(&url)
        .header(reqwest::header::ACCEPT, "application/json")
        .timeout(timeout)
        .send()
        .await
        .map_err(|e| {
            warn!(issuer = issuer, error = %e, "Failed to fetch OIDC discovery document");
            if e.is_timeout() {
                KeyFetchError::Timeout(timeout)
            } else {
                KeyFetchError::Discovery(format!("request to {url} failed: {e}"))
            }
        })?;

    let status = response.status();
    if !status.is_success() {
        warn!(issuer = issuer, status = %status, "OIDC discovery endpoint returned error status");
        return Err(KeyFetchError::Discovery(format!(
            "{url} returned status {status}"
        )));
    }

    let document: DiscoveryDocument = response.json().await.map_err(|e| {
        warn!(issuer = issuer, error = %e, "Failed to parse OIDC discovery document");
        if e.is_timeout() {
            KeyFetchError::Timeout(timeout)
        } else {
            KeyFetchError::Discovery(format!("invalid discovery document: {e}"))
        }
    })?;

    check_issuer(&document, issuer)?;

    info!(
        issuer = issuer,
        jwks_uri = %document.jwks_uri,
        "Successfully discovered JWKS URI"
    );
    Ok(document)
}

fn check_issuer(document: &DiscoveryDocument, expected: &str) -> Result<(), KeyFetchError> {
    if document.issuer != expected {
        warn!(
            expected = expected,
            document = %document.issuer,
            "Discovery document issuer mismatch"
        );
        return Err(KeyFetchError::Discovery(format!(
            "issuer in document ({}) does not match expected issuer ({expected})",
            document.issuer
        )));
    }
    Ok(())
}
