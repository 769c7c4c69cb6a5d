//! Verification metrics for observability
//!
//! Enable with the `metrics` feature flag. Requires a `metrics` recorder
//! to be installed (e.g., via `metrics-exporter-prometheus`).
//!
//! ## Metrics Provided
//!
//! - `oidc_token_verifications_total` - Counter for verification attempts (labels: outcome)
//! - `oidc_token_verification_duration_seconds` - Histogram for verification duration
//! - `oidc_key_fetches_total` - Counter for remote key set fetches (labels: status)
//! - `oidc_identity_resolutions_total` - Counter for claims resolutions (labels: path)
//!
//! `outcome` is `success` or the failure kind (`token_expired`,
//! `unknown_signing_key`, ...). `path` is `primary`, `fallback`,
//! `invalid_auth_context`, or `missing_identity`.

#[cfg(feature = "metrics")]
use ::metrics::{counter, describe_counter, describe_histogram, histogram};

#[cfg(feature = "metrics")]
use std::sync::Once;

#[cfg(feature = "metrics")]
static INIT: Once = Once::new();

/// Initialize metric descriptions. Call once at startup.
///
/// Idempotent: only the first call registers the descriptions.
///
/// # Example
///
/// ```rust
/// use oidc_identity::init_metrics;
///
/// init_metrics();
/// ```
#[cfg(feature = "metrics")]
pub fn init_metrics() {
    INIT.call_once(|| {
        describe_counter!(
            "oidc_token_verifications_total",
            "Total token verification attempts by outcome"
        );
        describe_histogram!(
            "oidc_token_verification_duration_seconds",
            "Token verification duration in seconds, including key resolution"
        );
        describe_counter!(
            "oidc_key_fetches_total",
            "Total remote signing key set fetches"
        );
        describe_counter!(
            "oidc_identity_resolutions_total",
            "Total claims-to-user resolutions by path"
        );
    });
}

/// Record a finished verification attempt
#[cfg(feature = "metrics")]
pub(crate) fn record_verification(outcome: &'static str, duration_seconds: f64) {
    counter!("oidc_token_verifications_total", "outcome" => outcome).increment(1);
    histogram!("oidc_token_verification_duration_seconds").record(duration_seconds);
}

/// Record a remote key set fetch
#[cfg(feature = "metrics")]
pub(crate) fn record_key_fetch(success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!("oidc_key_fetches_total", "status" => status).increment(1);
}

/// Record a claims resolution
#[cfg(feature = "metrics")]
pub(crate) fn record_resolution(path: &'static str) {
    counter!("oidc_identity_resolutions_total", "path" => path).increment(1);
}

// No-op versions when metrics feature is disabled
#[cfg(not(feature = "metrics"))]
#[allow(missing_docs)]
pub fn init_metrics() {}

#[cfg(not(feature = "metrics"))]
pub(crate) fn record_verification(_outcome: &'static str, _duration_seconds: f64) {}

#[cfg(not(feature = "metrics"))]
pub(crate) fn record_key_fetch(_success: bool) {}

#[cfg(not(feature = "metrics"))]
pub(crate) fn record_resolution(_path: &'static str) {}
