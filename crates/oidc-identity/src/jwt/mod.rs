//! JWT handling: header decoding, verified claims, and the verification pipeline
//!
//! # Architecture
//!
//! ```text
//!   raw token ──► decode (pure) ──► algorithm gate ──► key resolution ──► signature ──► claims
//!                  TokenHeader        allow-list        KeyStore            jsonwebtoken    iss/aud/exp
//!                                                                                          │
//!                                                                                          ▼
//!                                                                                   VerifiedClaims
//! ```
//!
//! Header decoding is a pure function so it can be exercised without any key
//! material. Nothing downstream of [`verifier::TokenVerifier`] ever sees claims
//! from a token that has not passed every gate.

pub mod claims;
pub mod verifier;

pub use claims::VerifiedClaims;
pub use verifier::TokenVerifier;

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::Deserialize;

use crate::error::VerificationError;

/// JOSE header fields relevant to verification
///
/// Decoded by hand rather than through `jsonwebtoken::decode_header` so that an
/// algorithm `jsonwebtoken` does not know (including `none`) is reported as an
/// unsupported algorithm instead of a parse failure.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenHeader {
    /// Declared signing algorithm (`alg`)
    #[serde(rename = "alg")]
    pub algorithm: String,
    /// Key identifier (`kid`)
    #[serde(rename = "kid", default)]
    pub key_id: Option<String>,
    /// Token type (`typ`)
    #[serde(rename = "typ", default)]
    pub token_type: Option<String>,
}

/// The three segments of a compact JWS, with header and payload decoded
///
/// The payload is parsed only to reject malformed tokens early; it is not
/// exposed and must not be trusted.
#[derive(Debug)]
pub(crate) struct DecodedToken {
    pub(crate) header: TokenHeader,
}

/// Decode and return the header of a raw token
///
/// Performs the full structural check (three segments, base64url, JSON
/// header and JSON object payload) but no cryptographic verification.
///
/// # Errors
///
/// Returns [`VerificationError::MalformedToken`] on any structural problem.
///
/// # Example
///
/// ```rust
/// use oidc_identity::jwt::decode_header;
///
/// // {"alg":"RS256","kid":"k1","typ":"JWT"} . {"sub":"x"} . sig
/// let token = "eyJhbGciOiJSUzI1NiIsImtpZCI6ImsxIiwidHlwIjoiSldUIn0.eyJzdWIiOiJ4In0.c2ln";
/// let header = decode_header(token).unwrap();
/// assert_eq!(header.algorithm, "RS256");
/// assert_eq!(header.key_id.as_deref(), Some("k1"));
/// ```
pub fn decode_header(raw: &str) -> Result<TokenHeader, VerificationError> {
    decode_segments(raw).map(|decoded| decoded.header)
}

pub(crate) fn decode_segments(raw: &str) -> Result<DecodedToken, VerificationError> {
    let segments: Vec<&str> = raw.split('.').collect();
    if segments.len() != 3 {
        return Err(VerificationError::MalformedToken(format!(
            "expected 3 segments, found {}",
            segments.len()
        )));
    }

    let header_bytes = decode_segment(segments[0], "header")?;
    let header: TokenHeader = serde_json::from_slice(&header_bytes)
        .map_err(|e| VerificationError::MalformedToken(format!("invalid header JSON: {e}")))?;

    let payload_bytes = decode_segment(segments[1], "payload")?;
    let payload: serde_json::Value = serde_json::from_slice(&payload_bytes)
        .map_err(|e| VerificationError::MalformedToken(format!("invalid payload JSON: {e}")))?;
    if !payload.is_object() {
        return Err(VerificationError::MalformedToken(
            "payload is not a JSON object".to_string(),
        ));
    }

    // "none" tokens legitimately carry an empty signature; the algorithm gate rejects them
    if !segments[2].is_empty() {
        decode_segment(segments[2], "signature")?;
    }

    Ok(DecodedToken { header })
}

fn decode_segment(segment: &str, name: &str) -> Result<Vec<u8>, VerificationError> {
    if segment.is_empty() {
        return Err(VerificationError::MalformedToken(format!("empty {name}")));
    }
    URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| VerificationError::MalformedToken(format!("invalid {name} encoding: {e}")))
}
