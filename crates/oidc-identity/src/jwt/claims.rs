//! Verified token claims
//!
//! [`VerifiedClaims`] can only be constructed inside this crate, after a token
//! has passed signature, issuer, audience, and lifetime checks. Holding one is
//! proof that the claims came from the configured issuer.

use serde::Serialize;
use serde_json::{Map, Value};

/// Claims of a token that passed verification
///
/// Lookups are typed and optional: a claim that is absent and a claim of the
/// wrong JSON type both yield `None`. Whether an empty string counts as
/// "present" is left to the caller (see [`crate::identity::ClaimsResolver`]).
///
/// Claims serialize for logging or forwarding but never deserialize, so
/// untrusted JSON cannot be passed off as verified:
///
/// ```compile_fail
/// let forged: oidc_identity::VerifiedClaims =
///     serde_json::from_str(r#"{"preferred_username":"admin@contoso.com"}"#).unwrap();
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct VerifiedClaims {
    claims: Map<String, Value>,
}

impl VerifiedClaims {
    /// Wrap a decoded payload; only the verifier (and tests) may do this
    pub(crate) fn from_verified(claims: Map<String, Value>) -> Self {
        Self { claims }
    }

    /// Raw claim value
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.claims.get(name)
    }

    /// Whether the claim is present at all (any type, including `null`)
    pub fn contains(&self, name: &str) -> bool {
        self.claims.contains_key(name)
    }

    /// String claim
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.claims.get(name).and_then(Value::as_str)
    }

    /// Boolean claim
    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.claims.get(name).and_then(Value::as_bool)
    }

    /// Integer claim; floats are truncated (NumericDate may carry fractions)
    pub fn get_i64(&self, name: &str) -> Option<i64> {
        let value = self.claims.get(name)?;
        value.as_i64().or_else(|| value.as_f64().map(|f| f as i64))
    }

    /// Claim that may be a single string or an array of strings (e.g. `aud`, `amr`)
    ///
    /// Non-string array members are skipped.
    pub fn get_str_list(&self, name: &str) -> Option<Vec<&str>> {
        match self.claims.get(name)? {
            Value::String(s) => Some(vec![s.as_str()]),
            Value::Array(items) => Some(items.iter().filter_map(Value::as_str).collect()),
            _ => None,
        }
    }

    /// `iss`
    pub fn issuer(&self) -> Option<&str> {
        self.get_str("iss")
    }

    /// `sub`
    pub fn subject(&self) -> Option<&str> {
        self.get_str("sub")
    }

    /// `aud`, normalized to a list
    pub fn audiences(&self) -> Vec<&str> {
        self.get_str_list("aud").unwrap_or_default()
    }

    /// `exp` as seconds since the epoch
    pub fn expires_at(&self) -> Option<i64> {
        self.get_i64("exp")
    }

    /// `nbf` as seconds since the epoch
    pub fn not_before(&self) -> Option<i64> {
        self.get_i64("nbf")
    }

    /// `iat` as seconds since the epoch
    pub fn issued_at(&self) -> Option<i64> {
        self.get_i64("iat")
    }

    /// Number of claims
    pub fn len(&self) -> usize {
        self.claims.len()
    }

    /// Whether the payload was empty
    pub fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }

    /// Iterate over all claims
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.claims.iter()
    }

    /// Borrow the underlying JSON object
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.claims
    }
}

#[cfg(test)]
impl VerifiedClaims {
    /// Build claims directly from JSON for unit tests
    pub(crate) fn for_test(value: Value) -> Self {
        match value {
            Value::Object(map) => Self::from_verified(map),
            other => panic!("claims must be a JSON object, got {other}"),
        }
    }
}
