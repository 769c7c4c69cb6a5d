//! Signing key discovery, fetching, and caching
//!
//! - [`discovery`]: issuer URL to JWKS URI
//! - [`source`]: the [`KeySource`] seam and its HTTP implementation
//! - [`store`]: the caching [`KeyStore`] consulted by the verifier

pub mod discovery;
pub mod source;
pub mod store;

pub use discovery::DiscoveryDocument;
pub use source::{KeySource, RemoteKeySource, SigningKey};
pub use store::KeyStore;
