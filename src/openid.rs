//! OpenID Connect discovery seam
//!
//! Resolving an empty `jwks_uri` requires an outbound HTTP call to the
//! issuer's well-known endpoint. The network client lives outside the
//! translation core; the build only sees this trait, so tests inject a
//! fixture and the CLI wires in whatever client the process provides.

use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("openid discovery failed for issuer '{issuer}': {message}")]
    Failed { issuer: String, message: String },

    #[error("no openid discovery client is available (issuer '{0}')")]
    Unavailable(String),
}

/// Resolves an issuer to its JWKS URI via the OpenID Connect Discovery
/// protocol.
pub trait JwksResolver {
    fn resolve(&self, issuer: &str) -> Result<String, DiscoveryError>;
}

/// Fixture resolver backed by a fixed issuer→JWKS map.
#[derive(Debug, Default)]
pub struct StaticResolver {
    entries: HashMap<String, String>,
}

impl StaticResolver {
    pub fn new(entries: HashMap<String, String>) -> Self {
        Self { entries }
    }
}

impl JwksResolver for StaticResolver {
    fn resolve(&self, issuer: &str) -> Result<String, DiscoveryError> {
        self.entries
            .get(issuer)
            .cloned()
            .ok_or_else(|| DiscoveryError::Failed {
                issuer: issuer.to_string(),
                message: "issuer not known to fixture".to_string(),
            })
    }
}

/// Resolver used when no discovery client is wired in; any resolution
/// attempt fails the build.
#[derive(Debug, Default)]
pub struct UnavailableResolver;

impl JwksResolver for UnavailableResolver {
    fn resolve(&self, issuer: &str) -> Result<String, DiscoveryError> {
        Err(DiscoveryError::Unavailable(issuer.to_string()))
    }
}
