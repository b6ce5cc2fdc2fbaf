//! Normalized service model
//!
//! The build output consumed by the route-table generator and cluster
//! assembly. Built once per service-configuration version and treated as
//! immutable after construction; a config rollover replaces it wholesale.

mod builder;
mod method;

pub use builder::build_service_model;
pub use method::{ApiKeyLocation, BackendBinding, MetricCost, Method};

use crate::options::Options;
use crate::schema::AuthProvider;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

/// Deadline applied when a backend rule leaves it unset or negative.
pub const DEFAULT_RESPONSE_DEADLINE: Duration = Duration::from_secs(15);

/// Prefix marking operations fabricated by the builder.
pub const AUTOGENERATED_OPERATION_PREFIX: &str = "ESPv2_Autogenerated";

/// Pseudo-API owning deployment-level generated operations.
pub const DEPLOYMENT_API_NAME: &str = "espv2_deployment";

/// Prefix stripped from request type URLs.
pub const TYPE_URL_PREFIX: &str = "type.googleapis.com/";

/// Default JWT query parameter the transcoder must ignore.
pub const DEFAULT_JWT_QUERY_PARAM: &str = "access_token";

/// Default API key query parameters, in extraction order.
pub const DEFAULT_API_KEY_QUERY_PARAMS: [&str; 2] = ["key", "api_key"];

/// System parameter name that carries API key locations.
pub const API_KEY_PARAMETER_NAME: &str = "api_key";

pub const TOKEN_AGENT_CLUSTER: &str = "token-agent-cluster";
pub const METADATA_CLUSTER: &str = "metadata-cluster";
pub const TOKEN_AGENT_ACCESS_TOKEN_PATH: &str = "/local/access_token";
pub const METADATA_ACCESS_TOKEN_PATH: &str =
    "/computeMetadata/v1/instance/service-accounts/default/token";

/// Upstream protocol of a backend cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendProtocol {
    Http1,
    Http2,
    Grpc,
}

impl BackendProtocol {
    /// Resolve (protocol, TLS) from an address scheme and an optional
    /// explicit protocol override from a backend rule.
    pub fn from_scheme(scheme: &str, protocol_override: &str) -> Result<(Self, bool), String> {
        let (base, tls) = match scheme {
            "http" => (BackendProtocol::Http1, false),
            "https" => (BackendProtocol::Http1, true),
            "grpc" => (BackendProtocol::Grpc, false),
            "grpcs" => (BackendProtocol::Grpc, true),
            other => return Err(format!("unknown backend scheme: {other}")),
        };
        let resolved = match (base, protocol_override) {
            (_, "") => base,
            (BackendProtocol::Grpc, _) => {
                return Err(format!(
                    "protocol override '{protocol_override}' is not allowed for scheme {scheme}"
                ))
            }
            (_, "http/1.1") => BackendProtocol::Http1,
            (_, "h2") => BackendProtocol::Http2,
            (_, other) => return Err(format!("unknown backend protocol override: {other}")),
        };
        Ok((resolved, tls))
    }
}

/// One upstream cluster the route table can point at.
#[derive(Debug, Clone)]
pub struct BackendCluster {
    pub cluster_name: String,
    pub hostname: String,
    pub port: u16,
    pub use_tls: bool,
    pub protocol: BackendProtocol,
}

/// Cluster name for a remote backend address (`host:port`).
pub fn backend_cluster_name(address: &str) -> String {
    format!("backend-cluster-{address}")
}

/// Where the data plane fetches access tokens for outbound calls.
#[derive(Debug, Clone)]
pub enum AccessTokenSource {
    TokenAgent {
        uri: String,
        cluster: String,
        timeout: Duration,
    },
    MetadataServer {
        uri: String,
        cluster: String,
        timeout: Duration,
    },
}

/// The normalized build result.
#[derive(Debug)]
pub struct ServiceModel {
    pub service_name: String,
    pub config_id: String,

    pub api_names: Vec<String>,

    /// Canonical operation order: first appearance in the API descriptor,
    /// then selectors first seen during rule processing. All order-sensitive
    /// emission iterates this, never a map.
    pub operations: Vec<String>,

    /// Lookup only; iterate via `operations`.
    pub methods: HashMap<String, Method>,

    /// Query parameters the transcoder must ignore. Sorted so emission is
    /// deterministic.
    pub transcoding_ignored_query_params: BTreeSet<String>,

    pub allow_cors: bool,
    pub grpc_support_required: bool,

    pub local_backend_cluster: BackendCluster,
    pub remote_backend_clusters: Vec<BackendCluster>,

    pub access_token: Option<AccessTokenSource>,

    /// Providers with JWKS URIs resolved (OpenID discovery applied).
    pub auth_providers: Vec<AuthProvider>,

    pub options: Options,
}

impl ServiceModel {
    pub fn local_backend_cluster_name(service_name: &str) -> String {
        backend_cluster_name(&format!("{service_name}_local"))
    }

    /// Lookup by selector.
    pub fn method(&self, selector: &str) -> Option<&Method> {
        self.methods.get(selector)
    }
}

/// Non-fatal build anomalies, collected for the caller alongside the model.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Diagnostics {
    pub warnings: Vec<BuildWarning>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BuildWarning {
    /// Selector or provider id the warning concerns.
    pub context: String,
    pub message: String,
}

impl Diagnostics {
    pub fn warn(&mut self, context: impl Into<String>, message: impl Into<String>) {
        let warning = BuildWarning {
            context: context.into(),
            message: message.into(),
        };
        tracing::warn!(context = %warning.context, "{}", warning.message);
        self.warnings.push(warning);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_from_scheme() {
        assert_eq!(
            BackendProtocol::from_scheme("http", "").unwrap(),
            (BackendProtocol::Http1, false)
        );
        assert_eq!(
            BackendProtocol::from_scheme("https", "h2").unwrap(),
            (BackendProtocol::Http2, true)
        );
        assert_eq!(
            BackendProtocol::from_scheme("grpcs", "").unwrap(),
            (BackendProtocol::Grpc, true)
        );
        assert!(BackendProtocol::from_scheme("ftp", "").is_err());
        assert!(BackendProtocol::from_scheme("grpc", "h2").is_err());
        assert!(BackendProtocol::from_scheme("http", "spdy").is_err());
    }

    #[test]
    fn test_cluster_names() {
        assert_eq!(
            ServiceModel::local_backend_cluster_name("bookstore"),
            "backend-cluster-bookstore_local"
        );
        assert_eq!(
            backend_cluster_name("api.example.com:443"),
            "backend-cluster-api.example.com:443"
        );
    }
}
