//! Data-plane configuration output
//!
//! Wire types for the proxy's route and cluster schemas, plus the
//! generators that fill them from a `ServiceModel`. Field names and
//! nesting must stay byte-compatible with the proxy's xDS JSON/YAML; only
//! the fields this generator emits are modeled.

mod cluster;
mod per_route;
mod route;

pub use cluster::make_clusters;
pub use per_route::{
    per_route_filter_configs, PerRouteFilterConfig, BACKEND_AUTH_FILTER, JWT_AUTHN_FILTER,
    PATH_REWRITE_FILTER, SERVICE_CONTROL_FILTER,
};
pub use route::{make_route_config, ROUTE_NAME, VIRTUAL_HOST_NAME};

use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// Route configuration: a single virtual host over all domains.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct RouteConfiguration {
    pub name: String,
    pub virtual_hosts: Vec<VirtualHost>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct VirtualHost {
    pub name: String,
    pub domains: Vec<String>,
    pub routes: Vec<Route>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub cors: Option<CorsPolicy>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct Route {
    #[serde(rename = "match")]
    pub route_match: RouteMatch,

    pub route: RouteAction,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub decorator: Option<Decorator>,

    /// Keyed by filter name; a sorted map keeps emission deterministic.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub typed_per_filter_config: BTreeMap<String, PerRouteFilterConfig>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub response_headers_to_add: Vec<HeaderValueOption>,
}

/// Path specifier plus optional header matchers. Exactly one of `path`,
/// `prefix`, or `safe_regex` is set.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct RouteMatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub safe_regex: Option<RegexMatcher>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<HeaderMatcher>,
}

impl RouteMatch {
    pub fn exact_path(path: impl Into<String>) -> Self {
        Self {
            path: Some(path.into()),
            ..Default::default()
        }
    }

    pub fn regex(regex: impl Into<String>) -> Self {
        Self {
            safe_regex: Some(RegexMatcher {
                google_re2: GoogleRe2 {},
                regex: regex.into(),
            }),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct RegexMatcher {
    pub google_re2: GoogleRe2,
    pub regex: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GoogleRe2 {}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct HeaderMatcher {
    pub name: String,
    pub exact_match: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct RouteAction {
    pub cluster: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_policy: Option<RetryPolicy>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_rewrite_literal: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct RetryPolicy {
    pub retry_on: String,
    pub num_retries: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct Decorator {
    pub operation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct HeaderValueOption {
    pub header: HeaderValue,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct HeaderValue {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct CorsPolicy {
    pub allow_origin_string_match: Vec<StringMatcher>,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub allow_methods: String,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub allow_headers: String,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub expose_headers: String,

    pub allow_credentials: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct StringMatcher {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exact: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub safe_regex: Option<RegexMatcher>,
}

/// Upstream cluster definition.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct Cluster {
    pub name: String,

    pub connect_timeout: String,

    #[serde(rename = "type")]
    pub cluster_type: String,

    pub load_assignment: ClusterLoadAssignment,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub http2_protocol_options: Option<Http2ProtocolOptions>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub transport_socket: Option<TransportSocket>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Http2ProtocolOptions {}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct ClusterLoadAssignment {
    pub cluster_name: String,
    pub endpoints: Vec<LocalityLbEndpoints>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct LocalityLbEndpoints {
    pub lb_endpoints: Vec<LbEndpoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct LbEndpoint {
    pub endpoint: Endpoint,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct Endpoint {
    pub address: Address,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct Address {
    pub socket_address: SocketAddress,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct SocketAddress {
    pub address: String,
    pub port_value: u16,
}

impl ClusterLoadAssignment {
    /// Single-endpoint assignment, the only shape this generator emits.
    pub fn single(cluster_name: &str, hostname: &str, port: u16) -> Self {
        Self {
            cluster_name: cluster_name.to_string(),
            endpoints: vec![LocalityLbEndpoints {
                lb_endpoints: vec![LbEndpoint {
                    endpoint: Endpoint {
                        address: Address {
                            socket_address: SocketAddress {
                                address: hostname.to_string(),
                                port_value: port,
                            },
                        },
                    },
                }],
            }],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct TransportSocket {
    pub name: String,
    pub typed_config: UpstreamTlsContext,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct UpstreamTlsContext {
    #[serde(rename = "@type")]
    pub type_url: String,

    #[serde(skip_serializing_if = "String::is_empty")]
    pub sni: String,
}

impl TransportSocket {
    pub fn upstream_tls(sni: &str) -> Self {
        Self {
            name: "envoy.transport_sockets.tls".to_string(),
            typed_config: UpstreamTlsContext {
                type_url:
                    "type.googleapis.com/envoy.extensions.transport_sockets.tls.v3.UpstreamTlsContext"
                        .to_string(),
                sni: sni.to_string(),
            },
        }
    }
}

/// Proto-JSON duration form: whole seconds, or milliseconds when set.
pub(crate) fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis % 1000 == 0 {
        format!("{}s", millis / 1000)
    } else {
        format!("{}.{:03}s", millis / 1000, millis % 1000)
    }
}
