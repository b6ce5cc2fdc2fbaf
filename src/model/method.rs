//! Per-operation metadata

use crate::httppattern::Pattern;
use crate::schema::PathTranslation;
use std::time::Duration;

/// One API operation and everything bound to it during the build.
#[derive(Debug, Clone)]
pub struct Method {
    /// Fully qualified `apiName.shortName`.
    pub selector: String,
    pub api_name: String,
    pub short_name: String,
    pub api_version: String,

    /// HTTP patterns for this operation, in binding order. May hold several:
    /// additional bindings, the synthetic gRPC POST, generated OPTIONS.
    pub patterns: Vec<Pattern>,

    /// Backend binding; installed by backend-rule processing or defaulted to
    /// the local cluster at the end of the build.
    pub backend: Option<BackendBinding>,

    /// Request- or response-streaming gRPC method.
    pub is_streaming: bool,

    /// The service description declares at least one JWT requirement.
    pub require_auth: bool,

    pub allow_unregistered_calls: bool,
    pub skip_service_control: bool,

    /// Ordered API key extraction points: query locations first, then headers.
    pub api_key_locations: Vec<ApiKeyLocation>,

    pub metric_costs: Vec<MetricCost>,

    /// Synthetic method fabricated by the builder (CORS companion or health
    /// check), not present in the service description.
    pub is_generated: bool,

    /// Selector of the auto-generated OPTIONS companion, if one was created
    /// for this method.
    pub generated_cors_selector: Option<String>,

    /// Request message type name, stripped of the type-URL prefix. Empty when
    /// the URL was malformed.
    pub request_type_name: String,
}

impl Method {
    pub fn new(selector: &str, api_name: &str, short_name: &str) -> Self {
        Self {
            selector: selector.to_string(),
            api_name: api_name.to_string(),
            short_name: short_name.to_string(),
            api_version: String::new(),
            patterns: Vec::new(),
            backend: None,
            is_streaming: false,
            require_auth: false,
            allow_unregistered_calls: false,
            skip_service_control: false,
            api_key_locations: Vec::new(),
            metric_costs: Vec::new(),
            is_generated: false,
            generated_cors_selector: None,
            request_type_name: String::new(),
        }
    }
}

/// Where an operation's requests are sent.
#[derive(Debug, Clone)]
pub struct BackendBinding {
    pub cluster_name: String,

    /// Path component of the backend rule address; `/` is substituted for
    /// constant-address rules with an empty path.
    pub path: String,

    /// Host-rewrite target; empty for the local backend.
    pub hostname: String,

    pub translation: PathTranslation,

    /// Response deadline, rounded to milliseconds. Streaming methods emit a
    /// disabled (zero) route timeout regardless.
    pub deadline: Duration,

    pub retry_ons: String,
    pub retry_num: u32,

    /// Audience for backend authentication; empty disables it.
    pub jwt_audience: String,
}

/// API key extraction point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiKeyLocation {
    Query(String),
    Header(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricCost {
    pub name: String,
    pub cost: i64,
}
