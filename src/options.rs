//! Generator options
//!
//! Everything outside the service description that shapes the translation.
//! All fields have serde defaults so a partial options document loads.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct Options {
    /// Local backend address URI; the scheme selects protocol and TLS.
    pub backend_address: String,

    /// CORS mode: empty (disabled), `basic`, or `cors_with_regex`.
    pub cors_preset: String,
    pub cors_allow_origin: String,
    pub cors_allow_origin_regex: String,
    pub cors_allow_methods: String,
    pub cors_allow_headers: String,
    pub cors_expose_headers: String,
    pub cors_allow_credentials: bool,

    /// Health check path; empty disables the generated health-check route.
    pub healthz: String,

    /// Retry-on condition tokens applied to every route.
    pub backend_retry_ons: String,
    pub backend_retry_num: u32,

    /// Timeout for token and discovery HTTP calls, in seconds.
    pub http_request_timeout_secs: u64,

    /// Path to a service account key; selects the token agent as the access
    /// token source. Empty selects the metadata server.
    pub service_account_key: String,
    pub token_agent_port: u16,
    pub metadata_url: String,

    pub disable_oidc_discovery: bool,

    /// Running outside GCP; derived backend-auth audiences are dropped.
    pub non_gcp: bool,

    pub enable_hsts: bool,

    /// Extra comma-separated query parameters the transcoder must ignore.
    pub transcoding_ignore_query_parameters: String,

    /// Upstream cluster connect timeout, in seconds.
    pub cluster_connect_timeout_secs: u64,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            backend_address: "http://127.0.0.1:8082".to_string(),
            cors_preset: String::new(),
            cors_allow_origin: String::new(),
            cors_allow_origin_regex: String::new(),
            cors_allow_methods: String::new(),
            cors_allow_headers: String::new(),
            cors_expose_headers: String::new(),
            cors_allow_credentials: false,
            healthz: String::new(),
            backend_retry_ons: "reset,connect-failure,refused-stream".to_string(),
            backend_retry_num: 1,
            http_request_timeout_secs: 30,
            service_account_key: String::new(),
            token_agent_port: 8791,
            metadata_url: "http://169.254.169.254".to_string(),
            disable_oidc_discovery: false,
            non_gcp: false,
            enable_hsts: false,
            transcoding_ignore_query_parameters: String::new(),
            cluster_connect_timeout_secs: 20,
        }
    }
}

impl Options {
    pub fn http_request_timeout(&self) -> Duration {
        Duration::from_secs(self.http_request_timeout_secs)
    }

    pub fn cluster_connect_timeout(&self) -> Duration {
        Duration::from_secs(self.cluster_connect_timeout_secs)
    }
}
