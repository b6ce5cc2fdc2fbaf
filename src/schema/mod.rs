//! Declarative service description input types
//!
//! The shape mirrors the standard API service schema: apis with methods and
//! streaming flags, type descriptors, HTTP rules, backend rules, usage and
//! quota rules, authentication providers and rules, system parameters, and
//! endpoint entries. Only the fields the translation consumes are modeled.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Root service description document.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct ServiceDescription {
    /// Fully qualified service name, e.g. `bookstore.endpoints.example.com`.
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub apis: Vec<Api>,

    #[serde(default)]
    pub types: Vec<TypeDescriptor>,

    #[serde(default)]
    pub http: Http,

    #[serde(default)]
    pub backend: Backend,

    #[serde(default)]
    pub usage: Usage,

    #[serde(default)]
    pub quota: Quota,

    #[serde(default)]
    pub authentication: Authentication,

    #[serde(default)]
    pub system_parameters: SystemParameters,

    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
}

/// One API surface with its methods.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct Api {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub version: String,

    #[serde(default)]
    pub methods: Vec<ApiMethod>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct ApiMethod {
    #[serde(default)]
    pub name: String,

    /// Type URL of the request message, e.g.
    /// `type.googleapis.com/bookstore.CreateShelfRequest`.
    #[serde(default)]
    pub request_type_url: String,

    #[serde(default)]
    pub request_streaming: bool,

    #[serde(default)]
    pub response_streaming: bool,
}

/// Message type descriptor; consumed for snake→json field renaming.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct TypeDescriptor {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub fields: Vec<Field>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct Field {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub json_name: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct Http {
    #[serde(default)]
    pub rules: Vec<HttpRule>,
}

/// HTTP binding for one selector. Exactly one of the verb fields is
/// expected to be set.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct HttpRule {
    #[serde(default)]
    pub selector: String,

    pub get: Option<String>,
    pub put: Option<String>,
    pub post: Option<String>,
    pub delete: Option<String>,
    pub patch: Option<String>,
    pub custom: Option<CustomHttpPattern>,

    #[serde(default)]
    pub body: String,

    /// Additional bindings are flat; they cannot nest further.
    #[serde(default)]
    pub additional_bindings: Vec<HttpRule>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct CustomHttpPattern {
    #[serde(default)]
    pub kind: String,

    #[serde(default)]
    pub path: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct Backend {
    #[serde(default)]
    pub rules: Vec<BackendRule>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct BackendRule {
    #[serde(default)]
    pub selector: String,

    /// Remote backend address; empty targets the local backend.
    #[serde(default)]
    pub address: String,

    /// Deadline in seconds. Zero means unset.
    #[serde(default)]
    pub deadline: f64,

    /// Optional protocol override for the remote cluster: `http/1.1` or `h2`.
    #[serde(default)]
    pub protocol: String,

    /// Authentication oneof: an explicit audience wins over `disable_auth`.
    pub jwt_audience: Option<String>,
    pub disable_auth: Option<bool>,

    #[serde(default)]
    pub path_translation: PathTranslation,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PathTranslation {
    #[default]
    PathTranslationUnspecified,
    ConstantAddress,
    AppendPathToAddress,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct Usage {
    #[serde(default)]
    pub rules: Vec<UsageRule>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct UsageRule {
    #[serde(default)]
    pub selector: String,

    #[serde(default)]
    pub allow_unregistered_calls: bool,

    #[serde(default)]
    pub skip_service_control: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct Quota {
    #[serde(default)]
    pub metric_rules: Vec<MetricRule>,
}

/// Per-selector metric costs. A sorted map keeps cost emission order
/// independent of document order.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct MetricRule {
    #[serde(default)]
    pub selector: String,

    #[serde(default)]
    pub metric_costs: BTreeMap<String, i64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct Authentication {
    #[serde(default)]
    pub providers: Vec<AuthProvider>,

    #[serde(default)]
    pub rules: Vec<AuthenticationRule>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct AuthProvider {
    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub issuer: String,

    /// Empty triggers OpenID Connect discovery (unless disabled).
    #[serde(default)]
    pub jwks_uri: String,

    /// Comma-separated allowed audiences.
    #[serde(default)]
    pub audiences: String,

    #[serde(default)]
    pub jwt_locations: Vec<JwtLocation>,
}

/// Where the JWT is extracted from. One of `header` or `query` is set.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct JwtLocation {
    pub header: Option<String>,
    pub query: Option<String>,

    /// Only meaningful for header locations, e.g. `Bearer `.
    #[serde(default)]
    pub value_prefix: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct AuthenticationRule {
    #[serde(default)]
    pub selector: String,

    #[serde(default)]
    pub requirements: Vec<AuthRequirement>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct AuthRequirement {
    #[serde(default)]
    pub provider_id: String,

    #[serde(default)]
    pub audiences: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct SystemParameters {
    #[serde(default)]
    pub rules: Vec<SystemParameterRule>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct SystemParameterRule {
    #[serde(default)]
    pub selector: String,

    #[serde(default)]
    pub parameters: Vec<SystemParameter>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct SystemParameter {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub http_header: String,

    #[serde(default)]
    pub url_query_parameter: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct Endpoint {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub allow_cors: bool,
}
