//! HTTP pattern handling: URI templates and route-match ordering
//!
//! A `Pattern` is one (HTTP method, URI template) pair. Methods carry one or
//! more patterns (additional bindings, synthetic gRPC POST routes,
//! auto-generated OPTIONS companions), and the route table is emitted from
//! the sorted concatenation of all patterns across all operations.

mod sort;
mod template;

pub use sort::{sort_method_patterns, MethodPattern};
pub use template::{
    validate_regex_program_size, TemplateError, UriTemplate, MAX_COMPILED_REGEX_BYTES,
};

/// HTTP methods as they appear in route match headers.
pub const GET: &str = "GET";
pub const PUT: &str = "PUT";
pub const POST: &str = "POST";
pub const DELETE: &str = "DELETE";
pub const PATCH: &str = "PATCH";
pub const OPTIONS: &str = "OPTIONS";

/// Matches any HTTP method; no `:method` header matcher is emitted for it.
pub const HTTP_METHOD_WILDCARD: &str = "*";

/// One (HTTP method, URI template) pair bound to an operation.
#[derive(Debug, Clone)]
pub struct Pattern {
    /// HTTP method string. Custom verbs from `custom` HTTP rules are carried
    /// verbatim, including the wildcard.
    pub http_method: String,
    pub uri_template: UriTemplate,
}

impl Pattern {
    pub fn new(http_method: impl Into<String>, uri_template: UriTemplate) -> Self {
        Self {
            http_method: http_method.into(),
            uri_template,
        }
    }
}
