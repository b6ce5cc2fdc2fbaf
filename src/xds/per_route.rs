//! Per-route filter configuration
//!
//! Each route carries a typed config map keyed by filter name. The
//! service-control entry is unconditional; backend-auth, path-rewrite, and
//! jwt-authn follow from the method's bindings.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::httppattern::Pattern;
use crate::model::{BackendBinding, Method};
use crate::schema::PathTranslation;

pub const SERVICE_CONTROL_FILTER: &str = "com.google.espv2.filters.http.service_control";
pub const BACKEND_AUTH_FILTER: &str = "com.google.espv2.filters.http.backend_auth";
pub const PATH_REWRITE_FILTER: &str = "com.google.espv2.filters.http.path_rewrite";
pub const JWT_AUTHN_FILTER: &str = "envoy.filters.http.jwt_authn";

const SERVICE_CONTROL_TYPE_URL: &str =
    "type.googleapis.com/espv2.api.envoy.v9.http.service_control.PerRouteFilterConfig";
const BACKEND_AUTH_TYPE_URL: &str =
    "type.googleapis.com/espv2.api.envoy.v9.http.backend_auth.PerRouteFilterConfig";
const PATH_REWRITE_TYPE_URL: &str =
    "type.googleapis.com/espv2.api.envoy.v9.http.path_rewrite.PerRouteFilterConfig";
const JWT_AUTHN_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.filters.http.jwt_authn.v3.PerRouteConfig";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PerRouteFilterConfig {
    ServiceControl(ServiceControlPerRoute),
    BackendAuth(BackendAuthPerRoute),
    PathRewrite(PathRewritePerRoute),
    JwtAuthn(JwtAuthnPerRoute),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceControlPerRoute {
    #[serde(rename = "@type")]
    pub type_url: String,
    pub operation_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackendAuthPerRoute {
    #[serde(rename = "@type")]
    pub type_url: String,
    pub jwt_audience: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PathRewritePerRoute {
    #[serde(rename = "@type")]
    pub type_url: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub path_prefix: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub constant_path: Option<ConstantPath>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConstantPath {
    pub path: String,

    /// Lets the filter recover variable bindings from the request path and
    /// forward them as query parameters.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url_template: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JwtAuthnPerRoute {
    #[serde(rename = "@type")]
    pub type_url: String,
    pub requirement_name: String,
}

/// Build the typed per-filter config map for one (operation, pattern) route.
pub fn per_route_filter_configs(
    operation: &str,
    method: &Method,
    pattern: &Pattern,
) -> BTreeMap<String, PerRouteFilterConfig> {
    let mut configs = BTreeMap::new();

    configs.insert(
        SERVICE_CONTROL_FILTER.to_string(),
        PerRouteFilterConfig::ServiceControl(ServiceControlPerRoute {
            type_url: SERVICE_CONTROL_TYPE_URL.to_string(),
            operation_name: operation.to_string(),
        }),
    );

    if let Some(backend) = &method.backend {
        if !backend.jwt_audience.is_empty() {
            configs.insert(
                BACKEND_AUTH_FILTER.to_string(),
                PerRouteFilterConfig::BackendAuth(BackendAuthPerRoute {
                    type_url: BACKEND_AUTH_TYPE_URL.to_string(),
                    jwt_audience: backend.jwt_audience.clone(),
                }),
            );
        }
        if let Some(path_rewrite) = path_rewrite_config(backend, pattern) {
            configs.insert(
                PATH_REWRITE_FILTER.to_string(),
                PerRouteFilterConfig::PathRewrite(path_rewrite),
            );
        }
    }

    if method.require_auth {
        configs.insert(
            JWT_AUTHN_FILTER.to_string(),
            PerRouteFilterConfig::JwtAuthn(JwtAuthnPerRoute {
                type_url: JWT_AUTHN_TYPE_URL.to_string(),
                requirement_name: operation.to_string(),
            }),
        );
    }

    configs
}

fn path_rewrite_config(backend: &BackendBinding, pattern: &Pattern) -> Option<PathRewritePerRoute> {
    match backend.translation {
        PathTranslation::AppendPathToAddress => {
            if backend.path.is_empty() {
                return None;
            }
            Some(PathRewritePerRoute {
                type_url: PATH_REWRITE_TYPE_URL.to_string(),
                path_prefix: Some(backend.path.clone()),
                constant_path: None,
            })
        }
        PathTranslation::ConstantAddress => {
            let url_template = pattern
                .uri_template
                .has_variables()
                .then(|| pattern.uri_template.exact_match_string(false));
            Some(PathRewritePerRoute {
                type_url: PATH_REWRITE_TYPE_URL.to_string(),
                path_prefix: None,
                constant_path: Some(ConstantPath {
                    path: backend.path.clone(),
                    url_template,
                }),
            })
        }
        PathTranslation::PathTranslationUnspecified => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::httppattern::{UriTemplate, GET};
    use crate::model::{BackendBinding, Method, DEFAULT_RESPONSE_DEADLINE};

    fn method_with_backend(translation: PathTranslation, path: &str) -> Method {
        let mut method = Method::new("svc.Get", "svc", "Get");
        method.backend = Some(BackendBinding {
            cluster_name: "backend-cluster-api.example.com:443".to_string(),
            path: path.to_string(),
            hostname: "api.example.com".to_string(),
            translation,
            deadline: DEFAULT_RESPONSE_DEADLINE,
            retry_ons: "reset".to_string(),
            retry_num: 1,
            jwt_audience: String::new(),
        });
        method
    }

    fn pattern(template: &str) -> Pattern {
        Pattern::new(GET, UriTemplate::parse(template).unwrap())
    }

    #[test]
    fn test_service_control_always_present() {
        let method = Method::new("svc.Get", "svc", "Get");
        let configs = per_route_filter_configs("svc.Get", &method, &pattern("/x"));
        assert_eq!(configs.len(), 1);
        match &configs[SERVICE_CONTROL_FILTER] {
            PerRouteFilterConfig::ServiceControl(sc) => {
                assert_eq!(sc.operation_name, "svc.Get");
            }
            other => panic!("unexpected config: {other:?}"),
        }
    }

    #[test]
    fn test_backend_auth_config_when_audience_set() {
        let mut method =
            method_with_backend(PathTranslation::PathTranslationUnspecified, "");
        if let Some(backend) = method.backend.as_mut() {
            backend.jwt_audience = "https://api.example.com".to_string();
        }
        let configs = per_route_filter_configs("svc.Get", &method, &pattern("/x"));
        match &configs[BACKEND_AUTH_FILTER] {
            PerRouteFilterConfig::BackendAuth(auth) => {
                assert_eq!(auth.jwt_audience, "https://api.example.com");
            }
            other => panic!("unexpected config: {other:?}"),
        }
    }

    #[test]
    fn test_path_prefix_for_append_translation() {
        let method = method_with_backend(PathTranslation::AppendPathToAddress, "/v1");
        let configs = per_route_filter_configs("svc.Get", &method, &pattern("/x"));
        match &configs[PATH_REWRITE_FILTER] {
            PerRouteFilterConfig::PathRewrite(pr) => {
                assert_eq!(pr.path_prefix.as_deref(), Some("/v1"));
                assert!(pr.constant_path.is_none());
            }
            other => panic!("unexpected config: {other:?}"),
        }
    }

    #[test]
    fn test_append_translation_with_empty_path_omitted() {
        let method = method_with_backend(PathTranslation::AppendPathToAddress, "");
        let configs = per_route_filter_configs("svc.Get", &method, &pattern("/x"));
        assert!(!configs.contains_key(PATH_REWRITE_FILTER));
    }

    #[test]
    fn test_constant_path_without_variables() {
        let method = method_with_backend(PathTranslation::ConstantAddress, "/v1");
        let configs = per_route_filter_configs("svc.Get", &method, &pattern("/x"));
        match &configs[PATH_REWRITE_FILTER] {
            PerRouteFilterConfig::PathRewrite(pr) => {
                let constant = pr.constant_path.as_ref().unwrap();
                assert_eq!(constant.path, "/v1");
                assert!(constant.url_template.is_none());
            }
            other => panic!("unexpected config: {other:?}"),
        }
    }

    #[test]
    fn test_constant_path_with_variables_carries_url_template() {
        let method = method_with_backend(PathTranslation::ConstantAddress, "/v1");
        let configs = per_route_filter_configs("svc.Get", &method, &pattern("/x/{id}"));
        match &configs[PATH_REWRITE_FILTER] {
            PerRouteFilterConfig::PathRewrite(pr) => {
                let constant = pr.constant_path.as_ref().unwrap();
                assert_eq!(constant.url_template.as_deref(), Some("/x/{id}"));
            }
            other => panic!("unexpected config: {other:?}"),
        }
    }

    #[test]
    fn test_jwt_authn_config_when_auth_required() {
        let mut method = Method::new("svc.Get", "svc", "Get");
        method.require_auth = true;
        let configs = per_route_filter_configs("svc.Get", &method, &pattern("/x"));
        match &configs[JWT_AUTHN_FILTER] {
            PerRouteFilterConfig::JwtAuthn(jwt) => {
                assert_eq!(jwt.requirement_name, "svc.Get");
            }
            other => panic!("unexpected config: {other:?}"),
        }
    }
}
