//! Route-table generation
//!
//! Emits one route per (operation, pattern, matcher) in the sorted pattern
//! order, then the CORS policy and its catch-all preflight route when CORS
//! is configured.

use std::time::Duration;

use super::per_route::per_route_filter_configs;
use super::{
    format_duration, CorsPolicy, Decorator, HeaderMatcher, HeaderValue, HeaderValueOption,
    RegexMatcher, Route, RouteAction, RouteConfiguration, RouteMatch, StringMatcher, VirtualHost,
    GoogleRe2, RetryPolicy,
};
use crate::httppattern::{
    sort_method_patterns, validate_regex_program_size, MethodPattern, Pattern,
    HTTP_METHOD_WILDCARD, OPTIONS,
};
use crate::model::ServiceModel;
use crate::options::Options;
use crate::{Result, TranslateError};

pub const ROUTE_NAME: &str = "local_route";
pub const VIRTUAL_HOST_NAME: &str = "backend";

/// Span name prefix for route decorators.
const SPAN_NAME_PREFIX: &str = "ingress";

const HSTS_HEADER_KEY: &str = "Strict-Transport-Security";
const HSTS_HEADER_VALUE: &str = "max-age=31536000; includeSubdomains";

/// Build the full route configuration for a service model.
pub fn make_route_config(model: &ServiceModel) -> Result<RouteConfiguration> {
    let mut routes = make_route_table(model)?;

    let cors = cors_policy(&model.options)?;
    if cors.is_some() {
        // The cors filter only engages on routes, so a catch-all OPTIONS
        // route must exist for preflight requests that match nothing else.
        routes.push(Route {
            route_match: RouteMatch {
                prefix: Some("/".to_string()),
                headers: vec![HeaderMatcher {
                    name: ":method".to_string(),
                    exact_match: OPTIONS.to_string(),
                }],
                ..Default::default()
            },
            route: RouteAction {
                cluster: model.local_backend_cluster.cluster_name.clone(),
                timeout: None,
                retry_policy: None,
                host_rewrite_literal: None,
            },
            decorator: Some(Decorator {
                operation: SPAN_NAME_PREFIX.to_string(),
            }),
            typed_per_filter_config: Default::default(),
            response_headers_to_add: Vec::new(),
        });
    }

    Ok(RouteConfiguration {
        name: ROUTE_NAME.to_string(),
        virtual_hosts: vec![VirtualHost {
            name: VIRTUAL_HOST_NAME.to_string(),
            domains: vec!["*".to_string()],
            routes,
            cors,
        }],
    })
}

fn make_route_table(model: &ServiceModel) -> Result<Vec<Route>> {
    let mut entries = Vec::new();
    for operation in &model.operations {
        if let Some(method) = model.method(operation) {
            for pattern in &method.patterns {
                entries.push(MethodPattern {
                    operation: operation.clone(),
                    pattern: pattern.clone(),
                });
            }
        }
    }
    let entries = sort_method_patterns(entries);

    let mut routes = Vec::new();
    for entry in &entries {
        let method = model.method(&entry.operation).ok_or_else(|| {
            TranslateError::ConfigInvalid(format!("unknown operation {}", entry.operation))
        })?;
        let backend = method.backend.as_ref().ok_or_else(|| {
            TranslateError::ConfigInvalid(format!(
                "operation {} has no backend binding",
                entry.operation
            ))
        })?;

        // Response timeouts are incompatible with streaming; emit an
        // explicit zero to disable them, even for transcoded routes where
        // only the upstream side streams.
        let timeout = if method.is_streaming {
            Duration::ZERO
        } else {
            backend.deadline
        };

        for route_match in route_matchers(&entry.pattern)? {
            let route = Route {
                route_match,
                route: RouteAction {
                    cluster: backend.cluster_name.clone(),
                    timeout: Some(format_duration(timeout)),
                    retry_policy: Some(RetryPolicy {
                        retry_on: backend.retry_ons.clone(),
                        num_retries: backend.retry_num,
                    }),
                    host_rewrite_literal: if backend.hostname.is_empty() {
                        None
                    } else {
                        Some(backend.hostname.clone())
                    },
                },
                decorator: Some(Decorator {
                    // The api name is left out to keep span names short.
                    operation: format!("{SPAN_NAME_PREFIX} {}", method.short_name),
                }),
                typed_per_filter_config: per_route_filter_configs(
                    &entry.operation,
                    method,
                    &entry.pattern,
                ),
                response_headers_to_add: if model.options.enable_hsts {
                    vec![HeaderValueOption {
                        header: HeaderValue {
                            key: HSTS_HEADER_KEY.to_string(),
                            value: HSTS_HEADER_VALUE.to_string(),
                        },
                    }]
                } else {
                    Vec::new()
                },
            };
            tracing::info!(
                operation = %entry.operation,
                http_method = %entry.pattern.http_method,
                "adding route"
            );
            routes.push(route);
        }
    }
    Ok(routes)
}

/// One or two matchers per pattern: exact templates match with and without
/// a trailing slash; everything else matches by regex.
fn route_matchers(pattern: &Pattern) -> Result<Vec<RouteMatch>> {
    let template = &pattern.uri_template;
    let mut matchers = if template.is_exact_match() {
        let plain = template.exact_match_string(false);
        let with_slash = template.exact_match_string(true);
        let mut matchers = vec![RouteMatch::exact_path(plain.clone())];
        if with_slash != plain {
            matchers.push(RouteMatch::exact_path(with_slash));
        }
        matchers
    } else {
        let regex = template.regex();
        validate_regex_program_size(&regex)
            .map_err(|e| TranslateError::TemplateInvalid(e.to_string()))?;
        vec![RouteMatch::regex(regex)]
    };

    if pattern.http_method != HTTP_METHOD_WILDCARD {
        for route_match in &mut matchers {
            route_match.headers.push(HeaderMatcher {
                name: ":method".to_string(),
                exact_match: pattern.http_method.clone(),
            });
        }
    }
    Ok(matchers)
}

/// Validate the CORS options and derive the virtual-host policy. Any CORS
/// field without a preset is a configuration error.
fn cors_policy(options: &Options) -> Result<Option<CorsPolicy>> {
    let origin_match = match options.cors_preset.as_str() {
        "basic" => {
            if options.cors_allow_origin.is_empty() {
                return Err(TranslateError::ConfigInvalid(
                    "cors_allow_origin cannot be empty when cors_preset=basic".to_string(),
                ));
            }
            StringMatcher {
                exact: Some(options.cors_allow_origin.clone()),
                safe_regex: None,
            }
        }
        "cors_with_regex" => {
            if options.cors_allow_origin_regex.is_empty() {
                return Err(TranslateError::ConfigInvalid(
                    "cors_allow_origin_regex cannot be empty when cors_preset=cors_with_regex"
                        .to_string(),
                ));
            }
            validate_regex_program_size(&options.cors_allow_origin_regex)
                .map_err(|e| TranslateError::TemplateInvalid(format!("cors origin regex: {e}")))?;
            StringMatcher {
                exact: None,
                safe_regex: Some(RegexMatcher {
                    google_re2: GoogleRe2 {},
                    regex: options.cors_allow_origin_regex.clone(),
                }),
            }
        }
        "" => {
            if !options.cors_allow_methods.is_empty()
                || !options.cors_allow_headers.is_empty()
                || !options.cors_expose_headers.is_empty()
                || options.cors_allow_credentials
            {
                return Err(TranslateError::ConfigInvalid(
                    "cors_preset must be set in order to enable CORS support".to_string(),
                ));
            }
            return Ok(None);
        }
        other => {
            return Err(TranslateError::ConfigInvalid(format!(
                "cors_preset must be either \"basic\" or \"cors_with_regex\", got \"{other}\""
            )))
        }
    };

    Ok(Some(CorsPolicy {
        allow_origin_string_match: vec![origin_match],
        allow_methods: options.cors_allow_methods.clone(),
        allow_headers: options.cors_allow_headers.clone(),
        expose_headers: options.cors_expose_headers.clone(),
        allow_credentials: options.cors_allow_credentials,
    }))
}
