//! Service-model builder
//!
//! Converts a service description plus options into a `ServiceModel` in
//! fifteen phases. A phase may only read state produced by earlier phases;
//! the required order is pinned in `run`. Any phase error aborts the build
//! and nothing is published.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use url::Url;

use super::method::{ApiKeyLocation, BackendBinding, MetricCost, Method};
use super::{
    backend_cluster_name, AccessTokenSource, BackendCluster, BackendProtocol, Diagnostics,
    ServiceModel, API_KEY_PARAMETER_NAME, AUTOGENERATED_OPERATION_PREFIX,
    DEFAULT_API_KEY_QUERY_PARAMS, DEFAULT_JWT_QUERY_PARAM, DEFAULT_RESPONSE_DEADLINE,
    DEPLOYMENT_API_NAME, METADATA_ACCESS_TOKEN_PATH, METADATA_CLUSTER,
    TOKEN_AGENT_ACCESS_TOKEN_PATH, TOKEN_AGENT_CLUSTER, TYPE_URL_PREFIX,
};
use crate::httppattern::{self, Pattern, UriTemplate};
use crate::openid::JwksResolver;
use crate::options::Options;
use crate::schema::{BackendRule, HttpRule, PathTranslation, ServiceDescription, TypeDescriptor};
use crate::{Result, TranslateError};

/// Build the normalized model for one service-configuration version.
pub fn build_service_model(
    service: &ServiceDescription,
    config_id: &str,
    options: Options,
    resolver: &dyn JwksResolver,
) -> Result<(ServiceModel, Diagnostics)> {
    Builder::new(service, config_id, options)?.run(resolver)
}

struct Builder<'a> {
    service: &'a ServiceDescription,
    model: ServiceModel,
    diagnostics: Diagnostics,
}

impl<'a> Builder<'a> {
    /// Phase 1: parse the local backend address and seed the model.
    fn new(service: &'a ServiceDescription, config_id: &str, options: Options) -> Result<Self> {
        if service.apis.is_empty() {
            return Err(TranslateError::ConfigInvalid(
                "service config must have at least one api".to_string(),
            ));
        }

        let (scheme, hostname, port, _) = parse_backend_uri(&options.backend_address)
            .map_err(TranslateError::ConfigInvalid)?;
        let (protocol, use_tls) =
            BackendProtocol::from_scheme(&scheme, "").map_err(TranslateError::ConfigInvalid)?;

        let local_backend_cluster = BackendCluster {
            cluster_name: ServiceModel::local_backend_cluster_name(&service.name),
            hostname,
            port,
            use_tls,
            protocol,
        };

        let model = ServiceModel {
            service_name: service.name.clone(),
            config_id: config_id.to_string(),
            api_names: Vec::new(),
            operations: Vec::new(),
            methods: HashMap::new(),
            transcoding_ignored_query_params: Default::default(),
            allow_cors: false,
            grpc_support_required: protocol == BackendProtocol::Grpc,
            local_backend_cluster,
            remote_backend_clusters: Vec::new(),
            access_token: None,
            auth_providers: service.authentication.providers.clone(),
            options,
        };

        Ok(Self {
            service,
            model,
            diagnostics: Diagnostics::default(),
        })
    }

    fn run(mut self, resolver: &dyn JwksResolver) -> Result<(ServiceModel, Diagnostics)> {
        self.process_endpoints();
        self.process_apis()?;
        self.process_quota()?;
        self.process_backend_rules()?;
        self.process_http_rules()?;
        self.process_usage_rules()?;
        self.select_access_token();
        self.process_types()?;
        self.add_grpc_http_rules()?;
        self.collect_transcoding_ignored_query_params()?;
        self.process_api_key_locations()?;
        self.resolve_jwks_uris(resolver)?;
        self.bind_local_backend_defaults();
        self.process_auth_requirements()?;
        Ok((self.model, self.diagnostics))
    }

    /// Lookup by selector, creating the method when the selector format is
    /// valid. Selectors from rule sets may precede (or be absent from) the
    /// API descriptor.
    fn get_or_create_method(&mut self, selector: &str) -> Result<&mut Method> {
        use std::collections::hash_map::Entry;
        match self.model.methods.entry(selector.to_string()) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let (api_name, short_name) = selector.rsplit_once('.').ok_or_else(|| {
                    TranslateError::ConfigInvalid(format!(
                        "method {selector} should be in the format of apiName.methodShortName"
                    ))
                })?;
                if api_name.is_empty() || short_name.is_empty() {
                    return Err(TranslateError::ConfigInvalid(format!(
                        "method {selector} should be in the format of apiName.methodShortName"
                    )));
                }
                self.model.operations.push(selector.to_string());
                Ok(entry.insert(Method::new(selector, api_name, short_name)))
            }
        }
    }

    /// Phase 2: CORS is enabled by the endpoints entry matching the service
    /// name.
    fn process_endpoints(&mut self) {
        for endpoint in &self.service.endpoints {
            if endpoint.name == self.model.service_name && endpoint.allow_cors {
                self.model.allow_cors = true;
            }
        }
    }

    /// Phase 3: seed methods from the API descriptor, in declaration order.
    fn process_apis(&mut self) -> Result<()> {
        let service = self.service;
        for api in &service.apis {
            self.model.api_names.push(api.name.clone());
            for api_method in &api.methods {
                let selector = format!("{}.{}", api.name, api_method.name);
                let request_type_name = api_method
                    .request_type_url
                    .strip_prefix(TYPE_URL_PREFIX)
                    .map(str::to_string);
                if request_type_name.is_none() {
                    self.diagnostics.warn(
                        &selector,
                        format!(
                            "request type name '{}' is in an unexpected format",
                            api_method.request_type_url
                        ),
                    );
                }
                let method = self.get_or_create_method(&selector)?;
                if api_method.request_streaming || api_method.response_streaming {
                    method.is_streaming = true;
                }
                method.api_version = api.version.clone();
                if let Some(name) = request_type_name {
                    method.request_type_name = name;
                }
            }
        }
        Ok(())
    }

    /// Phase 4: attach metric costs from quota rules.
    fn process_quota(&mut self) -> Result<()> {
        let service = self.service;
        for rule in &service.quota.metric_rules {
            let costs: Vec<MetricCost> = rule
                .metric_costs
                .iter()
                .map(|(name, cost)| MetricCost {
                    name: name.clone(),
                    cost: *cost,
                })
                .collect();
            self.get_or_create_method(&rule.selector)?.metric_costs = costs;
        }
        Ok(())
    }

    /// Phase 5: bind backend rules, allocating one cluster per distinct
    /// remote `host:port`.
    fn process_backend_rules(&mut self) -> Result<()> {
        let service = self.service;
        let mut clusters_by_address: HashMap<String, String> = HashMap::new();

        for rule in &service.backend.rules {
            if rule.address.is_empty() {
                let cluster_name = self.model.local_backend_cluster.cluster_name.clone();
                self.bind_backend_rule(rule, "", "", "", cluster_name)?;
                continue;
            }

            let (scheme, hostname, port, path) = parse_backend_uri(&rule.address)
                .map_err(|e| {
                    TranslateError::ConfigInvalid(format!(
                        "backend rule for {}: {e}",
                        rule.selector
                    ))
                })?;
            let address = format!("{hostname}:{port}");

            let cluster_name = match clusters_by_address.get(&address) {
                Some(name) => name.clone(),
                None => {
                    let (protocol, use_tls) =
                        BackendProtocol::from_scheme(&scheme, &rule.protocol).map_err(|e| {
                            TranslateError::ConfigInvalid(format!(
                                "backend rule for {}: {e}",
                                rule.selector
                            ))
                        })?;
                    if protocol == BackendProtocol::Grpc {
                        self.model.grpc_support_required = true;
                    }
                    let name = backend_cluster_name(&address);
                    self.model.remote_backend_clusters.push(BackendCluster {
                        cluster_name: name.clone(),
                        hostname: hostname.clone(),
                        port,
                        use_tls,
                        protocol,
                    });
                    clusters_by_address.insert(address, name.clone());
                    name
                }
            };

            self.bind_backend_rule(rule, &scheme, &hostname, &path, cluster_name)?;
        }
        Ok(())
    }

    fn bind_backend_rule(
        &mut self,
        rule: &BackendRule,
        scheme: &str,
        hostname: &str,
        path: &str,
        cluster_name: String,
    ) -> Result<()> {
        // An empty constant-address path would produce an empty :path header.
        let path = if path.is_empty() && rule.path_translation == PathTranslation::ConstantAddress {
            "/".to_string()
        } else {
            path.to_string()
        };

        let deadline = if rule.deadline == 0.0 {
            DEFAULT_RESPONSE_DEADLINE
        } else if rule.deadline < 0.0 {
            self.diagnostics.warn(
                &rule.selector,
                format!(
                    "negative deadline of {} specified; using the default of {:?}",
                    rule.deadline, DEFAULT_RESPONSE_DEADLINE
                ),
            );
            DEFAULT_RESPONSE_DEADLINE
        } else {
            // The rule deadline is seconds as a float; a network proxy does
            // not need more than millisecond precision.
            Duration::from_millis((rule.deadline * 1000.0).round() as u64)
        };

        let mut jwt_audience = self.backend_auth_audience(rule, scheme, hostname);
        if !jwt_audience.is_empty() && self.model.options.non_gcp {
            self.diagnostics.warn(
                &rule.selector,
                "backend authentication requires contacting GCP services; automatically \
                 disabled on a non-GCP deployment",
            );
            jwt_audience = String::new();
        }

        let binding = BackendBinding {
            cluster_name,
            path,
            hostname: hostname.to_string(),
            translation: rule.path_translation,
            deadline,
            retry_ons: self.model.options.backend_retry_ons.clone(),
            retry_num: self.model.options.backend_retry_num,
            jwt_audience,
        };
        self.get_or_create_method(&rule.selector)?.backend = Some(binding);
        Ok(())
    }

    fn backend_auth_audience(&mut self, rule: &BackendRule, scheme: &str, hostname: &str) -> String {
        match (&rule.jwt_audience, rule.disable_auth) {
            (Some(audience), Some(true)) => {
                self.diagnostics.warn(
                    &rule.selector,
                    "backend rule sets both jwt_audience and disable_auth; jwt_audience wins",
                );
                audience.clone()
            }
            (Some(audience), _) => audience.clone(),
            (None, Some(true)) => String::new(),
            (None, Some(false)) | (None, None) => {
                if rule.address.is_empty() {
                    String::new()
                } else {
                    audience_from_backend_address(scheme, hostname)
                }
            }
        }
    }

    /// Phase 6: parse HTTP rules into patterns, synthesize CORS OPTIONS
    /// companions, and add the health-check method.
    fn process_http_rules(&mut self) -> Result<()> {
        let service = self.service;
        // Route regexes that already carry an OPTIONS binding; one OPTIONS
        // route per regex.
        let mut regexes_with_options: HashSet<String> = HashSet::new();

        for rule in &service.http.rules {
            self.add_http_rule(&rule.selector, rule, &mut regexes_with_options)?;
            for additional in &rule.additional_bindings {
                self.add_http_rule(&rule.selector, additional, &mut regexes_with_options)?;
            }
        }

        if self.model.allow_cors {
            let operations = self.model.operations.clone();
            for operation in &operations {
                let candidates: Vec<(String, String)> = match self.model.methods.get(operation) {
                    Some(method) => method
                        .patterns
                        .iter()
                        .filter(|p| p.http_method != httppattern::OPTIONS)
                        .map(|p| {
                            (
                                p.uri_template.origin().to_string(),
                                p.uri_template.regex(),
                            )
                        })
                        .collect(),
                    None => continue,
                };
                for (origin, regex) in candidates {
                    if regexes_with_options.contains(&regex) {
                        continue;
                    }
                    let template = UriTemplate::parse(&origin).map_err(|e| {
                        TranslateError::TemplateInvalid(format!("operation({operation}): {e}"))
                    })?;
                    self.add_options_method(
                        operation,
                        Pattern::new(httppattern::OPTIONS, template),
                    )?;
                    regexes_with_options.insert(regex);
                }
            }
        }

        if !self.model.options.healthz.is_empty() {
            let selector =
                format!("{DEPLOYMENT_API_NAME}.{AUTOGENERATED_OPERATION_PREFIX}_HealthCheck");
            let healthz = &self.model.options.healthz;
            let path = if healthz.starts_with('/') {
                healthz.clone()
            } else {
                format!("/{healthz}")
            };
            let template = UriTemplate::parse(&path).map_err(|e| {
                TranslateError::TemplateInvalid(format!("health check path: {e}"))
            })?;
            let method = self.get_or_create_method(&selector)?;
            method.patterns.push(Pattern::new(httppattern::GET, template));
            method.skip_service_control = true;
            method.is_generated = true;
        }

        Ok(())
    }

    fn add_http_rule(
        &mut self,
        selector: &str,
        rule: &HttpRule,
        regexes_with_options: &mut HashSet<String>,
    ) -> Result<()> {
        let (http_method, path) = extract_http_pattern(rule).ok_or_else(|| {
            TranslateError::ConfigInvalid(format!(
                "operation({selector}): http rule sets no method pattern"
            ))
        })?;
        let template = UriTemplate::parse(&path)
            .map_err(|e| TranslateError::TemplateInvalid(format!("operation({selector}): {e}")))?;
        if http_method == httppattern::OPTIONS {
            regexes_with_options.insert(template.regex());
        }
        self.get_or_create_method(selector)?
            .patterns
            .push(Pattern::new(http_method, template));
        Ok(())
    }

    /// Create (or extend) the generated OPTIONS companion of a method. The
    /// companion inherits version and backend binding and the two are linked
    /// by selector.
    fn add_options_method(&mut self, original: &str, pattern: Pattern) -> Result<()> {
        let (api_name, short_name, api_version, backend) = match self.model.methods.get(original) {
            Some(method) => (
                method.api_name.clone(),
                method.short_name.clone(),
                method.api_version.clone(),
                method.backend.clone(),
            ),
            None => return Ok(()),
        };

        let generated =
            format!("{api_name}.{AUTOGENERATED_OPERATION_PREFIX}_CORS_{short_name}");
        {
            let method = self.get_or_create_method(&generated)?;
            method.api_version = api_version;
            method.backend = backend;
            method.is_generated = true;
            method.patterns.push(pattern);
        }
        if let Some(method) = self.model.methods.get_mut(original) {
            method.generated_cors_selector = Some(generated);
        }
        Ok(())
    }

    /// Phase 7: usage rule flags.
    fn process_usage_rules(&mut self) -> Result<()> {
        let service = self.service;
        for rule in &service.usage.rules {
            let method = self.get_or_create_method(&rule.selector)?;
            method.allow_unregistered_calls = rule.allow_unregistered_calls;
            method.skip_service_control = rule.skip_service_control;
        }
        Ok(())
    }

    /// Phase 8: pick where the data plane fetches access tokens.
    fn select_access_token(&mut self) {
        let options = &self.model.options;
        let timeout = options.http_request_timeout();
        self.model.access_token = Some(if !options.service_account_key.is_empty() {
            AccessTokenSource::TokenAgent {
                uri: format!(
                    "http://127.0.0.1:{}{}",
                    options.token_agent_port, TOKEN_AGENT_ACCESS_TOKEN_PATH
                ),
                cluster: TOKEN_AGENT_CLUSTER.to_string(),
                timeout,
            }
        } else {
            AccessTokenSource::MetadataServer {
                uri: format!("{}{}", options.metadata_url, METADATA_ACCESS_TOKEN_PATH),
                cluster: METADATA_CLUSTER.to_string(),
                timeout,
            }
        });
    }

    /// Phase 9: rename captured snake_case fields to their JSON names in
    /// every pattern of the consuming method and its CORS companion.
    fn process_types(&mut self) -> Result<()> {
        let service = self.service;
        let types_by_name: HashMap<&str, &TypeDescriptor> = service
            .types
            .iter()
            .map(|t| (t.name.as_str(), t))
            .collect();

        let operations = self.model.operations.clone();
        for operation in &operations {
            let (request_type_name, cors_selector) = match self.model.methods.get(operation) {
                Some(method) => (
                    method.request_type_name.clone(),
                    method.generated_cors_selector.clone(),
                ),
                None => continue,
            };
            if request_type_name.is_empty() {
                continue;
            }
            let Some(descriptor) = types_by_name.get(request_type_name.as_str()) else {
                self.diagnostics.warn(
                    operation,
                    format!("could not find type with name '{request_type_name}'"),
                );
                continue;
            };

            let renames = snake_to_json_renames(operation, descriptor)?;
            if renames.is_empty() {
                continue;
            }

            if let Some(method) = self.model.methods.get_mut(operation) {
                for pattern in &mut method.patterns {
                    pattern.uri_template.replace_variable_field(&renames);
                }
            }
            if let Some(cors_selector) = cors_selector {
                if let Some(method) = self.model.methods.get_mut(&cors_selector) {
                    for pattern in &mut method.patterns {
                        pattern.uri_template.replace_variable_field(&renames);
                    }
                }
            }
        }
        Ok(())
    }

    /// Phase 10: with any gRPC backend, every API method is callable as
    /// `POST /api/method`.
    fn add_grpc_http_rules(&mut self) -> Result<()> {
        if !self.model.grpc_support_required {
            return Ok(());
        }
        let service = self.service;
        for api in &service.apis {
            for api_method in &api.methods {
                let selector = format!("{}.{}", api.name, api_method.name);
                let path = format!("/{}/{}", api.name, api_method.name);
                let template = UriTemplate::parse(&path).map_err(|e| {
                    TranslateError::TemplateInvalid(format!(
                        "adding grpc http rule for {selector}: {e}"
                    ))
                })?;
                self.get_or_create_method(&selector)?
                    .patterns
                    .push(Pattern::new(httppattern::POST, template));
            }
        }
        Ok(())
    }

    /// Phase 11: query parameters the transcoder must ignore, from JWT query
    /// locations and the options list.
    fn collect_transcoding_ignored_query_params(&mut self) -> Result<()> {
        let mut names: Vec<String> = Vec::new();

        for provider in &self.model.auth_providers {
            if provider.jwt_locations.is_empty() {
                names.push(DEFAULT_JWT_QUERY_PARAM.to_string());
                continue;
            }
            for location in &provider.jwt_locations {
                if let Some(query) = &location.query {
                    if !location.value_prefix.is_empty() {
                        return Err(TranslateError::ConfigInvalid(format!(
                            "provider ({}): value_prefix is not allowed for a query jwt location",
                            provider.id
                        )));
                    }
                    names.push(query.clone());
                }
            }
        }

        let extra = &self.model.options.transcoding_ignore_query_parameters;
        if !extra.is_empty() {
            names.extend(extra.split(',').map(str::to_string));
        }

        self.model.transcoding_ignored_query_params.extend(names);
        Ok(())
    }

    /// Phase 12: API key locations from system parameters; methods without
    /// custom locations fall back to the default query parameters.
    fn process_api_key_locations(&mut self) -> Result<()> {
        let service = self.service;
        for rule in &service.system_parameters.rules {
            let mut queries = Vec::new();
            let mut headers = Vec::new();
            for parameter in &rule.parameters {
                if parameter.name != API_KEY_PARAMETER_NAME {
                    continue;
                }
                if !parameter.url_query_parameter.is_empty() {
                    queries.push(parameter.url_query_parameter.clone());
                }
                if !parameter.http_header.is_empty() {
                    headers.push(parameter.http_header.clone());
                }
            }

            for query in &queries {
                self.model
                    .transcoding_ignored_query_params
                    .insert(query.clone());
            }

            let method = self.get_or_create_method(&rule.selector)?;
            method
                .api_key_locations
                .extend(queries.into_iter().map(ApiKeyLocation::Query));
            method
                .api_key_locations
                .extend(headers.into_iter().map(ApiKeyLocation::Header));
        }

        let any_defaulted = self.model.operations.iter().any(|operation| {
            self.model
                .methods
                .get(operation)
                .is_some_and(|m| m.api_key_locations.is_empty())
        });
        if any_defaulted {
            for name in DEFAULT_API_KEY_QUERY_PARAMS {
                self.model
                    .transcoding_ignored_query_params
                    .insert(name.to_string());
            }
        }
        Ok(())
    }

    /// Phase 13: resolve empty JWKS URIs through OpenID discovery.
    fn resolve_jwks_uris(&mut self, resolver: &dyn JwksResolver) -> Result<()> {
        let discovery_disabled = self.model.options.disable_oidc_discovery;
        for provider in &mut self.model.auth_providers {
            if !provider.jwks_uri.is_empty() {
                continue;
            }
            if discovery_disabled {
                return Err(TranslateError::ConfigInvalid(format!(
                    "jwks_uri is empty for provider ({}), but OpenID Connect discovery is \
                     disabled; specify jwks_uri in the provider config",
                    provider.id
                )));
            }
            tracing::info!(
                provider = %provider.id,
                "jwks_uri is empty, resolving via OpenID Connect discovery"
            );
            provider.jwks_uri = resolver
                .resolve(&provider.issuer)
                .map_err(|e| TranslateError::DependencyFailure(e.to_string()))?;
        }
        Ok(())
    }

    /// Phase 14: methods no backend rule named route to the local cluster.
    fn bind_local_backend_defaults(&mut self) {
        let cluster_name = self.model.local_backend_cluster.cluster_name.clone();
        let retry_ons = self.model.options.backend_retry_ons.clone();
        let retry_num = self.model.options.backend_retry_num;
        let operations = self.model.operations.clone();
        for operation in &operations {
            if let Some(method) = self.model.methods.get_mut(operation) {
                if method.backend.is_none() {
                    method.backend = Some(BackendBinding {
                        cluster_name: cluster_name.clone(),
                        path: String::new(),
                        hostname: String::new(),
                        translation: PathTranslation::PathTranslationUnspecified,
                        deadline: DEFAULT_RESPONSE_DEADLINE,
                        retry_ons: retry_ons.clone(),
                        retry_num,
                        jwt_audience: String::new(),
                    });
                }
            }
        }
    }

    /// Phase 15: auth rules must address existing methods; creation here
    /// would silently protect nothing.
    fn process_auth_requirements(&mut self) -> Result<()> {
        let service = self.service;
        for rule in &service.authentication.rules {
            if rule.requirements.is_empty() {
                continue;
            }
            match self.model.methods.get_mut(&rule.selector) {
                Some(method) => method.require_auth = true,
                None => {
                    return Err(TranslateError::ConfigInvalid(format!(
                        "authentication selector {} is not defined in apis.methods or http.rules",
                        rule.selector
                    )))
                }
            }
        }
        Ok(())
    }
}

/// Snake→json rename map for one request type. Two fields sharing a snake
/// name with different JSON names would make variable bindings ambiguous.
fn snake_to_json_renames(
    operation: &str,
    descriptor: &TypeDescriptor,
) -> Result<HashMap<String, String>> {
    let mut renames = HashMap::new();
    for field in &descriptor.fields {
        if field.name == field.json_name {
            continue;
        }
        if let Some(previous) = renames.get(&field.name) {
            if previous != &field.json_name {
                return Err(TranslateError::ConfigInvalid(format!(
                    "for operation ({operation}): two fields share snake_name ({}) but have \
                     mismatching json_name ({}, {previous})",
                    field.name, field.json_name
                )));
            }
        }
        renames.insert(field.name.clone(), field.json_name.clone());
    }
    Ok(renames)
}

fn extract_http_pattern(rule: &HttpRule) -> Option<(String, String)> {
    if let Some(path) = &rule.get {
        Some((httppattern::GET.to_string(), path.clone()))
    } else if let Some(path) = &rule.put {
        Some((httppattern::PUT.to_string(), path.clone()))
    } else if let Some(path) = &rule.post {
        Some((httppattern::POST.to_string(), path.clone()))
    } else if let Some(path) = &rule.delete {
        Some((httppattern::DELETE.to_string(), path.clone()))
    } else if let Some(path) = &rule.patch {
        Some((httppattern::PATCH.to_string(), path.clone()))
    } else {
        rule.custom
            .as_ref()
            .map(|custom| (custom.kind.clone(), custom.path.clone()))
    }
}

/// Split a backend address into (scheme, hostname, port, path). The path is
/// normalized without a trailing slash.
fn parse_backend_uri(address: &str) -> std::result::Result<(String, String, u16, String), String> {
    let url =
        Url::parse(address).map_err(|e| format!("error parsing backend uri {address}: {e}"))?;
    let scheme = url.scheme().to_string();
    let hostname = url
        .host_str()
        .ok_or_else(|| format!("backend uri {address} has no host"))?
        .to_string();
    let port = match url.port() {
        Some(port) => port,
        None => match scheme.as_str() {
            "http" | "grpc" => 80,
            "https" | "grpcs" => 443,
            other => return Err(format!("unknown backend scheme: {other}")),
        },
    };
    let path = url.path().trim_end_matches('/').to_string();
    Ok((scheme, hostname, port, path))
}

fn audience_from_backend_address(scheme: &str, hostname: &str) -> String {
    match BackendProtocol::from_scheme(scheme, "") {
        Ok((_, true)) => format!("https://{hostname}"),
        _ => format!("http://{hostname}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::openid::{StaticResolver, UnavailableResolver};
    use crate::schema::{
        Api, ApiMethod, AuthProvider, AuthRequirement, AuthenticationRule, Endpoint, Field,
        MetricRule, SystemParameter, SystemParameterRule, UsageRule,
    };

    fn api_method(name: &str) -> ApiMethod {
        ApiMethod {
            name: name.to_string(),
            request_type_url: format!("type.googleapis.com/test.{name}Request"),
            ..Default::default()
        }
    }

    fn bookstore() -> ServiceDescription {
        ServiceDescription {
            name: "bookstore.endpoints.example.com".to_string(),
            apis: vec![Api {
                name: "bookstore.Bookstore".to_string(),
                version: "v1".to_string(),
                methods: vec![api_method("ListShelves"), api_method("CreateShelf")],
            }],
            http: crate::schema::Http {
                rules: vec![
                    HttpRule {
                        selector: "bookstore.Bookstore.ListShelves".to_string(),
                        get: Some("/shelves".to_string()),
                        ..Default::default()
                    },
                    HttpRule {
                        selector: "bookstore.Bookstore.CreateShelf".to_string(),
                        post: Some("/shelves".to_string()),
                        ..Default::default()
                    },
                ],
            },
            ..Default::default()
        }
    }

    fn build(service: &ServiceDescription, options: Options) -> (ServiceModel, Diagnostics) {
        build_service_model(service, "2024-01-01r0", options, &UnavailableResolver)
            .expect("build should succeed")
    }

    #[test]
    fn test_empty_apis_rejected() {
        let service = ServiceDescription::default();
        let result =
            build_service_model(&service, "id", Options::default(), &UnavailableResolver);
        assert!(matches!(result, Err(TranslateError::ConfigInvalid(_))));
    }

    #[test]
    fn test_operations_follow_descriptor_order() {
        let (model, _) = build(&bookstore(), Options::default());
        assert_eq!(
            model.operations,
            vec![
                "bookstore.Bookstore.ListShelves",
                "bookstore.Bookstore.CreateShelf"
            ]
        );
        assert_eq!(model.config_id, "2024-01-01r0");
    }

    #[test]
    fn test_selector_closure_creates_methods_from_rules() {
        let mut service = bookstore();
        service.usage.rules.push(UsageRule {
            selector: "bookstore.Bookstore.DeleteShelf".to_string(),
            allow_unregistered_calls: true,
            ..Default::default()
        });
        let (model, _) = build(&service, Options::default());
        let method = model.method("bookstore.Bookstore.DeleteShelf").unwrap();
        assert!(method.allow_unregistered_calls);
        assert_eq!(method.short_name, "DeleteShelf");
        assert_eq!(
            model.operations.last().map(String::as_str),
            Some("bookstore.Bookstore.DeleteShelf")
        );
    }

    #[test]
    fn test_invalid_selector_format_rejected() {
        let mut service = bookstore();
        service.usage.rules.push(UsageRule {
            selector: "NoApiName".to_string(),
            ..Default::default()
        });
        let result =
            build_service_model(&service, "id", Options::default(), &UnavailableResolver);
        assert!(matches!(result, Err(TranslateError::ConfigInvalid(_))));
    }

    #[test]
    fn test_default_binding_to_local_cluster() {
        let (model, _) = build(&bookstore(), Options::default());
        for operation in &model.operations {
            let binding = model.methods[operation].backend.as_ref().unwrap();
            assert_eq!(
                binding.cluster_name,
                "backend-cluster-bookstore.endpoints.example.com_local"
            );
            assert_eq!(binding.deadline, DEFAULT_RESPONSE_DEADLINE);
        }
    }

    #[test]
    fn test_remote_backend_cluster_dedup_and_binding() {
        let mut service = bookstore();
        service.backend.rules = vec![
            BackendRule {
                selector: "bookstore.Bookstore.ListShelves".to_string(),
                address: "https://api.example.com/v1".to_string(),
                ..Default::default()
            },
            BackendRule {
                selector: "bookstore.Bookstore.CreateShelf".to_string(),
                address: "https://api.example.com/v1".to_string(),
                ..Default::default()
            },
        ];
        let (model, _) = build(&service, Options::default());
        assert_eq!(model.remote_backend_clusters.len(), 1);
        let cluster = &model.remote_backend_clusters[0];
        assert_eq!(cluster.cluster_name, "backend-cluster-api.example.com:443");
        assert!(cluster.use_tls);
        let binding = model.methods["bookstore.Bookstore.ListShelves"]
            .backend
            .as_ref()
            .unwrap();
        assert_eq!(binding.hostname, "api.example.com");
        assert_eq!(binding.path, "/v1");
        assert_eq!(binding.jwt_audience, "https://api.example.com");
    }

    #[test]
    fn test_negative_deadline_warns_and_defaults() {
        let mut service = bookstore();
        service.backend.rules = vec![BackendRule {
            selector: "bookstore.Bookstore.ListShelves".to_string(),
            deadline: -1.5,
            ..Default::default()
        }];
        let (model, diagnostics) = build(&service, Options::default());
        let binding = model.methods["bookstore.Bookstore.ListShelves"]
            .backend
            .as_ref()
            .unwrap();
        assert_eq!(binding.deadline, DEFAULT_RESPONSE_DEADLINE);
        assert!(diagnostics
            .warnings
            .iter()
            .any(|w| w.message.contains("negative deadline")));
    }

    #[test]
    fn test_deadline_rounded_to_milliseconds() {
        let mut service = bookstore();
        service.backend.rules = vec![BackendRule {
            selector: "bookstore.Bookstore.ListShelves".to_string(),
            deadline: 10.5004,
            ..Default::default()
        }];
        let (model, _) = build(&service, Options::default());
        let binding = model.methods["bookstore.Bookstore.ListShelves"]
            .backend
            .as_ref()
            .unwrap();
        assert_eq!(binding.deadline, Duration::from_millis(10500));
    }

    #[test]
    fn test_non_gcp_drops_derived_audience() {
        let mut service = bookstore();
        service.backend.rules = vec![BackendRule {
            selector: "bookstore.Bookstore.ListShelves".to_string(),
            address: "grpcs://remote.example.com".to_string(),
            ..Default::default()
        }];
        let options = Options {
            non_gcp: true,
            ..Default::default()
        };
        let (model, diagnostics) = build(&service, options);
        let binding = model.methods["bookstore.Bookstore.ListShelves"]
            .backend
            .as_ref()
            .unwrap();
        assert!(binding.jwt_audience.is_empty());
        assert!(diagnostics
            .warnings
            .iter()
            .any(|w| w.message.contains("non-GCP")));
    }

    #[test]
    fn test_jwt_audience_wins_over_disable_auth() {
        let mut service = bookstore();
        service.backend.rules = vec![BackendRule {
            selector: "bookstore.Bookstore.ListShelves".to_string(),
            address: "https://remote.example.com".to_string(),
            jwt_audience: Some("aud".to_string()),
            disable_auth: Some(true),
            ..Default::default()
        }];
        let (model, diagnostics) = build(&service, Options::default());
        let binding = model.methods["bookstore.Bookstore.ListShelves"]
            .backend
            .as_ref()
            .unwrap();
        assert_eq!(binding.jwt_audience, "aud");
        assert!(diagnostics
            .warnings
            .iter()
            .any(|w| w.message.contains("jwt_audience wins")));
    }

    #[test]
    fn test_cors_companion_synthesis_and_uniqueness() {
        let mut service = bookstore();
        service.endpoints.push(Endpoint {
            name: "bookstore.endpoints.example.com".to_string(),
            allow_cors: true,
        });
        let (model, _) = build(&service, Options::default());

        // Both rules share /shelves, so exactly one companion is created.
        let generated: Vec<&String> = model
            .operations
            .iter()
            .filter(|op| op.contains("ESPv2_Autogenerated_CORS_"))
            .collect();
        assert_eq!(
            generated,
            vec!["bookstore.Bookstore.ESPv2_Autogenerated_CORS_ListShelves"]
        );
        let companion = &model.methods[generated[0].as_str()];
        assert!(companion.is_generated);
        assert_eq!(companion.patterns.len(), 1);
        assert_eq!(companion.patterns[0].http_method, httppattern::OPTIONS);
        assert_eq!(
            model.methods["bookstore.Bookstore.ListShelves"]
                .generated_cors_selector
                .as_deref(),
            Some(generated[0].as_str())
        );
        assert!(model.methods["bookstore.Bookstore.CreateShelf"]
            .generated_cors_selector
            .is_none());
    }

    #[test]
    fn test_explicit_options_rule_suppresses_companion() {
        let mut service = bookstore();
        service.endpoints.push(Endpoint {
            name: "bookstore.endpoints.example.com".to_string(),
            allow_cors: true,
        });
        service.http.rules.push(HttpRule {
            selector: "bookstore.Bookstore.ListShelves".to_string(),
            custom: Some(crate::schema::CustomHttpPattern {
                kind: "OPTIONS".to_string(),
                path: "/shelves".to_string(),
            }),
            ..Default::default()
        });
        let (model, _) = build(&service, Options::default());
        assert!(!model
            .operations
            .iter()
            .any(|op| op.contains("ESPv2_Autogenerated_CORS_")));
    }

    #[test]
    fn test_health_check_method() {
        let options = Options {
            healthz: "healthz".to_string(),
            ..Default::default()
        };
        let (model, _) = build(&bookstore(), options);
        let method = model
            .method("espv2_deployment.ESPv2_Autogenerated_HealthCheck")
            .unwrap();
        assert!(method.is_generated);
        assert!(method.skip_service_control);
        assert_eq!(method.patterns[0].http_method, httppattern::GET);
        assert_eq!(
            method.patterns[0].uri_template.exact_match_string(false),
            "/healthz"
        );
    }

    #[test]
    fn test_grpc_synthesis_adds_post_patterns() {
        let options = Options {
            backend_address: "grpc://127.0.0.1:8000".to_string(),
            ..Default::default()
        };
        let (model, _) = build(&bookstore(), options);
        assert!(model.grpc_support_required);
        let method = &model.methods["bookstore.Bookstore.ListShelves"];
        assert!(method.patterns.iter().any(|p| {
            p.http_method == httppattern::POST
                && p.uri_template.exact_match_string(false)
                    == "/bookstore.Bookstore/ListShelves"
        }));
    }

    #[test]
    fn test_snake_json_conflict_is_fatal() {
        let mut service = bookstore();
        service.types.push(TypeDescriptor {
            name: "test.ListShelvesRequest".to_string(),
            fields: vec![
                Field {
                    name: "foo_bar".to_string(),
                    json_name: "fooBar".to_string(),
                },
                Field {
                    name: "foo_bar".to_string(),
                    json_name: "fooBAR".to_string(),
                },
            ],
        });
        let result =
            build_service_model(&service, "id", Options::default(), &UnavailableResolver);
        assert!(matches!(result, Err(TranslateError::ConfigInvalid(_))));
    }

    #[test]
    fn test_snake_json_rename_applies_to_patterns() {
        let mut service = bookstore();
        service.http.rules[0].get = Some("/shelves/{foo_bar}".to_string());
        service.types.push(TypeDescriptor {
            name: "test.ListShelvesRequest".to_string(),
            fields: vec![Field {
                name: "foo_bar".to_string(),
                json_name: "fooBar".to_string(),
            }],
        });
        let (model, _) = build(&service, Options::default());
        let pattern = &model.methods["bookstore.Bookstore.ListShelves"].patterns[0];
        assert_eq!(pattern.uri_template.variable_names(), vec!["fooBar"]);
        assert_eq!(pattern.uri_template.regex(), "^/shelves/([^/]+)$");
    }

    #[test]
    fn test_quota_metric_costs() {
        let mut service = bookstore();
        service.quota.metric_rules.push(MetricRule {
            selector: "bookstore.Bookstore.ListShelves".to_string(),
            metric_costs: [("reads".to_string(), 2i64), ("calls".to_string(), 1i64)]
                .into_iter()
                .collect(),
        });
        let (model, _) = build(&service, Options::default());
        let costs = &model.methods["bookstore.Bookstore.ListShelves"].metric_costs;
        // Sorted by metric name.
        assert_eq!(
            costs,
            &vec![
                MetricCost {
                    name: "calls".to_string(),
                    cost: 1
                },
                MetricCost {
                    name: "reads".to_string(),
                    cost: 2
                },
            ]
        );
    }

    #[test]
    fn test_transcoding_ignored_query_params() {
        let mut service = bookstore();
        service.authentication.providers.push(AuthProvider {
            id: "firebase".to_string(),
            issuer: "https://issuer.example.com".to_string(),
            jwks_uri: "https://issuer.example.com/jwks".to_string(),
            ..Default::default()
        });
        let options = Options {
            transcoding_ignore_query_parameters: "foo,bar".to_string(),
            ..Default::default()
        };
        let (model, _) = build(&service, options);
        // Provider has no custom locations -> default jwt query param; no
        // method has api key locations -> both defaults.
        for expected in ["access_token", "key", "api_key", "foo", "bar"] {
            assert!(
                model.transcoding_ignored_query_params.contains(expected),
                "missing {expected}"
            );
        }
    }

    #[test]
    fn test_jwt_query_location_with_value_prefix_rejected() {
        let mut service = bookstore();
        service.authentication.providers.push(AuthProvider {
            id: "auth0".to_string(),
            jwks_uri: "https://issuer.example.com/jwks".to_string(),
            jwt_locations: vec![crate::schema::JwtLocation {
                query: Some("jwt".to_string()),
                value_prefix: "Bearer ".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        });
        let result =
            build_service_model(&service, "id", Options::default(), &UnavailableResolver);
        assert!(matches!(result, Err(TranslateError::ConfigInvalid(_))));
    }

    #[test]
    fn test_api_key_locations_query_then_header() {
        let mut service = bookstore();
        service.system_parameters.rules.push(SystemParameterRule {
            selector: "bookstore.Bookstore.ListShelves".to_string(),
            parameters: vec![
                SystemParameter {
                    name: "api_key".to_string(),
                    http_header: "x-api-key".to_string(),
                    ..Default::default()
                },
                SystemParameter {
                    name: "api_key".to_string(),
                    url_query_parameter: "apiKey".to_string(),
                    ..Default::default()
                },
            ],
        });
        let (model, _) = build(&service, Options::default());
        let locations = &model.methods["bookstore.Bookstore.ListShelves"].api_key_locations;
        assert_eq!(
            locations,
            &vec![
                ApiKeyLocation::Query("apiKey".to_string()),
                ApiKeyLocation::Header("x-api-key".to_string()),
            ]
        );
        assert!(model.transcoding_ignored_query_params.contains("apiKey"));
    }

    #[test]
    fn test_auth_rule_unknown_selector_is_fatal() {
        let mut service = bookstore();
        service.authentication.rules.push(AuthenticationRule {
            selector: "bookstore.Bookstore.Missing".to_string(),
            requirements: vec![AuthRequirement {
                provider_id: "firebase".to_string(),
                ..Default::default()
            }],
        });
        let result =
            build_service_model(&service, "id", Options::default(), &UnavailableResolver);
        assert!(matches!(result, Err(TranslateError::ConfigInvalid(_))));
    }

    #[test]
    fn test_auth_rule_sets_require_auth() {
        let mut service = bookstore();
        service.authentication.rules.push(AuthenticationRule {
            selector: "bookstore.Bookstore.CreateShelf".to_string(),
            requirements: vec![AuthRequirement {
                provider_id: "firebase".to_string(),
                ..Default::default()
            }],
        });
        let (model, _) = build(&service, Options::default());
        assert!(model.methods["bookstore.Bookstore.CreateShelf"].require_auth);
        assert!(!model.methods["bookstore.Bookstore.ListShelves"].require_auth);
    }

    #[test]
    fn test_openid_discovery_resolves_empty_jwks_uri() {
        let mut service = bookstore();
        service.authentication.providers.push(AuthProvider {
            id: "firebase".to_string(),
            issuer: "https://issuer.example.com".to_string(),
            ..Default::default()
        });
        let resolver = StaticResolver::new(
            [(
                "https://issuer.example.com".to_string(),
                "https://issuer.example.com/keys".to_string(),
            )]
            .into_iter()
            .collect(),
        );
        let (model, _) =
            build_service_model(&service, "id", Options::default(), &resolver).unwrap();
        assert_eq!(
            model.auth_providers[0].jwks_uri,
            "https://issuer.example.com/keys"
        );
    }

    #[test]
    fn test_openid_discovery_disabled_is_fatal() {
        let mut service = bookstore();
        service.authentication.providers.push(AuthProvider {
            id: "firebase".to_string(),
            issuer: "https://issuer.example.com".to_string(),
            ..Default::default()
        });
        let options = Options {
            disable_oidc_discovery: true,
            ..Default::default()
        };
        let result = build_service_model(&service, "id", options, &UnavailableResolver);
        assert!(matches!(result, Err(TranslateError::ConfigInvalid(_))));
    }

    #[test]
    fn test_openid_discovery_failure_is_dependency_error() {
        let mut service = bookstore();
        service.authentication.providers.push(AuthProvider {
            id: "firebase".to_string(),
            issuer: "https://issuer.example.com".to_string(),
            ..Default::default()
        });
        let result =
            build_service_model(&service, "id", Options::default(), &UnavailableResolver);
        assert!(matches!(result, Err(TranslateError::DependencyFailure(_))));
    }

    #[test]
    fn test_access_token_source_selection() {
        let (model, _) = build(&bookstore(), Options::default());
        assert!(matches!(
            model.access_token,
            Some(AccessTokenSource::MetadataServer { .. })
        ));

        let options = Options {
            service_account_key: "/etc/key.json".to_string(),
            ..Default::default()
        };
        let (model, _) = build(&bookstore(), options);
        match model.access_token {
            Some(AccessTokenSource::TokenAgent { ref uri, .. }) => {
                assert_eq!(uri, "http://127.0.0.1:8791/local/access_token");
            }
            ref other => panic!("unexpected access token source: {other:?}"),
        }
    }

    #[test]
    fn test_streaming_flag() {
        let mut service = bookstore();
        service.apis[0].methods.push(ApiMethod {
            name: "Chat".to_string(),
            request_type_url: "type.googleapis.com/test.ChatRequest".to_string(),
            request_streaming: true,
            ..Default::default()
        });
        let (model, _) = build(&service, Options::default());
        assert!(model.methods["bookstore.Bookstore.Chat"].is_streaming);
    }

    #[test]
    fn test_malformed_request_type_url_warns() {
        let mut service = bookstore();
        service.apis[0].methods[0].request_type_url = "test.BadRequest".to_string();
        let (model, diagnostics) = build(&service, Options::default());
        assert!(model.methods["bookstore.Bookstore.ListShelves"]
            .request_type_name
            .is_empty());
        assert!(diagnostics
            .warnings
            .iter()
            .any(|w| w.message.contains("unexpected format")));
    }
}
