//! Portico configuration generator
//!
//! Translates a declarative API service description — APIs, HTTP bindings,
//! backend rules, usage and quota policies, authentication providers,
//! system parameters — into the concrete data-plane configuration an L7
//! proxy consumes: an ordered route table with per-route filter bindings
//! and the upstream cluster list.
//!
//! A build is synchronous and owns all of its state; the resulting
//! `ServiceModel` is immutable and replaced wholesale on config rollover.
//! The only collaborator invoked during a build is OpenID Connect
//! discovery, behind the [`openid::JwksResolver`] trait.

pub mod cli;
pub mod httppattern;
pub mod model;
pub mod openid;
pub mod options;
pub mod schema;
pub mod xds;

pub use model::{build_service_model, Diagnostics, ServiceModel};
pub use options::Options;
pub use schema::ServiceDescription;

use openid::JwksResolver;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TranslateError {
    /// Semantic violation in the service description or options.
    #[error("invalid service configuration: {0}")]
    ConfigInvalid(String),

    /// URI template parse failure or an oversize route regex.
    #[error("invalid uri template: {0}")]
    TemplateInvalid(String),

    /// A collaborator call (OpenID discovery) failed.
    #[error("dependency failure: {0}")]
    DependencyFailure(String),
}

pub type Result<T> = std::result::Result<T, TranslateError>;

/// Complete output of one translation build.
#[derive(Debug)]
pub struct TranslationResult {
    pub model: ServiceModel,
    pub route_config: xds::RouteConfiguration,
    pub clusters: Vec<xds::Cluster>,
    pub diagnostics: Diagnostics,
}

/// Run the full pipeline: build the service model, generate the route
/// table, and assemble the cluster list. Errors abort the build; nothing
/// partial is returned.
pub fn translate(
    service: &ServiceDescription,
    config_id: &str,
    options: Options,
    resolver: &dyn JwksResolver,
) -> Result<TranslationResult> {
    let (model, diagnostics) = build_service_model(service, config_id, options, resolver)?;
    let route_config = xds::make_route_config(&model)?;
    let clusters = xds::make_clusters(&model)?;
    Ok(TranslationResult {
        model,
        route_config,
        clusters,
        diagnostics,
    })
}
