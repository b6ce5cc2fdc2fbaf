//! Upstream cluster assembly
//!
//! One strict-DNS cluster for the local backend, one logical-DNS cluster
//! per remote backend, plus the auxiliary clusters the filters need: the
//! access-token source and one cluster per distinct JWKS host.

use std::collections::HashSet;

use url::Url;

use super::{format_duration, Cluster, ClusterLoadAssignment, Http2ProtocolOptions, TransportSocket};
use crate::model::{AccessTokenSource, BackendCluster, BackendProtocol, ServiceModel};
use crate::{Result, TranslateError};

const STRICT_DNS: &str = "STRICT_DNS";
const LOGICAL_DNS: &str = "LOGICAL_DNS";

/// Assemble the cluster list for a service model. Order is deterministic:
/// local, remotes in rule order, token source, JWKS clusters in provider
/// order.
pub fn make_clusters(model: &ServiceModel) -> Result<Vec<Cluster>> {
    let connect_timeout = format_duration(model.options.cluster_connect_timeout());
    let mut clusters = Vec::new();

    clusters.push(backend_cluster(
        &model.local_backend_cluster,
        STRICT_DNS,
        &connect_timeout,
    ));

    for remote in &model.remote_backend_clusters {
        clusters.push(backend_cluster(remote, LOGICAL_DNS, &connect_timeout));
    }

    if let Some(source) = &model.access_token {
        clusters.push(token_cluster(source, &connect_timeout)?);
    }

    let mut seen_jwks_addresses = HashSet::new();
    for provider in &model.auth_providers {
        if provider.jwks_uri.is_empty() {
            continue;
        }
        let (hostname, port, use_tls) = parse_http_uri(&provider.jwks_uri).map_err(|e| {
            TranslateError::ConfigInvalid(format!(
                "jwks_uri for provider ({}): {e}",
                provider.id
            ))
        })?;
        let address = format!("{hostname}:{port}");
        if !seen_jwks_addresses.insert(address.clone()) {
            continue;
        }
        clusters.push(Cluster {
            name: format!("jwks-cluster-{address}"),
            connect_timeout: connect_timeout.clone(),
            cluster_type: LOGICAL_DNS.to_string(),
            load_assignment: ClusterLoadAssignment::single(
                &format!("jwks-cluster-{address}"),
                &hostname,
                port,
            ),
            http2_protocol_options: None,
            transport_socket: use_tls.then(|| TransportSocket::upstream_tls(&hostname)),
        });
    }

    Ok(clusters)
}

fn backend_cluster(backend: &BackendCluster, cluster_type: &str, connect_timeout: &str) -> Cluster {
    Cluster {
        name: backend.cluster_name.clone(),
        connect_timeout: connect_timeout.to_string(),
        cluster_type: cluster_type.to_string(),
        load_assignment: ClusterLoadAssignment::single(
            &backend.cluster_name,
            &backend.hostname,
            backend.port,
        ),
        http2_protocol_options: matches!(
            backend.protocol,
            BackendProtocol::Grpc | BackendProtocol::Http2
        )
        .then_some(Http2ProtocolOptions {}),
        transport_socket: backend
            .use_tls
            .then(|| TransportSocket::upstream_tls(&backend.hostname)),
    }
}

fn token_cluster(source: &AccessTokenSource, connect_timeout: &str) -> Result<Cluster> {
    let (uri, cluster_name) = match source {
        AccessTokenSource::TokenAgent { uri, cluster, .. } => (uri, cluster),
        AccessTokenSource::MetadataServer { uri, cluster, .. } => (uri, cluster),
    };
    let (hostname, port, use_tls) = parse_http_uri(uri)
        .map_err(|e| TranslateError::ConfigInvalid(format!("token source uri: {e}")))?;
    Ok(Cluster {
        name: cluster_name.clone(),
        connect_timeout: connect_timeout.to_string(),
        cluster_type: STRICT_DNS.to_string(),
        load_assignment: ClusterLoadAssignment::single(cluster_name, &hostname, port),
        http2_protocol_options: None,
        transport_socket: use_tls.then(|| TransportSocket::upstream_tls(&hostname)),
    })
}

fn parse_http_uri(uri: &str) -> std::result::Result<(String, u16, bool), String> {
    let url = Url::parse(uri).map_err(|e| format!("error parsing uri {uri}: {e}"))?;
    let use_tls = match url.scheme() {
        "http" => false,
        "https" => true,
        other => return Err(format!("unsupported scheme {other} in uri {uri}")),
    };
    let hostname = url
        .host_str()
        .ok_or_else(|| format!("uri {uri} has no host"))?
        .to_string();
    let port = url.port().unwrap_or(if use_tls { 443 } else { 80 });
    Ok((hostname, port, use_tls))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::build_service_model;
    use crate::openid::UnavailableResolver;
    use crate::options::Options;
    use crate::schema::{Api, ApiMethod, AuthProvider, ServiceDescription};

    fn service_with_provider(jwks_uri: &str) -> ServiceDescription {
        ServiceDescription {
            name: "svc.example.com".to_string(),
            apis: vec![Api {
                name: "svc".to_string(),
                methods: vec![ApiMethod {
                    name: "Get".to_string(),
                    request_type_url: "type.googleapis.com/svc.GetRequest".to_string(),
                    ..Default::default()
                }],
                ..Default::default()
            }],
            authentication: crate::schema::Authentication {
                providers: if jwks_uri.is_empty() {
                    Vec::new()
                } else {
                    vec![AuthProvider {
                        id: "auth0".to_string(),
                        issuer: "https://issuer.example.com".to_string(),
                        jwks_uri: jwks_uri.to_string(),
                        ..Default::default()
                    }]
                },
                rules: Vec::new(),
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_local_cluster_shape() {
        let service = service_with_provider("");
        let options = Options {
            backend_address: "grpc://127.0.0.1:8000".to_string(),
            ..Default::default()
        };
        let (model, _) =
            build_service_model(&service, "id", options, &UnavailableResolver).unwrap();
        let clusters = make_clusters(&model).unwrap();

        let local = &clusters[0];
        assert_eq!(local.name, "backend-cluster-svc.example.com_local");
        assert_eq!(local.cluster_type, "STRICT_DNS");
        assert_eq!(local.connect_timeout, "20s");
        assert!(local.http2_protocol_options.is_some());
        assert!(local.transport_socket.is_none());
        let socket = &local.load_assignment.endpoints[0].lb_endpoints[0]
            .endpoint
            .address
            .socket_address;
        assert_eq!(socket.address, "127.0.0.1");
        assert_eq!(socket.port_value, 8000);
    }

    #[test]
    fn test_metadata_cluster_present_by_default() {
        let service = service_with_provider("");
        let (model, _) =
            build_service_model(&service, "id", Options::default(), &UnavailableResolver)
                .unwrap();
        let clusters = make_clusters(&model).unwrap();
        let metadata = clusters
            .iter()
            .find(|c| c.name == "metadata-cluster")
            .unwrap();
        assert_eq!(
            metadata.load_assignment.endpoints[0].lb_endpoints[0]
                .endpoint
                .address
                .socket_address
                .address,
            "169.254.169.254"
        );
    }

    #[test]
    fn test_jwks_cluster_with_tls() {
        let service = service_with_provider("https://issuer.example.com/keys");
        let (model, _) =
            build_service_model(&service, "id", Options::default(), &UnavailableResolver)
                .unwrap();
        let clusters = make_clusters(&model).unwrap();
        let jwks = clusters
            .iter()
            .find(|c| c.name == "jwks-cluster-issuer.example.com:443")
            .unwrap();
        assert_eq!(jwks.cluster_type, "LOGICAL_DNS");
        assert_eq!(
            jwks.transport_socket
                .as_ref()
                .map(|t| t.typed_config.sni.as_str()),
            Some("issuer.example.com")
        );
    }
}
