//! Ingress Adapter: gateway routes and the health of the services behind
//! them.
//!
//! Two route sources exist. [`TraefikIngress`] reads IngressRoute
//! resources and asks the Traefik API for router and server state;
//! [`MeshIngress`] reads service-mesh VirtualServices and derives health
//! from the backing service's endpoints. Both produce the same [`Route`]
//! and [`ServiceHealth`] shapes, so gateway instances are built once.

use std::collections::BTreeMap;
use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use tracing::debug;

use insight_core::{
    InstanceKind, InstanceState, ReadyState, ANNOTATION_API_PATH, LABEL_INSTANCE_ID, METADATA_API_PATH,
};

use crate::clients::{Orchestrator, TraefikApi, MESH_VIRTUAL_SERVICES, TRAEFIK_INGRESS_ROUTES};
use crate::error::{BackendError, BackendResult};

/// One routable gateway entry.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Route {
    /// Name of the owning ingress resource.
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    /// Service whose health decides the route's state.
    pub backend_service_ref: String,
    /// Path prefix taken from the routing rule, when it has one.
    pub path_prefix: Option<String>,
}

/// Per-server status reports for one backend service.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ServiceHealth {
    /// Server address → state (`"UP"` when healthy).
    pub server_statuses: BTreeMap<String, String>,
}

impl ServiceHealth {
    pub fn state(&self) -> ReadyState {
        ReadyState::from_server_statuses(self.server_statuses.values().map(String::as_str))
    }
}

#[async_trait]
pub trait IngressAdapter: Send + Sync {
    async fn list_routes(&self, namespace: &str) -> BackendResult<Vec<Route>>;

    async fn get_service_health(&self, namespace: &str, service_ref: &str) -> BackendResult<ServiceHealth>;
}

/// Build the `gateway` instance for a route and its health.
pub fn gateway_instance(route: &Route, health: &ServiceHealth) -> InstanceState {
    let id = route
        .labels
        .get(LABEL_INSTANCE_ID)
        .filter(|id| !id.is_empty())
        .unwrap_or(&route.name)
        .clone();
    let api_path = route
        .path_prefix
        .clone()
        .or_else(|| route.annotations.get(ANNOTATION_API_PATH).cloned());
    let mut metadata = BTreeMap::new();
    if let Some(path) = api_path {
        metadata.insert(METADATA_API_PATH.to_string(), path);
    }
    InstanceState {
        kind: InstanceKind::Gateway,
        name: id.clone(),
        block_id: id,
        state: health.state(),
        ready_replicas: 0,
        desired_replicas: 0,
        metadata,
    }
}

static PATH_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"PathPrefix\(`([^`]*)`\)").expect("path prefix regex is valid"));

/// Path of the first `PathPrefix(`…`)` in a Traefik match expression.
pub fn path_from_rule(rule: &str) -> Option<String> {
    PATH_PREFIX.captures(rule).map(|caps| caps[1].to_string())
}

// ── Resource shapes ───────────────────────────────────────────────

#[derive(Debug, Deserialize, Default)]
struct ResourceMeta {
    #[serde(default)]
    name: String,
    #[serde(default)]
    labels: BTreeMap<String, String>,
    #[serde(default)]
    annotations: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct IngressRoute {
    #[serde(default)]
    metadata: ResourceMeta,
    #[serde(default)]
    spec: IngressRouteSpec,
}

#[derive(Debug, Deserialize, Default)]
struct IngressRouteSpec {
    #[serde(default)]
    routes: Vec<IngressRouteRule>,
}

#[derive(Debug, Deserialize)]
struct IngressRouteRule {
    #[serde(default, rename = "match")]
    match_rule: String,
}

#[derive(Debug, Deserialize)]
struct VirtualService {
    #[serde(default)]
    metadata: ResourceMeta,
    #[serde(default)]
    spec: VirtualServiceSpec,
}

#[derive(Debug, Deserialize, Default)]
struct VirtualServiceSpec {
    #[serde(default)]
    http: Vec<HttpRoute>,
}

#[derive(Debug, Deserialize)]
struct HttpRoute {
    #[serde(default, rename = "match")]
    matches: Vec<HttpMatch>,
    #[serde(default)]
    route: Vec<RouteDestination>,
}

#[derive(Debug, Deserialize)]
struct HttpMatch {
    #[serde(default)]
    uri: Option<StringMatch>,
}

#[derive(Debug, Deserialize)]
struct StringMatch {
    prefix: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RouteDestination {
    destination: Destination,
}

#[derive(Debug, Deserialize)]
struct Destination {
    host: String,
}

fn decode<T: serde::de::DeserializeOwned>(kind: &str, value: serde_json::Value) -> BackendResult<T> {
    serde_json::from_value(value).map_err(|e| BackendError::Decode(format!("{kind}: {e}")))
}

// ── Traefik ───────────────────────────────────────────────────────

pub struct TraefikIngress {
    orchestrator: Arc<dyn Orchestrator>,
    traefik: Arc<dyn TraefikApi>,
}

impl TraefikIngress {
    pub fn new(orchestrator: Arc<dyn Orchestrator>, traefik: Arc<dyn TraefikApi>) -> Self {
        Self { orchestrator, traefik }
    }
}

#[async_trait]
impl IngressAdapter for TraefikIngress {
    async fn list_routes(&self, namespace: &str) -> BackendResult<Vec<Route>> {
        let resources = self
            .orchestrator
            .list_custom_resources(TRAEFIK_INGRESS_ROUTES, namespace)
            .await?;
        if resources.is_empty() {
            return Ok(Vec::new());
        }
        let routers = self.traefik.list_routers().await?;

        let mut routes = Vec::new();
        for value in resources {
            let ingress: IngressRoute = decode("ingressroute", value)?;
            let spec_path = ingress
                .spec
                .routes
                .iter()
                .find_map(|r| path_from_rule(&r.match_rule));
            // Traefik names CRD routers "<namespace>-<resource>-<hash>@provider".
            // A resource whose name prefixes another's also claims its routers.
            let prefix = format!("{namespace}-{}", ingress.metadata.name);
            for router in routers.iter().filter(|r| r.name.starts_with(&prefix)) {
                routes.push(Route {
                    name: ingress.metadata.name.clone(),
                    labels: ingress.metadata.labels.clone(),
                    annotations: ingress.metadata.annotations.clone(),
                    backend_service_ref: router.service.clone(),
                    path_prefix: path_from_rule(&router.rule).or_else(|| spec_path.clone()),
                });
            }
        }
        debug!(%namespace, count = routes.len(), "traefik routes resolved");
        Ok(routes)
    }

    async fn get_service_health(&self, _namespace: &str, service_ref: &str) -> BackendResult<ServiceHealth> {
        let service = self.traefik.get_service(service_ref).await?;
        Ok(ServiceHealth {
            server_statuses: service.server_status,
        })
    }
}

// ── Service mesh ──────────────────────────────────────────────────

pub struct MeshIngress {
    orchestrator: Arc<dyn Orchestrator>,
}

impl MeshIngress {
    pub fn new(orchestrator: Arc<dyn Orchestrator>) -> Self {
        Self { orchestrator }
    }
}

#[async_trait]
impl IngressAdapter for MeshIngress {
    async fn list_routes(&self, namespace: &str) -> BackendResult<Vec<Route>> {
        let resources = self
            .orchestrator
            .list_custom_resources(MESH_VIRTUAL_SERVICES, namespace)
            .await?;

        let mut routes = Vec::new();
        for value in resources {
            let vs: VirtualService = decode("virtualservice", value)?;
            let destination = vs
                .spec
                .http
                .iter()
                .flat_map(|h| h.route.iter())
                .map(|r| r.destination.host.as_str())
                .next();
            let Some(host) = destination else {
                debug!(name = %vs.metadata.name, "virtual service has no destination, skipped");
                continue;
            };
            // Destination hosts may be fully qualified; endpoints are keyed
            // by the short service name.
            let service = host.split('.').next().unwrap_or(host).to_string();
            let path_prefix = vs
                .spec
                .http
                .iter()
                .flat_map(|h| h.matches.iter())
                .find_map(|m| m.uri.as_ref().and_then(|u| u.prefix.clone()));
            routes.push(Route {
                name: vs.metadata.name,
                labels: vs.metadata.labels,
                annotations: vs.metadata.annotations,
                backend_service_ref: service,
                path_prefix,
            });
        }
        Ok(routes)
    }

    async fn get_service_health(&self, namespace: &str, service_ref: &str) -> BackendResult<ServiceHealth> {
        let endpoints = self.orchestrator.get_endpoints(namespace, service_ref).await?;
        let mut server_statuses = BTreeMap::new();
        for addr in endpoints.ready {
            server_statuses.insert(addr, "UP".to_string());
        }
        for addr in endpoints.not_ready {
            server_statuses.insert(addr, "DOWN".to_string());
        }
        Ok(ServiceHealth { server_statuses })
    }
}
