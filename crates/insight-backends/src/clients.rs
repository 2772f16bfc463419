//! Collaborator client traits and the plain records they return.
//!
//! These are the only seams to the outside world. The HTTP
//! implementations live in `kube`, `traefik` and `gcp`; the in-memory
//! doubles in `fake`.

use std::collections::BTreeMap;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::BackendResult;

/// Raw log lines from one container, newline stripped.
pub type LineStream = BoxStream<'static, BackendResult<String>>;

// ── Orchestrator ──────────────────────────────────────────────────

/// A deployment-style workload and its replica counts.
#[derive(Debug, Clone, PartialEq)]
pub struct Workload {
    pub name: String,
    pub ready_replicas: i32,
    pub desired_replicas: i32,
    pub labels: BTreeMap<String, String>,
}

impl Workload {
    pub fn new(name: &str, ready_replicas: i32, desired_replicas: i32) -> Self {
        Self {
            name: name.to_string(),
            ready_replicas,
            desired_replicas,
            labels: BTreeMap::new(),
        }
    }

    pub fn with_label(mut self, key: &str, value: &str) -> Self {
        self.labels.insert(key.to_string(), value.to_string());
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Pod {
    pub name: String,
    pub labels: BTreeMap<String, String>,
}

/// A secret with its data already base64-decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct Secret {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub data: BTreeMap<String, Vec<u8>>,
}

/// Backend addresses of a service, split by readiness.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ServiceEndpoints {
    pub ready: Vec<String>,
    pub not_ready: Vec<String>,
}

/// Group/version/plural of a custom resource collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CustomResource {
    pub group: &'static str,
    pub version: &'static str,
    pub plural: &'static str,
}

pub const TRAEFIK_INGRESS_ROUTES: CustomResource = CustomResource {
    group: "traefik.io",
    version: "v1alpha1",
    plural: "ingressroutes",
};

pub const MESH_VIRTUAL_SERVICES: CustomResource = CustomResource {
    group: "networking.istio.io",
    version: "v1beta1",
    plural: "virtualservices",
};

/// Options for one container log request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodLogOptions {
    pub container: String,
    pub follow: bool,
    pub previous: bool,
}

/// Read access to the container orchestrator.
#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// Deployments in `namespace`, optionally filtered by an equality
    /// label selector (`key=value`).
    async fn list_workloads(&self, namespace: &str, selector: Option<&str>) -> BackendResult<Vec<Workload>>;

    async fn list_pods(&self, namespace: &str, selector: &str) -> BackendResult<Vec<Pod>>;

    /// Secrets carrying the label key in `selector` (existence or equality).
    async fn list_secrets(&self, namespace: &str, selector: &str) -> BackendResult<Vec<Secret>>;

    /// Custom resources as raw JSON objects.
    async fn list_custom_resources(
        &self,
        resource: CustomResource,
        namespace: &str,
    ) -> BackendResult<Vec<serde_json::Value>>;

    async fn get_endpoints(&self, namespace: &str, service: &str) -> BackendResult<ServiceEndpoints>;

    /// Container log lines with an RFC 3339 timestamp prefix.
    async fn stream_pod_logs(
        &self,
        namespace: &str,
        pod: &str,
        options: &PodLogOptions,
    ) -> BackendResult<LineStream>;
}

// ── Traefik ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraefikRouter {
    pub name: String,
    #[serde(default)]
    pub service: String,
    #[serde(default)]
    pub rule: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TraefikService {
    #[serde(default)]
    pub server_status: BTreeMap<String, String>,
}

/// The reverse proxy's REST API.
#[async_trait]
pub trait TraefikApi: Send + Sync {
    async fn list_routers(&self) -> BackendResult<Vec<TraefikRouter>>;

    /// Service details by name, without the provider suffix.
    async fn get_service(&self, name: &str) -> BackendResult<TraefikService>;
}

// ── Cloud log index ───────────────────────────────────────────────

/// One page request against the log index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogQuery {
    pub filter: String,
    pub order_by: String,
    pub page_size: u32,
    pub page_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct MonitoredResource {
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// A log index entry in the provider's wire shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct IndexRecord {
    /// Provider-assigned id, unique per entry.
    #[serde(default)]
    pub insert_id: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default)]
    pub text_payload: Option<String>,
    #[serde(default)]
    pub json_payload: Option<serde_json::Value>,
    #[serde(default)]
    pub resource: MonitoredResource,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct LogPage {
    pub entries: Vec<IndexRecord>,
    /// Cursor for the next page; `None` when exhausted.
    pub next_page_token: Option<String>,
}

#[async_trait]
pub trait CloudLogs: Send + Sync {
    async fn list_entries(&self, query: &LogQuery) -> BackendResult<LogPage>;
}

// ── Cloud SQL administration ──────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SqlSettings {
    #[serde(default)]
    pub user_labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SqlInstance {
    pub name: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub settings: SqlSettings,
}

#[async_trait]
pub trait SqlAdmin: Send + Sync {
    async fn list_instances(&self, project: &str) -> BackendResult<Vec<SqlInstance>>;
}

/// Whether `labels` satisfy a single-term selector: `key` (existence) or
/// `key=value` (equality).
pub fn selector_matches(selector: &str, labels: &BTreeMap<String, String>) -> bool {
    match selector.split_once('=') {
        Some((key, value)) => labels.get(key).is_some_and(|v| v == value),
        None => labels.contains_key(selector),
    }
}
