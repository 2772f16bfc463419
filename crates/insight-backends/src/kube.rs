//! Orchestrator client over the Kubernetes REST API.
//!
//! Only the handful of read paths Insight needs are modelled, and only the
//! fields it reads are decoded.

use std::collections::BTreeMap;

use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;

use crate::clients::{
    CustomResource, LineStream, Orchestrator, Pod, PodLogOptions, Secret, ServiceEndpoints, Workload,
};
use crate::error::{BackendError, BackendResult};
use crate::http::{encode_component, encode_segment, HttpJson};

pub struct KubeClient {
    http: HttpJson,
}

impl KubeClient {
    /// `api_url` is typically `kubectl proxy` or the in-cluster API server
    /// behind a plain-HTTP sidecar.
    pub fn new(api_url: &str, token: Option<String>) -> Self {
        Self {
            http: HttpJson::new(api_url, token),
        }
    }
}

// ── Wire shapes ───────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct List<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

#[derive(Debug, Deserialize, Default)]
struct ObjectMeta {
    #[serde(default)]
    name: String,
    #[serde(default)]
    labels: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct Deployment {
    #[serde(default)]
    metadata: ObjectMeta,
    #[serde(default)]
    spec: DeploymentSpec,
    #[serde(default)]
    status: DeploymentStatus,
}

#[derive(Debug, Deserialize)]
struct DeploymentSpec {
    #[serde(default = "default_replicas")]
    replicas: i32,
}

impl Default for DeploymentSpec {
    fn default() -> Self {
        Self {
            replicas: default_replicas(),
        }
    }
}

// The API server defaults an unset replica count to one.
fn default_replicas() -> i32 {
    1
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct DeploymentStatus {
    #[serde(default)]
    ready_replicas: i32,
}

#[derive(Debug, Deserialize)]
struct PodObject {
    #[serde(default)]
    metadata: ObjectMeta,
}

#[derive(Debug, Deserialize)]
struct SecretObject {
    #[serde(default)]
    metadata: ObjectMeta,
    #[serde(default)]
    data: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct Endpoints {
    #[serde(default)]
    subsets: Vec<EndpointSubset>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EndpointSubset {
    #[serde(default)]
    addresses: Vec<EndpointAddress>,
    #[serde(default)]
    not_ready_addresses: Vec<EndpointAddress>,
}

#[derive(Debug, Deserialize)]
struct EndpointAddress {
    ip: String,
}

impl From<Deployment> for Workload {
    fn from(d: Deployment) -> Self {
        Workload {
            name: d.metadata.name,
            ready_replicas: d.status.ready_replicas,
            desired_replicas: d.spec.replicas,
            labels: d.metadata.labels,
        }
    }
}

fn decode_secret(secret: SecretObject) -> BackendResult<Secret> {
    let engine = base64::engine::general_purpose::STANDARD;
    let data = secret
        .data
        .into_iter()
        .map(|(key, value)| {
            engine
                .decode(value.as_bytes())
                .map(|bytes| (key.clone(), bytes))
                .map_err(|e| BackendError::Decode(format!("secret {} key {key}: {e}", secret.metadata.name)))
        })
        .collect::<BackendResult<BTreeMap<_, _>>>()?;
    Ok(Secret {
        name: secret.metadata.name,
        labels: secret.metadata.labels,
        data,
    })
}

fn with_selector(path: String, selector: Option<&str>) -> String {
    match selector {
        Some(selector) => format!("{path}?labelSelector={}", encode_component(selector)),
        None => path,
    }
}

/// `/api/v1/namespaces/{namespace}/{rest}` with every caller-supplied
/// segment encoded.
fn core_path(namespace: &str, rest: &[&str]) -> String {
    let mut path = format!("/api/v1/namespaces/{}", encode_segment(namespace));
    for segment in rest {
        path.push('/');
        path.push_str(&encode_segment(segment));
    }
    path
}

fn pod_log_path(namespace: &str, pod: &str, options: &PodLogOptions) -> String {
    format!(
        "{}/log?container={}&follow={}&previous={}&timestamps=true",
        core_path(namespace, &["pods", pod]),
        encode_component(&options.container),
        options.follow,
        options.previous,
    )
}

#[async_trait]
impl Orchestrator for KubeClient {
    async fn list_workloads(&self, namespace: &str, selector: Option<&str>) -> BackendResult<Vec<Workload>> {
        let path = format!("/apis/apps/v1/namespaces/{}/deployments", encode_segment(namespace));
        let path = with_selector(path, selector);
        let list: List<Deployment> = self.http.get_json(&path).await?;
        Ok(list.items.into_iter().map(Workload::from).collect())
    }

    async fn list_pods(&self, namespace: &str, selector: &str) -> BackendResult<Vec<Pod>> {
        let path = with_selector(core_path(namespace, &["pods"]), Some(selector));
        let list: List<PodObject> = self.http.get_json(&path).await?;
        Ok(list
            .items
            .into_iter()
            .map(|p| Pod {
                name: p.metadata.name,
                labels: p.metadata.labels,
            })
            .collect())
    }

    async fn list_secrets(&self, namespace: &str, selector: &str) -> BackendResult<Vec<Secret>> {
        let path = with_selector(core_path(namespace, &["secrets"]), Some(selector));
        let list: List<SecretObject> = self.http.get_json(&path).await?;
        list.items.into_iter().map(decode_secret).collect()
    }

    async fn list_custom_resources(
        &self,
        resource: CustomResource,
        namespace: &str,
    ) -> BackendResult<Vec<serde_json::Value>> {
        let path = format!(
            "/apis/{}/{}/namespaces/{}/{}",
            resource.group,
            resource.version,
            encode_segment(namespace),
            resource.plural
        );
        let list: List<serde_json::Value> = self.http.get_json(&path).await?;
        Ok(list.items)
    }

    async fn get_endpoints(&self, namespace: &str, service: &str) -> BackendResult<ServiceEndpoints> {
        let path = core_path(namespace, &["endpoints", service]);
        let endpoints: Endpoints = self.http.get_json(&path).await?;
        let mut out = ServiceEndpoints::default();
        for subset in endpoints.subsets {
            out.ready.extend(subset.addresses.into_iter().map(|a| a.ip));
            out.not_ready.extend(subset.not_ready_addresses.into_iter().map(|a| a.ip));
        }
        Ok(out)
    }

    async fn stream_pod_logs(
        &self,
        namespace: &str,
        pod: &str,
        options: &PodLogOptions,
    ) -> BackendResult<LineStream> {
        self.http.get_lines(&pod_log_path(namespace, pod, options)).await
    }
}
