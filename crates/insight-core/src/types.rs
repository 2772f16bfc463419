//! Domain types for the Insight runtime API.
//!
//! Every value here is built fresh for one request and dropped when the
//! response (or stream) ends. Field names serialize in camelCase to match
//! the existing clients of the API.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Tenant identifier used as the authorization partition key.
pub type Handle = String;

// ── Labels ────────────────────────────────────────────────────────

pub const LABEL_BLOCK_ID: &str = "kapeta.com/block-id";
pub const LABEL_INSTANCE_ID: &str = "kapeta.com/instanceid";
pub const LABEL_INSTANCE_NAME: &str = "instance";
pub const LABEL_ENVIRONMENT_NAME: &str = "kapeta.com/environment-name";
pub const LABEL_ENVIRONMENT_VERSION: &str = "kapeta.com/environment-version";
pub const LABEL_PLAN_NAME: &str = "kapeta.com/plan-name";
pub const LABEL_PLAN_VERSION: &str = "kapeta.com/plan-version";
pub const LABEL_TARGET_NAME: &str = "kapeta.com/deployment-target-name";
pub const LABEL_TARGET_VERSION: &str = "kapeta.com/deployment-target-version";
pub const ANNOTATION_API_PATH: &str = "kapeta.com/api_path";

/// Metadata key carrying a gateway's public path prefix.
pub const METADATA_API_PATH: &str = "api_path";

// ── Cluster status ────────────────────────────────────────────────

/// Snapshot of one environment's runtime state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatus {
    pub environment_name: String,
    pub environment_version: String,
    pub plan_name: String,
    pub plan_version: String,
    pub target_name: String,
    pub target_version: String,
    /// Workloads first, then gateways, each in listing order.
    pub instances: Vec<InstanceState>,
    /// One entry per declared managed service, in descriptor order.
    pub operators: Vec<OperatorState>,
}

/// What kind of deployed unit an `InstanceState` describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceKind {
    Block,
    Gateway,
}

/// Derived readiness of a workload or gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReadyState {
    Ready,
    Failed,
}

impl ReadyState {
    /// `Ready` only when the counts match exactly; surplus replicas count
    /// as a mismatch too.
    pub fn from_replicas(ready: i32, desired: i32) -> Self {
        if ready == desired {
            Self::Ready
        } else {
            Self::Failed
        }
    }

    /// `Ready` when every server reports `"UP"`. No reports is vacuously
    /// ready.
    pub fn from_server_statuses<'a>(statuses: impl IntoIterator<Item = &'a str>) -> Self {
        if statuses.into_iter().all(|s| s == "UP") {
            Self::Ready
        } else {
            Self::Failed
        }
    }
}

/// Runtime state of one block workload or gateway route.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InstanceState {
    #[serde(rename = "type")]
    pub kind: InstanceKind,
    pub name: String,
    pub block_id: String,
    pub state: ReadyState,
    pub ready_replicas: i32,
    pub desired_replicas: i32,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

/// Lifecycle phase of a managed backing service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperatorPhase {
    Ready,
    Pending,
    Maintenance,
    Failed,
    Unknown,
}

/// State of one managed database declared by the environment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OperatorState {
    pub id: String,
    pub name: String,
    pub state: OperatorPhase,
}

impl OperatorState {
    pub fn new(id: &str, name: &str, state: OperatorPhase) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            state,
        }
    }
}

// ── Deployment descriptor ─────────────────────────────────────────

/// Identity labels of the deployed environment.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EnvironmentIdentity {
    pub environment_name: String,
    pub environment_version: String,
    pub plan_name: String,
    pub plan_version: String,
    pub target_name: String,
    pub target_version: String,
}

impl EnvironmentIdentity {
    /// Read the identity from descriptor labels; missing labels are empty.
    pub fn from_labels(labels: &BTreeMap<String, String>) -> Self {
        let get = |key: &str| labels.get(key).cloned().unwrap_or_default();
        Self {
            environment_name: get(LABEL_ENVIRONMENT_NAME),
            environment_version: get(LABEL_ENVIRONMENT_VERSION),
            plan_name: get(LABEL_PLAN_NAME),
            plan_version: get(LABEL_PLAN_VERSION),
            target_name: get(LABEL_TARGET_NAME),
            target_version: get(LABEL_TARGET_VERSION),
        }
    }
}

/// A managed service declared by the deployment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServiceDeclaration {
    pub id: String,
    pub kind: String,
}

/// The record declaring what an environment deploys.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeploymentDescriptor {
    pub identity: EnvironmentIdentity,
    /// Qualified deployment name, `<handle>/<name>`.
    pub name: String,
    pub services: Vec<ServiceDeclaration>,
}

impl DeploymentDescriptor {
    /// Tenant handle part of the qualified name.
    pub fn handle(&self) -> &str {
        self.name.split_once('/').map_or("", |(handle, _)| handle)
    }

    /// Deployment name without the handle. An unqualified name is
    /// returned whole.
    pub fn deployment_name(&self) -> &str {
        self.name.split_once('/').map_or(self.name.as_str(), |(_, name)| name)
    }

    /// Start a status snapshot carrying this environment's identity.
    pub fn empty_status(&self) -> ClusterStatus {
        let id = &self.identity;
        ClusterStatus {
            environment_name: id.environment_name.clone(),
            environment_version: id.environment_version.clone(),
            plan_name: id.plan_name.clone(),
            plan_version: id.plan_version.clone(),
            target_name: id.target_name.clone(),
            target_version: id.target_version.clone(),
            instances: Vec::new(),
            operators: Vec::new(),
        }
    }
}

// ── Logs ──────────────────────────────────────────────────────────

/// Severity assigned when the source does not report one.
pub const DEFAULT_SEVERITY: &str = "INFO";

/// One normalized log line.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogEntry {
    /// Source identifier (pod or container name).
    pub entity: String,
    /// Epoch milliseconds; `0` when the source timestamp was unreadable.
    pub timestamp: i64,
    pub severity: String,
    pub message: String,
}
