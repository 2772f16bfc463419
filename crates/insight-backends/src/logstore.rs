//! Log Store Adapter: the two places log lines come from.
//!
//! [`PodLogSource`] streams container output straight from the
//! orchestrator. [`LogIndexSource`] pages through the cloud log index.
//! Normalization into `LogEntry` happens one layer up.

use std::sync::Arc;

use tracing::debug;

use insight_core::{LABEL_BLOCK_ID, LABEL_INSTANCE_NAME};

use crate::clients::{CloudLogs, LineStream, LogPage, LogQuery, Orchestrator, Pod, PodLogOptions};
use crate::error::{BackendError, BackendResult};

/// Page size for index queries.
pub const INDEX_PAGE_SIZE: u32 = 100;
/// Oldest entries first.
pub const INDEX_ORDER: &str = "timestamp asc";

/// How a logical instance reference selects pods.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PodSelector {
    BlockId(String),
    InstanceName(String),
}

impl PodSelector {
    pub fn label_selector(&self) -> String {
        match self {
            Self::BlockId(id) => format!("{LABEL_BLOCK_ID}={id}"),
            Self::InstanceName(name) => format!("{LABEL_INSTANCE_NAME}={name}"),
        }
    }
}

pub struct PodLogSource {
    orchestrator: Arc<dyn Orchestrator>,
}

impl PodLogSource {
    pub fn new(orchestrator: Arc<dyn Orchestrator>) -> Self {
        Self { orchestrator }
    }

    /// Pods matching `selector`. An empty match is `NotFound`.
    pub async fn resolve(&self, namespace: &str, selector: &PodSelector) -> BackendResult<Vec<Pod>> {
        let label_selector = selector.label_selector();
        let pods = self.orchestrator.list_pods(namespace, &label_selector).await?;
        if pods.is_empty() {
            return Err(BackendError::NotFound(format!(
                "no pods in {namespace} match {label_selector}"
            )));
        }
        debug!(%namespace, selector = %label_selector, pods = pods.len(), "resolved log sources");
        Ok(pods)
    }

    pub async fn open(&self, namespace: &str, pod: &str, options: &PodLogOptions) -> BackendResult<LineStream> {
        self.orchestrator.stream_pod_logs(namespace, pod, options).await
    }
}

/// Structured filter over the log index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogIndexFilter {
    pub handle: String,
    pub deployment_name: String,
    pub instance: String,
    pub container: String,
    /// Only entries at or after this RFC 3339 timestamp. The boundary is
    /// inclusive so late writes sharing the last timestamp are not lost.
    pub after: Option<String>,
}

impl LogIndexFilter {
    /// Render the index's filter language; terms are implicitly ANDed.
    pub fn render(&self) -> String {
        // Label values cannot contain "/", so the deployment is "<handle>-<name>".
        let mut terms = vec![
            format!("labels.\"k8s-pod/instance\"=\"{}\"", escape(&self.instance)),
            format!(
                "labels.\"k8s-pod/deployment\"=\"{}-{}\"",
                escape(&self.handle),
                escape(&self.deployment_name)
            ),
            "resource.type=\"k8s_container\"".to_string(),
            format!("resource.labels.container_name=\"{}\"", escape(&self.container)),
        ];
        if let Some(after) = &self.after {
            terms.push(format!("timestamp>=\"{}\"", escape(after)));
        }
        terms.join(" ")
    }
}

fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

pub struct LogIndexSource {
    cloud_logs: Arc<dyn CloudLogs>,
}

impl LogIndexSource {
    pub fn new(cloud_logs: Arc<dyn CloudLogs>) -> Self {
        Self { cloud_logs }
    }

    /// Fetch one page. `page_token` is the cursor from the previous page.
    pub async fn fetch_page(&self, filter: &LogIndexFilter, page_token: Option<String>) -> BackendResult<LogPage> {
        let query = LogQuery {
            filter: filter.render(),
            order_by: INDEX_ORDER.to_string(),
            page_size: INDEX_PAGE_SIZE,
            page_token,
        };
        self.cloud_logs.list_entries(&query).await
    }
}
