//! Workload Adapter: block deployments and their replica counts.

use std::collections::BTreeMap;
use std::sync::Arc;

use insight_core::{InstanceKind, InstanceState, ReadyState, LABEL_BLOCK_ID};

use crate::clients::{Orchestrator, Workload};
use crate::error::BackendResult;

pub struct WorkloadAdapter {
    orchestrator: Arc<dyn Orchestrator>,
}

impl WorkloadAdapter {
    pub fn new(orchestrator: Arc<dyn Orchestrator>) -> Self {
        Self { orchestrator }
    }

    /// Every deployment in `namespace`, in listing order.
    pub async fn list_workloads(&self, namespace: &str) -> BackendResult<Vec<Workload>> {
        self.orchestrator.list_workloads(namespace, None).await
    }

    /// [`Self::list_workloads`] mapped to `block` instances.
    pub async fn block_instances(&self, namespace: &str) -> BackendResult<Vec<InstanceState>> {
        let workloads = self.list_workloads(namespace).await?;
        Ok(workloads.iter().map(block_instance).collect())
    }
}

pub fn block_instance(workload: &Workload) -> InstanceState {
    InstanceState {
        kind: InstanceKind::Block,
        name: workload.name.clone(),
        block_id: workload.labels.get(LABEL_BLOCK_ID).cloned().unwrap_or_default(),
        state: ReadyState::from_replicas(workload.ready_replicas, workload.desired_replicas),
        ready_replicas: workload.ready_replicas,
        desired_replicas: workload.desired_replicas,
        metadata: BTreeMap::new(),
    }
}
