//! Status Aggregator.

use std::sync::Arc;

use futures_util::future::try_join_all;
use tracing::{debug, info};

use insight_auth::{require_scope, Claims, RUNTIME_READ};
use insight_backends::ingress::gateway_instance;
use insight_backends::{
    BackendError, BackendResult, Backends, DescriptorSource, IngressAdapter, OperatorAdapter, WorkloadAdapter,
};
use insight_core::{ClusterStatus, InsightConfig, InsightError, InsightResult, InstanceState};

pub struct StatusAggregator {
    descriptors: DescriptorSource,
    workloads: WorkloadAdapter,
    ingress: Arc<dyn IngressAdapter>,
    operators: OperatorAdapter,
    namespace: String,
}

/// Failures on the mandatory path are never "not found" to the caller:
/// a missing route service is a broken environment, not a missing one.
fn mandatory(err: BackendError) -> InsightError {
    match err {
        BackendError::Unavailable(msg) => InsightError::BackendUnavailable(msg),
        other => InsightError::Internal(other.to_string()),
    }
}

impl StatusAggregator {
    pub fn new(
        descriptors: DescriptorSource,
        workloads: WorkloadAdapter,
        ingress: Arc<dyn IngressAdapter>,
        operators: OperatorAdapter,
        namespace: &str,
    ) -> Self {
        Self {
            descriptors,
            workloads,
            ingress,
            operators,
            namespace: namespace.to_string(),
        }
    }

    /// Wire every adapter from config. Fails only when the configured
    /// ingress strategy has no client.
    pub fn from_config(config: &InsightConfig, backends: &Backends) -> InsightResult<Self> {
        let ingress = backends.ingress_adapter(config)?;
        Ok(Self::new(
            DescriptorSource::new(backends.orchestrator.clone(), &config.kubernetes.descriptor_namespace),
            WorkloadAdapter::new(backends.orchestrator.clone()),
            ingress,
            OperatorAdapter::from_config(config, backends),
            &config.kubernetes.services_namespace,
        ))
    }

    /// Snapshot of `handle`'s environment. `environment` narrows the
    /// descriptor lookup when the namespace holds more than one.
    pub async fn get_environment_status(
        &self,
        claims: &Claims,
        handle: &str,
        environment: Option<&str>,
    ) -> InsightResult<ClusterStatus> {
        require_scope(claims, handle, RUNTIME_READ)?;

        let descriptor = self.descriptors.load(environment).await.map_err(|e| match e {
            BackendError::NotFound(msg) => InsightError::NotFound(msg),
            other => mandatory(other),
        })?;
        let mut status = descriptor.empty_status();

        let instances = async {
            tokio::try_join!(
                self.workloads.block_instances(&self.namespace),
                self.gateway_instances(),
            )
        };
        let (instances, operators) =
            tokio::join!(instances, self.operators.list_operator_states(&descriptor));
        let (blocks, gateways) = instances.map_err(mandatory)?;

        debug!(
            %handle,
            blocks = blocks.len(),
            gateways = gateways.len(),
            operators = operators.len(),
            "environment status assembled"
        );
        status.instances = blocks;
        status.instances.extend(gateways);
        status.operators = operators;
        info!(%handle, environment = %status.environment_name, "served environment status");
        Ok(status)
    }

    async fn gateway_instances(&self) -> BackendResult<Vec<InstanceState>> {
        let routes = self.ingress.list_routes(&self.namespace).await?;
        let health = try_join_all(
            routes
                .iter()
                .map(|route| self.ingress.get_service_health(&self.namespace, &route.backend_service_ref)),
        )
        .await?;
        Ok(routes
            .iter()
            .zip(health.iter())
            .map(|(route, health)| gateway_instance(route, health))
            .collect())
    }
}
