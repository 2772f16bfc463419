//! insight-backends — read-only views over the systems Insight reports on.
//!
//! # Layers
//!
//! ```text
//! Adapters (what the aggregator and log engine call)
//!   ├── WorkloadAdapter        deployments → replica counts
//!   ├── IngressAdapter         TraefikIngress | MeshIngress
//!   ├── OperatorAdapter        per-kind dispatch → ManagedSql | ClusterWorkload
//!   ├── DescriptorSource       environment identity + declared services
//!   └── PodLogSource / LogIndexSource
//! Clients (narrow collaborator traits)
//!   ├── Orchestrator   ── KubeClient
//!   ├── TraefikApi     ── TraefikClient
//!   ├── CloudLogs      ── CloudLoggingClient
//!   └── SqlAdmin       ── SqlAdminClient
//! ```
//!
//! Every client trait has an in-memory double in `fake`, built under
//! `cfg(test)` or the `fake` feature, so the upper crates can be tested
//! without a cluster.

pub mod clients;
pub mod descriptor;
pub mod error;
#[cfg(any(test, feature = "fake"))]
pub mod fake;
pub mod gcp;
pub mod http;
pub mod ingress;
pub mod kube;
pub mod logstore;
pub mod operator;
pub mod traefik;
pub mod workload;

use std::sync::Arc;

use insight_core::{IngressStrategy, InsightConfig};

pub use clients::*;
pub use descriptor::DescriptorSource;
pub use error::{BackendError, BackendResult};
pub use ingress::{IngressAdapter, MeshIngress, Route, ServiceHealth, TraefikIngress};
pub use logstore::{LogIndexFilter, LogIndexSource, PodLogSource, PodSelector};
pub use operator::{OperatorAdapter, OperatorStrategy, ServiceKind};
pub use workload::WorkloadAdapter;

/// The set of collaborator clients one process talks to.
#[derive(Clone)]
pub struct Backends {
    pub orchestrator: Arc<dyn Orchestrator>,
    pub traefik: Option<Arc<dyn TraefikApi>>,
    pub cloud_logs: Option<Arc<dyn CloudLogs>>,
    pub sql_admin: Option<Arc<dyn SqlAdmin>>,
}

impl Backends {
    /// Orchestrator-only backends; cloud clients are added with the
    /// `with_*` builders.
    pub fn new(orchestrator: Arc<dyn Orchestrator>) -> Self {
        Self {
            orchestrator,
            traefik: None,
            cloud_logs: None,
            sql_admin: None,
        }
    }

    pub fn with_traefik(mut self, traefik: Arc<dyn TraefikApi>) -> Self {
        self.traefik = Some(traefik);
        self
    }

    pub fn with_cloud_logs(mut self, logs: Arc<dyn CloudLogs>) -> Self {
        self.cloud_logs = Some(logs);
        self
    }

    pub fn with_sql_admin(mut self, sql: Arc<dyn SqlAdmin>) -> Self {
        self.sql_admin = Some(sql);
        self
    }

    /// Plain-HTTP clients for everything the config points at.
    pub fn http(config: &InsightConfig, kube_token: Option<String>, gcp_token: Option<String>) -> Self {
        let mut backends = Self::new(Arc::new(kube::KubeClient::new(
            &config.kubernetes.api_url,
            kube_token,
        )));
        if config.ingress.strategy == IngressStrategy::Traefik {
            backends = backends.with_traefik(Arc::new(traefik::TraefikClient::new(
                &config.ingress.traefik_api_url,
            )));
        }
        if let Some(gcp_config) = &config.gcp {
            backends = backends
                .with_cloud_logs(Arc::new(gcp::CloudLoggingClient::new(
                    &gcp_config.logging_url,
                    &gcp_config.project,
                    gcp_token.clone(),
                )))
                .with_sql_admin(Arc::new(gcp::SqlAdminClient::new(
                    &gcp_config.sqladmin_url,
                    gcp_token,
                )));
        }
        backends
    }

    /// The ingress strategy selected by config.
    pub fn ingress_adapter(&self, config: &InsightConfig) -> BackendResult<Arc<dyn IngressAdapter>> {
        match config.ingress.strategy {
            IngressStrategy::Traefik => {
                let traefik = self.traefik.clone().ok_or_else(|| {
                    BackendError::Unavailable("traefik ingress strategy needs a Traefik API client".into())
                })?;
                Ok(Arc::new(TraefikIngress::new(self.orchestrator.clone(), traefik)))
            }
            IngressStrategy::Mesh => Ok(Arc::new(MeshIngress::new(self.orchestrator.clone()))),
        }
    }
}
