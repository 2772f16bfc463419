//! Operator Adapter: state of the managed services a deployment declares.
//!
//! Each declared service kind maps to a strategy. Lookups are best-effort:
//! a failing backend degrades that one entry and is logged, never
//! propagated.

use std::sync::Arc;

use futures_util::future::join_all;
use tracing::{debug, warn};

use insight_core::{
    DeploymentDescriptor, InsightConfig, OperatorPhase, OperatorState, ReadyState, RuntimeMode,
    ServiceDeclaration, LABEL_BLOCK_ID,
};

use crate::clients::{Orchestrator, SqlAdmin};
use crate::Backends;

/// Cloud SQL user label holding `<deployment-name>-<service-id>`.
pub const SQL_LABEL_DEPLOYMENT: &str = "kapeta-deploymentname";
/// Cloud SQL user label holding the tenant handle.
pub const SQL_LABEL_HANDLE: &str = "kapeta-handle";

/// Managed service kinds with a known state source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceKind {
    Postgres,
    MongoDb,
}

impl ServiceKind {
    pub const POSTGRES: &'static str = "kapeta/resource-type-postgresql";
    pub const MONGODB: &'static str = "kapeta/resource-type-mongodb";

    /// `None` for kinds that have no operator state.
    pub fn parse(kind: &str) -> Option<Self> {
        match kind {
            Self::POSTGRES => Some(Self::Postgres),
            Self::MONGODB => Some(Self::MongoDb),
            _ => None,
        }
    }
}

/// Where the state of one service is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorStrategy {
    /// Instance listing of the cloud SQL administration API.
    ManagedSql,
    /// A workload in the infrastructure namespace labelled with the
    /// service id.
    ClusterWorkload,
}

impl OperatorStrategy {
    pub fn select(kind: ServiceKind, mode: RuntimeMode) -> Self {
        match (kind, mode) {
            (ServiceKind::Postgres, RuntimeMode::Gcp) => Self::ManagedSql,
            _ => Self::ClusterWorkload,
        }
    }
}

/// Map a Cloud SQL instance state onto an operator phase.
pub fn sql_phase(state: &str) -> OperatorPhase {
    match state {
        "RUNNABLE" => OperatorPhase::Ready,
        "PENDING_CREATE" | "PENDING_DELETE" | "PENDING_MAINTENANCE" => OperatorPhase::Pending,
        "MAINTENANCE" => OperatorPhase::Maintenance,
        "FAILED" => OperatorPhase::Failed,
        _ => OperatorPhase::Unknown,
    }
}

pub struct OperatorAdapter {
    orchestrator: Arc<dyn Orchestrator>,
    sql_admin: Option<Arc<dyn SqlAdmin>>,
    project: String,
    mode: RuntimeMode,
    infrastructure_namespace: String,
}

impl OperatorAdapter {
    pub fn new(orchestrator: Arc<dyn Orchestrator>, mode: RuntimeMode, infrastructure_namespace: &str) -> Self {
        Self {
            orchestrator,
            sql_admin: None,
            project: String::new(),
            mode,
            infrastructure_namespace: infrastructure_namespace.to_string(),
        }
    }

    pub fn with_sql_admin(mut self, sql_admin: Arc<dyn SqlAdmin>, project: &str) -> Self {
        self.sql_admin = Some(sql_admin);
        self.project = project.to_string();
        self
    }

    pub fn from_config(config: &InsightConfig, backends: &Backends) -> Self {
        let adapter = Self::new(
            backends.orchestrator.clone(),
            config.mode,
            &config.kubernetes.infrastructure_namespace,
        );
        match (&backends.sql_admin, &config.gcp) {
            (Some(sql), Some(gcp)) => adapter.with_sql_admin(sql.clone(), &gcp.project),
            _ => adapter,
        }
    }

    /// One state per declared service with a known kind, in descriptor
    /// order. Lookups run concurrently and always complete.
    pub async fn list_operator_states(&self, descriptor: &DeploymentDescriptor) -> Vec<OperatorState> {
        let lookups = descriptor.services.iter().filter_map(|decl| {
            let Some(kind) = ServiceKind::parse(&decl.kind) else {
                debug!(id = %decl.id, kind = %decl.kind, "no operator for service kind");
                return None;
            };
            Some(self.state_for(descriptor, decl, OperatorStrategy::select(kind, self.mode)))
        });
        join_all(lookups).await
    }

    async fn state_for(
        &self,
        descriptor: &DeploymentDescriptor,
        decl: &ServiceDeclaration,
        strategy: OperatorStrategy,
    ) -> OperatorState {
        match strategy {
            OperatorStrategy::ManagedSql => self.managed_sql_state(descriptor, decl).await,
            OperatorStrategy::ClusterWorkload => self.cluster_workload_state(decl).await,
        }
    }

    async fn managed_sql_state(&self, descriptor: &DeploymentDescriptor, decl: &ServiceDeclaration) -> OperatorState {
        let db_name = format!("{}-{}", descriptor.deployment_name(), decl.id);
        let handle = descriptor.handle();
        let Some(sql) = &self.sql_admin else {
            warn!(id = %decl.id, "no SQL administration client configured");
            return OperatorState::new(&decl.id, &db_name, OperatorPhase::Unknown);
        };

        match sql.list_instances(&self.project).await {
            Ok(instances) => {
                let found = instances.iter().find(|db| {
                    let labels = &db.settings.user_labels;
                    labels.get(SQL_LABEL_DEPLOYMENT).is_some_and(|v| *v == db_name)
                        && labels.get(SQL_LABEL_HANDLE).is_some_and(|v| v == handle)
                });
                match found {
                    Some(db) => {
                        debug!(%db_name, state = %db.state, "cloud SQL instance state");
                        OperatorState::new(&decl.id, &db_name, sql_phase(&db.state))
                    }
                    None => OperatorState::new(&decl.id, &db_name, OperatorPhase::Unknown),
                }
            }
            Err(e) => {
                warn!(%db_name, error = %e, "cloud SQL lookup failed");
                OperatorState::new(&decl.id, &db_name, OperatorPhase::Unknown)
            }
        }
    }

    async fn cluster_workload_state(&self, decl: &ServiceDeclaration) -> OperatorState {
        let selector = format!("{LABEL_BLOCK_ID}={}", decl.id);
        match self
            .orchestrator
            .list_workloads(&self.infrastructure_namespace, Some(&selector))
            .await
        {
            Ok(workloads) => match workloads.first() {
                Some(w) => {
                    let phase = match ReadyState::from_replicas(w.ready_replicas, w.desired_replicas) {
                        ReadyState::Ready => OperatorPhase::Ready,
                        ReadyState::Failed => OperatorPhase::Failed,
                    };
                    OperatorState::new(&decl.id, &w.name, phase)
                }
                None => {
                    warn!(id = %decl.id, "no workload found for managed service");
                    OperatorState::new(&decl.id, &decl.id, OperatorPhase::Failed)
                }
            },
            Err(e) => {
                warn!(id = %decl.id, error = %e, "managed service workload lookup failed");
                OperatorState::new(&decl.id, &decl.id, OperatorPhase::Failed)
            }
        }
    }
}
