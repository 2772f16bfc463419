//! Deployment descriptor lookup.
//!
//! The descriptor is stored as a secret labelled with the environment
//! name. Its labels carry the environment identity and its `config` key
//! holds the deployment document.

use std::sync::Arc;

use serde::Deserialize;
use tracing::debug;

use insight_core::types::LABEL_ENVIRONMENT_NAME;
use insight_core::{DeploymentDescriptor, EnvironmentIdentity, ServiceDeclaration};

use crate::clients::{Orchestrator, Secret};
use crate::error::{BackendError, BackendResult};

/// Secret data key holding the deployment document.
const CONFIG_KEY: &str = "config";

#[derive(Debug, Deserialize, Default)]
struct DeploymentDocument {
    #[serde(default)]
    metadata: DocumentMetadata,
    #[serde(default)]
    spec: DocumentSpec,
}

#[derive(Debug, Deserialize, Default)]
struct DocumentMetadata {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize, Default)]
struct DocumentSpec {
    #[serde(default)]
    services: Vec<ServiceDeclaration>,
}

/// Reads the single deployment descriptor of an environment.
pub struct DescriptorSource {
    orchestrator: Arc<dyn Orchestrator>,
    namespace: String,
}

impl DescriptorSource {
    pub fn new(orchestrator: Arc<dyn Orchestrator>, namespace: &str) -> Self {
        Self {
            orchestrator,
            namespace: namespace.to_string(),
        }
    }

    /// Load the descriptor, optionally narrowed to one environment name.
    ///
    /// Exactly one secret must match; zero or several is `NotFound`.
    pub async fn load(&self, environment: Option<&str>) -> BackendResult<DeploymentDescriptor> {
        let selector = match environment {
            Some(name) => format!("{LABEL_ENVIRONMENT_NAME}={name}"),
            None => LABEL_ENVIRONMENT_NAME.to_string(),
        };
        let mut secrets = self.orchestrator.list_secrets(&self.namespace, &selector).await?;
        if secrets.len() != 1 {
            return Err(BackendError::NotFound(format!(
                "expected exactly one deployment descriptor in {}, found {}",
                self.namespace,
                secrets.len()
            )));
        }
        let secret = secrets.remove(0);
        debug!(secret = %secret.name, "loaded deployment descriptor");
        parse_descriptor(&secret)
    }
}

fn parse_descriptor(secret: &Secret) -> BackendResult<DeploymentDescriptor> {
    let identity = EnvironmentIdentity::from_labels(&secret.labels);
    let document = match secret.data.get(CONFIG_KEY) {
        Some(raw) => serde_json::from_slice::<DeploymentDocument>(raw)
            .map_err(|e| BackendError::Decode(format!("descriptor {}: {e}", secret.name)))?,
        // An environment without managed services may carry no document.
        None => DeploymentDocument::default(),
    };
    Ok(DeploymentDescriptor {
        identity,
        name: document.metadata.name,
        services: document.spec.services,
    })
}
