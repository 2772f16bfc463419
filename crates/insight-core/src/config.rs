//! insight.toml configuration parser.
//!
//! The file is read once at startup into an immutable `InsightConfig`
//! that is handed to every component constructor.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Which backend family serves operator state and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RuntimeMode {
    /// Everything is read from the orchestrator.
    #[default]
    KubernetesOnly,
    /// Managed SQL state and the log index come from the cloud provider.
    Gcp,
}

/// How gateway routes and their health are discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IngressStrategy {
    /// IngressRoute resources, health from the Traefik REST API.
    #[default]
    Traefik,
    /// Service-mesh VirtualServices, health from service endpoints.
    Mesh,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsightConfig {
    /// Tenant handle this environment belongs to.
    pub handle: String,
    #[serde(default)]
    pub mode: RuntimeMode,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub kubernetes: KubernetesConfig,
    #[serde(default)]
    pub ingress: IngressConfig,
    pub gcp: Option<GcpConfig>,
    #[serde(default)]
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KubernetesConfig {
    #[serde(default = "default_kube_api_url")]
    pub api_url: String,
    pub token_file: Option<PathBuf>,
    #[serde(default = "default_services_namespace")]
    pub services_namespace: String,
    #[serde(default = "default_infrastructure_namespace")]
    pub infrastructure_namespace: String,
    #[serde(default = "default_descriptor_namespace")]
    pub descriptor_namespace: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngressConfig {
    #[serde(default)]
    pub strategy: IngressStrategy,
    #[serde(default = "default_traefik_api_url")]
    pub traefik_api_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GcpConfig {
    pub project: String,
    /// Log index endpoint, reached over plain HTTP (egress proxy).
    pub logging_url: String,
    /// SQL administration endpoint, reached over plain HTTP (egress proxy).
    pub sqladmin_url: String,
    pub token_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuthConfig {
    /// Shared HS256 secret.
    pub hs256_secret: Option<String>,
    /// PEM-encoded RS256 public key.
    pub public_key_file: Option<PathBuf>,
    /// Expected `iss` claim, unchecked when absent.
    pub issuer: Option<String>,
}

fn default_port() -> u16 {
    1323
}

fn default_kube_api_url() -> String {
    "http://127.0.0.1:8001".to_string()
}

fn default_services_namespace() -> String {
    "services".to_string()
}

fn default_infrastructure_namespace() -> String {
    "infrastructure".to_string()
}

fn default_descriptor_namespace() -> String {
    "kapeta".to_string()
}

fn default_traefik_api_url() -> String {
    "http://traefik-dashboard-service.infrastructure.svc.cluster.local:8080".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

impl Default for KubernetesConfig {
    fn default() -> Self {
        Self {
            api_url: default_kube_api_url(),
            token_file: None,
            services_namespace: default_services_namespace(),
            infrastructure_namespace: default_infrastructure_namespace(),
            descriptor_namespace: default_descriptor_namespace(),
        }
    }
}

impl Default for IngressConfig {
    fn default() -> Self {
        Self {
            strategy: IngressStrategy::default(),
            traefik_api_url: default_traefik_api_url(),
        }
    }
}

impl InsightConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate a config document.
    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: InsightConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.handle.trim().is_empty() {
            anyhow::bail!("handle must be set");
        }
        if self.mode == RuntimeMode::Gcp && self.gcp.is_none() {
            anyhow::bail!("mode \"gcp\" requires a [gcp] section");
        }
        match (&self.auth.hs256_secret, &self.auth.public_key_file) {
            (Some(_), Some(_)) => {
                anyhow::bail!("[auth] takes either hs256_secret or public_key_file, not both")
            }
            (None, None) => anyhow::bail!("[auth] needs hs256_secret or public_key_file"),
            _ => Ok(()),
        }
    }

    /// Minimal config for tests and local runs.
    pub fn for_handle(handle: &str, hs256_secret: &str) -> Self {
        Self {
            handle: handle.to_string(),
            mode: RuntimeMode::default(),
            server: ServerConfig::default(),
            kubernetes: KubernetesConfig::default(),
            ingress: IngressConfig::default(),
            gcp: None,
            auth: AuthConfig {
                hs256_secret: Some(hs256_secret.to_string()),
                public_key_file: None,
                issuer: None,
            },
        }
    }
}
