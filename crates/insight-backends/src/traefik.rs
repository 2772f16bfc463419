//! Traefik dashboard REST API client.

use async_trait::async_trait;

use crate::clients::{TraefikApi, TraefikRouter, TraefikService};
use crate::error::BackendResult;
use crate::http::HttpJson;

/// Provider suffix Traefik appends to services it learned from CRDs.
const CRD_PROVIDER: &str = "kubernetescrd";

pub struct TraefikClient {
    http: HttpJson,
}

impl TraefikClient {
    pub fn new(api_url: &str) -> Self {
        Self {
            http: HttpJson::new(api_url, None),
        }
    }
}

fn service_path(name: &str) -> String {
    // Router service references may already carry a provider suffix.
    let name = name.split_once('@').map_or(name, |(bare, _)| bare);
    format!("/api/http/services/{name}@{CRD_PROVIDER}")
}

#[async_trait]
impl TraefikApi for TraefikClient {
    async fn list_routers(&self) -> BackendResult<Vec<TraefikRouter>> {
        self.http.get_json("/api/http/routers").await
    }

    async fn get_service(&self, name: &str) -> BackendResult<TraefikService> {
        self.http.get_json(&service_path(name)).await
    }
}
