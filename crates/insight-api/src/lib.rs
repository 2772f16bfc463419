//! insight-api — HTTP surface for status and logs.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/healthz` | Liveness, unauthenticated |
//! | GET | `/v1/status` | Runtime snapshot of the configured tenant |
//! | GET | `/v1/instances/{id}` | Logs of pods with this block id |
//! | GET | `/v1/instances/name/{name}` | Logs of pods with this instance name |
//! | GET | `/v1/instances/{handle}/{deployment}/{instance}/logs` | Logs of a deployment instance |
//!
//! Every `/v1` route requires a bearer token. Log routes answer with
//! newline-delimited JSON, one `LogEntry` per line.

pub mod auth;
pub mod error;
pub mod handlers;

use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::Request;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::get;
use tokio::sync::watch;
use tracing::info;

use insight_auth::TokenVerifier;
use insight_logs::LogEngine;
use insight_status::StatusAggregator;

pub use error::ApiError;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    /// Tenant served by the tenant-scoped routes.
    pub handle: String,
    pub status: Arc<StatusAggregator>,
    pub logs: Arc<LogEngine>,
    pub verifier: Arc<dyn TokenVerifier>,
    /// Flips to `true` when the server is shutting down; open log streams
    /// end when it does.
    pub shutdown: watch::Receiver<bool>,
}

impl ApiState {
    pub fn new(
        handle: &str,
        status: StatusAggregator,
        logs: LogEngine,
        verifier: Arc<dyn TokenVerifier>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            handle: handle.to_string(),
            status: Arc::new(status),
            logs: Arc::new(logs),
            verifier,
            shutdown,
        }
    }
}

/// Build the complete API router.
pub fn build_router(state: ApiState) -> Router {
    let v1 = Router::new()
        .route("/status", get(handlers::get_status))
        .route("/instances/{id}", get(handlers::logs_by_block_id))
        .route("/instances/name/{name}", get(handlers::logs_by_name))
        .route(
            "/instances/{id}/{deployment}/{instance}/logs",
            get(handlers::logs_by_deployment),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::require_bearer))
        .layer(middleware::from_fn(log_request))
        .with_state(state);

    Router::new()
        .nest("/v1", v1)
        .route("/healthz", get(handlers::healthz))
}

async fn log_request(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let started = Instant::now();
    let response = next.run(req).await;
    info!(
        %method,
        %path,
        status = response.status().as_u16(),
        latency_ms = started.elapsed().as_millis() as u64,
        "request"
    );
    response
}
