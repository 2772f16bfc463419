//! Route handlers.
//!
//! Status answers with the `ClusterStatus` document itself. Log routes
//! stream `application/x-ndjson`; once the first line is out, a backend
//! failure can only be reported as a final `{"error": ...}` line.

use std::convert::Infallible;

use axum::Json;
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures_util::StreamExt;
use serde::Deserialize;
use tokio::sync::watch;
use tracing::error;

use insight_auth::Claims;
use insight_core::{ClusterStatus, InsightError, LogEntry};
use insight_logs::{until_cancelled, InstanceRef, LogOptions, LogStream};

use crate::ApiState;
use crate::error::ApiError;

pub const NDJSON: &str = "application/x-ndjson";

/// GET /healthz
pub async fn healthz() -> &'static str {
    "OK!"
}

#[derive(Debug, Default, Deserialize)]
pub struct StatusQuery {
    pub environment: Option<String>,
}

/// GET /v1/status
pub async fn get_status(
    State(state): State<ApiState>,
    axum::Extension(claims): axum::Extension<Claims>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<ClusterStatus>, ApiError> {
    let status = state
        .status
        .get_environment_status(&claims, &state.handle, query.environment.as_deref())
        .await?;
    Ok(Json(status))
}

// ── Logs ───────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct LogQuery {
    pub tail: Option<String>,
    pub previous: Option<String>,
    pub container: Option<String>,
    pub namespace: Option<String>,
}

/// A flag is set when present with any value but `false` or `0`.
fn flag(value: Option<&str>) -> bool {
    match value {
        None => false,
        Some(v) => !(v.eq_ignore_ascii_case("false") || v == "0"),
    }
}

/// A DNS-1123 label: 1 to 63 lowercase alphanumerics or `-`, starting
/// and ending alphanumeric. Namespace and container names are both labels.
fn is_dns_label(value: &str) -> bool {
    let bytes = value.as_bytes();
    let edge = |b: &u8| b.is_ascii_lowercase() || b.is_ascii_digit();
    !bytes.is_empty()
        && bytes.len() <= 63
        && bytes.first().is_some_and(edge)
        && bytes.last().is_some_and(edge)
        && bytes.iter().all(|b| edge(b) || *b == b'-')
}

fn label_param(name: &str, value: Option<&str>, default: String) -> Result<String, ApiError> {
    match value {
        None | Some("") => Ok(default),
        Some(v) if is_dns_label(v) => Ok(v.to_string()),
        Some(_) => Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            format!("{name} must be a DNS label"),
        )),
    }
}

impl LogQuery {
    /// Stream options, with defaults for absent parameters. Rejects a
    /// namespace or container that is not a DNS label.
    pub fn options(&self) -> Result<LogOptions, ApiError> {
        let defaults = LogOptions::default();
        Ok(LogOptions {
            tail: flag(self.tail.as_deref()),
            previous: flag(self.previous.as_deref()),
            container: label_param("container", self.container.as_deref(), defaults.container)?,
            namespace: label_param("namespace", self.namespace.as_deref(), defaults.namespace)?,
        })
    }
}

/// GET /v1/instances/{id}
pub async fn logs_by_block_id(
    State(state): State<ApiState>,
    axum::Extension(claims): axum::Extension<Claims>,
    Path(id): Path<String>,
    Query(query): Query<LogQuery>,
) -> Result<Response, ApiError> {
    let handle = state.handle.clone();
    open_logs(&state, &claims, &handle, InstanceRef::BlockId(id), &query).await
}

/// GET /v1/instances/name/{name}
pub async fn logs_by_name(
    State(state): State<ApiState>,
    axum::Extension(claims): axum::Extension<Claims>,
    Path(name): Path<String>,
    Query(query): Query<LogQuery>,
) -> Result<Response, ApiError> {
    let handle = state.handle.clone();
    open_logs(&state, &claims, &handle, InstanceRef::Name(name), &query).await
}

/// GET /v1/instances/{handle}/{deployment}/{instance}/logs
pub async fn logs_by_deployment(
    State(state): State<ApiState>,
    axum::Extension(claims): axum::Extension<Claims>,
    Path((handle, name, instance)): Path<(String, String, String)>,
    Query(query): Query<LogQuery>,
) -> Result<Response, ApiError> {
    open_logs(&state, &claims, &handle, InstanceRef::Deployment { name, instance }, &query).await
}

async fn open_logs(
    state: &ApiState,
    claims: &Claims,
    handle: &str,
    instance: InstanceRef,
    query: &LogQuery,
) -> Result<Response, ApiError> {
    let options = query.options()?;
    let stream = state.logs.stream_logs(claims, handle, instance, options).await?;
    let stream = until_cancelled(stream, shutdown_signal(state.shutdown.clone()));
    Ok(ndjson_response(stream))
}

/// Resolves when the server starts shutting down. A dropped sender means
/// nobody will ever signal, so the future never resolves.
async fn shutdown_signal(mut shutdown: watch::Receiver<bool>) {
    if shutdown.wait_for(|stopping| *stopping).await.is_err() {
        std::future::pending::<()>().await;
    }
}

fn encode_line<T: serde::Serialize>(value: &T) -> Bytes {
    let mut line = serde_json::to_vec(value).unwrap_or_default();
    line.push(b'\n');
    Bytes::from(line)
}

fn encode_item(item: Result<LogEntry, InsightError>) -> Bytes {
    match item {
        Ok(entry) => encode_line(&entry),
        Err(e) => {
            error!(error = %e, "log stream ended by backend failure");
            encode_line(&serde_json::json!({ "error": e.public_message() }))
        }
    }
}

/// Streams `entries` as newline-delimited JSON. Dropping the response
/// body drops the log stream and every backend stream under it.
pub fn ndjson_response(entries: LogStream) -> Response {
    let body = entries.map(|item| Ok::<_, Infallible>(encode_item(item)));
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, NDJSON)],
        Body::from_stream(body),
    )
        .into_response()
}
