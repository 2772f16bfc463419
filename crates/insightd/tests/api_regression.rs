//! API regression tests.
//!
//! Drives the full router (auth middleware included) against in-memory
//! backends: status snapshots, the three log routes, and the error
//! envelope for every failure class.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use http_body_util::BodyExt;
use jsonwebtoken::{encode, EncodingKey, Header};
use tokio::sync::watch;
use tower::ServiceExt;

use insight_api::{build_router, ApiState};
use insight_auth::{Claims, Context, JwtVerifier};
use insight_backends::fake::{FakeCloudLogs, FakeOrchestrator};
use insight_backends::{IndexRecord, MonitoredResource, Secret, ServiceEndpoints, Workload, MESH_VIRTUAL_SERVICES};
use insight_core::config::GcpConfig;
use insight_core::types::{LABEL_ENVIRONMENT_NAME, LABEL_ENVIRONMENT_VERSION};
use insight_core::{IngressStrategy, InsightConfig, RuntimeMode, LABEL_BLOCK_ID, LABEL_INSTANCE_NAME};
use insight_logs::LogEngine;
use insight_status::StatusAggregator;

const SECRET: &str = "regression-secret";

const DOC: &str = r#"{
    "metadata": {"name": "acme/production"},
    "spec": {"services": [{"id": "mongo", "kind": "kapeta/resource-type-mongodb"}]}
}"#;

/// HS256 token granting `scopes` on `handle`.
fn token(handle: &str, scopes: &[&str]) -> String {
    let claims = Claims {
        sub: "user-1".to_string(),
        exp: Some(4_102_444_800),
        contexts: vec![Context {
            handle: handle.to_string(),
            scopes: scopes.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }],
        ..Default::default()
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap()
}

fn cluster() -> FakeOrchestrator {
    FakeOrchestrator::new()
        .with_secret(
            "kapeta",
            Secret {
                name: "env-prod".into(),
                labels: BTreeMap::from([
                    (LABEL_ENVIRONMENT_NAME.to_string(), "prod".to_string()),
                    (LABEL_ENVIRONMENT_VERSION.to_string(), "3".to_string()),
                ]),
                data: BTreeMap::from([("config".to_string(), DOC.as_bytes().to_vec())]),
            },
        )
        .with_workload("services", Workload::new("web", 2, 2).with_label(LABEL_BLOCK_ID, "b-web"))
        .with_workload("infrastructure", Workload::new("mongo-0", 1, 1).with_label(LABEL_BLOCK_ID, "mongo"))
        .with_custom_resource(
            MESH_VIRTUAL_SERVICES,
            "services",
            serde_json::json!({
                "metadata": {"name": "todo", "labels": {"kapeta.com/instanceid": "todo-gw"}},
                "spec": {"http": [{
                    "match": [{"uri": {"prefix": "/todo"}}],
                    "route": [{"destination": {"host": "todo.services.svc.cluster.local"}}]
                }]}
            }),
        )
        .with_endpoints(
            "services",
            "todo",
            ServiceEndpoints {
                ready: vec!["10.0.0.1".into()],
                not_ready: vec![],
            },
        )
        .with_pod(
            "services",
            "web-7d9",
            &[(LABEL_BLOCK_ID, "b-web"), (LABEL_INSTANCE_NAME, "web")],
            vec!["2024-01-01T00:00:00Z listening on :8080"],
        )
}

fn kube_config() -> InsightConfig {
    let mut config = InsightConfig::for_handle("acme", SECRET);
    config.mode = RuntimeMode::KubernetesOnly;
    config.ingress.strategy = IngressStrategy::Mesh;
    config
}

fn router_with(config: &InsightConfig, backends: insight_backends::Backends) -> Router {
    // Without a sender nothing ever signals shutdown.
    let (_, rx) = watch::channel(false);
    let state = ApiState::new(
        &config.handle,
        StatusAggregator::from_config(config, &backends).unwrap(),
        LogEngine::from_config(config, &backends),
        Arc::new(JwtVerifier::hs256(SECRET.as_bytes())),
        rx,
    );
    build_router(state)
}

fn kube_router(orch: FakeOrchestrator) -> Router {
    router_with(&kube_config(), insight_backends::Backends::new(Arc::new(orch)))
}

fn get(uri: &str, bearer: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(token) = bearer {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::empty()).unwrap()
}

async fn body_json(resp: axum::response::Response) -> serde_json::Value {
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_lines(resp: axum::response::Response) -> Vec<serde_json::Value> {
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec())
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect()
}

// ── Health and auth ────────────────────────────────────────────

#[tokio::test]
async fn healthz_needs_no_token() {
    let resp = kube_router(cluster()).oneshot(get("/healthz", None)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], b"OK!");
}

#[tokio::test]
async fn missing_token_is_401() {
    let resp = kube_router(cluster()).oneshot(get("/v1/status", None)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(resp).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "missing bearer token");
}

#[tokio::test]
async fn token_signed_with_other_secret_is_401() {
    let claims = Claims {
        exp: Some(4_102_444_800),
        ..Default::default()
    };
    let forged = encode(&Header::default(), &claims, &EncodingKey::from_secret(b"other")).unwrap();
    let resp = kube_router(cluster())
        .oneshot(get("/v1/status", Some(&forged)))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

// ── Status ─────────────────────────────────────────────────────

#[tokio::test]
async fn status_returns_cluster_snapshot() {
    let token = token("acme", &["runtime:read"]);
    let resp = kube_router(cluster())
        .oneshot(get("/v1/status", Some(&token)))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let body = body_json(resp).await;
    assert_eq!(body["environmentName"], "prod");
    assert_eq!(body["environmentVersion"], "3");
    let instances = body["instances"].as_array().unwrap();
    assert_eq!(instances.len(), 2);
    assert_eq!(instances[0]["type"], "block");
    assert_eq!(instances[0]["blockId"], "b-web");
    assert_eq!(instances[0]["state"], "Ready");
    assert_eq!(instances[1]["type"], "gateway");
    assert_eq!(instances[1]["name"], "todo-gw");
    assert_eq!(instances[1]["metadata"]["api_path"], "/todo");
    assert_eq!(body["operators"][0]["id"], "mongo");
    assert_eq!(body["operators"][0]["state"], "Ready");
}

#[tokio::test]
async fn status_for_other_tenant_grant_is_403() {
    let token = token("globex", &["*"]);
    let resp = kube_router(cluster())
        .oneshot(get("/v1/status", Some(&token)))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    let body = body_json(resp).await;
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn status_without_descriptor_is_404() {
    let token = token("acme", &["*"]);
    let resp = kube_router(FakeOrchestrator::new())
        .oneshot(get("/v1/status", Some(&token)))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn status_environment_filter_narrows_descriptor() {
    let token = token("acme", &["*"]);
    let resp = kube_router(cluster())
        .oneshot(get("/v1/status?environment=staging", Some(&token)))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unreachable_workload_backend_is_500_without_detail() {
    let token = token("acme", &["runtime:read"]);
    let resp = kube_router(cluster().failing("list_workloads"))
        .oneshot(get("/v1/status", Some(&token)))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_json(resp).await;
    assert_eq!(body["error"], "a backend service is unavailable");
}

// ── Logs ───────────────────────────────────────────────────────

#[tokio::test]
async fn logs_by_block_id_stream_ndjson() {
    let token = token("acme", &["logging:read"]);
    let resp = kube_router(cluster())
        .oneshot(get("/v1/instances/b-web", Some(&token)))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()[header::CONTENT_TYPE], "application/x-ndjson");

    let lines = body_lines(resp).await;
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0]["entity"], "web-7d9");
    assert_eq!(lines[0]["message"], "listening on :8080");
    assert_eq!(lines[0]["timestamp"], 1_704_067_200_000_i64);
}

#[tokio::test]
async fn logs_by_instance_name() {
    let token = token("acme", &["logging:read"]);
    let resp = kube_router(cluster())
        .oneshot(get("/v1/instances/name/web", Some(&token)))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_lines(resp).await.len(), 1);
}

#[tokio::test]
async fn logs_need_logging_scope() {
    let token = token("acme", &["runtime:read"]);
    let resp = kube_router(cluster())
        .oneshot(get("/v1/instances/b-web", Some(&token)))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn logs_for_unknown_instance_are_404() {
    let token = token("acme", &["logging:read"]);
    let resp = kube_router(cluster())
        .oneshot(get("/v1/instances/b-missing", Some(&token)))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn deployment_logs_are_scoped_by_path_handle() {
    // Grant on the configured tenant does not cover another handle.
    let token = token("acme", &["*"]);
    let resp = kube_router(cluster())
        .oneshot(get("/v1/instances/globex/shop/b-web/logs", Some(&token)))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    // Pods are not partitioned by handle, so another tenant's own grant
    // must not reach this cluster's logs either.
    let token = self::token("globex", &["logging:read"]);
    let resp = kube_router(cluster())
        .oneshot(get("/v1/instances/globex/shop/b-web/logs", Some(&token)))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let token = self::token("acme", &["logging:read"]);
    let resp = kube_router(cluster())
        .oneshot(get("/v1/instances/acme/shop/b-web/logs", Some(&token)))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_lines(resp).await[0]["entity"], "web-7d9");
}

#[tokio::test]
async fn malformed_namespace_or_container_is_400() {
    let token = token("acme", &["logging:read"]);
    for uri in [
        "/v1/instances/b-web?namespace=kapeta%2Fsecrets%3Fx%3D",
        "/v1/instances/b-web?namespace=..",
        "/v1/instances/name/web?container=main%26follow%3Dtrue",
    ] {
        let orch = Arc::new(cluster());
        let router = router_with(&kube_config(), insight_backends::Backends::new(orch.clone()));
        let resp = router.oneshot(get(uri, Some(&token))).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{uri}");
        assert!(orch.log_requests().is_empty());
    }
}

#[tokio::test]
async fn deployment_logs_read_the_index_in_gcp_mode() {
    let mut config = kube_config();
    config.mode = RuntimeMode::Gcp;
    config.gcp = Some(GcpConfig {
        project: "acme-prod".into(),
        logging_url: "http://gcp-egress:8080".into(),
        sqladmin_url: "http://gcp-egress:8080".into(),
        token_file: None,
    });
    let record = |ts: &str, msg: &str| IndexRecord {
        timestamp: Some(ts.into()),
        severity: Some("warning".into()),
        text_payload: Some(msg.into()),
        resource: MonitoredResource {
            labels: BTreeMap::from([("container_name".to_string(), "main".to_string())]),
        },
        ..Default::default()
    };
    let index = Arc::new(
        FakeCloudLogs::new()
            .with_page(vec![record("2024-01-01T00:00:00Z", "one")])
            .with_page(vec![record("2024-01-01T00:00:01Z", "two")]),
    );
    let backends = insight_backends::Backends::new(Arc::new(cluster())).with_cloud_logs(index.clone());
    let router = router_with(&config, backends);

    let token = token("acme", &["logging:read"]);
    let resp = router
        .oneshot(get("/v1/instances/acme/production/web/logs", Some(&token)))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let lines = body_lines(resp).await;
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["message"], "one");
    assert_eq!(lines[1]["message"], "two");
    assert_eq!(lines[0]["severity"], "WARNING");
    assert_eq!(lines[0]["entity"], "main");

    let queries = index.queries();
    assert_eq!(queries.len(), 2);
    assert!(queries[0].filter.contains(r#"labels."k8s-pod/deployment"="acme-production""#));
    assert!(queries[0].filter.contains(r#"labels."k8s-pod/instance"="web""#));
    assert_eq!(queries[1].page_token.as_deref(), Some("p1"));
}
