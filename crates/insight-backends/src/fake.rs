//! In-memory collaborator doubles.
//!
//! Built with chained `with_*` calls and shared through `Arc`. Any
//! operation can be made to fail with `Unavailable` to exercise the
//! degradation and abort paths.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};

use crate::clients::{
    selector_matches, CloudLogs, CustomResource, IndexRecord, LineStream, LogPage, LogQuery, Orchestrator, Pod,
    PodLogOptions, Secret, ServiceEndpoints, SqlAdmin, SqlInstance, TraefikApi, TraefikRouter, TraefikService,
    Workload,
};
use crate::error::{BackendError, BackendResult};

fn unavailable(what: &str) -> BackendError {
    BackendError::Unavailable(format!("fake {what} unavailable"))
}

// ── Orchestrator ──────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct FakePod {
    pod: Pod,
    lines: Vec<String>,
    fail_after_lines: bool,
}

/// Decrements its counter when dropped.
struct Held(Arc<AtomicUsize>);

impl Drop for Held {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct FakeOrchestrator {
    workloads: HashMap<String, Vec<Workload>>,
    pods: HashMap<String, Vec<FakePod>>,
    secrets: HashMap<String, Vec<Secret>>,
    resources: HashMap<(CustomResource, String), Vec<serde_json::Value>>,
    endpoints: HashMap<(String, String), ServiceEndpoints>,
    failing: HashSet<String>,
    stalling: HashSet<String>,
    stalled_started: AtomicUsize,
    stalled_open: Arc<AtomicUsize>,
    follow_blocks: bool,
    open_streams: Arc<AtomicUsize>,
    log_requests: Mutex<Vec<(String, PodLogOptions)>>,
}

impl FakeOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_workload(mut self, namespace: &str, workload: Workload) -> Self {
        self.workloads.entry(namespace.to_string()).or_default().push(workload);
        self
    }

    /// A pod whose log stream yields `lines`.
    pub fn with_pod(mut self, namespace: &str, name: &str, labels: &[(&str, &str)], lines: Vec<&str>) -> Self {
        let pod = Pod {
            name: name.to_string(),
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
        };
        self.pods.entry(namespace.to_string()).or_default().push(FakePod {
            pod,
            lines: lines.into_iter().map(String::from).collect(),
            fail_after_lines: false,
        });
        self
    }

    /// Make the named pod's stream fail after its lines are delivered.
    pub fn with_broken_log(mut self, pod: &str) -> Self {
        for fake in self.pods.values_mut().flatten() {
            if fake.pod.name == pod {
                fake.fail_after_lines = true;
            }
        }
        self
    }

    pub fn with_secret(mut self, namespace: &str, secret: Secret) -> Self {
        self.secrets.entry(namespace.to_string()).or_default().push(secret);
        self
    }

    pub fn with_custom_resource(mut self, resource: CustomResource, namespace: &str, value: serde_json::Value) -> Self {
        self.resources
            .entry((resource, namespace.to_string()))
            .or_default()
            .push(value);
        self
    }

    pub fn with_endpoints(mut self, namespace: &str, service: &str, endpoints: ServiceEndpoints) -> Self {
        self.endpoints
            .insert((namespace.to_string(), service.to_string()), endpoints);
        self
    }

    /// Fail every call to the named trait method.
    pub fn failing(mut self, operation: &str) -> Self {
        self.failing.insert(operation.to_string());
        self
    }

    /// Calls to the named trait method never complete.
    pub fn stalling(mut self, operation: &str) -> Self {
        self.stalling.insert(operation.to_string());
        self
    }

    /// Stalled calls entered so far.
    pub fn stalled_started(&self) -> usize {
        self.stalled_started.load(Ordering::SeqCst)
    }

    /// Stalled calls whose futures have not been dropped.
    pub fn stalled_open(&self) -> usize {
        self.stalled_open.load(Ordering::SeqCst)
    }

    /// Followed log streams stay open after their lines, like a live
    /// container.
    pub fn following(mut self) -> Self {
        self.follow_blocks = true;
        self
    }

    /// Log streams handed out and not yet dropped.
    pub fn open_streams(&self) -> usize {
        self.open_streams.load(Ordering::SeqCst)
    }

    /// Every `stream_pod_logs` call, in order.
    pub fn log_requests(&self) -> Vec<(String, PodLogOptions)> {
        self.log_requests.lock().map(|r| r.clone()).unwrap_or_default()
    }

    async fn check(&self, operation: &str) -> BackendResult<()> {
        if self.stalling.contains(operation) {
            self.stalled_started.fetch_add(1, Ordering::SeqCst);
            self.stalled_open.fetch_add(1, Ordering::SeqCst);
            let _held = Held(self.stalled_open.clone());
            std::future::pending::<()>().await;
        }
        if self.failing.contains(operation) {
            Err(unavailable(operation))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Orchestrator for FakeOrchestrator {
    async fn list_workloads(&self, namespace: &str, selector: Option<&str>) -> BackendResult<Vec<Workload>> {
        self.check("list_workloads").await?;
        let all = self.workloads.get(namespace).cloned().unwrap_or_default();
        Ok(match selector {
            Some(sel) => all.into_iter().filter(|w| selector_matches(sel, &w.labels)).collect(),
            None => all,
        })
    }

    async fn list_pods(&self, namespace: &str, selector: &str) -> BackendResult<Vec<Pod>> {
        self.check("list_pods").await?;
        Ok(self
            .pods
            .get(namespace)
            .into_iter()
            .flatten()
            .filter(|p| selector_matches(selector, &p.pod.labels))
            .map(|p| p.pod.clone())
            .collect())
    }

    async fn list_secrets(&self, namespace: &str, selector: &str) -> BackendResult<Vec<Secret>> {
        self.check("list_secrets").await?;
        Ok(self
            .secrets
            .get(namespace)
            .into_iter()
            .flatten()
            .filter(|s| selector_matches(selector, &s.labels))
            .cloned()
            .collect())
    }

    async fn list_custom_resources(
        &self,
        resource: CustomResource,
        namespace: &str,
    ) -> BackendResult<Vec<serde_json::Value>> {
        self.check("list_custom_resources").await?;
        Ok(self
            .resources
            .get(&(resource, namespace.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn get_endpoints(&self, namespace: &str, service: &str) -> BackendResult<ServiceEndpoints> {
        self.check("get_endpoints").await?;
        self.endpoints
            .get(&(namespace.to_string(), service.to_string()))
            .cloned()
            .ok_or_else(|| BackendError::NotFound(format!("endpoints {namespace}/{service}")))
    }

    async fn stream_pod_logs(
        &self,
        namespace: &str,
        pod: &str,
        options: &PodLogOptions,
    ) -> BackendResult<LineStream> {
        self.check("stream_pod_logs").await?;
        let fake = self
            .pods
            .get(namespace)
            .into_iter()
            .flatten()
            .find(|p| p.pod.name == pod)
            .cloned()
            .ok_or_else(|| BackendError::NotFound(format!("pod {namespace}/{pod}")))?;
        if let Ok(mut requests) = self.log_requests.lock() {
            requests.push((pod.to_string(), options.clone()));
        }

        let lines = stream::iter(fake.lines.into_iter().map(Ok));
        let tail: LineStream = if fake.fail_after_lines {
            stream::once(async { Err(BackendError::Unavailable("log stream reset".into())) }).boxed()
        } else if options.follow && self.follow_blocks {
            stream::pending().boxed()
        } else {
            stream::empty().boxed()
        };

        self.open_streams.fetch_add(1, Ordering::SeqCst);
        let guard = Held(self.open_streams.clone());
        Ok(lines
            .chain(tail)
            .map(move |item| {
                let _held = &guard;
                item
            })
            .boxed())
    }
}

// ── Traefik ───────────────────────────────────────────────────────

#[derive(Default)]
pub struct FakeTraefik {
    routers: Vec<TraefikRouter>,
    services: HashMap<String, TraefikService>,
    fail: bool,
}

impl FakeTraefik {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_router(mut self, router: TraefikRouter) -> Self {
        self.routers.push(router);
        self
    }

    pub fn with_service(mut self, name: &str, service: TraefikService) -> Self {
        self.services.insert(name.to_string(), service);
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }
}

#[async_trait]
impl TraefikApi for FakeTraefik {
    async fn list_routers(&self) -> BackendResult<Vec<TraefikRouter>> {
        if self.fail {
            return Err(unavailable("traefik"));
        }
        Ok(self.routers.clone())
    }

    async fn get_service(&self, name: &str) -> BackendResult<TraefikService> {
        if self.fail {
            return Err(unavailable("traefik"));
        }
        self.services
            .get(name)
            .cloned()
            .ok_or_else(|| BackendError::NotFound(format!("traefik service {name}")))
    }
}

// ── Cloud log index ───────────────────────────────────────────────

#[derive(Default)]
struct LogIndexState {
    first_served: bool,
    polls: VecDeque<Vec<IndexRecord>>,
    queries: Vec<LogQuery>,
}

/// Pages are chained with cursors `p1`, `p2`, … . After the first full
/// pass, cursor-less queries (tail polls) are answered from the poll
/// queue, then with empty pages.
#[derive(Default)]
pub struct FakeCloudLogs {
    pages: Vec<Vec<IndexRecord>>,
    fail_at: Option<usize>,
    state: Mutex<LogIndexState>,
}

impl FakeCloudLogs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, entries: Vec<IndexRecord>) -> Self {
        self.pages.push(entries);
        self
    }

    /// Answer a tail poll with `entries`.
    pub fn with_poll(self, entries: Vec<IndexRecord>) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.polls.push_back(entries);
        }
        self
    }

    /// Fail the `n`th query (zero-based).
    pub fn failing_at(mut self, n: usize) -> Self {
        self.fail_at = Some(n);
        self
    }

    pub fn queries(&self) -> Vec<LogQuery> {
        self.state.lock().map(|s| s.queries.clone()).unwrap_or_default()
    }

    fn cursor_for(&self, index: usize) -> Option<String> {
        (index + 1 < self.pages.len()).then(|| format!("p{}", index + 1))
    }
}

#[async_trait]
impl CloudLogs for FakeCloudLogs {
    async fn list_entries(&self, query: &LogQuery) -> BackendResult<LogPage> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| BackendError::Unavailable("fake log index poisoned".into()))?;
        let n = state.queries.len();
        state.queries.push(query.clone());
        if self.fail_at == Some(n) {
            return Err(unavailable("log index"));
        }

        let index = match &query.page_token {
            Some(token) => token
                .strip_prefix('p')
                .and_then(|n| n.parse::<usize>().ok())
                .ok_or_else(|| BackendError::Decode(format!("bad page token {token}")))?,
            None if !state.first_served => {
                state.first_served = true;
                0
            }
            None => {
                let entries = state.polls.pop_front().unwrap_or_default();
                return Ok(LogPage {
                    entries,
                    next_page_token: None,
                });
            }
        };
        Ok(LogPage {
            entries: self.pages.get(index).cloned().unwrap_or_default(),
            next_page_token: self.cursor_for(index),
        })
    }
}

// ── Cloud SQL administration ──────────────────────────────────────

#[derive(Default)]
pub struct FakeSqlAdmin {
    instances: Vec<SqlInstance>,
    fail: bool,
    calls: AtomicUsize,
}

impl FakeSqlAdmin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_instance(mut self, instance: SqlInstance) -> Self {
        self.instances.push(instance);
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    /// Completed `list_instances` calls.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SqlAdmin for FakeSqlAdmin {
    async fn list_instances(&self, _project: &str) -> BackendResult<Vec<SqlInstance>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(unavailable("sqladmin"));
        }
        Ok(self.instances.clone())
    }
}
