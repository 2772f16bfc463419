//! Log Retrieval Engine.

use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{self, try_join_all};
use futures_util::stream::{self, select_all, BoxStream, StreamExt};
use tracing::{debug, info};

use insight_auth::{require_scope, Claims, LOGGING_READ};
use insight_backends::{
    Backends, IndexRecord, LogIndexFilter, LogIndexSource, PodLogOptions, PodLogSource, PodSelector,
};
use insight_core::{InsightConfig, InsightError, InsightResult, LogEntry, RuntimeMode};

use crate::normalize::{frame_line, from_index_record};

/// Normalized entries; a stream ends right after its first error.
pub type LogStream = BoxStream<'static, InsightResult<LogEntry>>;

/// Delay between log index polls once a tail has caught up.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Which instance's logs to read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstanceRef {
    /// Pods labelled with this block id.
    BlockId(String),
    /// Pods labelled with this logical instance name.
    Name(String),
    /// An instance of a named deployment. Served from the log index when
    /// one is configured, else by block id.
    Deployment { name: String, instance: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogOptions {
    pub tail: bool,
    pub previous: bool,
    pub container: String,
    pub namespace: String,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            tail: false,
            previous: false,
            container: "main".to_string(),
            namespace: "services".to_string(),
        }
    }
}

pub struct LogEngine {
    /// The one tenant whose pods this cluster runs.
    tenant: String,
    mode: RuntimeMode,
    pods: PodLogSource,
    index: Option<Arc<LogIndexSource>>,
    poll_interval: Duration,
}

impl LogEngine {
    pub fn new(tenant: &str, mode: RuntimeMode, pods: PodLogSource, index: Option<LogIndexSource>) -> Self {
        Self {
            tenant: tenant.to_string(),
            mode,
            pods,
            index: index.map(Arc::new),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn from_config(config: &InsightConfig, backends: &Backends) -> Self {
        Self::new(
            &config.handle,
            config.mode,
            PodLogSource::new(backends.orchestrator.clone()),
            backends.cloud_logs.clone().map(LogIndexSource::new),
        )
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Open the log stream for `instance`.
    ///
    /// Scope and source resolution happen before the first entry, so
    /// `Forbidden` and `NotFound` surface here rather than in the stream.
    /// Without a log index, pods are not partitioned by handle, so a
    /// deployment reference under any handle but this cluster's tenant is
    /// `Forbidden`.
    /// Tail streams never end on their own; drop them or wrap them with
    /// [`until_cancelled`].
    pub async fn stream_logs(
        &self,
        claims: &Claims,
        handle: &str,
        instance: InstanceRef,
        options: LogOptions,
    ) -> InsightResult<LogStream> {
        require_scope(claims, handle, LOGGING_READ)?;
        info!(%handle, ?instance, tail = options.tail, previous = options.previous, "opening log stream");

        let stream = match instance {
            InstanceRef::BlockId(id) => self.pod_stream(PodSelector::BlockId(id), &options).await?,
            InstanceRef::Name(name) => self.pod_stream(PodSelector::InstanceName(name), &options).await?,
            InstanceRef::Deployment { name, instance } => match (self.mode, &self.index) {
                (RuntimeMode::Gcp, Some(index)) => {
                    let filter = LogIndexFilter {
                        handle: handle.to_string(),
                        deployment_name: name,
                        instance,
                        container: options.container.clone(),
                        after: None,
                    };
                    // The index keeps terminated containers, so "previous"
                    // is just a bounded read.
                    let follow = options.tail && !options.previous;
                    index_stream(index.clone(), filter, follow, self.poll_interval)
                }
                (RuntimeMode::Gcp, None) => {
                    return Err(InsightError::Internal("log index client not configured".into()));
                }
                (RuntimeMode::KubernetesOnly, _) => {
                    if handle != self.tenant {
                        return Err(InsightError::forbidden(handle, LOGGING_READ));
                    }
                    self.pod_stream(PodSelector::BlockId(instance), &options).await?
                }
            },
        };
        Ok(stop_after_error(stream))
    }

    /// One stream per matching pod, interleaved in arrival order.
    async fn pod_stream(&self, selector: PodSelector, options: &LogOptions) -> InsightResult<LogStream> {
        let namespace = options.namespace.as_str();
        let pods = self.pods.resolve(namespace, &selector).await?;
        let request = PodLogOptions {
            container: options.container.clone(),
            follow: options.tail && !options.previous,
            previous: options.previous,
        };

        let streams = try_join_all(pods.into_iter().map(|pod| {
            let request = &request;
            async move {
                let lines = self.pods.open(namespace, &pod.name, request).await?;
                let entity = pod.name;
                Ok::<LogStream, InsightError>(
                    lines
                        .map(move |line| line.map(|l| frame_line(&entity, &l)).map_err(InsightError::from))
                        .boxed(),
                )
            }
        }))
        .await?;
        debug!(%namespace, sources = streams.len(), "pod log streams open");
        Ok(select_all(streams).boxed())
    }
}

enum Cursor {
    Page(Option<String>),
    Poll,
    Done,
}

struct IndexState {
    source: Arc<LogIndexSource>,
    filter: LogIndexFilter,
    cursor: Cursor,
    buffer: VecDeque<LogEntry>,
    last_seen: Option<String>,
    /// Keys of delivered records stamped exactly `last_seen`.
    seen_at_last: HashSet<String>,
    follow: bool,
    interval: Duration,
}

impl IndexState {
    /// Record `record` as delivered; true when it was delivered before.
    fn already_delivered(&mut self, record: &IndexRecord) -> bool {
        let Some(ts) = &record.timestamp else {
            return false;
        };
        if self.last_seen.as_ref() != Some(ts) {
            self.last_seen = Some(ts.clone());
            self.seen_at_last.clear();
        }
        !self.seen_at_last.insert(record_key(record))
    }
}

fn record_key(record: &IndexRecord) -> String {
    if let Some(id) = &record.insert_id {
        return id.clone();
    }
    format!(
        "{}|{}|{}|{}",
        record.timestamp.as_deref().unwrap_or_default(),
        record.severity.as_deref().unwrap_or_default(),
        record.text_payload.as_deref().unwrap_or_default(),
        record.json_payload.as_ref().map(|v| v.to_string()).unwrap_or_default(),
    )
}

/// Page through the index oldest-first. With `follow`, keep polling from
/// the last delivered timestamp on, skipping records already delivered at
/// that timestamp.
fn index_stream(source: Arc<LogIndexSource>, filter: LogIndexFilter, follow: bool, interval: Duration) -> LogStream {
    let state = IndexState {
        source,
        filter,
        cursor: Cursor::Page(None),
        buffer: VecDeque::new(),
        last_seen: None,
        seen_at_last: HashSet::new(),
        follow,
        interval,
    };
    stream::unfold(state, |mut st| async move {
        loop {
            if let Some(entry) = st.buffer.pop_front() {
                return Some((Ok(entry), st));
            }
            let token = match std::mem::replace(&mut st.cursor, Cursor::Done) {
                Cursor::Done => return None,
                Cursor::Page(token) => token,
                Cursor::Poll => {
                    tokio::time::sleep(st.interval).await;
                    if st.last_seen.is_some() {
                        st.filter.after = st.last_seen.clone();
                    }
                    None
                }
            };
            match st.source.fetch_page(&st.filter, token).await {
                Ok(page) => {
                    for record in &page.entries {
                        if st.already_delivered(record) {
                            continue;
                        }
                        st.buffer.push_back(from_index_record(record));
                    }
                    st.cursor = match page.next_page_token {
                        Some(next) => Cursor::Page(Some(next)),
                        None if st.follow => Cursor::Poll,
                        None => Cursor::Done,
                    };
                }
                Err(e) => return Some((Err(InsightError::from(e)), st)),
            }
        }
    })
    .boxed()
}

fn stop_after_error(stream: LogStream) -> LogStream {
    stream
        .scan(false, |failed, item| {
            if *failed {
                return future::ready(None);
            }
            *failed = item.is_err();
            future::ready(Some(item))
        })
        .boxed()
}

/// End `stream` quietly once `cancel` resolves.
pub fn until_cancelled<F>(stream: LogStream, cancel: F) -> LogStream
where
    F: Future<Output = ()> + Send + 'static,
{
    stream.take_until(cancel).boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use insight_auth::Context;
    use insight_backends::fake::{FakeCloudLogs, FakeOrchestrator};
    use insight_backends::{IndexRecord, MonitoredResource};
    use insight_core::LABEL_BLOCK_ID;
    use std::collections::BTreeMap;

    fn claims(handle: &str, scopes: &[&str]) -> Claims {
        Claims {
            contexts: vec![Context {
                handle: handle.to_string(),
                scopes: scopes.iter().map(|s| s.to_string()).collect(),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    fn reader() -> Claims {
        claims("acme", &["logging:read"])
    }

    fn record(ts: &str, text: &str) -> IndexRecord {
        IndexRecord {
            timestamp: Some(ts.to_string()),
            severity: Some("DEFAULT".into()),
            text_payload: Some(text.to_string()),
            json_payload: None,
            resource: MonitoredResource {
                labels: BTreeMap::from([("container_name".to_string(), "main".to_string())]),
            },
            ..Default::default()
        }
    }

    fn pod_engine(orch: Arc<FakeOrchestrator>) -> LogEngine {
        LogEngine::new("acme", RuntimeMode::KubernetesOnly, PodLogSource::new(orch), None)
    }

    fn index_engine(logs: Arc<FakeCloudLogs>) -> LogEngine {
        LogEngine::new(
            "acme",
            RuntimeMode::Gcp,
            PodLogSource::new(Arc::new(FakeOrchestrator::new())),
            Some(LogIndexSource::new(logs)),
        )
        .with_poll_interval(Duration::from_millis(5))
    }

    fn deployment(instance: &str) -> InstanceRef {
        InstanceRef::Deployment {
            name: "production".into(),
            instance: instance.into(),
        }
    }

    async fn collect(stream: LogStream) -> Vec<InsightResult<LogEntry>> {
        stream.collect().await
    }

    #[tokio::test]
    async fn pod_lines_are_framed() {
        let orch = Arc::new(FakeOrchestrator::new().with_pod(
            "services",
            "web-1",
            &[(LABEL_BLOCK_ID, "b1")],
            vec!["2024-01-01T00:00:00.000000Z hello", "garbage line"],
        ));
        let engine = pod_engine(orch.clone());
        let stream = engine
            .stream_logs(&reader(), "acme", InstanceRef::BlockId("b1".into()), LogOptions::default())
            .await
            .unwrap();
        let entries: Vec<LogEntry> = collect(stream).await.into_iter().map(Result::unwrap).collect();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].message, "hello");
        assert_eq!(entries[0].entity, "web-1");
        assert_eq!(entries[0].timestamp, 1_704_067_200_000);
        assert_eq!(entries[1].timestamp, 0);
        assert_eq!(entries[1].message, "garbage line");

        let requests = orch.log_requests();
        let request = &requests[0].1;
        assert_eq!(request.container, "main");
        assert!(!request.follow);
    }

    #[tokio::test]
    async fn fans_out_across_matching_pods() {
        let orch = Arc::new(
            FakeOrchestrator::new()
                .with_pod("services", "web-1", &[("instance", "web")], vec!["a1", "a2"])
                .with_pod("services", "web-2", &[("instance", "web")], vec!["b1"])
                .with_pod("services", "api-1", &[("instance", "api")], vec!["x"]),
        );
        let engine = pod_engine(orch);
        let stream = engine
            .stream_logs(&reader(), "acme", InstanceRef::Name("web".into()), LogOptions::default())
            .await
            .unwrap();
        let entries: Vec<LogEntry> = collect(stream).await.into_iter().map(Result::unwrap).collect();
        assert_eq!(entries.len(), 3);

        // Per-source order holds; cross-source order is unspecified.
        let from_first: Vec<_> = entries
            .iter()
            .filter(|e| e.entity == "web-1")
            .map(|e| e.message.as_str())
            .collect();
        assert_eq!(from_first, vec!["a1", "a2"]);
        assert!(entries.iter().all(|e| e.entity != "api-1"));
    }

    #[tokio::test]
    async fn no_matching_pods_is_not_found() {
        let engine = pod_engine(Arc::new(FakeOrchestrator::new()));
        let err = engine
            .stream_logs(&reader(), "acme", InstanceRef::BlockId("nope".into()), LogOptions::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, InsightError::NotFound(_)));
    }

    #[tokio::test]
    async fn requires_logging_scope_for_handle() {
        let orch = Arc::new(FakeOrchestrator::new().with_pod("services", "web-1", &[(LABEL_BLOCK_ID, "b1")], vec![]));
        let engine = pod_engine(orch.clone());
        for c in [claims("acme", &["runtime:read"]), claims("other", &["*"])] {
            let err = engine
                .stream_logs(&c, "acme", InstanceRef::BlockId("b1".into()), LogOptions::default())
                .await
                .err()
                .unwrap();
            assert!(matches!(err, InsightError::Forbidden { .. }));
        }
        assert!(orch.log_requests().is_empty());
    }

    #[tokio::test]
    async fn previous_mode_is_bounded() {
        let orch = Arc::new(
            FakeOrchestrator::new()
                .with_pod("services", "web-1", &[(LABEL_BLOCK_ID, "b1")], vec!["last words"])
                .following(),
        );
        let engine = pod_engine(orch.clone());
        let options = LogOptions {
            tail: true,
            previous: true,
            ..Default::default()
        };
        let stream = engine
            .stream_logs(&reader(), "acme", InstanceRef::BlockId("b1".into()), options)
            .await
            .unwrap();
        assert_eq!(collect(stream).await.len(), 1);
        let requests = orch.log_requests();
        let request = &requests[0].1;
        assert!(request.previous);
        assert!(!request.follow);
    }

    #[tokio::test]
    async fn backend_failure_ends_stream_with_one_error() {
        let orch = Arc::new(
            FakeOrchestrator::new()
                .with_pod("services", "web-1", &[(LABEL_BLOCK_ID, "b1")], vec!["one", "two"])
                .with_broken_log("web-1"),
        );
        let engine = pod_engine(orch);
        let stream = engine
            .stream_logs(&reader(), "acme", InstanceRef::BlockId("b1".into()), LogOptions::default())
            .await
            .unwrap();
        let items = collect(stream).await;
        assert_eq!(items.len(), 3);
        assert!(items[0].is_ok());
        assert!(items[1].is_ok());
        assert!(matches!(items[2], Err(InsightError::BackendUnavailable(_))));
    }

    #[tokio::test]
    async fn cancelling_a_tail_closes_backend_streams() {
        let orch = Arc::new(
            FakeOrchestrator::new()
                .with_pod("services", "web-1", &[(LABEL_BLOCK_ID, "b1")], vec!["first"])
                .with_pod("services", "web-2", &[(LABEL_BLOCK_ID, "b1")], vec![])
                .following(),
        );
        let engine = pod_engine(orch.clone());
        let options = LogOptions {
            tail: true,
            ..Default::default()
        };
        let stream = engine
            .stream_logs(&reader(), "acme", InstanceRef::BlockId("b1".into()), options)
            .await
            .unwrap();
        assert_eq!(orch.open_streams(), 2);

        let (cancel_tx, cancel_rx) = tokio::sync::oneshot::channel::<()>();
        let mut stream = until_cancelled(stream, async move {
            let _ = cancel_rx.await;
        });
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.message, "first");

        cancel_tx.send(()).unwrap();
        let rest = tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .expect("stream should end promptly");
        assert!(rest.is_none());
        drop(stream);
        assert_eq!(orch.open_streams(), 0);
    }

    #[tokio::test]
    async fn index_pages_until_cursor_exhausted() {
        let logs = Arc::new(
            FakeCloudLogs::new()
                .with_page(vec![record("2024-01-01T00:00:00Z", "a"), record("2024-01-01T00:00:01Z", "b")])
                .with_page(vec![record("2024-01-01T00:00:02Z", "c")]),
        );
        let engine = index_engine(logs.clone());
        let stream = engine
            .stream_logs(&reader(), "acme", deployment("b1"), LogOptions::default())
            .await
            .unwrap();
        let entries: Vec<LogEntry> = collect(stream).await.into_iter().map(Result::unwrap).collect();
        let messages: Vec<_> = entries.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["a", "b", "c"]);
        assert!(entries.iter().all(|e| e.severity == "INFO" && e.entity == "main"));

        let queries = logs.queries();
        assert_eq!(queries.len(), 2);
        assert_eq!(queries[0].page_token, None);
        assert_eq!(queries[1].page_token.as_deref(), Some("p1"));
        assert!(queries[0].filter.contains("labels.\"k8s-pod/deployment\"=\"acme-production\""));
        assert!(queries[0].filter.contains("labels.\"k8s-pod/instance\"=\"b1\""));
    }

    #[tokio::test]
    async fn index_tail_polls_after_last_seen() {
        let logs = Arc::new(
            FakeCloudLogs::new()
                .with_page(vec![record("2024-01-01T00:00:00Z", "a")])
                .with_poll(vec![])
                .with_poll(vec![record("2024-01-01T00:00:05Z", "later")]),
        );
        let engine = index_engine(logs.clone());
        let options = LogOptions {
            tail: true,
            ..Default::default()
        };
        let mut stream = engine
            .stream_logs(&reader(), "acme", deployment("b1"), options)
            .await
            .unwrap();

        assert_eq!(stream.next().await.unwrap().unwrap().message, "a");
        let later = tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .expect("poll should deliver")
            .unwrap()
            .unwrap();
        assert_eq!(later.message, "later");

        let queries = logs.queries();
        assert!(!queries[0].filter.contains("timestamp>"));
        assert!(queries[1].filter.ends_with("timestamp>=\"2024-01-01T00:00:00Z\""));
        assert!(queries[2].filter.ends_with("timestamp>=\"2024-01-01T00:00:00Z\""));
    }

    #[tokio::test]
    async fn index_tail_keeps_late_entries_sharing_last_timestamp() {
        let mut late = record("2024-01-01T00:00:00Z", "late");
        late.insert_id = Some("id-late".into());
        let mut first = record("2024-01-01T00:00:00Z", "a");
        first.insert_id = Some("id-a".into());
        let logs = Arc::new(
            FakeCloudLogs::new()
                .with_page(vec![first.clone()])
                .with_poll(vec![first.clone(), late])
                .with_poll(vec![first, record("2024-01-01T00:00:00Z", "late")]),
        );
        let engine = index_engine(logs.clone());
        let options = LogOptions {
            tail: true,
            ..Default::default()
        };
        let mut stream = engine
            .stream_logs(&reader(), "acme", deployment("b1"), options)
            .await
            .unwrap();

        assert_eq!(stream.next().await.unwrap().unwrap().message, "a");
        let next = tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .expect("poll should deliver")
            .unwrap()
            .unwrap();
        assert_eq!(next.message, "late");

        // The third answer repeats "a" and adds an id-less "late"; only the
        // latter is new.
        let next = tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .expect("poll should deliver")
            .unwrap()
            .unwrap();
        assert_eq!(next.message, "late");
        let idle = tokio::time::timeout(Duration::from_millis(50), stream.next()).await;
        assert!(idle.is_err());
        assert!(logs.queries().len() >= 3);
    }

    #[tokio::test]
    async fn index_previous_ignores_tail() {
        let logs = Arc::new(FakeCloudLogs::new().with_page(vec![record("2024-01-01T00:00:00Z", "a")]));
        let engine = index_engine(logs.clone());
        let options = LogOptions {
            tail: true,
            previous: true,
            ..Default::default()
        };
        let stream = engine
            .stream_logs(&reader(), "acme", deployment("b1"), options)
            .await
            .unwrap();
        assert_eq!(collect(stream).await.len(), 1);
        assert_eq!(logs.queries().len(), 1);
    }

    #[tokio::test]
    async fn index_failure_mid_stream_is_terminal() {
        let logs = Arc::new(
            FakeCloudLogs::new()
                .with_page(vec![record("2024-01-01T00:00:00Z", "a")])
                .with_page(vec![record("2024-01-01T00:00:01Z", "b")])
                .failing_at(1),
        );
        let engine = index_engine(logs);
        let stream = engine
            .stream_logs(&reader(), "acme", deployment("b1"), LogOptions::default())
            .await
            .unwrap();
        let items = collect(stream).await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(items[1].is_err());
    }

    #[tokio::test]
    async fn deployment_ref_uses_pods_without_index() {
        let orch = Arc::new(FakeOrchestrator::new().with_pod(
            "services",
            "web-1",
            &[(LABEL_BLOCK_ID, "b1")],
            vec!["2024-01-01T00:00:00Z from pod"],
        ));
        let engine = pod_engine(orch);
        let stream = engine
            .stream_logs(&reader(), "acme", deployment("b1"), LogOptions::default())
            .await
            .unwrap();
        let items = collect(stream).await;
        assert_eq!(items[0].as_ref().unwrap().message, "from pod");
    }

    #[tokio::test]
    async fn deployment_ref_without_index_is_limited_to_own_tenant() {
        let orch = Arc::new(FakeOrchestrator::new().with_pod(
            "services",
            "web-1",
            &[(LABEL_BLOCK_ID, "b1")],
            vec!["2024-01-01T00:00:00Z acme secret"],
        ));
        let engine = pod_engine(orch.clone());
        let err = engine
            .stream_logs(&claims("globex", &["logging:read"]), "globex", deployment("b1"), LogOptions::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, InsightError::Forbidden { .. }));
        assert!(orch.log_requests().is_empty());
    }
}
