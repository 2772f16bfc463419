//! Minimal JSON-over-HTTP client shared by the backend clients.
//!
//! Built on the hyper connection pool. Endpoints are plain HTTP: in-cluster
//! services, an API-server proxy, or an authenticating egress proxy.

use std::collections::VecDeque;

use bytes::Bytes;
use futures_util::stream::{self, BoxStream};
use futures_util::StreamExt;
use http::{header, Method, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::clients::LineStream;
use crate::error::{BackendError, BackendResult};

const USER_AGENT: &str = "insight/0.1";

/// Pooled HTTP client bound to one base URL.
#[derive(Clone)]
pub struct HttpJson {
    client: Client<HttpConnector, Full<Bytes>>,
    base_url: String,
    bearer: Option<String>,
}

impl HttpJson {
    pub fn new(base_url: &str, bearer: Option<String>) -> Self {
        let client = Client::builder(TokioExecutor::new()).build_http();
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            bearer,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// GET `path` and decode the JSON body.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> BackendResult<T> {
        let req = self.request(Method::GET, path, Bytes::new())?;
        let body = self.send(req).await?.into_body();
        decode_body(body).await
    }

    /// POST a JSON body to `path` and decode the JSON reply.
    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> BackendResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let payload = serde_json::to_vec(body).map_err(|e| BackendError::Decode(e.to_string()))?;
        let req = self.request(Method::POST, path, Bytes::from(payload))?;
        let body = self.send(req).await?.into_body();
        decode_body(body).await
    }

    /// GET `path` and hand back the body as a stream of lines.
    pub async fn get_lines(&self, path: &str) -> BackendResult<LineStream> {
        let req = self.request(Method::GET, path, Bytes::new())?;
        let body = self.send(req).await?.into_body();
        let chunks = body
            .into_data_stream()
            .map(|chunk| chunk.map_err(|e| BackendError::Unavailable(e.to_string())))
            .boxed();
        Ok(lines_from_chunks(chunks))
    }

    fn request(&self, method: Method, path: &str, body: Bytes) -> BackendResult<Request<Full<Bytes>>> {
        let url = format!("{}{}", self.base_url, path);
        let mut builder = Request::builder()
            .method(method)
            .uri(&url)
            .header(header::USER_AGENT, USER_AGENT)
            .header(header::ACCEPT, "application/json");
        if !body.is_empty() {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
        }
        if let Some(token) = &self.bearer {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        builder
            .body(Full::new(body))
            .map_err(|e| BackendError::Unavailable(format!("invalid request {url}: {e}")))
    }

    async fn send(&self, req: Request<Full<Bytes>>) -> BackendResult<Response<Incoming>> {
        let url = req.uri().to_string();
        debug!(method = %req.method(), %url, "backend request");
        let resp = self
            .client
            .request(req)
            .await
            .map_err(|e| BackendError::Unavailable(format!("{url}: {e}")))?;
        check_status(resp.status(), &url)?;
        Ok(resp)
    }
}

fn check_status(status: StatusCode, url: &str) -> BackendResult<()> {
    match status {
        s if s.is_success() => Ok(()),
        StatusCode::NOT_FOUND => Err(BackendError::NotFound(url.to_string())),
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT => {
            Err(BackendError::Unavailable(format!("{url}: {status}")))
        }
        s => Err(BackendError::Status {
            status: s.as_u16(),
            url: url.to_string(),
        }),
    }
}

async fn decode_body<T: DeserializeOwned>(body: Incoming) -> BackendResult<T> {
    let bytes = body
        .collect()
        .await
        .map_err(|e| BackendError::Unavailable(e.to_string()))?
        .to_bytes();
    serde_json::from_slice(&bytes).map_err(|e| BackendError::Decode(e.to_string()))
}

struct LineState {
    chunks: BoxStream<'static, BackendResult<Bytes>>,
    buf: Vec<u8>,
    pending: VecDeque<String>,
    error: Option<BackendError>,
    done: bool,
}

/// Re-frame a byte stream into lines. Chunk boundaries may fall anywhere,
/// including inside a UTF-8 sequence; a trailing unterminated line is
/// still emitted.
pub fn lines_from_chunks(chunks: BoxStream<'static, BackendResult<Bytes>>) -> LineStream {
    let state = LineState {
        chunks,
        buf: Vec::new(),
        pending: VecDeque::new(),
        error: None,
        done: false,
    };
    stream::unfold(state, |mut st| async move {
        loop {
            if let Some(line) = st.pending.pop_front() {
                return Some((Ok(line), st));
            }
            if let Some(err) = st.error.take() {
                return Some((Err(err), st));
            }
            if st.done {
                return None;
            }
            match st.chunks.next().await {
                Some(Ok(chunk)) => {
                    st.buf.extend_from_slice(&chunk);
                    while let Some(pos) = st.buf.iter().position(|b| *b == b'\n') {
                        let rest = st.buf.split_off(pos + 1);
                        let line = std::mem::replace(&mut st.buf, rest);
                        st.pending.push_back(to_line(&line[..pos]));
                    }
                }
                Some(Err(e)) => {
                    st.flush_partial();
                    st.error = Some(e);
                    st.done = true;
                }
                None => {
                    st.flush_partial();
                    st.done = true;
                }
            }
        }
    })
    .boxed()
}

impl LineState {
    fn flush_partial(&mut self) {
        if !self.buf.is_empty() {
            let partial = std::mem::take(&mut self.buf);
            self.pending.push_back(to_line(&partial));
        }
    }
}

fn to_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

/// Percent-encode a query parameter value or path segment.
pub fn encode_component(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for b in value.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(b as char),
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

/// Percent-encode one path segment. `.` and `..` are encoded too so they
/// cannot walk the path.
pub fn encode_segment(value: &str) -> String {
    match value {
        "." => "%2E".to_string(),
        ".." => "%2E%2E".to_string(),
        _ => encode_component(value),
    }
}
