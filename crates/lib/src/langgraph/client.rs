//! HTTP client for a LangGraph-style agent deployment (threads API + streaming runs).

use crate::auth::AuthState;
use crate::langgraph::sse::{SseDecoder, SseEvent};
use crate::langgraph::types::{RunRequest, StreamPart, Thread};
use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::{Arc, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;

const DEFAULT_BASE_URL: &str = "http://localhost:2024";

/// Stream of decoded run events.
pub type PartStream = Pin<Box<dyn Stream<Item = Result<StreamPart, LangGraphError>> + Send>>;

#[derive(Debug, thiserror::Error)]
pub enum LangGraphError {
    #[error("agent request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("agent api error: {status} {body}")]
    Api { status: u16, body: String },
    #[error("thread not found: {0}")]
    NotFound(String),
}

/// Remote thread store.
#[async_trait]
pub trait ThreadStore: Send + Sync {
    /// POST /threads/search
    async fn search(&self, limit: usize) -> Result<Vec<Thread>, LangGraphError>;
    /// GET /threads/{id}
    async fn get(&self, thread_id: &str) -> Result<Thread, LangGraphError>;
    /// POST /threads
    async fn create(&self, metadata: Map<String, Value>) -> Result<Thread, LangGraphError>;
    /// PATCH /threads/{id}; metadata is merged server-side.
    async fn update(
        &self,
        thread_id: &str,
        metadata: Map<String, Value>,
    ) -> Result<Thread, LangGraphError>;
    /// DELETE /threads/{id}
    async fn delete(&self, thread_id: &str) -> Result<(), LangGraphError>;
}

/// Opens streaming runs against a thread.
#[async_trait]
pub trait RunStreamer: Send + Sync {
    async fn stream_run(
        &self,
        thread_id: &str,
        request: RunRequest,
    ) -> Result<PartStream, LangGraphError>;
}

/// Client for the deployment HTTP API. The bearer credential can be swapped at runtime.
pub struct LangGraphClient {
    base_url: String,
    bearer: RwLock<Option<String>>,
    client: reqwest::Client,
}

impl LangGraphClient {
    pub fn new(base_url: Option<String>, bearer: Option<String>) -> Self {
        let base_url = base_url
            .map(|u| u.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Self {
            base_url,
            bearer: RwLock::new(bearer),
            client: reqwest::Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Replace the bearer token used for subsequent requests.
    pub fn set_bearer(&self, bearer: Option<String>) {
        match self.bearer.write() {
            Ok(mut g) => *g = bearer,
            Err(poisoned) => *poisoned.into_inner() = bearer,
        }
    }

    pub fn bearer(&self) -> Option<String> {
        match self.bearer.read() {
            Ok(g) => g.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Keep the bearer in sync with the auth session: every republished state swaps the token.
    pub fn follow_session(self: &Arc<Self>, mut auth: watch::Receiver<AuthState>) -> JoinHandle<()> {
        let client = Arc::clone(self);
        client.set_bearer(auth.borrow().bearer());
        tokio::spawn(async move {
            while auth.changed().await.is_ok() {
                let bearer = auth.borrow_and_update().bearer();
                log::debug!(
                    "agent client: credential {}",
                    if bearer.is_some() { "updated" } else { "cleared" }
                );
                client.set_bearer(bearer);
            }
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let builder = self.client.request(method, &url);
        match self.bearer() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn check(res: reqwest::Response) -> Result<reqwest::Response, LangGraphError> {
        if res.status().is_success() {
            return Ok(res);
        }
        let status = res.status().as_u16();
        let body = res.text().await.unwrap_or_default();
        Err(LangGraphError::Api { status, body })
    }
}

#[async_trait]
impl ThreadStore for LangGraphClient {
    async fn search(&self, limit: usize) -> Result<Vec<Thread>, LangGraphError> {
        let res = self
            .request(reqwest::Method::POST, "/threads/search")
            .json(&serde_json::json!({ "limit": limit }))
            .send()
            .await?;
        Ok(Self::check(res).await?.json().await?)
    }

    async fn get(&self, thread_id: &str) -> Result<Thread, LangGraphError> {
        let res = self
            .request(reqwest::Method::GET, &format!("/threads/{}", thread_id))
            .send()
            .await?;
        if res.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(LangGraphError::NotFound(thread_id.to_string()));
        }
        Ok(Self::check(res).await?.json().await?)
    }

    async fn create(&self, metadata: Map<String, Value>) -> Result<Thread, LangGraphError> {
        let res = self
            .request(reqwest::Method::POST, "/threads")
            .json(&serde_json::json!({ "metadata": metadata }))
            .send()
            .await?;
        Ok(Self::check(res).await?.json().await?)
    }

    async fn update(
        &self,
        thread_id: &str,
        metadata: Map<String, Value>,
    ) -> Result<Thread, LangGraphError> {
        let res = self
            .request(reqwest::Method::PATCH, &format!("/threads/{}", thread_id))
            .json(&serde_json::json!({ "metadata": metadata }))
            .send()
            .await?;
        if res.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(LangGraphError::NotFound(thread_id.to_string()));
        }
        Ok(Self::check(res).await?.json().await?)
    }

    async fn delete(&self, thread_id: &str) -> Result<(), LangGraphError> {
        let res = self
            .request(reqwest::Method::DELETE, &format!("/threads/{}", thread_id))
            .send()
            .await?;
        if res.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(LangGraphError::NotFound(thread_id.to_string()));
        }
        Self::check(res).await?;
        Ok(())
    }
}

#[async_trait]
impl RunStreamer for LangGraphClient {
    async fn stream_run(
        &self,
        thread_id: &str,
        request: RunRequest,
    ) -> Result<PartStream, LangGraphError> {
        log::debug!(
            "agent client: streaming run on thread {} (assistant {})",
            thread_id,
            request.assistant_id
        );
        let res = self
            .request(
                reqwest::Method::POST,
                &format!("/threads/{}/runs/stream", thread_id),
            )
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .json(&request)
            .send()
            .await?;
        let res = Self::check(res).await?;
        Ok(parts_from_bytes(res.bytes_stream()))
    }
}

struct PartState<S> {
    bytes: Pin<Box<S>>,
    decoder: SseDecoder,
    pending: VecDeque<Result<StreamPart, LangGraphError>>,
    finished: bool,
}

fn to_part(event: SseEvent) -> StreamPart {
    let data = serde_json::from_str(&event.data).unwrap_or(Value::String(event.data));
    StreamPart {
        event: event.event,
        data,
    }
}

/// Decode a raw SSE byte stream into run events. A transport error ends the stream after being yielded.
pub fn parts_from_bytes<S, B>(bytes: S) -> PartStream
where
    S: Stream<Item = Result<B, reqwest::Error>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
{
    let state = PartState {
        bytes: Box::pin(bytes),
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        finished: false,
    };
    let stream = futures_util::stream::unfold(state, |mut st| async move {
        loop {
            if let Some(item) = st.pending.pop_front() {
                return Some((item, st));
            }
            if st.finished {
                return None;
            }
            match st.bytes.next().await {
                Some(Ok(chunk)) => {
                    for event in st.decoder.push(chunk.as_ref()) {
                        st.pending.push_back(Ok(to_part(event)));
                    }
                }
                Some(Err(e)) => {
                    st.finished = true;
                    st.pending.push_back(Err(LangGraphError::Request(e)));
                }
                None => {
                    st.finished = true;
                    if let Some(event) = st.decoder.finish() {
                        st.pending.push_back(Ok(to_part(event)));
                    }
                }
            }
        }
    });
    Box::pin(stream)
}
