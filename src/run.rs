//! The run controller: exactly one request lifecycle per run.
//!
//! A run builds the outbound payload from normalized history plus run
//! configuration, performs the one POST, wires the stream pipeline
//! (framer -> re-encoder/decoder -> tool-result interceptor -> accumulator),
//! honors cancellation, and drives the lifecycle callbacks. Its output is a
//! finite, single-use stream of assistant message snapshots; a new run
//! constructs a new pipeline.

use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::future::{BoxFuture, Either};
use futures_util::stream::BoxStream;
use futures_util::{Stream, StreamExt, TryStreamExt};
use http::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::RunError;
use crate::message::{normalize_history, Message, MessageSnapshot};
use crate::stream::{accumulator, decoder, framer};
use crate::tools::{tool_result_stream, ToolRegistry};
use crate::transport::{build_client, TransportOptions};
use crate::util::next_message_id;

type HeaderFuture = BoxFuture<'static, Result<HeaderMap, RunError>>;

/// The caller-supplied header bag: a static map, or a closure computing the
/// headers per run (e.g. a freshly-minted auth token).
#[derive(Clone)]
pub enum HeaderSource {
    Static(HeaderMap),
    Computed(Arc<dyn Fn() -> HeaderFuture + Send + Sync>),
}

impl HeaderSource {
    /// Wrap an async closure as a computed header source.
    pub fn computed<F, Fut>(func: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<HeaderMap, RunError>> + Send + 'static,
    {
        HeaderSource::Computed(Arc::new(move || Box::pin(func())))
    }

    async fn resolve(&self) -> Result<HeaderMap, RunError> {
        match self {
            HeaderSource::Static(map) => Ok(map.clone()),
            HeaderSource::Computed(func) => func().await,
        }
    }
}

impl Default for HeaderSource {
    fn default() -> Self {
        HeaderSource::Static(HeaderMap::new())
    }
}

impl fmt::Debug for HeaderSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HeaderSource::Static(map) => f.debug_tuple("Static").field(map).finish(),
            HeaderSource::Computed(_) => f.write_str("Computed(..)"),
        }
    }
}

/// Lifecycle callbacks surfaced to the external collaborator.
#[derive(Default)]
pub struct RunCallbacks {
    pub on_response: Option<Box<dyn Fn(&reqwest::Response) + Send + Sync>>,
    pub on_finish: Option<Box<dyn Fn(MessageSnapshot) + Send + Sync>>,
    pub on_error: Option<Box<dyn Fn(&RunError) + Send + Sync>>,
    pub on_cancel: Option<Box<dyn Fn() + Send + Sync>>,
}

impl RunCallbacks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn on_response(mut self, func: impl Fn(&reqwest::Response) + Send + Sync + 'static) -> Self {
        self.on_response = Some(Box::new(func));
        self
    }

    #[must_use]
    pub fn on_finish(mut self, func: impl Fn(MessageSnapshot) + Send + Sync + 'static) -> Self {
        self.on_finish = Some(Box::new(func));
        self
    }

    #[must_use]
    pub fn on_error(mut self, func: impl Fn(&RunError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Box::new(func));
        self
    }

    #[must_use]
    pub fn on_cancel(mut self, func: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_cancel = Some(Box::new(func));
        self
    }
}

/// Adapter construction options.
pub struct AdapterOptions {
    pub endpoint: Url,
    pub headers: HeaderSource,
    pub transport: TransportOptions,
    /// Extra fields merged into every outbound request body.
    pub extra_body: Map<String, Value>,
    pub callbacks: RunCallbacks,
}

impl AdapterOptions {
    #[must_use]
    pub fn new(endpoint: Url) -> Self {
        Self {
            endpoint,
            headers: HeaderSource::default(),
            transport: TransportOptions::default(),
            extra_body: Map::new(),
            callbacks: RunCallbacks::default(),
        }
    }
}

/// Per-run configuration forwarded verbatim to the backend.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub custom: Map<String, Value>,
}

/// Input for one run: the conversation so far plus per-run settings.
#[derive(Debug, Clone, Default)]
pub struct RunInput {
    pub system: Option<String>,
    pub messages: Vec<Message>,
    pub run_config: RunConfig,
    /// Opaque state carried between turns, echoed back to the server.
    pub state: Option<Value>,
    /// Per-call settings spread into the request body.
    pub call_settings: Map<String, Value>,
    /// Id for the assistant message under construction; generated when
    /// absent.
    pub assistant_message_id: Option<String>,
}

/// Owner of one run's cancellation token.
///
/// Cancellation is cooperative: every pipeline stage checks the token at its
/// suspension points. Cancelling after the run finished is a no-op, and the
/// `on_cancel` callback fires at most once. [`RunHandle::detach`] cancels
/// without the callback, for callers abandoning the view without wanting a
/// cancel signal sent upstream.
#[derive(Debug, Clone)]
pub struct RunHandle {
    token: CancellationToken,
    detach: Arc<AtomicBool>,
}

impl RunHandle {
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn detach(&self) {
        self.detach.store(true, Ordering::Release);
        self.token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    #[must_use]
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.token
    }
}

/// One in-flight run: its handle plus the snapshot stream.
pub struct Run {
    pub handle: RunHandle,
    pub snapshots: BoxStream<'static, Result<MessageSnapshot, RunError>>,
}

/// The streaming chat adapter. Holds the shared HTTP client, the tool
/// registry, and the adapter options; each [`ChatAdapter::run`] call owns an
/// independent pipeline and cancellation token.
pub struct ChatAdapter {
    client: reqwest::Client,
    endpoint: Url,
    headers: HeaderSource,
    extra_body: Map<String, Value>,
    callbacks: Arc<RunCallbacks>,
    registry: Arc<ToolRegistry>,
}

impl ChatAdapter {
    /// Build an adapter, constructing the shared HTTP client.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::Http`] when the client cannot be constructed.
    pub fn new(options: AdapterOptions, registry: Arc<ToolRegistry>) -> Result<Self, RunError> {
        let client = build_client(&options.transport)?;
        Ok(Self {
            client,
            endpoint: options.endpoint,
            headers: options.headers,
            extra_body: options.extra_body,
            callbacks: Arc::new(options.callbacks),
            registry,
        })
    }

    /// Start one run.
    ///
    /// Performs exactly one POST; the returned snapshot stream is finite and
    /// single-use. All pipeline stages are dropped on every exit path.
    #[must_use]
    pub fn run(&self, input: RunInput) -> Run {
        let token = CancellationToken::new();
        let handle = RunHandle {
            token: token.clone(),
            detach: Arc::new(AtomicBool::new(false)),
        };

        let message_id = input
            .assistant_message_id
            .clone()
            .unwrap_or_else(next_message_id);
        let context = RunContext {
            client: self.client.clone(),
            endpoint: self.endpoint.clone(),
            headers: self.headers.clone(),
            extra_body: self.extra_body.clone(),
            callbacks: Arc::clone(&self.callbacks),
            registry: Arc::clone(&self.registry),
            token: token.clone(),
            message_id,
            input,
        };

        let pipeline = futures_util::stream::once(async move {
            match open_pipeline(context).await {
                Ok(snapshots) => Either::Left(snapshots),
                Err(err) => {
                    Either::Right(futures_util::stream::iter([Err::<MessageSnapshot, _>(err)]))
                }
            }
        })
        .flatten();

        let snapshots = finalize(
            pipeline,
            token,
            Arc::clone(&handle.detach),
            Arc::clone(&self.callbacks),
        );
        Run {
            handle,
            snapshots: snapshots.boxed(),
        }
    }
}

struct RunContext {
    client: reqwest::Client,
    endpoint: Url,
    headers: HeaderSource,
    extra_body: Map<String, Value>,
    callbacks: Arc<RunCallbacks>,
    registry: Arc<ToolRegistry>,
    token: CancellationToken,
    message_id: String,
    input: RunInput,
}

async fn open_pipeline(
    context: RunContext,
) -> Result<impl Stream<Item = Result<MessageSnapshot, RunError>> + Send, RunError> {
    let RunContext {
        client,
        endpoint,
        headers,
        extra_body,
        callbacks,
        registry,
        token,
        message_id,
        input,
    } = context;

    let mut headers = tokio::select! {
        biased;
        () = token.cancelled() => return Err(RunError::Cancelled),
        resolved = headers.resolve() => resolved?,
    };
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    let body = build_request_body(&input, &message_id, &extra_body)?;
    let request = client
        .post(endpoint)
        .headers(headers)
        .json(&Value::Object(body));

    let response = tokio::select! {
        biased;
        () = token.cancelled() => return Err(RunError::Cancelled),
        response = request.send() => response?,
    };

    if let Some(on_response) = &callbacks.on_response {
        on_response(&response);
    }

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(RunError::Transport {
            status: status.as_u16(),
            body,
        });
    }

    let bytes = response.bytes_stream().map_err(RunError::from);
    let lines = framer::line_stream(bytes, token.clone());
    let events = decoder::event_stream(lines);
    let intercepted = tool_result_stream(events, registry, token);
    Ok(accumulator::snapshot_stream(intercepted, message_id))
}

fn build_request_body(
    input: &RunInput,
    assistant_message_id: &str,
    extra_body: &Map<String, Value>,
) -> Result<Map<String, Value>, RunError> {
    let mut body = Map::new();
    if let Some(system) = &input.system {
        body.insert("system".to_string(), Value::String(system.clone()));
    }
    let messages = serde_json::to_value(normalize_history(&input.messages))
        .map_err(|e| RunError::Protocol(format!("failed to serialize history: {e}")))?;
    body.insert("messages".to_string(), messages);
    body.insert(
        "unstable_assistantMessageId".to_string(),
        Value::String(assistant_message_id.to_string()),
    );
    let run_config = serde_json::to_value(&input.run_config)
        .map_err(|e| RunError::Protocol(format!("failed to serialize run config: {e}")))?;
    body.insert("runConfig".to_string(), run_config);
    if let Some(state) = &input.state {
        body.insert("state".to_string(), state.clone());
    }
    for (key, value) in &input.call_settings {
        body.insert(key.clone(), value.clone());
    }
    for (key, value) in extra_body {
        body.insert(key.clone(), value.clone());
    }
    Ok(body)
}

struct FinalizeState<S> {
    inner: Pin<Box<S>>,
    token: CancellationToken,
    detach: Arc<AtomicBool>,
    callbacks: Arc<RunCallbacks>,
    last: Option<MessageSnapshot>,
    cancel_notified: bool,
    done: bool,
}

fn notify_cancel<S>(state: &mut FinalizeState<S>) {
    if state.cancel_notified {
        return;
    }
    state.cancel_notified = true;
    if state.detach.load(Ordering::Acquire) {
        return;
    }
    if let Some(on_cancel) = &state.callbacks.on_cancel {
        on_cancel();
    }
}

/// Wrap the pipeline with the lifecycle contract: `on_finish` with the final
/// snapshot on normal completion, `on_error` for reportable failures,
/// `on_cancel` (at most once, suppressed on detach) for cancellation, and a
/// Protocol error when the body ends before any event.
fn finalize<S>(
    inner: S,
    token: CancellationToken,
    detach: Arc<AtomicBool>,
    callbacks: Arc<RunCallbacks>,
) -> impl Stream<Item = Result<MessageSnapshot, RunError>> + Send
where
    S: Stream<Item = Result<MessageSnapshot, RunError>> + Send + 'static,
{
    futures_util::stream::unfold(
        FinalizeState {
            inner: Box::pin(inner),
            token,
            detach,
            callbacks,
            last: None,
            cancel_notified: false,
            done: false,
        },
        |mut state| async move {
            if state.done {
                return None;
            }
            match state.inner.as_mut().next().await {
                Some(Ok(snapshot)) => {
                    state.last = Some(snapshot.clone());
                    Some((Ok(snapshot), state))
                }
                Some(Err(err)) if !err.is_reportable() => {
                    state.done = true;
                    notify_cancel(&mut state);
                    None
                }
                Some(Err(err)) => {
                    state.done = true;
                    tracing::error!(category = ?err.category(), error = %err, "run failed");
                    if let Some(on_error) = &state.callbacks.on_error {
                        on_error(&err);
                    }
                    Some((Err(err), state))
                }
                None => {
                    state.done = true;
                    if state.token.is_cancelled() {
                        notify_cancel(&mut state);
                        return None;
                    }
                    let Some(snapshot) = state.last.take() else {
                        let err = RunError::Protocol("stream ended before any event".to_string());
                        if let Some(on_error) = &state.callbacks.on_error {
                            on_error(&err);
                        }
                        return Some((Err(err), state));
                    };
                    if let Some(on_finish) = &state.callbacks.on_finish {
                        on_finish(snapshot);
                    }
                    None
                }
            }
        },
    )
}
