//! Tool handler registry and the tool-result interceptor stage.
//!
//! When a completed tool-call event appears and a handler is registered for
//! that tool name, the interceptor invokes the handler with the accumulated
//! arguments and splices its result back into the event sequence as a
//! synthetic tool-result event, immediately after the originating call — as
//! if the server had sent it.

use std::collections::VecDeque;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::Stream;
use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};
use tokio_util::sync::CancellationToken;

use crate::error::{RunError, ToolError};
use crate::protocol::StreamEvent;

/// A client-side tool the model may call.
pub trait ToolHandler: Send + Sync {
    /// Invoke the tool with the call's fully-assembled arguments.
    fn call(
        &self,
        arguments: serde_json::Value,
    ) -> BoxFuture<'static, Result<serde_json::Value, ToolError>>;

    /// Whether a fault in this handler aborts the whole run instead of
    /// being converted to an in-band error result.
    fn fatal_on_error(&self) -> bool {
        false
    }
}

struct FnToolHandler<F> {
    func: F,
    fatal: bool,
}

impl<F> ToolHandler for FnToolHandler<F>
where
    F: Fn(serde_json::Value) -> Result<serde_json::Value, ToolError> + Send + Sync,
{
    fn call(
        &self,
        arguments: serde_json::Value,
    ) -> BoxFuture<'static, Result<serde_json::Value, ToolError>> {
        Box::pin(futures_util::future::ready((self.func)(arguments)))
    }

    fn fatal_on_error(&self) -> bool {
        self.fatal
    }
}

/// Registry of tool handlers, keyed by tool name.
///
/// Shared read-mostly state: registration happens before runs start, lookups
/// happen per completed tool call.
#[derive(Default)]
pub struct ToolRegistry {
    handlers: RwLock<FxHashMap<String, Arc<dyn ToolHandler>>>,
}

impl ToolRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: impl Into<String>, handler: Arc<dyn ToolHandler>) {
        self.handlers.write().insert(name.into(), handler);
    }

    /// Register a synchronous closure as a tool handler.
    pub fn register_fn<F>(&self, name: impl Into<String>, func: F)
    where
        F: Fn(serde_json::Value) -> Result<serde_json::Value, ToolError>
            + Send
            + Sync
            + 'static,
    {
        self.register(name, Arc::new(FnToolHandler { func, fatal: false }));
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.handlers.read().get(name).cloned()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }
}

struct InterceptState<S> {
    events: std::pin::Pin<Box<S>>,
    registry: Arc<ToolRegistry>,
    cancel: CancellationToken,
    /// Argument fragments per in-flight call id, for completion events that
    /// arrive without assembled arguments.
    args_text: FxHashMap<String, String>,
    /// Call ids that already have a result (server-sent or spliced).
    answered: FxHashSet<String>,
    pending: VecDeque<Result<StreamEvent, RunError>>,
}

/// Splice client-side tool results into the event sequence.
///
/// Events pass through in order; after each completed tool call with a
/// registered handler, the handler's result (or error result) follows as a
/// synthetic event. Handler invocation races the run's cancellation token:
/// when cancelled mid-invocation the stage stops forwarding and the stream
/// ends. Handler faults become in-band error results unless the handler is
/// marked fatal, in which case the run fails with
/// [`RunError::ToolHandler`].
pub fn tool_result_stream<S>(
    events: S,
    registry: Arc<ToolRegistry>,
    cancel: CancellationToken,
) -> impl Stream<Item = Result<StreamEvent, RunError>> + Send
where
    S: Stream<Item = Result<StreamEvent, RunError>> + Send + 'static,
{
    use futures_util::StreamExt;

    futures_util::stream::unfold(
        InterceptState {
            events: Box::pin(events),
            registry,
            cancel,
            args_text: FxHashMap::default(),
            answered: FxHashSet::default(),
            pending: VecDeque::new(),
        },
        |mut state| async move {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }
            if state.cancel.is_cancelled() {
                return None;
            }

            let event = match state.events.as_mut().next().await? {
                Ok(event) => event,
                Err(err) => return Some((Err(err), state)),
            };

            match &event {
                StreamEvent::ToolCallArgsDelta { call_id, delta } => {
                    state
                        .args_text
                        .entry(call_id.clone())
                        .or_default()
                        .push_str(delta);
                }
                StreamEvent::ToolResult { call_id, .. } => {
                    state.answered.insert(call_id.clone());
                }
                StreamEvent::ToolCall {
                    call_id,
                    name,
                    arguments,
                } => {
                    if !state.answered.contains(call_id) {
                        if let Some(handler) = state.registry.get(name) {
                            let args = assembled_arguments(
                                call_id,
                                arguments,
                                state.args_text.remove(call_id),
                            );
                            let outcome = tokio::select! {
                                biased;
                                () = state.cancel.cancelled() => return None,
                                outcome = handler.call(args) => outcome,
                            };
                            state.answered.insert(call_id.clone());
                            state.pending.push_back(splice_outcome(
                                call_id,
                                name,
                                handler.fatal_on_error(),
                                outcome,
                            ));
                        }
                    }
                }
                _ => {}
            }
            Some((Ok(event), state))
        },
    )
}

fn assembled_arguments(
    call_id: &str,
    arguments: &serde_json::Value,
    args_text: Option<String>,
) -> serde_json::Value {
    if !arguments.is_null() {
        return arguments.clone();
    }
    let Some(text) = args_text.filter(|text| !text.is_empty()) else {
        return serde_json::Value::Null;
    };
    match serde_json::from_str(&text) {
        Ok(parsed) => parsed,
        Err(err) => {
            tracing::warn!(call_id, error = %err, "tool-call argument text is not valid JSON");
            serde_json::Value::Null
        }
    }
}

fn splice_outcome(
    call_id: &str,
    name: &str,
    fatal: bool,
    outcome: Result<serde_json::Value, ToolError>,
) -> Result<StreamEvent, RunError> {
    match outcome {
        Ok(result) => Ok(StreamEvent::ToolResult {
            call_id: call_id.to_string(),
            result,
            is_error: false,
        }),
        Err(err) if fatal => Err(RunError::ToolHandler {
            name: name.to_string(),
            message: err.message,
        }),
        Err(err) => {
            tracing::warn!(tool = name, error = %err, "tool handler faulted");
            Ok(StreamEvent::ToolResult {
                call_id: call_id.to_string(),
                result: serde_json::Value::String(err.message),
                is_error: true,
            })
        }
    }
}
