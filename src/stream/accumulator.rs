//! Fold of the ordered event sequence into assistant message snapshots.
//!
//! One [`MessageAccumulator`] per run. Text and reasoning deltas append to
//! the trailing open part of their kind; the open part closes when any other
//! part starts. Tool calls are keyed by call id, their argument fragments
//! concatenated in arrival order and not re-parsed until completion. Parts
//! are never reordered after creation, and a closed part is immutable.

use futures_util::Stream;
use rustc_hash::FxHashMap;

use crate::error::RunError;
use crate::message::{ContentPart, MessageSnapshot, MessageStatus, ToolCallPart, ToolCallState};
use crate::protocol::StreamEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpenInline {
    None,
    Text,
    Reasoning,
}

/// Accumulates protocol events into an evolving assistant message.
pub struct MessageAccumulator {
    message: MessageSnapshot,
    call_index: FxHashMap<String, usize>,
    open: OpenInline,
}

impl MessageAccumulator {
    #[must_use]
    pub fn new(message_id: String) -> Self {
        Self {
            message: MessageSnapshot::new(message_id),
            call_index: FxHashMap::default(),
            open: OpenInline::None,
        }
    }

    /// Fold one event into the message.
    ///
    /// Returns `true` when the message changed in a way worth emitting a new
    /// snapshot for.
    pub fn apply(&mut self, event: &StreamEvent) -> bool {
        match event {
            StreamEvent::TextDelta(delta) => {
                if delta.is_empty() {
                    return false;
                }
                self.append_inline(OpenInline::Text, delta);
                true
            }
            StreamEvent::ReasoningDelta(delta) => {
                if delta.is_empty() {
                    return false;
                }
                self.append_inline(OpenInline::Reasoning, delta);
                true
            }
            StreamEvent::Source {
                source_type,
                id,
                url,
                title,
            } => {
                self.open = OpenInline::None;
                self.message.parts.push(ContentPart::Source {
                    source_type: source_type.clone(),
                    id: id.clone(),
                    url: url.clone(),
                    title: title.clone(),
                });
                true
            }
            StreamEvent::File { mime_type, data } => {
                self.open = OpenInline::None;
                self.message.parts.push(ContentPart::File {
                    mime_type: mime_type.clone(),
                    data: data.clone(),
                });
                true
            }
            StreamEvent::ToolCallStart { call_id, name } => {
                self.open = OpenInline::None;
                if self.call_index.contains_key(call_id) {
                    tracing::warn!(call_id, "duplicate tool-call start");
                    return false;
                }
                self.push_call(ToolCallPart::streaming(call_id.clone(), name.clone()));
                true
            }
            StreamEvent::ToolCallArgsDelta { call_id, delta } => {
                if delta.is_empty() {
                    return false;
                }
                let index = match self.call_index.get(call_id) {
                    Some(&index) => index,
                    None => {
                        // Delta before its start event; open the part anyway.
                        self.open = OpenInline::None;
                        self.push_call(ToolCallPart::streaming(call_id.clone(), String::new()))
                    }
                };
                if let Some(ContentPart::ToolCall(call)) = self.message.parts.get_mut(index) {
                    if call.state.is_terminal() {
                        tracing::warn!(call_id, "argument delta for finalized tool call");
                        return false;
                    }
                    call.args_text.push_str(delta);
                }
                true
            }
            StreamEvent::ToolCall {
                call_id,
                name,
                arguments,
            } => {
                self.open = OpenInline::None;
                let index = match self.call_index.get(call_id) {
                    Some(&index) => index,
                    None => self.push_call(ToolCallPart::streaming(
                        call_id.clone(),
                        name.clone(),
                    )),
                };
                if let Some(ContentPart::ToolCall(call)) = self.message.parts.get_mut(index) {
                    if call.name.is_empty() {
                        call.name = name.clone();
                    }
                    call.arguments = Some(finalize_arguments(
                        call_id,
                        arguments,
                        &call.args_text,
                    ));
                    if !call.state.is_terminal() {
                        call.state = ToolCallState::Complete;
                    }
                }
                true
            }
            StreamEvent::ToolResult {
                call_id,
                result,
                is_error,
            } => {
                let Some(&index) = self.call_index.get(call_id) else {
                    tracing::warn!(call_id, "result for unknown tool call");
                    return false;
                };
                if let Some(ContentPart::ToolCall(call)) = self.message.parts.get_mut(index) {
                    if call.result.is_some() {
                        tracing::debug!(call_id, "ignoring second result for tool call");
                        return false;
                    }
                    call.result = Some(result.clone());
                    call.is_error = *is_error;
                    call.state = if *is_error {
                        ToolCallState::Errored
                    } else {
                        ToolCallState::Complete
                    };
                }
                true
            }
            StreamEvent::StepStart { .. } => {
                self.open = OpenInline::None;
                false
            }
            StreamEvent::StepFinish { usage, .. } => {
                if usage.is_some() {
                    self.message.usage = *usage;
                }
                false
            }
            StreamEvent::Finish { reason, usage } => {
                self.open = OpenInline::None;
                self.close_open_calls();
                if usage.is_some() {
                    self.message.usage = *usage;
                }
                self.message.status = MessageStatus::Complete { reason: *reason };
                true
            }
            StreamEvent::Error(message) => {
                self.open = OpenInline::None;
                self.message.status = MessageStatus::Errored {
                    message: message.clone(),
                };
                true
            }
        }
    }

    /// Current state of the message, cloned as an immutable snapshot.
    #[must_use]
    pub fn snapshot(&self) -> MessageSnapshot {
        self.message.clone()
    }

    fn append_inline(&mut self, kind: OpenInline, delta: &str) {
        if self.open == kind {
            let appended = match (kind, self.message.parts.last_mut()) {
                (OpenInline::Text, Some(ContentPart::Text(text))) => {
                    text.push_str(delta);
                    true
                }
                (OpenInline::Reasoning, Some(ContentPart::Reasoning(text))) => {
                    text.push_str(delta);
                    true
                }
                _ => false,
            };
            if appended {
                return;
            }
        }
        let part = match kind {
            OpenInline::Text => ContentPart::Text(delta.to_string()),
            OpenInline::Reasoning => ContentPart::Reasoning(delta.to_string()),
            OpenInline::None => return,
        };
        self.message.parts.push(part);
        self.open = kind;
    }

    fn push_call(&mut self, call: ToolCallPart) -> usize {
        let index = self.message.parts.len();
        self.call_index.insert(call.call_id.clone(), index);
        self.message.parts.push(ContentPart::ToolCall(call));
        index
    }

    fn close_open_calls(&mut self) {
        for part in &mut self.message.parts {
            if let ContentPart::ToolCall(call) = part {
                if !call.state.is_terminal() {
                    // Finish with a still-open tool call is a contract violation.
                    tracing::warn!(
                        call_id = %call.call_id,
                        tool = %call.name,
                        "stream finished with an open tool call"
                    );
                    call.state = ToolCallState::Errored;
                }
            }
        }
    }
}

fn finalize_arguments(
    call_id: &str,
    arguments: &serde_json::Value,
    args_text: &str,
) -> serde_json::Value {
    if !arguments.is_null() {
        return arguments.clone();
    }
    if args_text.is_empty() {
        return serde_json::Value::Null;
    }
    match serde_json::from_str(args_text) {
        Ok(parsed) => parsed,
        Err(err) => {
            tracing::warn!(call_id, error = %err, "tool-call argument text is not valid JSON");
            serde_json::Value::Null
        }
    }
}

/// Lift an event stream into a snapshot stream.
///
/// One snapshot is emitted per meaningful delta; errors pass through
/// untouched. The accumulator is owned by this stage and dropped with it.
pub fn snapshot_stream<S>(
    events: S,
    message_id: String,
) -> impl Stream<Item = Result<MessageSnapshot, RunError>> + Send
where
    S: Stream<Item = Result<StreamEvent, RunError>> + Send + 'static,
{
    use futures_util::StreamExt;

    futures_util::stream::unfold(
        (Box::pin(events), MessageAccumulator::new(message_id)),
        |(mut events, mut accumulator)| async move {
            loop {
                match events.as_mut().next().await? {
                    Ok(event) => {
                        if accumulator.apply(&event) {
                            let snapshot = accumulator.snapshot();
                            return Some((Ok(snapshot), (events, accumulator)));
                        }
                    }
                    Err(err) => return Some((Err(err), (events, accumulator))),
                }
            }
        },
    )
}
