//! Wire-line decoder: `<type>:<json>` records into [`StreamEvent`]s.
//!
//! A small match keyed by the type prefix, one arm per known event kind,
//! with a logged-and-ignored unknown-type fallback so new server event kinds
//! degrade gracefully. Ordering is preserved exactly as received; this stage
//! never reorders or batches across type boundaries.

use futures_util::Stream;
use serde::de::DeserializeOwned;

use crate::error::RunError;
use crate::protocol::{
    code, FilePayload, FinishPayload, SourcePayload, StepStartPayload, StreamEvent,
    ToolCallArgsDeltaPayload, ToolCallPayload, ToolCallStartPayload, ToolResultPayload,
};
use crate::stream::wire;

/// Decode one re-encoded wire line into a protocol event.
///
/// Returns `None` for unknown event codes (logged at debug level) and for
/// malformed payloads (logged at warn level); neither is fatal.
#[must_use]
pub fn decode_wire_line(line: &str) -> Option<StreamEvent> {
    let Some((kind, payload)) = wire::split_wire_line(line) else {
        tracing::warn!(line, "wire line missing type prefix");
        return None;
    };

    match kind {
        code::TEXT_DELTA => parse_payload::<String>(kind, payload).map(StreamEvent::TextDelta),
        code::REASONING_DELTA => {
            parse_payload::<String>(kind, payload).map(StreamEvent::ReasoningDelta)
        }
        code::SOURCE => parse_payload::<SourcePayload>(kind, payload).map(|p| StreamEvent::Source {
            source_type: p.source_type,
            id: p.id,
            url: p.url,
            title: p.title,
        }),
        code::FILE => parse_payload::<FilePayload>(kind, payload).map(|p| StreamEvent::File {
            mime_type: p.mime_type,
            data: p.data,
        }),
        code::TOOL_CALL_START => {
            parse_payload::<ToolCallStartPayload>(kind, payload).map(|p| {
                StreamEvent::ToolCallStart {
                    call_id: p.tool_call_id,
                    name: p.tool_name,
                }
            })
        }
        code::TOOL_CALL_ARGS_DELTA => {
            parse_payload::<ToolCallArgsDeltaPayload>(kind, payload).map(|p| {
                StreamEvent::ToolCallArgsDelta {
                    call_id: p.tool_call_id,
                    delta: p.args_text_delta,
                }
            })
        }
        code::TOOL_CALL => {
            parse_payload::<ToolCallPayload>(kind, payload).map(|p| StreamEvent::ToolCall {
                call_id: p.tool_call_id,
                name: p.tool_name,
                arguments: p.args,
            })
        }
        code::TOOL_RESULT => {
            parse_payload::<ToolResultPayload>(kind, payload).map(|p| StreamEvent::ToolResult {
                call_id: p.tool_call_id,
                result: p.result,
                is_error: p.is_error,
            })
        }
        code::STEP_START => {
            parse_payload::<StepStartPayload>(kind, payload).map(|p| StreamEvent::StepStart {
                message_id: p.message_id,
            })
        }
        code::STEP_FINISH => {
            parse_payload::<FinishPayload>(kind, payload).map(|p| StreamEvent::StepFinish {
                reason: p.finish_reason,
                usage: p.usage,
            })
        }
        code::FINISH => parse_payload::<FinishPayload>(kind, payload).map(|p| StreamEvent::Finish {
            reason: p.finish_reason,
            usage: p.usage,
        }),
        code::ERROR => parse_payload::<String>(kind, payload).map(StreamEvent::Error),
        unknown => {
            tracing::debug!(code = unknown, "ignoring unknown event code");
            None
        }
    }
}

/// Decode one framed envelope line: re-encode, then decode.
#[must_use]
pub fn decode_envelope_line(line: &str) -> Option<StreamEvent> {
    let wire_line = wire::reencode_line(line)?;
    decode_wire_line(&wire_line)
}

/// Lift a line stream into a protocol event stream.
///
/// Malformed and unknown records are dropped (diagnosed by the layers
/// below); upstream errors pass through untouched.
pub fn event_stream<S>(lines: S) -> impl Stream<Item = Result<StreamEvent, RunError>> + Send
where
    S: Stream<Item = Result<String, RunError>> + Send + 'static,
{
    use futures_util::StreamExt;

    lines.filter_map(|item| {
        futures_util::future::ready(match item {
            Ok(line) => decode_envelope_line(&line).map(Ok),
            Err(err) => Some(Err(err)),
        })
    })
}

fn parse_payload<T: DeserializeOwned>(kind: &str, payload: &str) -> Option<T> {
    match serde_json::from_str(payload) {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!(code = kind, error = %err, "dropping malformed event payload");
            None
        }
    }
}
