//! The canonical event model for the line-delimited chat stream.
//!
//! The server emits one JSON envelope per line; after re-encoding, each wire
//! line is `<code>:<json>` where `code` selects the event kind. This module
//! is the closed tagged union those lines decode into, plus the serde shapes
//! of each payload.

use serde::{Deserialize, Serialize};

/// Wire codes, one per known event kind.
pub mod code {
    pub const TEXT_DELTA: &str = "0";
    pub const ERROR: &str = "3";
    pub const TOOL_CALL: &str = "9";
    pub const TOOL_RESULT: &str = "a";
    pub const TOOL_CALL_START: &str = "b";
    pub const TOOL_CALL_ARGS_DELTA: &str = "c";
    pub const FINISH: &str = "d";
    pub const STEP_FINISH: &str = "e";
    pub const STEP_START: &str = "f";
    pub const REASONING_DELTA: &str = "g";
    pub const SOURCE: &str = "h";
    pub const FILE: &str = "k";
}

/// Reason the assistant stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
    ToolCalls,
    Error,
    Other,
    #[default]
    #[serde(other)]
    Unknown,
}

/// Token usage reported by the server on finish events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Usage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_tokens: Option<u64>,
}

/// A single decoded event in the run's stream.
///
/// Ordering is exactly the server's emission order; no stage may reorder,
/// drop (beyond diagnosed malformed records), or duplicate these.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// `0:` — append text to the open text part.
    TextDelta(String),
    /// `g:` — append text to the open reasoning part.
    ReasoningDelta(String),
    /// `h:` — a citation/source reference attached to the message.
    Source {
        source_type: String,
        id: String,
        url: String,
        title: Option<String>,
    },
    /// `k:` — an inline file emitted by the model.
    File { mime_type: String, data: String },
    /// `b:` — a tool call began streaming; arguments follow as deltas.
    ToolCallStart { call_id: String, name: String },
    /// `c:` — one fragment of a streaming tool call's argument text.
    ToolCallArgsDelta { call_id: String, delta: String },
    /// `9:` — a tool call is complete with fully-assembled arguments.
    ToolCall {
        call_id: String,
        name: String,
        arguments: serde_json::Value,
    },
    /// `a:` — the result for an earlier tool call (server-sent or spliced in
    /// by the tool-result interceptor).
    ToolResult {
        call_id: String,
        result: serde_json::Value,
        is_error: bool,
    },
    /// `f:` — a new step opened within the same assistant message.
    StepStart { message_id: String },
    /// `e:` — one step finished; the message may continue.
    StepFinish {
        reason: FinishReason,
        usage: Option<Usage>,
    },
    /// `d:` — the assistant message is complete.
    Finish {
        reason: FinishReason,
        usage: Option<Usage>,
    },
    /// `3:` — an in-band server error; terminal for the message.
    Error(String),
}

// ---------------------------------------------------------------------------
// Wire payload shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ToolCallStartPayload {
    pub tool_call_id: String,
    pub tool_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ToolCallArgsDeltaPayload {
    pub tool_call_id: String,
    pub args_text_delta: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ToolCallPayload {
    pub tool_call_id: String,
    pub tool_name: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ToolResultPayload {
    pub tool_call_id: String,
    #[serde(default)]
    pub result: serde_json::Value,
    #[serde(default)]
    pub is_error: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FinishPayload {
    #[serde(default)]
    pub finish_reason: FinishReason,
    #[serde(default)]
    pub usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StepStartPayload {
    pub message_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SourcePayload {
    pub source_type: String,
    pub id: String,
    pub url: String,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FilePayload {
    pub mime_type: String,
    pub data: String,
}
