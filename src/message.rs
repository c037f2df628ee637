//! Conversation message model and history normalization.
//!
//! The assistant message under construction is exposed as a
//! [`MessageSnapshot`]: an immutable, point-in-time view of the accumulated
//! content parts plus the run's completion status. When the conversation is
//! sent back to the server for the next turn, history is reduced to the
//! [`NormalizedMessage`] wire shape via [`normalize_history`].

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::protocol::{FinishReason, Usage};

/// Conversation role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Lifecycle of a tool-call content part.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolCallState {
    /// Arguments are still arriving as text fragments.
    Streaming,
    /// The call completed with fully-assembled arguments.
    Complete,
    /// The call (or its handler) faulted.
    Errored,
}

impl ToolCallState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, ToolCallState::Streaming)
    }
}

/// A tool call inside an assistant message.
///
/// `args_text` holds the raw argument fragments in arrival order; they are
/// not re-parsed until the call completes, at which point `arguments` holds
/// the parsed value. The `result` slot is filled by a server-sent result or
/// by the tool-result interceptor.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallPart {
    pub call_id: String,
    pub name: String,
    pub args_text: String,
    pub arguments: Option<serde_json::Value>,
    pub result: Option<serde_json::Value>,
    pub is_error: bool,
    pub state: ToolCallState,
}

impl ToolCallPart {
    #[must_use]
    pub fn streaming(call_id: String, name: String) -> Self {
        Self {
            call_id,
            name,
            args_text: String::new(),
            arguments: None,
            result: None,
            is_error: false,
            state: ToolCallState::Streaming,
        }
    }
}

/// One typed fragment of a message's content.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentPart {
    Text(String),
    Reasoning(String),
    ToolCall(ToolCallPart),
    Source {
        source_type: String,
        id: String,
        url: String,
        title: Option<String>,
    },
    File {
        mime_type: String,
        data: String,
    },
    Image {
        url: String,
    },
}

/// Completion status of the in-flight assistant message.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageStatus {
    Running,
    Complete { reason: FinishReason },
    Errored { message: String },
}

impl MessageStatus {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, MessageStatus::Running)
    }
}

/// An immutable view of the assistant message under construction.
///
/// Each emission is a superset/refinement of the prior: text parts only
/// append, tool-call arguments only grow or finalize, and parts are never
/// reordered after creation.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageSnapshot {
    pub id: String,
    pub role: Role,
    pub parts: SmallVec<[ContentPart; 4]>,
    pub status: MessageStatus,
    pub usage: Option<Usage>,
}

impl MessageSnapshot {
    #[must_use]
    pub fn new(id: String) -> Self {
        Self {
            id,
            role: Role::Assistant,
            parts: SmallVec::new(),
            status: MessageStatus::Running,
            usage: None,
        }
    }

    /// Concatenation of all text parts, in order.
    #[must_use]
    pub fn text(&self) -> String {
        let mut out = String::new();
        for part in &self.parts {
            if let ContentPart::Text(text) = part {
                out.push_str(text);
            }
        }
        out
    }

    /// All tool-call parts, in order.
    pub fn tool_calls(&self) -> impl Iterator<Item = &ToolCallPart> {
        self.parts.iter().filter_map(|part| match part {
            ContentPart::ToolCall(call) => Some(call),
            _ => None,
        })
    }
}

/// An attachment on a user message; its content is flattened into the main
/// content sequence when the history is normalized.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Attachment {
    pub content: SmallVec<[ContentPart; 1]>,
}

/// One message of conversation history, as held by the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub role: Role,
    pub parts: SmallVec<[ContentPart; 1]>,
    pub attachments: Vec<Attachment>,
}

impl Message {
    #[must_use]
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        let mut parts = SmallVec::new();
        parts.push(ContentPart::Text(text.into()));
        Self {
            role,
            parts,
            attachments: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Normalized wire shapes
// ---------------------------------------------------------------------------

fn is_false(value: &bool) -> bool {
    !*value
}

/// A content part in the shape the backend accepts.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum NormalizedPart {
    #[serde(rename_all = "camelCase")]
    Text { text: String },
    #[serde(rename_all = "camelCase")]
    ToolCall {
        tool_call_id: String,
        tool_name: String,
        args: serde_json::Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<serde_json::Value>,
        #[serde(skip_serializing_if = "is_false")]
        is_error: bool,
    },
    #[serde(rename_all = "camelCase")]
    Image { image: String },
}

/// One message of the outbound `messages` array.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedMessage {
    pub role: Role,
    pub content: Vec<NormalizedPart>,
}

/// Reduce conversation history to the wire shape the backend accepts.
///
/// Assistant messages drop `Reasoning`/`Source`/`File` parts and forward
/// tool calls without their transient per-chunk argument text; user messages
/// flatten attachment content into the main content sequence; system
/// messages pass through verbatim.
#[must_use]
pub fn normalize_history(messages: &[Message]) -> Vec<NormalizedMessage> {
    messages
        .iter()
        .map(|message| match message.role {
            Role::Assistant => NormalizedMessage {
                role: Role::Assistant,
                content: message
                    .parts
                    .iter()
                    .filter_map(normalize_assistant_part)
                    .collect(),
            },
            Role::User => NormalizedMessage {
                role: Role::User,
                content: message
                    .parts
                    .iter()
                    .chain(
                        message
                            .attachments
                            .iter()
                            .flat_map(|attachment| attachment.content.iter()),
                    )
                    .filter_map(normalize_user_part)
                    .collect(),
            },
            Role::System => NormalizedMessage {
                role: Role::System,
                content: message
                    .parts
                    .iter()
                    .filter_map(|part| match part {
                        ContentPart::Text(text) => Some(NormalizedPart::Text { text: text.clone() }),
                        other => {
                            tracing::debug!(part = part_kind(other), "skipping non-text system part");
                            None
                        }
                    })
                    .collect(),
            },
        })
        .collect()
}

fn normalize_assistant_part(part: &ContentPart) -> Option<NormalizedPart> {
    match part {
        ContentPart::Text(text) => Some(NormalizedPart::Text { text: text.clone() }),
        ContentPart::ToolCall(call) => Some(NormalizedPart::ToolCall {
            tool_call_id: call.call_id.clone(),
            tool_name: call.name.clone(),
            args: call.arguments.clone().unwrap_or(serde_json::Value::Null),
            result: call.result.clone(),
            is_error: call.is_error,
        }),
        ContentPart::Image { url } => Some(NormalizedPart::Image { image: url.clone() }),
        // Accumulator-local parts; the backend has no slot for them.
        ContentPart::Reasoning(_) | ContentPart::Source { .. } | ContentPart::File { .. } => None,
    }
}

fn normalize_user_part(part: &ContentPart) -> Option<NormalizedPart> {
    match part {
        ContentPart::Text(text) => Some(NormalizedPart::Text { text: text.clone() }),
        ContentPart::Image { url } => Some(NormalizedPart::Image { image: url.clone() }),
        other => {
            tracing::debug!(part = part_kind(other), "skipping unsupported user part");
            None
        }
    }
}

fn part_kind(part: &ContentPart) -> &'static str {
    match part {
        ContentPart::Text(_) => "text",
        ContentPart::Reasoning(_) => "reasoning",
        ContentPart::ToolCall(_) => "tool-call",
        ContentPart::Source { .. } => "source",
        ContentPart::File { .. } => "file",
        ContentPart::Image { .. } => "image",
    }
}
