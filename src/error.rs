/// Error type for a single run of the streaming chat adapter.
///
/// Cancellation is represented here as a distinct terminal state rather than
/// a failure: it short-circuits the pipeline and triggers the `on_cancel`
/// callback, never `on_error`.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// The endpoint answered with a non-success status. Carries the status
    /// code and the raw body text so the caller can surface it verbatim.
    #[error("Transport error: status={status}, body={body}")]
    Transport { status: u16, body: String },
    /// The connection itself failed (DNS, TLS, connect, mid-body read).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    /// The response violated the wire contract in a way that prevented any
    /// progress (e.g. the body ended before a single event was decoded).
    #[error("Protocol error: {0}")]
    Protocol(String),
    /// A tool handler marked fatal faulted while producing its result.
    #[error("Tool handler error: tool={name}, message={message}")]
    ToolHandler { name: String, message: String },
    /// The run was cancelled before completion.
    #[error("Run cancelled")]
    Cancelled,
}

/// Broad error category, used for logging and for callers that branch on
/// failure class rather than on the concrete error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Transport,
    Protocol,
    ToolHandler,
    Cancelled,
}

impl RunError {
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            RunError::Transport { .. } | RunError::Http(_) => ErrorCategory::Transport,
            RunError::Protocol(_) => ErrorCategory::Protocol,
            RunError::ToolHandler { .. } => ErrorCategory::ToolHandler,
            RunError::Cancelled => ErrorCategory::Cancelled,
        }
    }

    /// Whether this terminal state should be reported through `on_error`.
    /// Cancellation is the one state that must not be.
    #[must_use]
    pub fn is_reportable(&self) -> bool {
        !matches!(self, RunError::Cancelled)
    }
}

/// Error produced by a registered tool handler.
///
/// Non-fatal handler faults are converted to in-band error-result events;
/// only handlers that opt into fatality abort the run.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct ToolError {
    pub message: String,
}

impl ToolError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
