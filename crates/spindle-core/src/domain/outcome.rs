//! Outcome model: what a caller gets back for one task.
//!
//! Every submitted task settles to exactly one `Outcome`:
//! the transform's output, or a `TaskError` saying why there is none.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Structured error shape carried over the wire by failure result messages.
///
/// `{ "name": "...", "message": "...", "stack": "..."? }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedError {
    pub name: String,
    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl SerializedError {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            stack: None,
        }
    }

    /// Fallback shape for errors that carry nothing structured.
    pub fn generic(message: impl Into<String>) -> Self {
        Self::new("Error", message)
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    /// Encodes to the JSON string used in `{ id, error }` messages.
    ///
    /// Serializing three strings cannot fail, but if it ever did we still
    /// produce a valid error document rather than losing the reply.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"name":"Error","message":"unserializable error"}"#.to_string()
        })
    }

    /// Decodes the `error` field of a failure message.
    /// Anything that is not a structured error becomes a generic one.
    pub fn from_json_lossy(raw: &str) -> Self {
        serde_json::from_str(raw).unwrap_or_else(|_| Self::generic(raw))
    }
}

impl fmt::Display for SerializedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

/// Per-task failure. Never affects any other task.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskError {
    /// The transform rejected the input.
    #[error("{0}")]
    Application(SerializedError),

    /// No result arrived within the pool's timeout.
    #[error("the task timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },

    /// The pool was terminated while the task was outstanding.
    #[error("worker pool terminated")]
    Terminated,

    /// The task could not be delivered, or its worker was retired.
    #[error("transport failure: {reason}")]
    Transport { reason: String },
}

impl TaskError {
    pub fn is_application(&self) -> bool {
        matches!(self, TaskError::Application(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, TaskError::Timeout { .. })
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self, TaskError::Terminated)
    }
}

/// `{ output }` or `{ error }`.
pub type Outcome = Result<String, TaskError>;
