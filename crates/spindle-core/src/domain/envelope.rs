//! Envelope - dispatcher とワーカーの間を流れるワイヤーメッセージ
//!
//! 形式は JSON テキスト:
//! - Task:    `{ "id": string, "payload": string, "options"?: object }`
//! - Success: `{ "id": string, "output": string }`
//! - Failure: `{ "id": string, "error": string }`（error は `SerializedError` の JSON）

use serde::{Deserialize, Serialize};

use super::outcome::{Outcome, SerializedError, TaskError};

/// Task message sent from the dispatcher to one worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMessage {
    pub id: String,
    pub payload: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<serde_json::Value>,
}

impl TaskMessage {
    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn decode(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }
}

/// Pulls the correlation id out of a message that failed to decode as a
/// whole, so the sender can still be told which task broke.
pub fn recover_id(raw: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(raw).ok()?;
    value.get("id")?.as_str().map(str::to_string)
}

/// Result message emitted by a worker, exactly one per task message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResultMessage {
    Success { id: String, output: String },
    Failure { id: String, error: String },
}

impl ResultMessage {
    pub fn success(id: impl Into<String>, output: impl Into<String>) -> Self {
        ResultMessage::Success {
            id: id.into(),
            output: output.into(),
        }
    }

    pub fn failure(id: impl Into<String>, error: &SerializedError) -> Self {
        ResultMessage::Failure {
            id: id.into(),
            error: error.to_json(),
        }
    }

    pub fn id(&self) -> &str {
        match self {
            ResultMessage::Success { id, .. } | ResultMessage::Failure { id, .. } => id,
        }
    }

    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn decode(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }

    pub fn into_outcome(self) -> Outcome {
        match self {
            ResultMessage::Success { output, .. } => Ok(output),
            ResultMessage::Failure { error, .. } => Err(TaskError::Application(
                SerializedError::from_json_lossy(&error),
            )),
        }
    }
}
