//! Task model: a unit of transformation work.

use serde::{Deserialize, Serialize};

use super::ids::TaskId;
use super::state::TaskState;

/// Opaque input for the transform.
///
/// The dispatcher only copies it into a wire message; it never looks inside.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    pub code: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<serde_json::Value>,
}

impl Payload {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            options: None,
        }
    }

    pub fn with_options(mut self, options: serde_json::Value) -> Self {
        self.options = Some(options);
        self
    }
}

impl From<&str> for Payload {
    fn from(code: &str) -> Self {
        Self::new(code)
    }
}

impl From<String> for Payload {
    fn from(code: String) -> Self {
        Self::new(code)
    }
}

/// A submitted task.
///
/// `name` は batch の結果を呼び出し元のキーに戻すためだけに使う（ルーティングには使わない）。
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub id: TaskId,
    pub name: String,
    pub payload: Payload,
    pub state: TaskState,
}

impl Task {
    /// Creates a pending task. A missing name defaults to the id's string form.
    pub fn new(id: TaskId, name: Option<String>, payload: Payload) -> Self {
        Self {
            id,
            name: name.unwrap_or_else(|| id.to_string()),
            payload,
            state: TaskState::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[test]
    fn name_defaults_to_id() {
        let id = TaskId::from_ulid(Ulid::new());
        let task = Task::new(id, None, Payload::new("x"));
        assert_eq!(task.name, id.to_string());
        assert_eq!(task.state, TaskState::Pending);
    }

    #[test]
    fn explicit_name_is_kept() {
        let id = TaskId::from_ulid(Ulid::new());
        let task = Task::new(id, Some("first".to_string()), Payload::new("x"));
        assert_eq!(task.name, "first");
    }

    #[test]
    fn payload_without_options_omits_field() {
        let v = serde_json::to_value(Payload::new("a")).unwrap();
        assert_eq!(v, serde_json::json!({ "code": "a" }));
    }
}
