//! Transform port - ワーカー内で実行される変換関数
//!
//! dispatcher から見ると不透明な同期関数です。
//! 入力テキストとオプションを受け取り、出力テキストか構造化エラーを返します。
//! 各ワーカースレッドから同時に呼ばれるので `Send + Sync` を要求します。

use serde_json::Value;

use crate::domain::SerializedError;

/// Failure reported by a transform.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{name}: {message}")]
pub struct TransformError {
    pub name: String,
    pub message: String,
    pub stack: Option<String>,
}

impl TransformError {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            stack: None,
        }
    }

    pub fn syntax(message: impl Into<String>) -> Self {
        Self::new("SyntaxError", message)
    }

    pub fn invalid_options(message: impl Into<String>) -> Self {
        Self::new("TypeError", message)
    }
}

impl From<TransformError> for SerializedError {
    fn from(e: TransformError) -> Self {
        SerializedError {
            name: e.name,
            message: e.message,
            stack: e.stack,
        }
    }
}

/// Transform は 1 タスク分の変換を行う
///
/// # 使用例
/// ```ignore
/// struct Upper;
///
/// impl Transform for Upper {
///     fn transform(&self, input: &str, _options: &Value) -> Result<String, TransformError> {
///         Ok(input.to_uppercase())
///     }
/// }
/// ```
pub trait Transform: Send + Sync + 'static {
    /// Options used when a task message carries none.
    fn default_options(&self) -> Value {
        Value::Null
    }

    fn transform(&self, input: &str, options: &Value) -> Result<String, TransformError>;
}
