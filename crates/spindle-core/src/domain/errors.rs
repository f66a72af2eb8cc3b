//! Errors - プールレベルのエラー
//!
//! # 分類
//! - タスク単位の失敗（Application / Timeout / Terminated）は `TaskError` として outcome に載る
//! - ここにあるのはプールの健全性に関わるエラー。health チャネルに流し、握りつぶさない

use thiserror::Error;

use super::ids::TaskId;
use super::outcome::TaskError;

/// Pool-health error: escalated past the per-task boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    /// A worker's channel is gone; the worker is compromised.
    #[error("worker {worker} transport failure: {reason}")]
    Transport { worker: usize, reason: String },

    /// A message crossing the worker boundary could not be parsed.
    #[error("worker {worker} received a malformed message: {reason}")]
    MalformedMessage { worker: usize, reason: String },

    /// Two outstanding tasks share an id. Indicates a broken id generator.
    #[error("duplicate task id {0}")]
    DuplicateTaskId(TaskId),

    /// The worker is not in a state that accepts tasks.
    #[error("worker {worker} is not accepting tasks")]
    WorkerUnavailable { worker: usize },

    /// Could not spawn a worker thread.
    #[error("failed to spawn worker {worker}: {reason}")]
    Spawn { worker: usize, reason: String },

    #[error("worker pool has no live workers")]
    NoWorkers,

    #[error("worker pool terminated")]
    Terminated,
}

impl PoolError {
    /// The worker this error is about, if any.
    pub fn worker(&self) -> Option<usize> {
        match self {
            PoolError::Transport { worker, .. }
            | PoolError::MalformedMessage { worker, .. }
            | PoolError::WorkerUnavailable { worker }
            | PoolError::Spawn { worker, .. } => Some(*worker),
            PoolError::DuplicateTaskId(_) | PoolError::NoWorkers | PoolError::Terminated => None,
        }
    }

    /// Whether the worker named by this error must be retired.
    pub fn is_fatal_for_worker(&self) -> bool {
        matches!(
            self,
            PoolError::Transport { .. } | PoolError::MalformedMessage { .. }
        )
    }
}

/// Folds a pool error into the outcome of the one task it hit.
impl From<PoolError> for TaskError {
    fn from(e: PoolError) -> Self {
        match e {
            PoolError::Terminated => TaskError::Terminated,
            other => TaskError::Transport {
                reason: other.to_string(),
            },
        }
    }
}
