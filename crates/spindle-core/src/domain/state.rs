//! State - タスクとワーカーの状態

use serde::{Deserialize, Serialize};

/// TaskState はタスクの状態を表現
///
/// # 状態遷移
/// - Pending -> Dispatched -> Completed
/// - Pending | Dispatched -> TimedOut（タイムアウトが先に発火）
/// - Pending | Dispatched -> Cancelled（プール終了 / ワーカー退役が先）
///
/// 終端状態に入った瞬間に registry のエントリは削除されます。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskState {
    /// Registered, not yet handed to a worker.
    Pending,

    /// Sent to a worker; waiting for its result message.
    Dispatched,

    /// A result arrived before anything else.
    Completed,

    /// The timer fired first. A late result is discarded.
    TimedOut,

    /// The pool was terminated or the worker was retired first.
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::TimedOut | TaskState::Cancelled
        )
    }
}

/// WorkerState はワーカー（実行コンテキスト）の状態
///
/// - Starting -> Ready: スレッドが readiness を通知
/// - Ready -> Terminating: プール終了
/// - Terminating | Ready -> Terminated: スレッド終了、または致命的エラーで退役
///
/// タスクを送れるのは Ready のときだけ。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkerState {
    Starting,
    Ready,
    Terminating,
    Terminated,
}

impl WorkerState {
    pub fn accepts_tasks(self) -> bool {
        matches!(self, WorkerState::Ready)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_settled_states_are_terminal() {
        assert!(!TaskState::Pending.is_terminal());
        assert!(!TaskState::Dispatched.is_terminal());
        assert!(TaskState::Completed.is_terminal());
        assert!(TaskState::TimedOut.is_terminal());
        assert!(TaskState::Cancelled.is_terminal());
    }

    #[test]
    fn only_ready_workers_accept_tasks() {
        assert!(WorkerState::Ready.accepts_tasks());
        assert!(!WorkerState::Starting.accepts_tasks());
        assert!(!WorkerState::Terminating.accepts_tasks());
        assert!(!WorkerState::Terminated.accepts_tasks());
    }
}
