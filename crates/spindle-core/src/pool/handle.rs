//! TaskHandle - submit が返す「いつか 1 回だけ確定する結果」

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::domain::{Outcome, TaskError, TaskId};

/// Resolves exactly once to the task's outcome.
///
/// Dropping the handle does not cancel the task; its result is discarded.
#[derive(Debug)]
pub struct TaskHandle {
    id: TaskId,
    name: String,
    worker: usize,
    rx: oneshot::Receiver<Outcome>,
}

impl TaskHandle {
    pub(crate) fn new(id: TaskId, name: String, worker: usize, rx: oneshot::Receiver<Outcome>) -> Self {
        Self {
            id,
            name,
            worker,
            rx,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Index of the worker the task was sent to.
    pub fn worker(&self) -> usize {
        self.worker
    }
}

impl Future for TaskHandle {
    type Output = Outcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // registry は必ず送信してからエントリを捨てる。送信側が消えたのは
        // ランタイムごと落ちたときだけなので、終了扱いにする
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(TaskError::Terminated)))
    }
}
