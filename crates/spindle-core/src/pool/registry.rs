//! TaskRegistry - 相関 ID から待機中の呼び出し元への対応表
//!
//! # 学習ポイント
//! - `Mutex<HashMap<..>>` を唯一の共有状態にし、変更の入口を
//!   register / mark_dispatched / resolve / expire / cancel_all / fail_worker に限定する
//! - 結果到着とタイムアウトの競合は「先に remove した方が勝ち」
//!   （エントリがなければ何もしない）
//! - ロック中に await しない。oneshot への送信もロックを外してから行う

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::domain::{Outcome, PoolError, TaskError, TaskId, TaskState};

struct Entry {
    name: String,
    state: TaskState,
    worker: Option<usize>,
    timeout: Duration,
    reply: oneshot::Sender<Outcome>,
    timer: JoinHandle<()>,
}

impl Entry {
    /// Terminal transition: stop the timer and hand the outcome to the caller.
    fn settle(self, id: TaskId, state: TaskState, outcome: Outcome) {
        self.timer.abort();
        debug!(task_id = %id, name = %self.name, ?state, ok = outcome.is_ok(), "task settled");
        // 呼び出し元が handle を捨てていても構わない
        let _ = self.reply.send(outcome);
    }
}

pub(crate) struct TaskRegistry {
    entries: Mutex<HashMap<TaskId, Entry>>,
    runtime: Handle,
}

impl TaskRegistry {
    pub(crate) fn new(runtime: Handle) -> Arc<Self> {
        Arc::new(Self {
            entries: Mutex::new(HashMap::new()),
            runtime,
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<TaskId, Entry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a pending task and starts its timeout clock.
    pub(crate) fn register(
        self: &Arc<Self>,
        id: TaskId,
        name: &str,
        timeout: Duration,
    ) -> Result<oneshot::Receiver<Outcome>, PoolError> {
        let mut entries = self.lock();
        if entries.contains_key(&id) {
            error!(task_id = %id, "duplicate task id");
            return Err(PoolError::DuplicateTaskId(id));
        }

        let (reply, rx) = oneshot::channel();

        // タイマーはロック保持中に spawn する。expire はこのロックが外れるまで進めないので、
        // エントリ挿入前に発火することはない
        let registry = Arc::downgrade(self);
        let timer = self.runtime.spawn(expire_after(registry, id, timeout));

        entries.insert(
            id,
            Entry {
                name: name.to_string(),
                state: TaskState::Pending,
                worker: None,
                timeout,
                reply,
                timer,
            },
        );
        Ok(rx)
    }

    /// Pending -> Dispatched. Returns false if the task already settled.
    pub(crate) fn mark_dispatched(&self, id: TaskId, worker: usize) -> bool {
        match self.lock().get_mut(&id) {
            Some(entry) => {
                entry.state = TaskState::Dispatched;
                entry.worker = Some(worker);
                true
            }
            None => false,
        }
    }

    /// Delivers a worker's result. A missing id (timed out, cancelled, or a
    /// duplicate reply) is a silent no-op and returns false.
    pub(crate) fn resolve(&self, id: TaskId, outcome: Outcome) -> bool {
        let Some(entry) = self.lock().remove(&id) else {
            return false;
        };
        entry.settle(id, TaskState::Completed, outcome);
        true
    }

    /// Timer path. Returns false if a result got there first.
    pub(crate) fn expire(&self, id: TaskId) -> bool {
        let Some(entry) = self.lock().remove(&id) else {
            return false;
        };
        let after_ms = u64::try_from(entry.timeout.as_millis()).unwrap_or(u64::MAX);
        entry.settle(id, TaskState::TimedOut, Err(TaskError::Timeout { after_ms }));
        true
    }

    /// Drains every entry, failing each with `reason`. Returns how many.
    pub(crate) fn cancel_all(&self, reason: TaskError) -> usize {
        let drained: Vec<(TaskId, Entry)> = self.lock().drain().collect();
        let count = drained.len();
        for (id, entry) in drained {
            entry.settle(id, TaskState::Cancelled, Err(reason.clone()));
        }
        count
    }

    /// Fails every task dispatched to `worker`. Returns how many.
    pub(crate) fn fail_worker(&self, worker: usize, reason: &str) -> usize {
        let failed: Vec<(TaskId, Entry)> = {
            let mut entries = self.lock();
            let ids: Vec<TaskId> = entries
                .iter()
                .filter(|(_, entry)| entry.worker == Some(worker))
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| entries.remove(&id).map(|entry| (id, entry)))
                .collect()
        };

        let count = failed.len();
        for (id, entry) in failed {
            entry.settle(
                id,
                TaskState::Cancelled,
                Err(TaskError::Transport {
                    reason: reason.to_string(),
                }),
            );
        }
        count
    }

    pub(crate) fn state(&self, id: TaskId) -> Option<TaskState> {
        self.lock().get(&id).map(|entry| entry.state)
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }
}

async fn expire_after(registry: Weak<TaskRegistry>, id: TaskId, timeout: Duration) {
    tokio::time::sleep(timeout).await;
    if let Some(registry) = registry.upgrade()
        && registry.expire(id)
    {
        debug!(task_id = %id, "task timed out");
    }
}
