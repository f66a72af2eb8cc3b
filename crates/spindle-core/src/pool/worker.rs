//! WorkerHandle - 1 本の常駐ワーカースレッドを包む
//!
//! # 構成
//! - inbox: dispatcher → ワーカー（`mpsc::UnboundedSender<String>`、シリアライズ済みタスク）
//! - events: 全ワーカー → dispatcher（1 本にマージされた `WorkerEvent` チャネル）
//!
//! 変換関数は CPU バウンドで同期なので、tokio のタスクではなく OS スレッドで動かします。
//! スレッド側は `blocking_recv` で inbox を待ちます。

use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::body::{self, Reply};
use crate::domain::{PoolError, WorkerState};
use crate::ports::Transform;

/// Events flowing from worker threads to the dispatcher's collector.
#[derive(Debug)]
pub(crate) enum WorkerEvent {
    Ready { worker: usize },
    Reply { worker: usize, raw: String },
    Fatal { worker: usize, error: PoolError },
    /// `previous` is the state the thread found when it stopped.
    /// `Ready` means nobody asked it to stop.
    Exited { worker: usize, previous: WorkerState },
}

pub(crate) struct WorkerHandle {
    index: usize,
    state: Arc<Mutex<WorkerState>>,
    inbox: Mutex<Option<mpsc::UnboundedSender<String>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerHandle {
    pub(crate) fn new(index: usize) -> Self {
        Self {
            index,
            state: Arc::new(Mutex::new(WorkerState::Starting)),
            inbox: Mutex::new(None),
            thread: Mutex::new(None),
        }
    }

    pub(crate) fn index(&self) -> usize {
        self.index
    }

    pub(crate) fn state(&self) -> WorkerState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Spawns the worker thread. Calling it again is a no-op.
    ///
    /// The thread flips the state to Ready and emits `WorkerEvent::Ready`
    /// once it is listening.
    pub(crate) fn start(
        &self,
        transform: Arc<dyn Transform>,
        events: mpsc::UnboundedSender<WorkerEvent>,
    ) -> Result<(), PoolError> {
        let mut thread = self.thread.lock().unwrap_or_else(PoisonError::into_inner);
        if thread.is_some() {
            return Ok(());
        }

        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let index = self.index;
        let state = Arc::clone(&self.state);

        let join = thread::Builder::new()
            .name(format!("spindle-worker-{index}"))
            .spawn(move || run_worker(index, transform, inbox_rx, events, state))
            .map_err(|e| PoolError::Spawn {
                worker: index,
                reason: e.to_string(),
            })?;

        *self.inbox.lock().unwrap_or_else(PoisonError::into_inner) = Some(inbox_tx);
        *thread = Some(join);
        Ok(())
    }

    /// Hands one serialized task message to the thread. Never waits for the result.
    pub(crate) fn send(&self, message: String) -> Result<(), PoolError> {
        if !self.state().accepts_tasks() {
            return Err(PoolError::WorkerUnavailable { worker: self.index });
        }

        let inbox = self.inbox.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(tx) = inbox.as_ref() else {
            return Err(PoolError::Transport {
                worker: self.index,
                reason: "inbox is closed".to_string(),
            });
        };
        tx.send(message).map_err(|_| PoolError::Transport {
            worker: self.index,
            reason: "worker thread is gone".to_string(),
        })
    }

    /// Pool shutdown: stop accepting tasks and close the inbox.
    /// The thread exits after the transform it is running, if any.
    pub(crate) fn close(&self) {
        self.transition(WorkerState::Terminating);
        self.inbox
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    /// Takes a compromised worker out of rotation for good.
    pub(crate) fn retire(&self) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = WorkerState::Terminated;
        self.inbox
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    pub(crate) fn take_thread(&self) -> Option<JoinHandle<()>> {
        self.thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn transition(&self, next: WorkerState) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state != WorkerState::Terminated {
            *state = next;
        }
    }
}

/// Sends `Exited` even if the thread unwinds.
struct ExitGuard {
    worker: usize,
    state: Arc<Mutex<WorkerState>>,
    events: mpsc::UnboundedSender<WorkerEvent>,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        let previous = std::mem::replace(
            &mut *self.state.lock().unwrap_or_else(PoisonError::into_inner),
            WorkerState::Terminated,
        );
        let _ = self.events.send(WorkerEvent::Exited {
            worker: self.worker,
            previous,
        });
    }
}

fn run_worker(
    worker: usize,
    transform: Arc<dyn Transform>,
    mut inbox: mpsc::UnboundedReceiver<String>,
    events: mpsc::UnboundedSender<WorkerEvent>,
    state: Arc<Mutex<WorkerState>>,
) {
    let _guard = ExitGuard {
        worker,
        state: Arc::clone(&state),
        events: events.clone(),
    };

    {
        // close() が先に来ていたら Ready にしない
        let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state == WorkerState::Starting {
            *state = WorkerState::Ready;
        }
    }
    if events.send(WorkerEvent::Ready { worker }).is_err() {
        return;
    }
    debug!(worker, "worker ready");

    while let Some(raw) = inbox.blocking_recv() {
        let event = match body::handle_message(transform.as_ref(), &raw) {
            Reply::Result(raw) => WorkerEvent::Reply { worker, raw },
            Reply::Fatal(reason) => {
                warn!(worker, %reason, "worker received a message it cannot answer");
                WorkerEvent::Fatal {
                    worker,
                    error: PoolError::MalformedMessage { worker, reason },
                }
            }
        };

        // dispatcher がいなくなったら終了
        if events.send(event).is_err() {
            break;
        }
    }

    debug!(worker, "worker stopped");
}
