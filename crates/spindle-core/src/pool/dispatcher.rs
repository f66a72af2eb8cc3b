//! WorkerPool - ワーカー群を所有し、タスクを配る dispatcher
//!
//! # フロー
//! 1. submit: ID 生成 → registry 登録（タイムアウト開始）→ ラウンドロビンでワーカー選択 → 送信
//! 2. collector: 全ワーカーの結果をマージしたチャネルを 1 本のタスクで読み、registry を解決
//! 3. terminate: 受付停止 → 全ワーカーの inbox を閉じる → registry を cancel_all
//!
//! # 共有状態
//! - `cursor`: AtomicUsize。選択と前進は 1 回の fetch_update で行う
//! - `registry`: Mutex<HashMap>（registry.rs）
//! それ以外はワーカーとメッセージでしかやりとりしない。

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use super::handle::TaskHandle;
use super::registry::TaskRegistry;
use super::worker::{WorkerEvent, WorkerHandle};
use crate::config::PoolConfig;
use crate::domain::{
    Payload, PoolError, ResultMessage, Task, TaskError, TaskId, TaskMessage, TaskState,
    WorkerState,
};
use crate::ports::{IdGenerator, SystemClock, Transform, UlidGenerator};

const HEALTH_CHANNEL_CAPACITY: usize = 64;

/// Point-in-time counters for observability.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    pub workers: usize,
    pub ready: usize,
    pub pending: usize,
}

pub struct WorkerPool {
    workers: Arc<Vec<WorkerHandle>>,
    cursor: AtomicUsize,
    registry: Arc<TaskRegistry>,
    ids: Arc<dyn IdGenerator>,
    timeout: Duration,
    terminated: AtomicBool,
    health: broadcast::Sender<PoolError>,
}

impl WorkerPool {
    /// Spawns the workers and waits until every one of them is ready.
    pub async fn start(config: &PoolConfig, transform: Arc<dyn Transform>) -> Result<Self, PoolError> {
        Self::start_with(config, transform, Arc::new(UlidGenerator::new(SystemClock))).await
    }

    pub async fn start_with(
        config: &PoolConfig,
        transform: Arc<dyn Transform>,
        ids: Arc<dyn IdGenerator>,
    ) -> Result<Self, PoolError> {
        let count = config.resolved_worker_count();
        if count == 0 {
            return Err(PoolError::NoWorkers);
        }

        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let workers: Vec<WorkerHandle> = (0..count).map(WorkerHandle::new).collect();

        for worker in &workers {
            if let Err(e) = worker.start(Arc::clone(&transform), events_tx.clone()) {
                workers.iter().for_each(WorkerHandle::close);
                return Err(e);
            }
        }
        // 以降、events の送信側はワーカースレッドだけが持つ
        drop(events_tx);

        let mut ready = 0;
        while ready < count {
            match events_rx.recv().await {
                Some(WorkerEvent::Ready { worker }) => {
                    debug!(worker, "worker signalled readiness");
                    ready += 1;
                }
                Some(other) => {
                    workers.iter().for_each(WorkerHandle::close);
                    return Err(PoolError::Transport {
                        worker: event_worker(&other),
                        reason: format!("unexpected event during startup: {other:?}"),
                    });
                }
                None => {
                    workers.iter().for_each(WorkerHandle::close);
                    return Err(PoolError::Transport {
                        worker: ready,
                        reason: "workers exited during startup".to_string(),
                    });
                }
            }
        }

        let workers = Arc::new(workers);
        let registry = TaskRegistry::new(Handle::current());
        let (health, _) = broadcast::channel(HEALTH_CHANNEL_CAPACITY);

        tokio::spawn(collect(
            events_rx,
            Arc::clone(&workers),
            Arc::clone(&registry),
            health.clone(),
        ));

        info!(workers = count, timeout_ms = config.timeout_ms, "worker pool started");

        Ok(Self {
            workers,
            cursor: AtomicUsize::new(0),
            registry,
            ids,
            timeout: config.timeout(),
            terminated: AtomicBool::new(false),
            health,
        })
    }

    /// Submits one task. The returned handle settles exactly once: with the
    /// worker's result, a timeout, or a termination/transport failure.
    pub fn submit(&self, payload: Payload, name: Option<String>) -> Result<TaskHandle, PoolError> {
        if self.is_terminated() {
            return Err(PoolError::Terminated);
        }

        let id = self.ids.generate_task_id();
        let task = Task::new(id, name, payload);
        let rx = self
            .registry
            .register(id, &task.name, self.timeout)
            .inspect_err(|e| escalate(&self.workers, &self.registry, &self.health, e.clone()))?;

        // register と terminate が競合した場合、cancel_all の後に登録されたエントリをここで片付ける
        if self.is_terminated() {
            self.registry.resolve(id, Err(TaskError::Terminated));
            return Err(PoolError::Terminated);
        }

        let Some(worker) = self.next_worker() else {
            self.registry.resolve(id, Err(TaskError::from(PoolError::NoWorkers)));
            return Err(PoolError::NoWorkers);
        };

        let handle = TaskHandle::new(id, task.name.clone(), worker, rx);
        self.dispatch(task, worker);
        Ok(handle)
    }

    fn dispatch(&self, task: Task, worker: usize) {
        let id = task.id;
        let message = TaskMessage {
            id: id.to_string(),
            payload: task.payload.code,
            options: task.payload.options,
        };
        let raw = match message.encode() {
            Ok(raw) => raw,
            Err(e) => {
                self.registry.resolve(
                    id,
                    Err(TaskError::Transport {
                        reason: format!("could not encode task message: {e}"),
                    }),
                );
                return;
            }
        };

        self.registry.mark_dispatched(id, worker);
        debug!(task_id = %id, name = %task.name, worker, "dispatching task");

        if let Err(e) = self.workers[worker].send(raw) {
            self.registry.resolve(id, Err(TaskError::from(e.clone())));
            // 停止中の WorkerUnavailable は通常のシャットダウンの一部
            if e.is_fatal_for_worker() && !self.is_terminated() {
                escalate(&self.workers, &self.registry, &self.health, e);
            } else {
                debug!(task_id = %id, worker, error = %e, "task not delivered");
            }
        }
    }

    /// Round-robin over live workers. With every worker healthy this is
    /// exactly `cursor, cursor + 1, ...` modulo the pool size.
    fn next_worker(&self) -> Option<usize> {
        let len = self.workers.len();
        for _ in 0..len {
            let index = self
                .cursor
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| Some((c + 1) % len))
                .unwrap_or_else(|current| current);
            if self.workers[index].state().accepts_tasks() {
                return Some(index);
            }
        }
        None
    }

    /// Stops accepting work, closes every worker and settles every
    /// outstanding task with `TaskError::Terminated`. Safe to call repeatedly.
    pub fn terminate(&self) {
        if self.terminated.swap(true, Ordering::AcqRel) {
            return;
        }
        self.workers.iter().for_each(WorkerHandle::close);
        let cancelled = self.registry.cancel_all(TaskError::Terminated);
        info!(cancelled, "worker pool terminated");
    }

    /// `terminate`, then wait for every worker thread to finish its current transform.
    pub async fn shutdown_and_join(self) {
        self.terminate();
        let threads: Vec<_> = self.workers.iter().filter_map(WorkerHandle::take_thread).collect();
        let joined = tokio::task::spawn_blocking(move || {
            for thread in threads {
                // ワーカー内の panic は body で捕まえているので、ここでは無視してよい
                let _ = thread.join();
            }
        })
        .await;
        if let Err(e) = joined {
            warn!(error = %e, "joining worker threads failed");
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    /// Pool-health errors (transport failures, malformed messages).
    pub fn subscribe_health(&self) -> broadcast::Receiver<PoolError> {
        self.health.subscribe()
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn worker_states(&self) -> Vec<WorkerState> {
        self.workers.iter().map(WorkerHandle::state).collect()
    }

    pub fn task_state(&self, id: TaskId) -> Option<TaskState> {
        self.registry.state(id)
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            workers: self.workers.len(),
            ready: self
                .workers
                .iter()
                .filter(|w| w.state().accepts_tasks())
                .count(),
            pending: self.registry.len(),
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.terminate();
    }
}

fn event_worker(event: &WorkerEvent) -> usize {
    match event {
        WorkerEvent::Ready { worker }
        | WorkerEvent::Reply { worker, .. }
        | WorkerEvent::Fatal { worker, .. }
        | WorkerEvent::Exited { worker, .. } => *worker,
    }
}

/// Pool-level error path: log, retire the worker if it is compromised,
/// fail its in-flight tasks and tell any supervisor.
fn escalate(
    workers: &[WorkerHandle],
    registry: &TaskRegistry,
    health: &broadcast::Sender<PoolError>,
    error: PoolError,
) {
    error!(%error, "worker pool health error");
    if error.is_fatal_for_worker()
        && let Some(index) = error.worker()
        && let Some(worker) = workers.get(index)
    {
        worker.retire();
        let failed = registry.fail_worker(index, &error.to_string());
        warn!(worker = worker.index(), failed, "worker retired");
    }
    // 購読者がいなくても構わない
    let _ = health.send(error);
}

/// The single subscriber of every worker's result stream.
async fn collect(
    mut events: mpsc::UnboundedReceiver<WorkerEvent>,
    workers: Arc<Vec<WorkerHandle>>,
    registry: Arc<TaskRegistry>,
    health: broadcast::Sender<PoolError>,
) {
    while let Some(event) = events.recv().await {
        match event {
            WorkerEvent::Reply { worker, raw } => {
                let message = match ResultMessage::decode(&raw) {
                    Ok(message) => message,
                    Err(e) => {
                        escalate(
                            &workers,
                            &registry,
                            &health,
                            PoolError::MalformedMessage {
                                worker,
                                reason: format!("unparseable result message: {e}"),
                            },
                        );
                        continue;
                    }
                };

                let id: TaskId = match message.id().parse() {
                    Ok(id) => id,
                    Err(e) => {
                        escalate(
                            &workers,
                            &registry,
                            &health,
                            PoolError::MalformedMessage {
                                worker,
                                reason: e.to_string(),
                            },
                        );
                        continue;
                    }
                };

                if !registry.resolve(id, message.into_outcome()) {
                    debug!(task_id = %id, worker, "discarding result for a settled task");
                }
            }
            WorkerEvent::Fatal { error, .. } => escalate(&workers, &registry, &health, error),
            WorkerEvent::Exited { worker, previous } => {
                // Ready のまま消えたスレッドは想定外の終了
                if previous == WorkerState::Ready {
                    escalate(
                        &workers,
                        &registry,
                        &health,
                        PoolError::Transport {
                            worker,
                            reason: "worker thread exited unexpectedly".to_string(),
                        },
                    );
                } else {
                    debug!(worker, "worker exited");
                }
            }
            WorkerEvent::Ready { worker } => debug!(worker, "late readiness signal ignored"),
        }
    }
    debug!("all workers gone; collector stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{KillThread, Stall, ThreadName, Upper};
    use rstest::rstest;
    use std::collections::HashMap;
    use std::time::Instant;

    async fn pool(workers: usize, timeout: Duration, transform: impl Transform) -> WorkerPool {
        let config = PoolConfig::default()
            .with_worker_count(workers)
            .with_timeout(timeout);
        WorkerPool::start(&config, Arc::new(transform)).await.unwrap()
    }

    #[tokio::test]
    async fn start_spawns_ready_workers() {
        let pool = pool(3, Duration::from_secs(5), Upper).await;
        assert_eq!(pool.worker_count(), 3);
        assert_eq!(pool.worker_states(), vec![WorkerState::Ready; 3]);
        assert_eq!(
            pool.stats(),
            PoolStats {
                workers: 3,
                ready: 3,
                pending: 0
            }
        );
    }

    #[tokio::test]
    async fn zero_workers_is_rejected() {
        let config = PoolConfig::default().with_worker_count(0);
        let err = WorkerPool::start(&config, Arc::new(Upper)).await.err();
        assert_eq!(err, Some(PoolError::NoWorkers));
    }

    #[tokio::test]
    async fn submit_resolves_with_output() {
        let pool = pool(2, Duration::from_secs(5), Upper).await;
        let handle = pool.submit(Payload::new("abc"), None).unwrap();
        assert_eq!(handle.name(), handle.id().to_string());
        assert_eq!(handle.await, Ok("ABC".to_string()));
        assert_eq!(pool.stats().pending, 0);
    }

    #[rstest]
    #[case(1, 4)]
    #[case(3, 7)]
    #[case(4, 4)]
    #[tokio::test]
    async fn round_robin_assignment(#[case] workers: usize, #[case] tasks: usize) {
        let pool = pool(workers, Duration::from_secs(5), ThreadName).await;

        let handles: Vec<_> = (0..tasks)
            .map(|_| pool.submit(Payload::new(""), None).unwrap())
            .collect();

        for (i, handle) in handles.into_iter().enumerate() {
            assert_eq!(handle.worker(), i % workers);
            let expected = format!("spindle-worker-{}", i % workers);
            assert_eq!(handle.await.unwrap(), expected);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_submissions_spread_evenly() {
        const WORKERS: usize = 3;
        const TASKS: usize = 100;
        let pool = Arc::new(pool(WORKERS, Duration::from_secs(5), Upper).await);

        let submitters: Vec<_> = (0..TASKS)
            .map(|_| {
                let pool = Arc::clone(&pool);
                tokio::spawn(async move { pool.submit(Payload::new("x"), None).unwrap().worker() })
            })
            .collect();

        let mut per_worker: HashMap<usize, usize> = HashMap::new();
        for submitter in submitters {
            *per_worker.entry(submitter.await.unwrap()).or_default() += 1;
        }

        assert_eq!(per_worker.len(), WORKERS);
        for count in per_worker.values() {
            assert!(
                *count == TASKS / WORKERS || *count == TASKS / WORKERS + 1,
                "uneven distribution: {per_worker:?}"
            );
        }
    }

    #[tokio::test]
    async fn stalled_worker_times_out() {
        let pool = pool(1, Duration::from_millis(50), Stall(Duration::from_millis(400))).await;
        let started = Instant::now();
        let outcome = pool.submit(Payload::new("x"), None).unwrap().await;
        let elapsed = started.elapsed();

        assert_eq!(outcome, Err(TaskError::Timeout { after_ms: 50 }));
        assert!(elapsed >= Duration::from_millis(50), "too early: {elapsed:?}");
        assert!(elapsed < Duration::from_millis(300), "too late: {elapsed:?}");
    }

    #[tokio::test]
    async fn terminate_settles_outstanding_tasks() {
        let pool = pool(2, Duration::from_secs(5), Stall(Duration::from_millis(200))).await;
        let handles: Vec<_> = (0..5)
            .map(|_| pool.submit(Payload::new("x"), None).unwrap())
            .collect();

        pool.terminate();
        pool.terminate();

        for handle in handles {
            assert_eq!(handle.await, Err(TaskError::Terminated));
        }
        assert!(pool.is_terminated());
        assert_eq!(
            pool.submit(Payload::new("x"), None).err(),
            Some(PoolError::Terminated)
        );
    }

    #[tokio::test]
    async fn shutdown_waits_for_running_transforms() {
        let pool = pool(2, Duration::from_secs(5), Stall(Duration::from_millis(100))).await;
        let handle = pool.submit(Payload::new("x"), None).unwrap();

        let started = Instant::now();
        pool.shutdown_and_join().await;

        assert!(started.elapsed() >= Duration::from_millis(50));
        assert_eq!(handle.await, Err(TaskError::Terminated));
    }

    #[tokio::test]
    async fn malformed_message_retires_worker() {
        let pool = pool(2, Duration::from_secs(5), Upper).await;
        let mut health = pool.subscribe_health();

        // 壊れたメッセージの後ろに worker 0 宛てのタスクを積む
        pool.workers[0].send("big jug hot cheese".to_string()).unwrap();
        let in_flight = pool.submit(Payload::new("x"), None).unwrap();
        assert_eq!(in_flight.worker(), 0);

        let error = health.recv().await.unwrap();
        assert!(matches!(error, PoolError::MalformedMessage { worker: 0, .. }));
        assert!(matches!(in_flight.await, Err(TaskError::Transport { .. })));
        assert_eq!(pool.worker_states()[0], WorkerState::Terminated);

        // 以降は生きているワーカーだけに配られる
        for _ in 0..3 {
            let handle = pool.submit(Payload::new("y"), None).unwrap();
            assert_eq!(handle.worker(), 1);
            assert_eq!(handle.await, Ok("Y".to_string()));
        }
    }

    #[tokio::test]
    async fn dead_worker_thread_fails_its_tasks() {
        let pool = pool(2, Duration::from_secs(5), KillThread).await;
        let mut health = pool.subscribe_health();
        let started = Instant::now();

        let handle = pool.submit(Payload::new("x"), None).unwrap();
        assert_eq!(handle.worker(), 0);

        // タイムアウトを待たずに Transport で確定する
        assert!(matches!(handle.await, Err(TaskError::Transport { .. })));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(matches!(
            health.recv().await.unwrap(),
            PoolError::Transport { worker: 0, .. }
        ));
        assert_eq!(
            pool.worker_states(),
            vec![WorkerState::Terminated, WorkerState::Ready]
        );
    }

    #[tokio::test]
    async fn undeliverable_task_during_shutdown_is_not_a_health_error() {
        let pool = pool(1, Duration::from_secs(5), Upper).await;
        let mut health = pool.subscribe_health();
        pool.terminate();

        // terminate の直後に届いた submit と同じ状況を作る
        let task = Task::new(pool.ids.generate_task_id(), None, Payload::new("x"));
        let rx = pool
            .registry
            .register(task.id, &task.name, Duration::from_secs(5))
            .unwrap();
        pool.dispatch(task, 0);

        assert!(matches!(rx.await.unwrap(), Err(TaskError::Transport { .. })));
        assert!(matches!(health.try_recv(), Err(broadcast::error::TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn late_result_after_timeout_is_discarded() {
        let pool = pool(1, Duration::from_millis(20), Stall(Duration::from_millis(60))).await;
        let mut health = pool.subscribe_health();

        let first = pool.submit(Payload::new("slow"), None).unwrap();
        assert!(first.await.unwrap_err().is_timeout());

        // 遅れて届いた結果は黙って捨てられ、健全性エラーにもならない
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(pool.stats().pending, 0);
        assert!(matches!(health.try_recv(), Err(broadcast::error::TryRecvError::Empty)));
        assert_eq!(pool.worker_states(), vec![WorkerState::Ready]);
    }
}
