//! RunnerBuilder - Runner の構築とワイヤリング
//!
//! # Fail-fast 設計
//! - build() 時に設定を検証し、Transform が登録されているかをチェック
//! - 問題があれば BuildError を返す（ワーカーは 1 本も起動しない）

use std::sync::Arc;

use super::runner::Runner;
use crate::config::{ConfigError, PoolConfig};
use crate::domain::PoolError;
use crate::pool::WorkerPool;
use crate::ports::{IdGenerator, SystemClock, Transform, UlidGenerator};

/// # 使用例
/// ```ignore
/// let runner = Runner::builder()
///     .config(PoolConfig::from_env()?)
///     .transform(CompactTransform)
///     .build()
///     .await?;
/// ```
pub struct RunnerBuilder {
    config: PoolConfig,
    transform: Option<Arc<dyn Transform>>,
    ids: Option<Arc<dyn IdGenerator>>,
}

/// BuildError は Runner 構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("no transform registered; call RunnerBuilder::transform before build")]
    MissingTransform,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Pool(#[from] PoolError),
}

impl RunnerBuilder {
    pub fn new() -> Self {
        Self {
            config: PoolConfig::default(),
            transform: None,
            ids: None,
        }
    }

    pub fn config(mut self, config: PoolConfig) -> Self {
        self.config = config;
        self
    }

    pub fn transform<T: Transform>(mut self, transform: T) -> Self {
        self.transform = Some(Arc::new(transform));
        self
    }

    pub fn shared_transform(mut self, transform: Arc<dyn Transform>) -> Self {
        self.transform = Some(transform);
        self
    }

    /// Replaces the default `UlidGenerator<SystemClock>`.
    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    /// Validates, then starts the pool and waits for every worker to be ready.
    pub async fn build(self) -> Result<Runner, BuildError> {
        self.config.validate()?;
        let transform = self.transform.ok_or(BuildError::MissingTransform)?;
        let ids: Arc<dyn IdGenerator> = match self.ids {
            Some(ids) => ids,
            None => Arc::new(UlidGenerator::new(SystemClock)),
        };

        let pool = WorkerPool::start_with(&self.config, transform, ids).await?;
        Ok(Runner::new(pool))
    }
}

impl Default for RunnerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskId;
    use crate::testing::Upper;
    use std::time::Duration;
    use ulid::Ulid;

    /// Always hands out the same id.
    struct FixedIds(TaskId);

    impl IdGenerator for FixedIds {
        fn generate_task_id(&self) -> TaskId {
            self.0
        }
    }

    #[tokio::test]
    async fn build_without_transform_fails() {
        let result = RunnerBuilder::new().build().await;
        assert!(matches!(result, Err(BuildError::MissingTransform)));
    }

    #[tokio::test]
    async fn build_validates_config_first() {
        let result = RunnerBuilder::new()
            .config(PoolConfig::default().with_timeout(Duration::ZERO))
            .transform(Upper)
            .build()
            .await;
        assert!(matches!(result, Err(BuildError::Config(ConfigError::ZeroTimeout))));
    }

    #[tokio::test]
    async fn build_success() {
        let runner = RunnerBuilder::new()
            .config(PoolConfig::default().with_worker_count(1))
            .transform(Upper)
            .build()
            .await
            .unwrap();
        assert_eq!(runner.stats().workers, 1);
    }

    #[tokio::test]
    async fn colliding_ids_surface_as_duplicate_task_id() {
        let id = TaskId::from_ulid(Ulid::new());
        let runner = RunnerBuilder::new()
            .config(PoolConfig::default().with_worker_count(1))
            .transform(crate::testing::Stall(Duration::from_millis(50)))
            .id_generator(Arc::new(FixedIds(id)))
            .build()
            .await
            .unwrap();

        let mut health = runner.pool().subscribe_health();

        let first = runner.pool().submit("a".into(), None).unwrap();
        let second = runner.pool().submit("b".into(), None).unwrap_err();
        assert_eq!(second, PoolError::DuplicateTaskId(id));
        assert_eq!(health.try_recv(), Ok(PoolError::DuplicateTaskId(id)));
        assert_eq!(first.await, Ok("a".to_string()));
    }
}
