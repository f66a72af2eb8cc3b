//! spindle-core
//!
//! Core building blocks for the Spindle worker pool: CPU-bound source
//! transforms fanned out over a fixed set of worker threads.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, task, envelope, outcome, state, errors）
//! - **ports**: 抽象化レイヤー（Transform, IdGenerator, Clock）
//! - **pool**: ワーカースレッド、registry、dispatcher
//! - **app**: Runner と RunnerBuilder（呼び出し元向け API）
//! - **impls**: 実装（CompactTransform）
//! - **config**: PoolConfig と環境変数の読み込み

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod pool;
pub mod ports;

#[cfg(test)]
mod testing;

pub use app::{BuildError, Request, Response, Runner, RunnerBuilder};
pub use config::{ConfigError, PoolConfig};
pub use domain::{Outcome, Payload, PoolError, SerializedError, TaskError, TaskId};
pub use impls::CompactTransform;
pub use pool::{PoolStats, TaskHandle, WorkerPool};
pub use ports::{Transform, TransformError};
