//! Pool - ワーカープールと dispatcher
//!
//! # 構成
//! - **worker**: 常駐ワーカースレッドのハンドル
//! - **body**: ワーカー内で 1 メッセージを処理するロジック
//! - **registry**: 相関 ID → 待機中の呼び出し元
//! - **handle**: submit が返す Future
//! - **dispatcher**: WorkerPool 本体（ラウンドロビン、collector、terminate）

mod body;
mod dispatcher;
mod handle;
mod registry;
mod worker;

pub use self::dispatcher::{PoolStats, WorkerPool};
pub use self::handle::TaskHandle;
