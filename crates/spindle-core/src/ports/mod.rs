//! Ports - 抽象化レイヤー
//!
//! dispatcher が外部に依存する部分（時刻、ID 生成、変換関数）を trait で切り出します。
//! 実装の差し替え（テスト用の固定時刻、スタブ変換など）はここで行います。

pub mod clock;
pub mod id_generator;
pub mod transform;

// 主要な trait を再エクスポート
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::transform::{Transform, TransformError};
