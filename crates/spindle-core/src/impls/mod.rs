//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **CompactTransform**: 同梱の Transform（空白・コメントを詰める）

pub mod compact;

pub use self::compact::{CompactOptions, CompactTransform};
