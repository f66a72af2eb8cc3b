//! App - アプリケーション層
//!
//! pool を組み立てて、呼び出し元向けの API を提供します。
//!
//! # 主要コンポーネント
//! - **RunnerBuilder**: 設定と Transform のワイヤリング
//! - **Runner**: single / batch / stream の Task API

pub mod builder;
pub mod runner;

pub use self::builder::{BuildError, RunnerBuilder};
pub use self::runner::{Request, Response, Runner};
