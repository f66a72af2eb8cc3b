//! Domain identifiers (strongly-typed IDs).
//!
//! # ULID ベースの相関 ID
//! タスクの相関 ID には ULID (Universally Unique Lexicographically Sortable Identifier) を使います。
//! 先頭 48-bit がミリ秒タイムスタンプ、残り 80-bit がランダムなので、
//! 同時に大量の submit があっても衝突しません。
//!
//! ## Phantom Type パターン
//! `Id<T>` というジェネリック型で共通実装を提供しつつ、
//! `T` は実行時には使わない（PhantomData）マーカー型として、
//! コンパイル時の型安全性を提供します。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;
use ulid::Ulid;

/// IdMarker は各 ID 型のマーカー trait
///
/// Display で使うプレフィックス（"task-" など）を提供します。
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

/// ジェネリック ID 型
///
/// Display / FromStr は `{prefix}{ulid}` 形式で往復します。
/// ワイヤーメッセージの `id` フィールドはこの文字列表現です。
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

/// ID 文字列のパースエラー
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid id {input:?}: {reason}")]
pub struct ParseIdError {
    pub input: String,
    pub reason: String,
}

impl<T: IdMarker> FromStr for Id<T> {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix(T::prefix()).ok_or_else(|| ParseIdError {
            input: s.to_string(),
            reason: format!("missing prefix {:?}", T::prefix()),
        })?;
        let ulid = Ulid::from_string(raw).map_err(|e| ParseIdError {
            input: s.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self::from_ulid(ulid))
    }
}

// ========================================
// マーカー型の定義
// ========================================

/// Task のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Task {}

impl IdMarker for Task {
    fn prefix() -> &'static str {
        "task-"
    }
}

/// Correlation identifier of a submitted task.
pub type TaskId = Id<Task>;
