//! IdGenerator port - 相関 ID 生成の抽象化
//!
//! submit のたびに新しい TaskId を作ります。
//! テスト容易性のために、trait として抽象化しています。
//!
//! # 実装
//! - **UlidGenerator**: ULID ベース（本番用）

use crate::domain::ids::TaskId;
use crate::ports::Clock;
use ulid::Ulid;

/// IdGenerator は衝突しない TaskId を生成
///
/// # Thread Safety
/// - `Send + Sync` を要求（複数の submit から同時に呼ばれる）
pub trait IdGenerator: Send + Sync {
    fn generate_task_id(&self) -> TaskId;
}

/// UlidGenerator は ULID ベースの ID 生成器
///
/// Clock の時刻を timestamp 部に、`rand` の 80-bit をランダム部に使います。
/// FixedClock を使っても、ランダム部があるので ID は衝突しません。
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_task_id(&self) -> TaskId {
        let timestamp_ms = self.clock.now().timestamp_millis() as u64;
        let ulid = Ulid::from_parts(timestamp_ms, rand::random());
        TaskId::from(ulid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{FixedClock, SystemClock};
    use chrono::{TimeZone, Utc};
    use std::collections::HashSet;

    #[test]
    fn ulid_generator_generates_unique_ids() {
        let id_gen = UlidGenerator::new(SystemClock);
        let ids: HashSet<TaskId> = (0..1000).map(|_| id_gen.generate_task_id()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn ulid_generator_with_fixed_clock_shares_timestamp() {
        let fixed_time = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let id_gen = UlidGenerator::new(FixedClock::new(fixed_time));

        let id1 = id_gen.generate_task_id();
        let id2 = id_gen.generate_task_id();

        // ランダム部分があるので ID は異なる
        assert_ne!(id1, id2);

        // timestamp 部分は同じ
        assert_eq!(id1.as_ulid().timestamp_ms(), fixed_time.timestamp_millis() as u64);
        assert_eq!(id2.as_ulid().timestamp_ms(), fixed_time.timestamp_millis() as u64);
    }
}
