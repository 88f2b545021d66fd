//! Historian interface
//!
//! Append-only time series, one collection per (point, month).
//! Duplicate (point, time) inserts are a silent no-op; replaying a
//! cycle against the historian is idempotent.

use crate::error::EngineResult;
use async_trait::async_trait;
use chrono::{DateTime, Datelike, TimeZone, Utc};
use dashmap::DashMap;
use std::collections::BTreeMap;

/// Collection naming: `history_{pointId}_{YYYYMM}`
pub fn history_collection_name(point_id: &str, unix_seconds: i64) -> String {
    let t: DateTime<Utc> = Utc
        .timestamp_opt(unix_seconds, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
    format!("history_{point_id}_{:04}{:02}", t.year(), t.month())
}

#[async_trait]
pub trait Historian: Send + Sync {
    /// Append one record; duplicate (point, time) is success
    async fn append(&self, point_id: &str, value: &str, unix_seconds: i64) -> EngineResult<()>;
}

/// In-memory historian used by tests and default wiring
#[derive(Default)]
pub struct MemoryHistorian {
    collections: DashMap<String, BTreeMap<i64, String>>,
}

impl MemoryHistorian {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records in one (point, month) collection, time-ordered
    pub fn records(&self, point_id: &str, unix_seconds: i64) -> Vec<(i64, String)> {
        let name = history_collection_name(point_id, unix_seconds);
        self.collections
            .get(&name)
            .map(|c| c.iter().map(|(t, v)| (*t, v.clone())).collect())
            .unwrap_or_default()
    }

    pub fn total_records(&self) -> usize {
        self.collections.iter().map(|c| c.len()).sum()
    }
}

#[async_trait]
impl Historian for MemoryHistorian {
    async fn append(&self, point_id: &str, value: &str, unix_seconds: i64) -> EngineResult<()> {
        let name = history_collection_name(point_id, unix_seconds);
        let mut collection = self.collections.entry(name).or_default();
        // unique index on time; the first record wins
        collection.entry(unix_seconds).or_insert_with(|| value.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collection_names_partition_by_month() {
        // 2024-01-15 and 2024-02-01
        assert_eq!(
            history_collection_name("p1", 1_705_315_200),
            "history_p1_202401"
        );
        assert_eq!(
            history_collection_name("p1", 1_706_745_600),
            "history_p1_202402"
        );
    }

    #[tokio::test]
    async fn duplicate_append_is_noop() {
        let h = MemoryHistorian::new();
        h.append("p1", "10", 100).await.unwrap();
        h.append("p1", "99", 100).await.unwrap();
        let records = h.records("p1", 100);
        assert_eq!(records, vec![(100, "10".to_string())]);
    }
}
