//! Output voting helpers
//!
//! Process-wide OR fan-in over digital target points. Several blocks
//! (alarms via their external entries, comparison memories) may steer
//! one target; the aggregator keeps the per-source contributions and
//! publishes the combined state through the dispatcher.
//!
//! - any-true: target reads "1" iff any source is asserted, else "0"
//! - any-false: target reads "0" iff any source is asserted, else "1"
//!   (inverted fan-in for fail-low outputs)

use crate::dispatch::WriteDispatcher;
use crate::error::EngineResult;
use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Default)]
pub struct VotingAggregators {
    any_true: Mutex<HashMap<String, HashMap<String, bool>>>,
    any_false: Mutex<HashMap<String, HashMap<String, bool>>>,
}

impl VotingAggregators {
    pub fn new() -> Self {
        Self::default()
    }

    fn combine(
        map: &Mutex<HashMap<String, HashMap<String, bool>>>,
        target_point_id: &str,
        source_id: &str,
        asserted: bool,
    ) -> bool {
        let mut map = map.lock();
        let sources = map.entry(target_point_id.to_string()).or_default();
        sources.insert(source_id.to_string(), asserted);
        sources.values().any(|v| *v)
    }

    /// Update one source of an any-true target and publish the result
    pub async fn assert_any_true(
        &self,
        dispatcher: &WriteDispatcher,
        target_point_id: &str,
        source_id: &str,
        asserted: bool,
    ) -> EngineResult<bool> {
        let any = Self::combine(&self.any_true, target_point_id, source_id, asserted);
        dispatcher
            .write_or_add(target_point_id, if any { "1" } else { "0" }, None, 0)
            .await?;
        Ok(any)
    }

    /// Update one source of an any-false target and publish the result
    pub async fn assert_any_false(
        &self,
        dispatcher: &WriteDispatcher,
        target_point_id: &str,
        source_id: &str,
        asserted: bool,
    ) -> EngineResult<bool> {
        let any = Self::combine(&self.any_false, target_point_id, source_id, asserted);
        dispatcher
            .write_or_add(target_point_id, if any { "0" } else { "1" }, None, 0)
            .await?;
        Ok(any)
    }

    /// Drop a source from both maps (block deleted or reconfigured)
    pub fn clear_source(&self, target_point_id: &str, source_id: &str) {
        for map in [&self.any_true, &self.any_false] {
            let mut map = map.lock();
            if let Some(sources) = map.get_mut(target_point_id) {
                sources.remove(source_id);
                if sources.is_empty() {
                    map.remove(target_point_id);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::MemoryRepository;
    use crate::store::{PointCatalog, PointStore};
    use crate::time::ManualClock;
    use std::sync::Arc;

    fn fixture() -> (VotingAggregators, WriteDispatcher, Arc<PointStore>) {
        let catalog = Arc::new(PointCatalog::new());
        let store = Arc::new(PointStore::ephemeral().unwrap());
        let repo = Arc::new(MemoryRepository::new());
        let clock = Arc::new(ManualClock::starting_at(0));
        let dispatcher = WriteDispatcher::new(catalog, store.clone(), repo, clock);
        (VotingAggregators::new(), dispatcher, store)
    }

    #[tokio::test]
    async fn any_true_ors_across_sources() {
        let (voting, dispatcher, store) = fixture();
        voting
            .assert_any_true(&dispatcher, "siren", "alarm-a", true)
            .await
            .unwrap();
        voting
            .assert_any_true(&dispatcher, "siren", "alarm-b", false)
            .await
            .unwrap();
        assert_eq!(store.raw("siren").unwrap().value, "1");

        voting
            .assert_any_true(&dispatcher, "siren", "alarm-a", false)
            .await
            .unwrap();
        assert_eq!(store.raw("siren").unwrap().value, "0");
    }

    #[tokio::test]
    async fn any_false_inverts_the_output() {
        let (voting, dispatcher, store) = fixture();
        voting
            .assert_any_false(&dispatcher, "permissive", "alarm-a", true)
            .await
            .unwrap();
        assert_eq!(store.raw("permissive").unwrap().value, "0");
        voting
            .assert_any_false(&dispatcher, "permissive", "alarm-a", false)
            .await
            .unwrap();
        assert_eq!(store.raw("permissive").unwrap().value, "1");
    }
}
