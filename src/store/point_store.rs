//! Hot point cache over a durable KV
//!
//! A DashMap layer serves cache-first reads; every write goes through
//! to sled so point-store entries outlive any single process. One
//! logical namespace per key prefix:
//!
//! - `RawItem:{pointId}`      latest driver sample
//! - `FinalItem:{pointId}`    post-pipeline value seen by memories
//! - `PIDState:{pidId}`       controller checkpoint
//! - `PIDTuningState:{pidId}` relay-tuner checkpoint
//! - `GlobalVariable:{id}`    named shared variables
//!
//! Per-block checkpoints (totalizer, deadband) use their own prefixes;
//! every state key is derived solely from the block id so deleting a
//! block invalidates all of its state.

use crate::error::{EngineError, EngineResult};
use crate::model::{GlobalVariable, PidCheckpoint, PointSample};
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;

const RAW_PREFIX: &str = "RawItem:";
const FINAL_PREFIX: &str = "FinalItem:";
const PID_PREFIX: &str = "PIDState:";
const TUNING_PREFIX: &str = "PIDTuningState:";
const GLOBAL_PREFIX: &str = "GlobalVariable:";

/// Durable point store with a hot cache layer
pub struct PointStore {
    db: sled::Db,
    cache: DashMap<String, Vec<u8>>,
}

impl PointStore {
    /// Open the store at a directory
    pub fn open<P: AsRef<Path>>(path: P) -> EngineResult<Self> {
        let db = sled::open(path)
            .map_err(|e| EngineError::Store(format!("failed to open database: {e}")))?;
        Ok(Self {
            db,
            cache: DashMap::new(),
        })
    }

    /// Open an ephemeral store (tests, default wiring without a data dir)
    pub fn ephemeral() -> EngineResult<Self> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|e| EngineError::Store(format!("failed to open database: {e}")))?;
        Ok(Self {
            db,
            cache: DashMap::new(),
        })
    }

    fn put_json<T: Serialize>(&self, key: String, value: &T) -> EngineResult<()> {
        let bytes = serde_json::to_vec(value)?;
        self.db.insert(key.as_bytes(), bytes.clone())?;
        self.cache.insert(key, bytes);
        Ok(())
    }

    fn get_json<T: DeserializeOwned>(&self, key: &str) -> EngineResult<Option<T>> {
        if let Some(bytes) = self.cache.get(key) {
            return Ok(Some(serde_json::from_slice(&bytes)?));
        }
        match self.db.get(key.as_bytes())? {
            Some(ivec) => {
                self.cache.insert(key.to_string(), ivec.to_vec());
                Ok(Some(serde_json::from_slice(&ivec)?))
            }
            None => Ok(None),
        }
    }

    fn remove(&self, key: &str) -> EngineResult<()> {
        self.db.remove(key.as_bytes())?;
        self.cache.remove(key);
        Ok(())
    }

    fn scan_prefix<T: DeserializeOwned>(&self, prefix: &str) -> EngineResult<Vec<T>> {
        let mut out = Vec::new();
        for entry in self.db.scan_prefix(prefix.as_bytes()) {
            let (_, value) = entry?;
            out.push(serde_json::from_slice(&value)?);
        }
        Ok(out)
    }

    // raw namespace

    pub fn set_raw(&self, sample: &PointSample) -> EngineResult<()> {
        self.put_json(format!("{RAW_PREFIX}{}", sample.point_id), sample)
    }

    pub fn raw(&self, point_id: &str) -> Option<PointSample> {
        self.get_json(&format!("{RAW_PREFIX}{point_id}")).ok().flatten()
    }

    /// Bulk read of every raw sample (one scan per monitoring cycle)
    pub fn all_raw(&self) -> EngineResult<Vec<PointSample>> {
        self.scan_prefix(RAW_PREFIX)
    }

    // final namespace

    pub fn set_final(&self, sample: &PointSample) -> EngineResult<()> {
        self.put_json(format!("{FINAL_PREFIX}{}", sample.point_id), sample)
    }

    pub fn final_value(&self, point_id: &str) -> Option<PointSample> {
        self.get_json(&format!("{FINAL_PREFIX}{point_id}")).ok().flatten()
    }

    // PID checkpoints

    pub fn set_pid_state(&self, state: &PidCheckpoint) -> EngineResult<()> {
        self.put_json(format!("{PID_PREFIX}{}", state.id), state)
    }

    pub fn pid_state(&self, pid_id: &str) -> Option<PidCheckpoint> {
        self.get_json(&format!("{PID_PREFIX}{pid_id}")).ok().flatten()
    }

    pub fn delete_pid_state(&self, pid_id: &str) -> EngineResult<()> {
        self.remove(&format!("{PID_PREFIX}{pid_id}"))
    }

    // tuning checkpoints

    pub fn set_tuning_state<T: Serialize>(&self, pid_id: &str, state: &T) -> EngineResult<()> {
        self.put_json(format!("{TUNING_PREFIX}{pid_id}"), state)
    }

    pub fn tuning_state<T: DeserializeOwned>(&self, pid_id: &str) -> Option<T> {
        self.get_json(&format!("{TUNING_PREFIX}{pid_id}")).ok().flatten()
    }

    pub fn delete_tuning_state(&self, pid_id: &str) -> EngineResult<()> {
        self.remove(&format!("{TUNING_PREFIX}{pid_id}"))
    }

    // global variables

    pub fn set_global(&self, var: &GlobalVariable) -> EngineResult<()> {
        self.put_json(format!("{GLOBAL_PREFIX}{}", var.id), var)
    }

    pub fn global(&self, id: &str) -> Option<GlobalVariable> {
        self.get_json(&format!("{GLOBAL_PREFIX}{id}")).ok().flatten()
    }

    /// Look a global up by name; ids and names are distinct, blocks
    /// reference globals by name
    pub fn global_by_name(&self, name: &str) -> Option<GlobalVariable> {
        self.all_globals()
            .ok()?
            .into_iter()
            .find(|g| g.name == name)
    }

    pub fn all_globals(&self) -> EngineResult<Vec<GlobalVariable>> {
        self.scan_prefix(GLOBAL_PREFIX)
    }

    // generic per-block checkpoints

    pub fn set_block_state<T: Serialize>(
        &self,
        prefix: &str,
        block_id: &str,
        state: &T,
    ) -> EngineResult<()> {
        self.put_json(format!("{prefix}:{block_id}"), state)
    }

    pub fn block_state<T: DeserializeOwned>(&self, prefix: &str, block_id: &str) -> Option<T> {
        self.get_json(&format!("{prefix}:{block_id}")).ok().flatten()
    }

    pub fn delete_block_state(&self, prefix: &str, block_id: &str) -> EngineResult<()> {
        self.remove(&format!("{prefix}:{block_id}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_and_final_are_distinct_namespaces() {
        let store = PointStore::ephemeral().unwrap();
        store.set_raw(&PointSample::new("p1", "10", 100)).unwrap();
        store.set_final(&PointSample::new("p1", "12", 101)).unwrap();
        assert_eq!(store.raw("p1").unwrap().value, "10");
        assert_eq!(store.final_value("p1").unwrap().value, "12");
    }

    #[test]
    fn bulk_raw_scan_sees_every_sample() {
        let store = PointStore::ephemeral().unwrap();
        for i in 0..5 {
            store
                .set_raw(&PointSample::new(format!("p{i}"), "1", i))
                .unwrap();
        }
        assert_eq!(store.all_raw().unwrap().len(), 5);
    }

    #[test]
    fn values_survive_reopen() {
        let dir = tempfile::TempDir::new().unwrap();
        {
            let store = PointStore::open(dir.path()).unwrap();
            store.set_raw(&PointSample::new("p1", "7", 1)).unwrap();
        }
        let store = PointStore::open(dir.path()).unwrap();
        assert_eq!(store.raw("p1").unwrap().value, "7");
    }

    #[test]
    fn block_state_keys_derive_from_block_id() {
        let store = PointStore::ephemeral().unwrap();
        store
            .set_block_state("TotalizerState", "t1", &42u32)
            .unwrap();
        assert_eq!(store.block_state::<u32>("TotalizerState", "t1"), Some(42));
        store.delete_block_state("TotalizerState", "t1").unwrap();
        assert_eq!(store.block_state::<u32>("TotalizerState", "t1"), None);
    }

    #[test]
    fn global_lookup_by_name() {
        let store = PointStore::ephemeral().unwrap();
        let var = crate::model::GlobalVariable {
            id: "g-7".into(),
            name: "setpointBias".into(),
            kind: crate::model::GlobalKind::Float,
            value: "2.5".into(),
            last_update_unix_ms: 0,
        };
        store.set_global(&var).unwrap();
        assert_eq!(
            store.global_by_name("setpointBias").unwrap().numeric(),
            Some(2.5)
        );
    }
}
