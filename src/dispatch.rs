//! Write dispatcher
//!
//! The single entry point through which every block output leaves the
//! engine. Depending on the target point's interface mapping the value
//! either lands in the raw cache directly or becomes a pending write
//! item for the driver. The dispatcher never waits for driver
//! confirmation.

use crate::error::EngineResult;
use crate::model::{InterfaceKind, PointSample, WriteItem};
use crate::repo::ConfigRepository;
use crate::store::{PointCatalog, PointStore};
use crate::time::Clock;
use std::sync::Arc;
use tracing::warn;

pub struct WriteDispatcher {
    catalog: Arc<PointCatalog>,
    store: Arc<PointStore>,
    repo: Arc<dyn ConfigRepository>,
    clock: Arc<dyn Clock>,
}

impl WriteDispatcher {
    pub fn new(
        catalog: Arc<PointCatalog>,
        store: Arc<PointStore>,
        repo: Arc<dyn ConfigRepository>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            catalog,
            store,
            repo,
            clock,
        }
    }

    /// Publish a value to a point
    ///
    /// - interface `None` (or unknown point): update the raw cache
    /// - Sharp7/Modbus with a writable mapping: upsert a pending
    ///   `WriteItem` for the driver
    /// - BACnet: refused, writes are unsupported
    ///
    /// Returns whether the write was accepted.
    pub async fn write_or_add(
        &self,
        point_id: &str,
        value: &str,
        time: Option<i64>,
        duration_seconds: i64,
    ) -> EngineResult<bool> {
        if point_id.is_empty() || value.is_empty() {
            warn!(point_id, "refusing write with empty point id or value");
            return Ok(false);
        }
        let unix = time.unwrap_or_else(|| self.clock.now_unix());

        match self.catalog.get(point_id) {
            Some(point) => match point.interface {
                InterfaceKind::BacNet => {
                    warn!(point_id, "refusing write to BACnet point");
                    Ok(false)
                }
                InterfaceKind::Sharp7 | InterfaceKind::Modbus if point.writable => {
                    self.repo
                        .upsert_write_item(WriteItem {
                            point_id: point_id.to_string(),
                            value: value.to_string(),
                            unix_seconds: unix,
                            duration_seconds,
                        })
                        .await?;
                    Ok(true)
                }
                _ => self.update_raw(point_id, value, unix),
            },
            None => self.update_raw(point_id, value, unix),
        }
    }

    fn update_raw(&self, point_id: &str, value: &str, unix: i64) -> EngineResult<bool> {
        self.store
            .set_raw(&PointSample::new(point_id, value, unix))?;
        Ok(true)
    }
}
