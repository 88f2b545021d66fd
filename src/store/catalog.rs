//! Shared point-configuration catalog
//!
//! The dispatcher and pipeline both need point records on every cycle;
//! the catalog holds the latest snapshot, replaced wholesale on each
//! configuration refresh.

use crate::model::Point;
use parking_lot::RwLock;
use std::collections::HashMap;

#[derive(Default)]
pub struct PointCatalog {
    points: RwLock<HashMap<String, Point>>,
}

impl PointCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the snapshot with a fresh configuration fetch
    pub fn replace(&self, points: Vec<Point>) {
        let map = points.into_iter().map(|p| (p.id.clone(), p)).collect();
        *self.points.write() = map;
    }

    pub fn get(&self, point_id: &str) -> Option<Point> {
        self.points.read().get(point_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.points.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.read().is_empty()
    }
}
