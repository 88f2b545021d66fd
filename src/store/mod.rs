//! Point store and shared caches

mod catalog;
mod point_store;

pub use catalog::PointCatalog;
pub use point_store::PointStore;

use crate::model::SourceRef;

/// Resolve a dynamic source reference to a number
///
/// Point references read the final cache; global references read the
/// global-variable namespace. `None` is the missing sentinel handled
/// as a per-block configuration error by the caller.
pub fn resolve_source(store: &PointStore, reference: &SourceRef) -> Option<f64> {
    match reference {
        SourceRef::Point(id) => store.final_value(id).and_then(|s| s.numeric()),
        SourceRef::Global(name) => store.global_by_name(name).and_then(|g| g.numeric()),
    }
}

/// Resolve a source as a digital state (non-zero ⇒ true)
pub fn resolve_source_bool(store: &PointStore, reference: &SourceRef) -> Option<bool> {
    resolve_source(store, reference).map(|v| v != 0.0)
}
