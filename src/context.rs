//! Shared engine context
//!
//! One value, created by the supervisor at startup and passed
//! explicitly to every processor. No process-wide singletons.

use crate::cancel::CancelToken;
use crate::dispatch::WriteDispatcher;
use crate::repo::{ConfigRepository, Historian};
use crate::settings::EngineSettings;
use crate::store::{PointCatalog, PointStore};
use crate::time::Clock;
use crate::voting::VotingAggregators;
use std::sync::Arc;

#[derive(Clone)]
pub struct EngineContext {
    pub repo: Arc<dyn ConfigRepository>,
    pub historian: Arc<dyn Historian>,
    pub store: Arc<PointStore>,
    pub catalog: Arc<PointCatalog>,
    pub dispatcher: Arc<WriteDispatcher>,
    pub voting: Arc<VotingAggregators>,
    pub clock: Arc<dyn Clock>,
    pub settings: Arc<EngineSettings>,
    pub cancel: CancelToken,
}

impl EngineContext {
    /// Build a context over the given collaborators
    pub fn new(
        repo: Arc<dyn ConfigRepository>,
        historian: Arc<dyn Historian>,
        store: Arc<PointStore>,
        clock: Arc<dyn Clock>,
        settings: EngineSettings,
    ) -> Self {
        let catalog = Arc::new(PointCatalog::new());
        let dispatcher = Arc::new(WriteDispatcher::new(
            catalog.clone(),
            store.clone(),
            repo.clone(),
            clock.clone(),
        ));
        Self {
            repo,
            historian,
            store,
            catalog,
            dispatcher,
            voting: Arc::new(VotingAggregators::new()),
            clock,
            settings: Arc::new(settings),
            cancel: CancelToken::new(),
        }
    }
}
