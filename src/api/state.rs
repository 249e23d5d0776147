use std::sync::Arc;
use std::time::Instant;

use crate::cache::BoundedCache;
use crate::config::{Config, PatternList};
use crate::dispatch::Dispatcher;
use crate::observability::Metrics;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub dispatcher: Arc<Dispatcher>,
    pub cache: Option<Arc<BoundedCache>>,
    pub metrics: Arc<Metrics>,
    /// Client addresses allowed to read the stats endpoint
    pub stats_allow: Arc<PatternList>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(
        config: Config,
        dispatcher: Dispatcher,
        cache: Option<Arc<BoundedCache>>,
        metrics: Arc<Metrics>,
        stats_allow: PatternList,
    ) -> Self {
        Self {
            config: Arc::new(config),
            dispatcher: Arc::new(dispatcher),
            cache,
            metrics,
            stats_allow: Arc::new(stats_allow),
            started_at: Instant::now(),
        }
    }
}
