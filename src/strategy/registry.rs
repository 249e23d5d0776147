//! Strategy registration and ordered resolution

use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::engine::image::ImageProcessor;
use crate::engine::{Exchange, RequestProcessor};

use super::{
    AutoFormatStrategy, BotStrategy, ClientHintStrategy, MetadataStrategy, PaletteStrategy,
    PdfStrategy, Strategy, DEFAULT_ORDER,
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Unknown strategy: {0}")]
    NotFound(String),

    #[error("Strategy already registered: {0}")]
    Duplicate(String),
}

/// All strategies known to this process, keyed by name
pub struct StrategyRegistry {
    strategies: BTreeMap<&'static str, Arc<dyn Strategy>>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        StrategyRegistry {
            strategies: BTreeMap::new(),
        }
    }

    /// Registry preloaded with the built-in strategies
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        let builtins: [Arc<dyn Strategy>; 6] = [
            Arc::new(BotStrategy),
            Arc::new(MetadataStrategy),
            Arc::new(PdfStrategy),
            Arc::new(PaletteStrategy),
            Arc::new(ClientHintStrategy),
            Arc::new(AutoFormatStrategy),
        ];
        for strategy in builtins {
            // names are distinct literals, registration cannot collide
            let _ = registry.register(strategy);
        }
        registry
    }

    pub fn register(&mut self, strategy: Arc<dyn Strategy>) -> Result<(), RegistryError> {
        let name = strategy.name();
        if self.strategies.contains_key(name) {
            return Err(RegistryError::Duplicate(name.to_string()));
        }
        self.strategies.insert(name, strategy);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Strategy>> {
        self.strategies.get(name).cloned()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.strategies.keys().copied().collect()
    }

    /// Fixes a resolution order. Every name must be registered; failing
    /// here is what keeps a typo in the configuration from surfacing as a
    /// misrouted request later.
    pub fn resolver(&self, order: &[String]) -> Result<StrategyResolver, RegistryError> {
        let mut ordered = Vec::with_capacity(order.len());
        for name in order {
            let strategy = self
                .get(name)
                .ok_or_else(|| RegistryError::NotFound(name.clone()))?;
            ordered.push(strategy);
        }
        Ok(StrategyResolver { ordered })
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Ordered first-match-wins resolution over registered strategies
pub struct StrategyResolver {
    ordered: Vec<Arc<dyn Strategy>>,
}

impl StrategyResolver {
    /// Resolver over the built-ins in their default order
    pub fn with_defaults() -> Self {
        let order: Vec<String> = DEFAULT_ORDER.iter().map(|n| n.to_string()).collect();
        // the default order only names built-ins
        StrategyRegistry::with_defaults()
            .resolver(&order)
            .unwrap_or(StrategyResolver { ordered: Vec::new() })
    }

    pub fn resolve(&self, exchange: &Exchange) -> Box<dyn RequestProcessor> {
        for strategy in &self.ordered {
            if strategy.matches(exchange) {
                debug!(strategy = strategy.name(), "Strategy matched");
                return strategy.create();
            }
        }
        Box::new(ImageProcessor::new())
    }
}
