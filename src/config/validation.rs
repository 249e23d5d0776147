use super::models::Config;
use super::patterns::PatternList;
use crate::strategy::StrategyRegistry;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("dispatcher.core_pool_size must be positive")]
    ZeroCorePool,

    #[error("dispatcher.max_pool_size ({max}) must be at least core_pool_size ({core})")]
    PoolBoundsInverted { core: usize, max: usize },

    #[error("dispatcher.queue_capacity must be positive")]
    ZeroQueueCapacity,

    #[error("dispatcher.task_timeout_ms must be positive")]
    ZeroTaskTimeout,

    #[error("cache.capacity must be positive when the cache is enabled")]
    ZeroCacheCapacity,

    #[error("cache.max_entry_size must be positive")]
    ZeroMaxEntrySize,

    #[error("strategies.order references unknown strategy '{name}'")]
    UnknownStrategy { name: String },

    #[error("Invalid allow pattern '{pattern}' in {field}: {reason}")]
    InvalidAllowPattern {
        field: &'static str,
        pattern: String,
        reason: String,
    },

    #[error("Resource root '{path}' does not exist or is not a directory")]
    MissingResourceRoot { path: String },
}

/// Validate the entire configuration
pub fn validate(config: &Config) -> Result<(), ValidationError> {
    validate_dispatcher(config)?;
    validate_cache(config)?;
    validate_strategies(config)?;
    validate_patterns(config)?;
    validate_resources(config)?;
    Ok(())
}

fn validate_dispatcher(config: &Config) -> Result<(), ValidationError> {
    let d = &config.dispatcher;
    if d.core_pool_size == 0 {
        return Err(ValidationError::ZeroCorePool);
    }
    if d.max_pool_size < d.core_pool_size {
        return Err(ValidationError::PoolBoundsInverted {
            core: d.core_pool_size,
            max: d.max_pool_size,
        });
    }
    if d.queue_capacity == 0 {
        return Err(ValidationError::ZeroQueueCapacity);
    }
    if d.task_timeout_ms == 0 {
        return Err(ValidationError::ZeroTaskTimeout);
    }
    Ok(())
}

fn validate_cache(config: &Config) -> Result<(), ValidationError> {
    if !config.cache.enabled {
        return Ok(());
    }
    if config.cache.capacity == 0 {
        return Err(ValidationError::ZeroCacheCapacity);
    }
    if config.cache.max_entry_size.as_u64() == 0 {
        return Err(ValidationError::ZeroMaxEntrySize);
    }
    Ok(())
}

/// Every configured strategy name must be known to the registry
fn validate_strategies(config: &Config) -> Result<(), ValidationError> {
    let registry = StrategyRegistry::with_defaults();
    for name in &config.strategies.order {
        if registry.get(name).is_none() {
            return Err(ValidationError::UnknownStrategy { name: name.clone() });
        }
    }
    Ok(())
}

fn validate_patterns(config: &Config) -> Result<(), ValidationError> {
    compile_patterns("server.stats_allow_from", &config.server.stats_allow_from)?;
    compile_patterns("resources.allow_hosts", &config.resources.allow_hosts)?;
    Ok(())
}

fn compile_patterns(field: &'static str, patterns: &[String]) -> Result<(), ValidationError> {
    // compiled again at wiring time, this pass only reports bad entries early
    for pattern in patterns {
        if let Err(err) = PatternList::compile(std::slice::from_ref(pattern)) {
            return Err(ValidationError::InvalidAllowPattern {
                field,
                pattern: pattern.clone(),
                reason: err.to_string(),
            });
        }
    }
    Ok(())
}

fn validate_resources(config: &Config) -> Result<(), ValidationError> {
    let root = &config.resources.root;
    if !root.is_dir() {
        return Err(ValidationError::MissingResourceRoot {
            path: root.display().to_string(),
        });
    }
    Ok(())
}
