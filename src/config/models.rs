use crate::humanize::ByteSize;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub resources: ResourcesConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub strategies: StrategiesConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
    /// Path of the statistics endpoint
    #[serde(default = "default_stats_path")]
    pub stats_path: String,
    /// Client addresses allowed to read statistics, `*` wildcards allowed
    #[serde(default = "default_stats_allow_from")]
    pub stats_allow_from: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            stats_path: default_stats_path(),
            stats_allow_from: default_stats_allow_from(),
        }
    }
}

fn default_bind_addr() -> SocketAddr {
    "0.0.0.0:8080".parse().unwrap()
}

fn default_stats_path() -> String {
    "/stats".to_string()
}

fn default_stats_allow_from() -> Vec<String> {
    vec!["127.0.0.1".to_string(), "::1".to_string()]
}

/// Worker pool and admission settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DispatcherConfig {
    #[serde(default = "default_core_pool_size")]
    pub core_pool_size: usize,
    #[serde(default = "default_max_pool_size")]
    pub max_pool_size: usize,
    /// Idle lifetime of workers above the core size
    #[serde(default = "default_keep_alive_ms")]
    pub keep_alive_ms: u64,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Wall-clock budget for one task
    #[serde(default = "default_task_timeout_ms")]
    pub task_timeout_ms: u64,
    /// Run tasks on the host runtime instead of an owned pool
    #[serde(default)]
    pub use_host_pool: bool,
}

impl DispatcherConfig {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_millis(self.keep_alive_ms)
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_millis(self.task_timeout_ms)
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            core_pool_size: default_core_pool_size(),
            max_pool_size: default_max_pool_size(),
            keep_alive_ms: default_keep_alive_ms(),
            queue_capacity: default_queue_capacity(),
            task_timeout_ms: default_task_timeout_ms(),
            use_host_pool: false,
        }
    }
}

fn default_core_pool_size() -> usize {
    std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(2)
        .max(2)
}

fn default_max_pool_size() -> usize {
    2 * default_core_pool_size()
}

fn default_keep_alive_ms() -> u64 {
    60_000
}

fn default_queue_capacity() -> usize {
    100
}

fn default_task_timeout_ms() -> u64 {
    60_000
}

/// Response cache settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_enabled")]
    pub enabled: bool,
    /// Entry count bound, the oldest entry is evicted at capacity
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,
    #[serde(default = "default_max_entry_size")]
    pub max_entry_size: ByteSize,
    /// Freshness lifetime granted to responses without their own
    #[serde(default = "default_max_age_secs")]
    pub default_max_age_secs: u64,
    /// Where the cache is persisted across restarts, disabled when unset
    pub snapshot_path: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_cache_enabled(),
            capacity: default_cache_capacity(),
            max_entry_size: default_max_entry_size(),
            default_max_age_secs: default_max_age_secs(),
            snapshot_path: None,
        }
    }
}

fn default_cache_enabled() -> bool {
    true
}

fn default_cache_capacity() -> usize {
    250
}

fn default_max_entry_size() -> ByteSize {
    ByteSize::mib(1)
}

fn default_max_age_secs() -> u64 {
    3600
}

/// Source image settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResourcesConfig {
    /// Directory served as the source root
    #[serde(default = "default_resource_root")]
    pub root: PathBuf,
    /// Whether `http(s)` sources may be fetched at all
    #[serde(default)]
    pub fetch_remote: bool,
    /// Remote hosts allowed when fetching, empty allows any
    #[serde(default)]
    pub allow_hosts: Vec<String>,
    #[serde(default = "default_max_image_file_size")]
    pub max_image_file_size: ByteSize,
    /// Pixel count ceiling for decoded sources
    #[serde(default = "default_max_image_resolution")]
    pub max_image_resolution: u64,
}

impl Default for ResourcesConfig {
    fn default() -> Self {
        Self {
            root: default_resource_root(),
            fetch_remote: false,
            allow_hosts: Vec::new(),
            max_image_file_size: default_max_image_file_size(),
            max_image_resolution: default_max_image_resolution(),
        }
    }
}

fn default_resource_root() -> PathBuf {
    PathBuf::from("public")
}

fn default_max_image_file_size() -> ByteSize {
    ByteSize::mib(2)
}

fn default_max_image_resolution() -> u64 {
    6_000_000
}

/// HTTP method surface
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct HttpConfig {
    /// Accept image uploads via POST
    #[serde(default)]
    pub enable_post: bool,
}

/// Strategy resolution order
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StrategiesConfig {
    #[serde(default = "default_strategy_order")]
    pub order: Vec<String>,
}

impl Default for StrategiesConfig {
    fn default() -> Self {
        Self {
            order: default_strategy_order(),
        }
    }
}

fn default_strategy_order() -> Vec<String> {
    crate::strategy::DEFAULT_ORDER
        .iter()
        .map(|name| name.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.server.bind_addr.to_string(), "0.0.0.0:8080");
        assert_eq!(config.server.stats_path, "/stats");
        assert_eq!(config.dispatcher.queue_capacity, 100);
        assert!(config.dispatcher.core_pool_size >= 2);
        assert_eq!(
            config.dispatcher.max_pool_size,
            2 * config.dispatcher.core_pool_size
        );
        assert_eq!(config.dispatcher.task_timeout(), Duration::from_secs(60));
        assert!(config.cache.enabled);
        assert_eq!(config.cache.capacity, 250);
        assert_eq!(config.cache.max_entry_size.as_u64(), 1024 * 1024);
        assert!(!config.http.enable_post);
        assert!(!config.resources.fetch_remote);
        assert_eq!(config.resources.max_image_resolution, 6_000_000);
        assert_eq!(config.strategies.order.first().map(String::as_str), Some("bot"));
    }
}
