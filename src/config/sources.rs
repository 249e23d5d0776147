use super::models::Config;
use config::{ConfigError, Environment, File};
use std::env;
use std::path::PathBuf;

const CONFIG_ENV_VAR: &str = "PIXBOX_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config/pixbox.toml";
const ENV_PREFIX: &str = "PIXBOX";
const ENV_SEPARATOR: &str = "__";

/// Load configuration from multiple sources with priority:
/// 1. Defaults (embedded in structs)
/// 2. TOML file (if exists)
/// 3. Environment variables from .env file (via dotenvy)
/// 4. System environment variables (highest priority)
pub fn load() -> Result<Config, ConfigError> {
    // Load .env file if it exists (ignore errors if file doesn't exist)
    let _ = dotenvy::dotenv();

    let config_path = env::var(CONFIG_ENV_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));

    load_from_sources(config_path)
}

/// Load configuration from a specific path and environment
/// Useful for testing with custom config files
pub fn load_from_sources(config_path: PathBuf) -> Result<Config, ConfigError> {
    let mut builder = config::Config::builder();

    // Start with defaults (handled by struct Default implementations)
    // Add TOML file if it exists (optional)
    if config_path.exists() {
        tracing::info!("Loading configuration from: {}", config_path.display());
        builder = builder.add_source(File::from(config_path).required(false));
    } else {
        tracing::warn!(
            "Configuration file not found at {}, using defaults and environment overrides",
            config_path.display()
        );
    }

    // Add environment variable overrides
    // PIXBOX__SERVER__BIND_ADDR -> server.bind_addr
    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator(ENV_SEPARATOR)
            .try_parsing(true),
    );

    let config = builder.build()?;
    config.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_load_defaults_only() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nonexistent.toml");

        let config = load_from_sources(config_path).unwrap();
        assert_eq!(config.server.bind_addr.to_string(), "0.0.0.0:8080");
        assert_eq!(config.cache.capacity, 250);
    }

    #[test]
    fn test_load_from_toml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[server]
bind_addr = "127.0.0.1:9000"

[cache]
max_entry_size = "512KB"
        "#;

        fs::write(&config_path, toml_content).unwrap();

        let config = load_from_sources(config_path).unwrap();
        assert_eq!(config.server.bind_addr.to_string(), "127.0.0.1:9000");
        assert_eq!(config.cache.max_entry_size.as_u64(), 512 * 1024);
    }

    // Note: test_env_overrides removed due to unsafe env::set_var usage
    // Environment variable overrides are tested in integration tests

    #[test]
    fn test_complex_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[server]
bind_addr = "0.0.0.0:8080"
stats_path = "/internal/stats"
stats_allow_from = ["127.0.0.1", "10.0.*"]

[dispatcher]
core_pool_size = 4
max_pool_size = 8
queue_capacity = 50
task_timeout_ms = 30000

[cache]
enabled = true
capacity = 100
max_entry_size = "1MB"
default_max_age_secs = 600
snapshot_path = "data/cache.jsonl"

[resources]
root = "public"
fetch_remote = true
allow_hosts = ["cdn.example.com", "*.images.example.com"]
max_image_file_size = "2MB"
max_image_resolution = 6000000

[http]
enable_post = true

[strategies]
order = ["bot", "client-hint", "auto-format"]
        "#;

        fs::write(&config_path, toml_content).unwrap();

        let config = load_from_sources(config_path).unwrap();

        assert_eq!(config.server.stats_path, "/internal/stats");
        assert_eq!(config.server.stats_allow_from.len(), 2);

        assert_eq!(config.dispatcher.core_pool_size, 4);
        assert_eq!(config.dispatcher.max_pool_size, 8);
        assert_eq!(config.dispatcher.queue_capacity, 50);
        assert_eq!(
            config.dispatcher.task_timeout(),
            std::time::Duration::from_secs(30)
        );

        assert!(config.cache.enabled);
        assert_eq!(config.cache.capacity, 100);
        assert_eq!(
            config.cache.snapshot_path.as_deref(),
            Some(std::path::Path::new("data/cache.jsonl"))
        );

        assert!(config.resources.fetch_remote);
        assert_eq!(config.resources.allow_hosts.len(), 2);
        assert_eq!(config.resources.max_image_file_size.as_u64(), 2 * 1024 * 1024);

        assert!(config.http.enable_post);
        assert_eq!(config.strategies.order, vec!["bot", "client-hint", "auto-format"]);
    }
}
