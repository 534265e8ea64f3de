use std::time::Duration;

use layercache_core::{CacheError, validate_channel};
use serde::{Deserialize, Serialize};

/// Top-level cache settings, usually read from `layercache.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Shared far tier and invalidation channel
    #[serde(default)]
    pub redis: RedisConfig,
    /// In-process tier
    #[serde(default)]
    pub local: LocalConfig,
}

impl CacheSettings {
    pub fn validate(&self) -> Result<(), CacheError> {
        self.redis.validate()?;
        self.local.validate()
    }

    /// Render the settings as TOML, in the same shape the loader reads.
    pub fn to_toml(&self) -> Result<String, CacheError> {
        toml::to_string_pretty(self).map_err(|e| CacheError::serialization(e.to_string()))
    }
}

/// Redis configuration for multi-process deployments
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Enable Redis (gracefully degrades without it)
    /// Default: false (local-only cache)
    #[serde(default = "default_redis_enabled")]
    pub enabled: bool,

    /// Redis connection URL (e.g., "redis://localhost:6379")
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Connection pool size
    #[serde(default = "default_redis_pool_size")]
    pub pool_size: usize,

    /// Connection timeout in milliseconds
    #[serde(default = "default_redis_timeout_ms")]
    pub timeout_ms: u64,

    /// Prepended to every key written to Redis
    #[serde(default)]
    pub key_prefix: String,

    /// Pub/sub channel carrying invalidations
    #[serde(default = "default_redis_channel")]
    pub channel: String,
}

fn default_redis_enabled() -> bool {
    false
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_redis_pool_size() -> usize {
    10
}

fn default_redis_timeout_ms() -> u64 {
    5000
}

fn default_redis_channel() -> String {
    "cache-invalidation".to_string()
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            enabled: default_redis_enabled(),
            url: default_redis_url(),
            pool_size: default_redis_pool_size(),
            timeout_ms: default_redis_timeout_ms(),
            key_prefix: String::new(),
            channel: default_redis_channel(),
        }
    }
}

impl RedisConfig {
    /// Only checked when Redis is enabled.
    pub fn validate(&self) -> Result<(), CacheError> {
        if !self.enabled {
            return Ok(());
        }
        if self.url.trim().is_empty() {
            return Err(CacheError::configuration(
                "redis.enabled=true requires redis.url",
            ));
        }
        if self.pool_size == 0 {
            return Err(CacheError::configuration("redis.pool_size must be > 0"));
        }
        if self.timeout_ms == 0 {
            return Err(CacheError::configuration("redis.timeout_ms must be > 0"));
        }
        validate_channel(&self.channel)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// In-process tier configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalConfig {
    /// Lifetime of locally computed values in seconds
    #[serde(default = "default_local_ttl_secs")]
    pub default_ttl_secs: u64,
}

fn default_local_ttl_secs() -> u64 {
    300
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: default_local_ttl_secs(),
        }
    }
}

impl LocalConfig {
    pub fn validate(&self) -> Result<(), CacheError> {
        if self.default_ttl_secs == 0 {
            return Err(CacheError::configuration(
                "local.default_ttl_secs must be > 0",
            ));
        }
        Ok(())
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }
}

pub mod loader {
    use super::CacheSettings;
    use config::{Config, Environment, File};
    use layercache_core::CacheError;
    use std::path::PathBuf;

    /// File read when no explicit path is given, if it exists.
    pub const DEFAULT_CONFIG_FILE: &str = "layercache.toml";

    /// Load settings from an optional TOML file, then environment overrides.
    ///
    /// Variables look like `LAYERCACHE__REDIS__ENABLED=true`. A missing file
    /// is not an error: defaults and the environment still apply.
    pub fn load_settings(path: Option<&str>) -> Result<CacheSettings, CacheError> {
        let mut builder = Config::builder();
        let file = path
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
        if file.exists() {
            builder = builder.add_source(File::from(file));
        }
        // Environment variable overrides, e.g., LAYERCACHE__REDIS__URL=redis://cache:6379
        builder = builder.add_source(
            Environment::with_prefix("LAYERCACHE")
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| CacheError::configuration(format!("config build error: {e}")))?;
        let merged: CacheSettings = cfg
            .try_deserialize()
            .map_err(|e| CacheError::configuration(format!("config deserialize error: {e}")))?;
        merged.validate()?;
        Ok(merged)
    }
}
