use crate::error::{ConfigError, RateLimitError};
use crate::fakestore::FAKE_STORE_BASE_URL;
use crate::rate_limit_config::RoutePolicies;
use clap::{ArgAction, Parser};
use std::net::SocketAddr;
use std::time::Duration;

/// `REDIS_URL` value that selects the in-process store.
pub const MEMORY_STORE: &str = "memory";

/// Service configuration; every flag can also come from the environment.
#[derive(Debug, Clone, Parser)]
#[command(name = "windowgate", version, about)]
pub struct Config {
    /// Server bind address
    #[arg(long, env = "BIND_ADDRESS", default_value = "0.0.0.0:8080")]
    pub bind_address: SocketAddr,

    /// Redis connection URL, or `memory` for a single-process store
    #[arg(long, env = "REDIS_URL", default_value = "redis://127.0.0.1:6379")]
    pub redis_url: String,

    /// Bound on connecting to Redis and on every Redis command
    #[arg(long, env = "REDIS_TIMEOUT_MS", default_value_t = 2000)]
    pub redis_timeout_ms: u64,

    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[arg(long, env = "FAKESTORE_BASE_URL", default_value = FAKE_STORE_BASE_URL)]
    pub fakestore_base_url: String,

    /// Upper bound on concurrent upstream requests per fan-out
    #[arg(long, env = "FANOUT_CONCURRENCY", default_value_t = 4)]
    pub fanout_concurrency: usize,

    /// Identify clients by X-Forwarded-For / X-Real-IP (only behind a trusted proxy)
    #[arg(long, env = "TRUST_FORWARDED_HEADERS", default_value_t = false, action = ArgAction::Set)]
    pub trust_forwarded_headers: bool,

    /// JSON overrides for per-route rate limit policies
    #[arg(long, env = "RATE_LIMIT_POLICIES")]
    pub rate_limit_policies: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend<'a> {
    Memory,
    Redis(&'a str),
}

impl Config {
    /// Loads `.env` (if present), then parses flags and environment.
    pub fn load() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        let config = Config::try_parse().map_err(|e| ConfigError::Invalid(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let StoreBackend::Redis(url) = self.store_backend() {
            validate_redis_url(url)?;
        }
        if self.redis_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "Redis timeout must be greater than 0".to_string(),
            ));
        }
        if self.fanout_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "Fan-out concurrency must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn store_backend(&self) -> StoreBackend<'_> {
        if self.redis_url.eq_ignore_ascii_case(MEMORY_STORE) {
            StoreBackend::Memory
        } else {
            StoreBackend::Redis(&self.redis_url)
        }
    }

    pub fn redis_timeout(&self) -> Duration {
        Duration::from_millis(self.redis_timeout_ms)
    }

    pub fn route_policies(&self) -> Result<RoutePolicies, RateLimitError> {
        match self.rate_limit_policies.as_deref() {
            Some(raw) if !raw.trim().is_empty() => RoutePolicies::from_json(raw),
            _ => Ok(RoutePolicies::default()),
        }
    }
}

/// Validates a Redis URL
fn validate_redis_url(url: &str) -> Result<(), ConfigError> {
    if url.is_empty() {
        return Err(ConfigError::Invalid("Redis URL cannot be empty".to_string()));
    }

    if !url.starts_with("redis://") && !url.starts_with("rediss://") {
        return Err(ConfigError::Invalid(
            "Redis URL must start with 'redis://' or 'rediss://'".to_string(),
        ));
    }

    Ok(())
}
