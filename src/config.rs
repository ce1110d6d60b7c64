// src/config.rs
//! Engine configuration with environment overrides.
//!
//! Every knob has a production default; `EngineConfig::from_env()` reads the
//! `OPTIMIZER_*` variables and falls back to the defaults for anything unset
//! or unparseable.

use log::{info, warn};
use std::env;
use std::time::Duration;

/// Top-level configuration for a [`RequestEngine`](crate::engine::RequestEngine).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum number of transport calls in flight at once.
    pub max_concurrency: usize,
    /// Scheduler tick interval for the queue processor.
    pub tick_interval: Duration,
    /// Default TTL applied to cached responses.
    pub default_cache_ttl: Duration,
    /// Default per-request retry budget.
    pub default_max_retries: u32,
    /// Default per-request execution timeout.
    pub default_timeout: Duration,
    /// Base delay for exponential retry backoff (attempt n waits base * 2^n).
    pub retry_base_delay: Duration,
    /// Hard cap on a single retry backoff delay.
    pub retry_max_delay: Duration,
    pub cache: CacheConfig,
    pub rate_limit: RateLimitConfig,
}

/// Cache store sizing and maintenance.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum entry count before priority-weighted eviction kicks in.
    pub max_entries: usize,
    /// Interval of the background sweep that drops expired entries.
    pub sweep_interval: Duration,
}

/// Rate limiter window and pacing parameters.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Sliding window duration for the request-count cap.
    pub window: Duration,
    /// Maximum requests permitted inside one window.
    pub max_requests_per_window: u32,
    /// Minimum spacing between consecutive requests, before backoff scaling.
    pub min_interval: Duration,
    /// Throttle duration applied when the server signals a rate limit and no
    /// Retry-After hint is available.
    pub throttle_cooldown: Duration,
    /// Ceiling for the adaptive backoff multiplier.
    pub max_backoff_multiplier: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 6,
            tick_interval: Duration::from_millis(50),
            default_cache_ttl: Duration::from_secs(300),
            default_max_retries: 3,
            default_timeout: Duration::from_secs(30),
            retry_base_delay: Duration::from_secs(1),
            retry_max_delay: Duration::from_secs(30),
            cache: CacheConfig::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 500,
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60),
            max_requests_per_window: 30,
            min_interval: Duration::from_millis(100),
            throttle_cooldown: Duration::from_secs(5),
            max_backoff_multiplier: 8.0,
        }
    }
}

fn env_u64(key: &str) -> Option<u64> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}

fn env_f64(key: &str) -> Option<f64> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}

impl EngineConfig {
    /// Build a config from `OPTIMIZER_*` environment variables, keeping the
    /// default for anything unset.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_concurrency: env_u64("OPTIMIZER_MAX_CONCURRENCY")
                .map(|v| v as usize)
                .unwrap_or(defaults.max_concurrency),
            tick_interval: env_u64("OPTIMIZER_TICK_INTERVAL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.tick_interval),
            default_cache_ttl: env_u64("OPTIMIZER_DEFAULT_CACHE_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.default_cache_ttl),
            default_max_retries: env_u64("OPTIMIZER_DEFAULT_MAX_RETRIES")
                .map(|v| v as u32)
                .unwrap_or(defaults.default_max_retries),
            default_timeout: env_u64("OPTIMIZER_DEFAULT_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.default_timeout),
            retry_base_delay: env_u64("OPTIMIZER_RETRY_BASE_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_base_delay),
            retry_max_delay: env_u64("OPTIMIZER_RETRY_MAX_DELAY_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_max_delay),
            cache: CacheConfig {
                max_entries: env_u64("OPTIMIZER_CACHE_MAX_ENTRIES")
                    .map(|v| v as usize)
                    .unwrap_or(defaults.cache.max_entries),
                sweep_interval: env_u64("OPTIMIZER_CACHE_SWEEP_INTERVAL_SECS")
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.cache.sweep_interval),
            },
            rate_limit: RateLimitConfig {
                window: env_u64("OPTIMIZER_RATE_WINDOW_SECS")
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.rate_limit.window),
                max_requests_per_window: env_u64("OPTIMIZER_RATE_MAX_PER_WINDOW")
                    .map(|v| v as u32)
                    .unwrap_or(defaults.rate_limit.max_requests_per_window),
                min_interval: env_u64("OPTIMIZER_RATE_MIN_INTERVAL_MS")
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.rate_limit.min_interval),
                throttle_cooldown: env_u64("OPTIMIZER_RATE_THROTTLE_COOLDOWN_MS")
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.rate_limit.throttle_cooldown),
                max_backoff_multiplier: env_f64("OPTIMIZER_RATE_MAX_BACKOFF")
                    .unwrap_or(defaults.rate_limit.max_backoff_multiplier),
            },
        }
    }

    /// Sanity-check the loaded values and log the effective configuration.
    pub fn validate_and_log(&self) {
        if self.max_concurrency == 0 {
            warn!("max_concurrency is 0; no request will ever execute");
        }
        if self.rate_limit.max_requests_per_window == 0 {
            warn!("max_requests_per_window is 0; the limiter will never grant a slot");
        }
        if self.rate_limit.max_backoff_multiplier < 1.0 {
            warn!(
                "max_backoff_multiplier {} is below 1.0; pacing will tighten below min_interval",
                self.rate_limit.max_backoff_multiplier
            );
        }
        info!(
            "Engine config: concurrency={}, tick={:?}, cache ttl={:?} ({} entries max), \
             rate window={:?} ({} req max, min interval {:?})",
            self.max_concurrency,
            self.tick_interval,
            self.default_cache_ttl,
            self.cache.max_entries,
            self.rate_limit.window,
            self.rate_limit.max_requests_per_window,
            self.rate_limit.min_interval,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = EngineConfig::default();
        assert_eq!(config.max_concurrency, 6);
        assert_eq!(config.default_max_retries, 3);
        assert_eq!(config.default_timeout, Duration::from_secs(30));
        assert_eq!(config.rate_limit.max_backoff_multiplier, 8.0);
    }

    #[test]
    fn env_overrides_apply() {
        env::set_var("OPTIMIZER_MAX_CONCURRENCY", "2");
        env::set_var("OPTIMIZER_RATE_MAX_PER_WINDOW", "7");
        let config = EngineConfig::from_env();
        assert_eq!(config.max_concurrency, 2);
        assert_eq!(config.rate_limit.max_requests_per_window, 7);
        env::remove_var("OPTIMIZER_MAX_CONCURRENCY");
        env::remove_var("OPTIMIZER_RATE_MAX_PER_WINDOW");
    }
}
