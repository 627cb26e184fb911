//! Configuration management for Verdict Core

use anyhow::{Context, Result};
use std::env;

/// Execution environment. The mutation rate guard is only enforced in
/// `Production`; development and test contexts bypass it so automated
/// suites stay deterministic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Production,
    Development,
    Test,
}

impl Environment {
    pub fn from_str(value: &str) -> Self {
        match value.to_lowercase().as_str() {
            "production" | "prod" => Environment::Production,
            "test" => Environment::Test,
            _ => Environment::Development,
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Execution environment
    pub environment: Environment,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Redis configuration
    pub redis: RedisConfig,
    /// Permission cache tuning
    pub cache: CacheConfig,
    /// Mutation rate guard configuration
    pub rate_guard: RateGuardConfig,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
}

/// Permission cache tuning knobs
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Base TTL for cached effective permission sets (seconds)
    pub base_ttl_secs: u64,
    /// Uniform jitter applied to the base TTL (seconds)
    pub ttl_jitter_secs: u64,
    /// Defensive expiry applied when a key reports no TTL (seconds)
    pub safety_ttl_secs: u64,
    /// Debounce window for coalescing role invalidations (milliseconds)
    pub debounce_ms: u64,
    /// Page size for the cursor-based tenant-wide key scan
    pub scan_page_size: u32,
    /// Maximum keys passed to a single DEL during tenant invalidation
    pub delete_batch_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            base_ttl_secs: 300,
            ttl_jitter_secs: 30,
            safety_ttl_secs: 900,
            debounce_ms: 500,
            scan_page_size: 100,
            delete_batch_size: 500,
        }
    }
}

/// Mutation rate guard configuration
#[derive(Debug, Clone)]
pub struct RateGuardConfig {
    /// Whether the guard is enabled at all
    pub enabled: bool,
    /// Maximum mutations per window per scope key
    pub max_requests: u64,
    /// Window size in seconds
    pub window_secs: u64,
}

impl Default for RateGuardConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_requests: 30,
            window_secs: 60,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            environment: Environment::from_str(
                &env::var("VERDICT_ENV").unwrap_or_else(|_| "development".to_string()),
            ),
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").context("DATABASE_URL is required")?,
                max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()
                    .unwrap_or(10),
                min_connections: env::var("DATABASE_MIN_CONNECTIONS")
                    .unwrap_or_else(|_| "2".to_string())
                    .parse()
                    .unwrap_or(2),
            },
            redis: RedisConfig {
                url: env::var("REDIS_URL")
                    .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            },
            cache: CacheConfig {
                base_ttl_secs: env::var("CACHE_BASE_TTL_SECS")
                    .unwrap_or_else(|_| "300".to_string())
                    .parse()
                    .unwrap_or(300),
                ttl_jitter_secs: env::var("CACHE_TTL_JITTER_SECS")
                    .unwrap_or_else(|_| "30".to_string())
                    .parse()
                    .unwrap_or(30),
                safety_ttl_secs: env::var("CACHE_SAFETY_TTL_SECS")
                    .unwrap_or_else(|_| "900".to_string())
                    .parse()
                    .unwrap_or(900),
                debounce_ms: env::var("CACHE_DEBOUNCE_MS")
                    .unwrap_or_else(|_| "500".to_string())
                    .parse()
                    .unwrap_or(500),
                scan_page_size: env::var("CACHE_SCAN_PAGE_SIZE")
                    .unwrap_or_else(|_| "100".to_string())
                    .parse()
                    .unwrap_or(100),
                delete_batch_size: env::var("CACHE_DELETE_BATCH_SIZE")
                    .unwrap_or_else(|_| "500".to_string())
                    .parse()
                    .unwrap_or(500),
            },
            rate_guard: RateGuardConfig {
                enabled: env::var("RATE_GUARD_ENABLED")
                    .map(|s| s.to_lowercase() != "false")
                    .unwrap_or(true),
                max_requests: env::var("RATE_GUARD_MAX_REQUESTS")
                    .unwrap_or_else(|_| "30".to_string())
                    .parse()
                    .unwrap_or(30),
                window_secs: env::var("RATE_GUARD_WINDOW_SECS")
                    .unwrap_or_else(|_| "60".to_string())
                    .parse()
                    .unwrap_or(60),
            },
        })
    }
}
