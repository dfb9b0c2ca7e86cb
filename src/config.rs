//! Configuration management
//!
//! All configuration is read once at process start. Components hold plain
//! copies of the values they need; nothing re-reads configuration at runtime.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    time::Duration,
};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Rate limiting configuration
    pub rate_limit: RateLimitConfig,
    /// Circuit breaker configuration
    pub circuit_breaker: CircuitBreakerConfig,
    /// Response cache configuration
    pub cache: CacheConfig,
    /// Confidence calibration configuration
    pub calibration: CalibrationConfig,
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        // Load from file if provided
        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // Merge environment variables (CROPGUARD_ prefix)
        figment = figment.merge(Env::prefixed("CROPGUARD_").split("__"));

        figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))
    }
}

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Requests per window for a single caller key
    pub per_key_limit: u32,
    /// Requests per window across all callers
    pub global_limit: u32,
    /// Sliding window duration
    #[serde(with = "humantime_serde")]
    pub window: Duration,
    /// Tighter per-window limits for expensive endpoints.
    /// The effective limit for a key is `min(per_key_limit, override)`.
    pub endpoint_overrides: HashMap<String, u32>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_key_limit: 30,
            global_limit: 1000,
            window: Duration::from_secs(60),
            endpoint_overrides: default_endpoint_overrides(),
        }
    }
}

/// Default override table: vision and upstream-heavy endpoints
fn default_endpoint_overrides() -> HashMap<String, u32> {
    HashMap::from([
        ("/api/vision_diagnostic".to_string(), 10),
        ("/api/vision_poi".to_string(), 15),
        ("/api/vision_chat".to_string(), 10),
        ("/api/weather_forecast".to_string(), 20),
        ("/api/agmarknet_prices".to_string(), 30),
    ])
}

/// Circuit breaker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening
    pub failure_threshold: u32,
    /// Time to wait after the last failure before admitting trial calls
    #[serde(with = "humantime_serde")]
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(60),
        }
    }
}

/// Cache configuration for response caching
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Default TTL for cached responses
    #[serde(with = "humantime_serde")]
    pub default_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(300),
        }
    }
}

/// Confidence calibration configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Temperature for fallback scaling (higher = more conservative)
    pub temperature: f64,
    /// Optional path to a pre-fitted calibration artifact (JSON with
    /// `temperature`, `logistic_weights`, `logistic_bias`)
    pub artifact_path: Option<PathBuf>,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            temperature: 1.5,
            artifact_path: None,
        }
    }
}
