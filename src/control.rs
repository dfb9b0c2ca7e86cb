//! Combined control plane wrapper
//!
//! One explicitly constructed instance of every component, built from
//! configuration at startup and injected into the request-handling layer.
//! Components share no mutable state with each other; the handling layer
//! passes value copies between them along the per-request flow:
//! admission -> breaker check -> cache -> upstream -> calibration ->
//! gating -> metrics.

use std::sync::Arc;
use std::time::Duration;

use crate::cache::{self, ResponseCache};
use crate::calibration::ConfidenceCalibrator;
use crate::config::Config;
use crate::failsafe::{CircuitBreaker, RateLimiter};
use crate::gating::GatingPolicy;
use crate::metrics::MetricsCollector;

/// Control plane components for the request-handling layer
#[derive(Clone)]
pub struct ControlPlane {
    /// Sliding-window admission control
    pub rate_limiter: Arc<RateLimiter>,
    /// Per-upstream failure isolation
    pub circuit_breaker: Arc<CircuitBreaker>,
    /// TTL response cache
    pub cache: Arc<ResponseCache>,
    /// Request outcome aggregation
    pub metrics: Arc<MetricsCollector>,
    /// Confidence calibration
    pub calibrator: Arc<ConfidenceCalibrator>,
    /// Confidence-gated action policy
    pub gating: GatingPolicy,
}

impl ControlPlane {
    /// Build every component from configuration
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self {
            rate_limiter: Arc::new(RateLimiter::new(&config.rate_limit)),
            circuit_breaker: Arc::new(CircuitBreaker::new(&config.circuit_breaker)),
            cache: Arc::new(ResponseCache::new(&config.cache)),
            metrics: Arc::new(MetricsCollector::new()),
            calibrator: Arc::new(ConfidenceCalibrator::new(&config.calibration)),
            gating: GatingPolicy::new(),
        }
    }

    /// Check whether a request may reach its upstream
    ///
    /// Admission control runs first (and records the request instant on
    /// success), then the breaker for the named upstream. Rejections keep
    /// their detail on the individual components; callers needing the
    /// rejection message should call them directly.
    #[must_use]
    pub fn can_proceed(&self, key: &str, endpoint: Option<&str>, upstream: &str) -> bool {
        self.rate_limiter.check(key, endpoint).allowed && !self.circuit_breaker.is_open(upstream)
    }

    /// Start the periodic cache sweep on the current tokio runtime
    ///
    /// The host owns the returned handle and aborts it on shutdown.
    pub fn spawn_cache_sweeper(&self, every: Duration) -> tokio::task::JoinHandle<()> {
        cache::spawn_sweeper(Arc::clone(&self.cache), every)
    }
}
