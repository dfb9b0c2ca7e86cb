//! Operational metrics aggregation
//!
//! Tracks request outcomes, per-endpoint latency samples, fallback usage
//! and upstream provider errors, and derives alerts on demand. Counters
//! only ever increase; there is no reset in normal operation.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use dashmap::DashMap;
use serde::Serialize;
use tracing::trace;

/// Latency samples kept per endpoint (oldest dropped first)
const LATENCY_SAMPLE_CAP: usize = 1000;

/// Collector for request and provider metrics
pub struct MetricsCollector {
    /// Collector start time, for uptime
    started: Instant,
    /// Total requests recorded
    requests_total: AtomicU64,
    /// Requests with a 2xx status
    requests_2xx: AtomicU64,
    /// Requests with a 4xx status
    requests_4xx: AtomicU64,
    /// Requests with a 5xx status
    requests_5xx: AtomicU64,
    /// Requests served via a fallback path
    fallback_count: AtomicU64,
    /// Error counts per upstream provider
    provider_errors: DashMap<String, AtomicU64>,
    /// Recent latency samples per endpoint
    endpoint_latency: DashMap<String, VecDeque<f64>>,
}

impl MetricsCollector {
    /// Create a new collector; uptime counts from here
    #[must_use]
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            requests_total: AtomicU64::new(0),
            requests_2xx: AtomicU64::new(0),
            requests_4xx: AtomicU64::new(0),
            requests_5xx: AtomicU64::new(0),
            fallback_count: AtomicU64::new(0),
            provider_errors: DashMap::new(),
            endpoint_latency: DashMap::new(),
        }
    }

    /// Record the outcome of a handled request
    ///
    /// Status codes outside the 2xx/4xx/5xx ranges still count toward the
    /// total; recording is best-effort and never rejects what the handling
    /// layer reports.
    pub fn record_request(
        &self,
        endpoint: &str,
        status_code: u16,
        latency_ms: f64,
        provider: Option<&str>,
        used_fallback: bool,
    ) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);

        match status_code {
            200..=299 => {
                self.requests_2xx.fetch_add(1, Ordering::Relaxed);
            }
            400..=499 => {
                self.requests_4xx.fetch_add(1, Ordering::Relaxed);
            }
            500..=599 => {
                self.requests_5xx.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }

        if used_fallback {
            self.fallback_count.fetch_add(1, Ordering::Relaxed);
        }

        let mut samples = self.endpoint_latency.entry(endpoint.to_string()).or_default();
        if samples.len() >= LATENCY_SAMPLE_CAP {
            samples.pop_front();
        }
        samples.push_back(latency_ms);
        drop(samples);

        trace!(
            endpoint = %endpoint,
            status_code,
            latency_ms,
            provider = provider.unwrap_or("-"),
            used_fallback,
            "Request recorded"
        );
    }

    /// Record an upstream provider error
    pub fn record_provider_error(&self, provider: &str) {
        self.provider_errors
            .entry(provider.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot of all aggregates
    #[allow(clippy::cast_precision_loss)]
    pub fn summary(&self) -> MetricsSummary {
        let total = self.requests_total.load(Ordering::Relaxed);
        let errors_4xx = self.requests_4xx.load(Ordering::Relaxed);
        let errors_5xx = self.requests_5xx.load(Ordering::Relaxed);
        let fallbacks = self.fallback_count.load(Ordering::Relaxed);
        // Treat an empty collector as one request so rates stay defined
        let denominator = total.max(1) as f64;

        let avg_latency_ms: BTreeMap<String, f64> = self
            .endpoint_latency
            .iter()
            .filter(|entry| !entry.value().is_empty())
            .map(|entry| {
                let samples = entry.value();
                let avg = samples.iter().sum::<f64>() / samples.len() as f64;
                (entry.key().clone(), avg)
            })
            .collect();

        let provider_errors: BTreeMap<String, u64> = self
            .provider_errors
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().load(Ordering::Relaxed)))
            .collect();

        MetricsSummary {
            uptime_seconds: self.started.elapsed().as_secs(),
            requests_total: total,
            requests_2xx: self.requests_2xx.load(Ordering::Relaxed),
            requests_4xx: errors_4xx,
            requests_5xx: errors_5xx,
            fallback_count: fallbacks,
            fallback_rate: fallbacks as f64 / denominator,
            error_rate: (errors_4xx + errors_5xx) as f64 / denominator,
            provider_errors,
            avg_latency_ms,
        }
    }

    /// Check alert thresholds
    ///
    /// Alerts are recomputed from the current aggregates on every call and
    /// never stored.
    pub fn check_alerts(&self) -> Vec<String> {
        let summary = self.summary();
        let mut alerts = Vec::new();

        if summary.error_rate > 0.1 {
            alerts.push(format!(
                "High error rate: {:.1}%",
                summary.error_rate * 100.0
            ));
        }

        if summary.fallback_rate > 0.2 {
            alerts.push(format!(
                "High fallback rate: {:.1}%",
                summary.fallback_rate * 100.0
            ));
        }

        for (provider, count) in &summary.provider_errors {
            if *count > 10 {
                alerts.push(format!("Provider {provider} has {count} errors"));
            }
        }

        alerts
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of operational metrics
///
/// Serializable for the handling layer's admin endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSummary {
    /// Seconds since the collector was created
    pub uptime_seconds: u64,
    /// Total requests recorded
    pub requests_total: u64,
    /// 2xx responses
    pub requests_2xx: u64,
    /// 4xx responses
    pub requests_4xx: u64,
    /// 5xx responses
    pub requests_5xx: u64,
    /// Requests served via fallback
    pub fallback_count: u64,
    /// fallback_count / requests_total
    pub fallback_rate: f64,
    /// (4xx + 5xx) / requests_total
    pub error_rate: f64,
    /// Error count per upstream provider
    pub provider_errors: BTreeMap<String, u64>,
    /// Average latency per endpoint (milliseconds)
    pub avg_latency_ms: BTreeMap<String, f64>,
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_status_classification() {
        let metrics = MetricsCollector::new();

        metrics.record_request("/api/vision_diagnostic", 200, 120.0, Some("groq"), false);
        metrics.record_request("/api/vision_diagnostic", 404, 5.0, None, false);
        metrics.record_request("/api/vision_diagnostic", 500, 80.0, None, false);

        let summary = metrics.summary();
        assert_eq!(summary.requests_total, 3);
        assert_eq!(summary.requests_2xx, 1);
        assert_eq!(summary.requests_4xx, 1);
        assert_eq!(summary.requests_5xx, 1);
        assert!((summary.error_rate - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_unclassified_status_still_counts() {
        let metrics = MetricsCollector::new();

        metrics.record_request("/api/weird", 302, 1.0, None, false);
        metrics.record_request("/api/weird", 700, 1.0, None, false);

        let summary = metrics.summary();
        assert_eq!(summary.requests_total, 2);
        assert_eq!(summary.requests_2xx, 0);
        assert_eq!(summary.requests_4xx, 0);
        assert_eq!(summary.requests_5xx, 0);
    }

    #[test]
    fn test_fallback_rate() {
        let metrics = MetricsCollector::new();

        metrics.record_request("/api/weather_forecast", 200, 50.0, None, true);
        metrics.record_request("/api/weather_forecast", 200, 40.0, None, false);

        let summary = metrics.summary();
        assert_eq!(summary.fallback_count, 1);
        assert!((summary.fallback_rate - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_rates_defined_with_no_requests() {
        let metrics = MetricsCollector::new();
        let summary = metrics.summary();

        assert_eq!(summary.requests_total, 0);
        assert!(summary.error_rate.abs() < f64::EPSILON);
        assert!(summary.fallback_rate.abs() < f64::EPSILON);
    }

    #[test]
    fn test_average_latency() {
        let metrics = MetricsCollector::new();

        metrics.record_request("/api/vision_poi", 200, 100.0, None, false);
        metrics.record_request("/api/vision_poi", 200, 200.0, None, false);

        let summary = metrics.summary();
        let avg = summary.avg_latency_ms.get("/api/vision_poi").expect("avg");
        assert!((avg - 150.0).abs() < 1e-9);
    }

    #[test]
    fn test_latency_samples_capped() {
        let metrics = MetricsCollector::new();

        // 1100 samples: the first 100 (latency 0.0) fall out of the ring
        for i in 0..1100 {
            metrics.record_request("/api/hot", 200, f64::from(i / 100), None, false);
        }

        let samples = metrics.endpoint_latency.get("/api/hot").expect("samples");
        assert_eq!(samples.len(), 1000);
        assert!((samples.front().expect("front") - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_provider_errors() {
        let metrics = MetricsCollector::new();

        metrics.record_provider_error("gemini");
        metrics.record_provider_error("gemini");
        metrics.record_provider_error("open_meteo");

        let summary = metrics.summary();
        assert_eq!(summary.provider_errors.get("gemini"), Some(&2));
        assert_eq!(summary.provider_errors.get("open_meteo"), Some(&1));
    }

    #[test]
    fn test_no_alerts_when_healthy() {
        let metrics = MetricsCollector::new();

        for _ in 0..20 {
            metrics.record_request("/api/ok", 200, 10.0, None, false);
        }

        assert!(metrics.check_alerts().is_empty());
    }

    #[test]
    fn test_error_rate_alert() {
        let metrics = MetricsCollector::new();

        metrics.record_request("/api/bad", 500, 10.0, None, false);
        metrics.record_request("/api/bad", 200, 10.0, None, false);

        let alerts = metrics.check_alerts();
        assert!(alerts.iter().any(|alert| alert.contains("High error rate")));
    }

    #[test]
    fn test_fallback_rate_alert() {
        let metrics = MetricsCollector::new();

        metrics.record_request("/api/ok", 200, 10.0, None, true);
        metrics.record_request("/api/ok", 200, 10.0, None, false);

        let alerts = metrics.check_alerts();
        assert!(alerts.iter().any(|alert| alert.contains("High fallback rate")));
    }

    #[test]
    fn test_provider_error_alert() {
        let metrics = MetricsCollector::new();

        for _ in 0..11 {
            metrics.record_provider_error("gemini");
        }

        let alerts = metrics.check_alerts();
        assert!(alerts.iter().any(|alert| alert.contains("gemini") && alert.contains("11")));
    }
}
