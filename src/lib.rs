//! Cropguard Control Plane Library
//!
//! Reliability and confidence-gating control plane for crop advisory
//! services. Sits between inbound requests and expensive upstream
//! operations (vision inference, LLM calls, weather providers), and between
//! inference results and user-facing recommendations.
//!
//! # Features
//!
//! - **Admission Control**: sliding-window rate limits per caller, per
//!   endpoint, and globally
//! - **Failure Isolation**: per-upstream circuit breakers with lazy
//!   half-open recovery
//! - **Memoization**: TTL response cache with deterministic keys
//! - **Observability**: request/latency/provider-error aggregation with
//!   derived alerts
//! - **Safety Gating**: calibrated confidence bands and per-action gating,
//!   including a hard override for untrusted inference pipelines
//!
//! All components are in-memory, non-blocking, and safe to call directly on
//! the hot request path. The handling layer constructs a [`control::ControlPlane`]
//! at startup and injects it wherever decisions are needed.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cache;
pub mod calibration;
pub mod config;
pub mod control;
pub mod error;
pub mod failsafe;
pub mod gating;
pub mod metrics;

pub use control::ControlPlane;
pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber.with(fmt::layer().json()).init();
        }
        _ => {
            subscriber.with(fmt::layer()).init();
        }
    }

    Ok(())
}
