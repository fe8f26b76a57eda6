use crate::{
    config::Config,
    error::Result,
    relay::origin::OriginGate,
    upstream::{HttpUpstream, Upstream},
};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Application state shared across all handlers
///
/// Everything here is read-only after startup.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<Config>,
    /// Caller origin check built from the configured allow-list
    pub origin_gate: OriginGate,
    /// Executes outbound requests
    pub upstream: Arc<dyn Upstream>,
    /// Process start, reported by the health endpoint
    pub started_at: Instant,
}

impl AppState {
    /// Create a new AppState backed by a pooled HTTP client
    pub fn new(config: Config) -> Result<Self> {
        let upstream = HttpUpstream::new(Duration::from_secs(config.upstream_timeout_secs))?;
        Ok(Self::with_upstream(config, Arc::new(upstream)))
    }

    /// Create an AppState with a caller-provided upstream
    pub fn with_upstream(config: Config, upstream: Arc<dyn Upstream>) -> Self {
        let origin_gate = OriginGate::new(
            config.allow_list.clone(),
            config.allow_loopback_without_origin,
        );

        Self {
            config: Arc::new(config),
            origin_gate,
            upstream,
            started_at: Instant::now(),
        }
    }
}
