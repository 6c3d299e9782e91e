use crate::{
    config::Config,
    error::GatewayError,
    metrics,
    server::{rate_limit::RateLimiter, url_validation::redirect_policy},
};
use chrono::{DateTime, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use reqwest::Client;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<Config>,
    /// Shared HTTP client for connection pooling
    pub http_client: Client,
    /// Per-IP limiter, absent when `rate_limit_rpm` is 0
    pub rate_limiter: Option<RateLimiter>,
    /// Prometheus render handle, absent if another recorder is installed
    pub metrics: Option<PrometheusHandle>,
    pub started_at: DateTime<Utc>,
    pub started: Instant,
}

impl AppState {
    /// Create a new AppState with the given configuration
    pub fn new(config: Config) -> Result<Self, GatewayError> {
        // No client-wide timeout: each proxied fetch sets its own.
        // Compression stays off so byte ranges and Content-Length pass through intact.
        let http_client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .connect_timeout(Duration::from_secs(10))
            .redirect(redirect_policy(config.allow_private_targets))
            .build()
            .map_err(|e| GatewayError::Internal(format!("Failed to create HTTP client: {e}")))?;

        let rate_limiter = (config.rate_limit_rpm > 0).then(|| RateLimiter::new(config.rate_limit_rpm));

        Ok(Self {
            config: Arc::new(config),
            http_client,
            rate_limiter,
            metrics: metrics::handle(),
            started_at: Utc::now(),
            started: Instant::now(),
        })
    }
}
