//! Per-client rate limiting middleware.
//!
//! A player pulls one playlist refresh every target duration plus a few
//! segments, so a fixed-window counter keyed by client address is enough to
//! stop a misbehaving page from hammering third-party origins through us.

use axum::{
    extract::{ConnectInfo, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

use super::state::AppState;
use crate::metrics;

/// Per-client fixed-window rate limiter.
#[derive(Clone, Debug)]
pub struct RateLimiter {
    /// Counters per client key: (request_count, window_start)
    counters: Arc<DashMap<String, (u32, Instant)>>,
    /// Max requests per window
    limit: u32,
    window: Duration,
}

impl RateLimiter {
    /// Create a limiter allowing `requests_per_minute` per client.
    pub fn new(requests_per_minute: u32) -> Self {
        Self::with_window(requests_per_minute, Duration::from_secs(60))
    }

    fn with_window(limit: u32, window: Duration) -> Self {
        Self {
            counters: Arc::new(DashMap::new()),
            limit,
            window,
        }
    }

    /// Count one request from `client`; `false` once it is over the limit.
    fn check(&self, client: &str) -> bool {
        let now = Instant::now();
        let mut entry = self.counters.entry(client.to_string()).or_insert((0, now));

        if entry.1.elapsed() >= self.window {
            *entry = (0, now);
        }

        entry.0 = entry.0.saturating_add(1);
        entry.0 <= self.limit
    }

    /// Drop counters whose window has expired.
    pub fn cleanup(&self) {
        self.counters
            .retain(|_, (_, window_start)| window_start.elapsed() < self.window);
    }
}

/// Client key: first `X-Forwarded-For` hop, then `X-Real-IP`, then the peer
/// address. Only requests with none of these share the `unknown` bucket.
fn client_key(req: &Request) -> String {
    let headers = req.headers();

    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim);
    let real_ip = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim);

    if let Some(ip) = forwarded
        .filter(|ip| !ip.is_empty())
        .or(real_ip.filter(|ip| !ip.is_empty()))
    {
        return ip.to_string();
    }

    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(peer)| peer.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Axum middleware: answer 429 once a client exceeds its window.
pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    if let Some(ref limiter) = state.rate_limiter {
        let client = client_key(&req);
        if !limiter.check(&client) {
            warn!("Rate limit exceeded for client: {}", client);
            metrics::record_request("rate_limited", 429);
            return (StatusCode::TOO_MANY_REQUESTS, "Rate limit exceeded").into_response();
        }
    }

    next.run(req).await
}
