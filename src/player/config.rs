use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Engine tuning for unreliable live sources.
///
/// Deep buffers and generous retry budgets absorb short encoder
/// stalls below the resilience layer; every budget is still
/// bounded so a dead origin ends in a fatal error rather than a hang.
///
/// The buffer and live-sync fields are handed to whatever adaptive engine an
/// [`EngineFactory`](super::EngineFactory) wraps. The built-in
/// [`HttpEngine`](super::http_engine::HttpEngine) only reads the retry, delay and timeout
/// budgets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Seconds of already-played media kept behind the playhead.
    /// Forwarded to external engines; unused by `HttpEngine`.
    pub back_buffer_secs: u32,
    /// Target seconds buffered ahead of the playhead.
    /// Forwarded to external engines; unused by `HttpEngine`.
    pub max_buffer_secs: u32,
    /// Hard ceiling on forward buffer.
    /// Forwarded to external engines; unused by `HttpEngine`.
    pub max_max_buffer_secs: u32,
    /// Live edge distance in target durations.
    /// Forwarded to external engines; unused by `HttpEngine`.
    pub live_sync_duration_count: u32,
    /// Latency after which the engine seeks back to the live edge.
    /// Forwarded to external engines; unused by `HttpEngine`.
    pub live_max_latency_duration_count: u32,

    pub manifest_loading_max_retry: u32,
    pub level_loading_max_retry: u32,
    pub frag_loading_max_retry: u32,
    pub manifest_loading_retry_delay_ms: u64,
    pub level_loading_retry_delay_ms: u64,
    pub frag_loading_retry_delay_ms: u64,
    pub manifest_loading_timeout_ms: u64,
    pub level_loading_timeout_ms: u64,
    pub frag_loading_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            back_buffer_secs: 90,
            max_buffer_secs: 60,
            max_max_buffer_secs: 120,
            live_sync_duration_count: 3,
            live_max_latency_duration_count: 10,
            manifest_loading_max_retry: 4,
            level_loading_max_retry: 4,
            frag_loading_max_retry: 6,
            manifest_loading_retry_delay_ms: 1000,
            level_loading_retry_delay_ms: 1000,
            frag_loading_retry_delay_ms: 1000,
            manifest_loading_timeout_ms: 20_000,
            level_loading_timeout_ms: 20_000,
            frag_loading_timeout_ms: 30_000,
        }
    }
}

/// Stream client behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Gateway endpoint sources are routed through, e.g. `/api/proxy` or
    /// `https://site.example/api/proxy`
    pub proxy_endpoint: String,
    /// How long a fatal network error may persist before it is shown
    pub network_grace_ms: u64,
    /// Start playback as soon as the manifest is parsed
    pub autoplay: bool,
    pub engine: EngineConfig,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            proxy_endpoint: "/api/proxy".to_string(),
            network_grace_ms: 8000,
            autoplay: true,
            engine: EngineConfig::default(),
        }
    }
}

impl PlayerConfig {
    pub fn network_grace(&self) -> Duration {
        Duration::from_millis(self.network_grace_ms)
    }
}
