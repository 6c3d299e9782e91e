//! Source URL handling: routing through the gateway and cache busting.

use url::{Url, form_urlencoded};

/// The collaborator record a channel directory hands us.
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
pub struct ChannelSource {
    pub source_url: String,
    pub is_hls: bool,
}

impl ChannelSource {
    /// Build a record, treating anything that names an `.m3u8` as HLS.
    pub fn from_url(source_url: impl Into<String>) -> Self {
        let source_url = source_url.into();
        let is_hls = source_url.to_ascii_lowercase().contains(".m3u8");
        Self { source_url, is_hls }
    }
}

/// Route `source` through the gateway at `proxy_endpoint`.
///
/// Sources that are already gateway URLs, local paths, or `blob:`/`data:`
/// URLs are returned unchanged (trimmed).
pub fn playback_url(source: &str, proxy_endpoint: &str) -> String {
    let source = source.trim();
    if source.is_empty()
        || source.starts_with("blob:")
        || source.starts_with("data:")
        || is_proxied(source, proxy_endpoint)
    {
        return source.to_string();
    }

    let encoded: String = form_urlencoded::byte_serialize(source.as_bytes()).collect();
    format!("{proxy_endpoint}?url={encoded}")
}

fn is_proxied(source: &str, proxy_endpoint: &str) -> bool {
    source.starts_with('/') || is_gateway_url(source, proxy_endpoint)
}

/// Whether `url` addresses the gateway's proxy route, either as the
/// configured endpoint itself or by its path.
///
/// `blob:` and `data:` URLs never do, whatever their payload contains.
pub fn is_gateway_url(url: &str, proxy_endpoint: &str) -> bool {
    let url = url.trim();
    if url.is_empty() || url.starts_with("blob:") || url.starts_with("data:") {
        return false;
    }
    if url.starts_with(proxy_endpoint) {
        return true;
    }

    let proxy_path = Url::parse(proxy_endpoint)
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| proxy_endpoint.to_string());

    match Url::parse(url) {
        Ok(parsed) => parsed.path() == proxy_path,
        Err(_) => url.split(['?', '#']).next() == Some(proxy_path.as_str()),
    }
}

/// Append a `_retry=<attempt>` parameter so caches cannot replay a failed load.
///
/// Only meaningful for gateway URLs; callers check [`is_gateway_url`] first.
pub fn cache_bust(url: &str, attempt: u32) -> String {
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{url}{separator}_retry={attempt}")
}
