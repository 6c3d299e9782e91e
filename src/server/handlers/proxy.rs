use crate::{
    error::{GatewayError, Result},
    hls::{
        self, HLS_CONTENT_TYPE,
        rewriter::{ProxyLink, rewrite_playlist},
    },
    metrics,
    server::{
        state::AppState,
        url_validation::{blocked_redirect, validate_target_url},
    },
};
use axum::{
    body::Body,
    extract::{Query, State},
    http::{
        HeaderMap, HeaderName, HeaderValue, StatusCode,
        header::{self, InvalidHeaderValue},
    },
    response::{IntoResponse, Response},
};
use futures_util::TryStreamExt;
use serde::Deserialize;
use std::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

/// Playlists change every few seconds on live sources and must never be cached.
const PLAYLIST_CACHE_CONTROL: &str = "no-store, no-cache, must-revalidate, max-age=0";

/// Upstream headers copied onto streamed (non-playlist) responses.
const FORWARDED_HEADERS: [HeaderName; 5] = [
    header::CONTENT_TYPE,
    header::CONTENT_LENGTH,
    header::ACCEPT_RANGES,
    header::CONTENT_RANGE,
    header::CACHE_CONTROL,
];

/// Query string of a proxied request
#[derive(Debug, Deserialize)]
pub struct ProxyQuery {
    /// Absolute upstream URL
    pub url: Option<String>,
    /// Origin to present upstream instead of the target's own
    #[serde(rename = "ref")]
    pub referer: Option<String>,
}

/// `OPTIONS {proxy_path}`: CORS headers are added by the router layer.
pub async fn preflight() -> StatusCode {
    StatusCode::NO_CONTENT
}

/// `GET {proxy_path}?url=...`: fetch the target once and relay it.
///
/// Playlists are buffered and rewritten so nested references come back
/// through this route; everything else is streamed through untouched.
pub async fn proxy_stream(
    State(state): State<AppState>,
    Query(query): Query<ProxyQuery>,
    headers: HeaderMap,
) -> Result<Response> {
    let start = Instant::now();

    let result = forward(&state, &query, &headers).await;

    let status = match &result {
        Ok(response) => response.status(),
        Err(e) => e.status_code(),
    };
    metrics::record_request("proxy", status.as_u16());
    metrics::record_duration("proxy", start);

    result
}

async fn forward(
    state: &AppState,
    query: &ProxyQuery,
    client_headers: &HeaderMap,
) -> Result<Response> {
    let raw = query
        .url
        .as_deref()
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .ok_or(GatewayError::MissingUrl)?;

    let target = validate_target_url(raw, state.config.allow_private_targets)?;
    let origin = effective_origin(&target, query.referer.as_deref());
    let upstream_headers = browser_headers(state, &origin, client_headers)?;

    info!("Proxying {}", target);

    let response = state
        .http_client
        .get(target.clone())
        .headers(upstream_headers)
        .timeout(state.config.upstream_timeout())
        .send()
        .await
        .map_err(|e| upstream_failure(e, state.config.upstream_timeout_secs))?;

    let status = response.status();
    if !status.is_success() {
        warn!("Upstream {} answered {}", target, status);
        metrics::record_upstream_error("status");
        return Err(GatewayError::UpstreamStatus(status));
    }

    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);

    if hls::is_playlist(target.path(), content_type.as_deref()) {
        playlist_response(state, response, &origin).await
    } else {
        Ok(media_response(state, response, &target))
    }
}

/// Origin presented upstream: a valid `ref` override, else the target's own.
fn effective_origin(target: &Url, referer: Option<&str>) -> String {
    referer
        .and_then(|r| Url::parse(r.trim()).ok())
        .filter(Url::has_host)
        .map(|u| u.origin().ascii_serialization())
        .unwrap_or_else(|| target.origin().ascii_serialization())
}

/// Request headers that make the fetch look like a desktop browser page
/// embedded on `origin`.
fn browser_headers(state: &AppState, origin: &str, client: &HeaderMap) -> Result<HeaderMap> {
    let invalid =
        |e: InvalidHeaderValue| GatewayError::Internal(format!("invalid upstream header: {e}"));

    let user_agent = match client.get(header::USER_AGENT) {
        Some(ua) => ua.clone(),
        None => HeaderValue::from_str(&state.config.default_user_agent).map_err(invalid)?,
    };

    let mut headers = HeaderMap::new();
    headers.insert(header::USER_AGENT, user_agent);
    headers.insert(header::ACCEPT, HeaderValue::from_static("*/*"));
    headers.insert(
        header::ACCEPT_LANGUAGE,
        HeaderValue::from_static("en-US,en;q=0.9"),
    );
    // identity keeps Content-Length and byte ranges meaningful end to end
    headers.insert(header::ACCEPT_ENCODING, HeaderValue::from_static("identity"));
    headers.insert(header::ORIGIN, HeaderValue::from_str(origin).map_err(invalid)?);
    headers.insert(
        header::REFERER,
        HeaderValue::from_str(&format!("{origin}/")).map_err(invalid)?,
    );
    headers.insert(
        HeaderName::from_static("sec-fetch-dest"),
        HeaderValue::from_static("empty"),
    );
    headers.insert(
        HeaderName::from_static("sec-fetch-mode"),
        HeaderValue::from_static("cors"),
    );
    headers.insert(
        HeaderName::from_static("sec-fetch-site"),
        HeaderValue::from_static("cross-site"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));

    if let Some(range) = client.get(header::RANGE) {
        headers.insert(header::RANGE, range.clone());
    }

    Ok(headers)
}

fn upstream_failure(e: reqwest::Error, timeout_secs: u64) -> GatewayError {
    if let Some(GatewayError::InvalidTarget(reason)) = blocked_redirect(&e) {
        metrics::record_upstream_error("redirect");
        return GatewayError::InvalidTarget(format!("redirect refused, {reason}"));
    }
    if e.is_timeout() {
        metrics::record_upstream_error("timeout");
        GatewayError::UpstreamTimeout(timeout_secs)
    } else {
        metrics::record_upstream_error("network");
        GatewayError::Upstream(e)
    }
}

async fn playlist_response(
    state: &AppState,
    response: reqwest::Response,
    origin: &str,
) -> Result<Response> {
    // Resolve against the final URL so redirected origins keep working.
    let source = response.url().clone();
    let text = response
        .text()
        .await
        .map_err(|e| upstream_failure(e, state.config.upstream_timeout_secs))?;

    let link = ProxyLink::new(state.config.proxy_path.as_str()).with_referer_origin(origin);
    let rewritten = rewrite_playlist(&text, &source, &link);

    debug!(
        "Rewrote playlist {} ({} references, {} bytes)",
        source,
        rewritten.references,
        rewritten.body.len()
    );
    metrics::record_playlist_rewrite(rewritten.references);

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, HLS_CONTENT_TYPE),
            (header::CACHE_CONTROL, PLAYLIST_CACHE_CONTROL),
            (header::PRAGMA, "no-cache"),
            (header::EXPIRES, "0"),
        ],
        rewritten.body,
    )
        .into_response())
}

fn media_response(state: &AppState, response: reqwest::Response, target: &Url) -> Response {
    let status = response.status();

    let mut headers = HeaderMap::new();
    for name in FORWARDED_HEADERS {
        if let Some(value) = response.headers().get(&name) {
            headers.insert(name, value.clone());
        }
    }

    // Some origins label segments octet-stream or text/plain, which MSE rejects.
    let generic_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| {
            let ct = ct.to_ascii_lowercase();
            ct.starts_with("application/octet-stream") || ct.starts_with("text/plain")
        })
        .unwrap_or(true);
    if generic_type && let Some(fallback) = hls::segment_content_type(target.path()) {
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(fallback));
    }

    if !hls::is_m3u8_path(target.path())
        && !headers.contains_key(header::CACHE_CONTROL)
        && let Ok(value) =
            HeaderValue::from_str(&format!("public, max-age={}", state.config.segment_max_age_secs))
    {
        headers.insert(header::CACHE_CONTROL, value);
    }

    let target = target.to_string();
    let body = response.bytes_stream().inspect_err(move |e| {
        warn!("Upstream body for {} failed mid-stream: {}", target, e);
        metrics::record_upstream_error("stream");
    });

    (status, headers, Body::from_stream(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::url_validation::redirect_policy;
    use wiremock::matchers::path;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn target() -> Url {
        Url::parse("https://cdn.example.com:8443/live/index.m3u8").unwrap()
    }

    #[test]
    fn origin_defaults_to_target() {
        assert_eq!(
            effective_origin(&target(), None),
            "https://cdn.example.com:8443"
        );
    }

    #[test]
    fn ref_override_reduced_to_origin() {
        assert_eq!(
            effective_origin(&target(), Some("https://site.example.org/watch/42")),
            "https://site.example.org"
        );
    }

    #[test]
    fn unusable_ref_ignored() {
        assert_eq!(
            effective_origin(&target(), Some("not a url")),
            "https://cdn.example.com:8443"
        );
        assert_eq!(
            effective_origin(&target(), Some("data:text/plain,hi")),
            "https://cdn.example.com:8443"
        );
    }

    #[tokio::test]
    async fn refused_redirect_maps_to_bad_request() {
        let origin = MockServer::start().await;
        Mock::given(path("/live/index.m3u8"))
            .respond_with(
                ResponseTemplate::new(302)
                    .insert_header("location", "http://[::ffff:127.0.0.1]/secret.ts"),
            )
            .mount(&origin)
            .await;
        let client = reqwest::Client::builder()
            .redirect(redirect_policy(false))
            .build()
            .unwrap();

        let err = client
            .get(format!("{}/live/index.m3u8", origin.uri()))
            .send()
            .await
            .unwrap_err();

        let mapped = upstream_failure(err, 30);
        assert!(matches!(mapped, GatewayError::InvalidTarget(_)));
        assert_eq!(mapped.status_code(), StatusCode::BAD_REQUEST);
    }
}
