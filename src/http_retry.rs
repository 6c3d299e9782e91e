//! Playlist fetches with bounded retry.
//!
//! Used by the player's [`HttpEngine`](crate::player::http_engine::HttpEngine)
//! for manifest and level loads. The gateway itself never retries: each
//! proxied request makes exactly one upstream attempt.

use reqwest::{Client, Response};
use std::time::Duration;
use tracing::warn;

/// Configuration for [`fetch_with_retry`].
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total number of attempts (minimum 1; 0 is treated as 1).
    pub max_attempts: u32,
    /// Sleep duration between consecutive attempts.
    pub backoff: Duration,
    /// Optional per-attempt timeout.
    ///
    /// When `None`, the client's own timeout applies.
    pub timeout: Option<Duration>,
}

impl RetryConfig {
    /// Build from a "max retries" budget: `retries` extra attempts after the first.
    pub fn with_retries(retries: u32, backoff: Duration, timeout: Duration) -> Self {
        Self {
            max_attempts: retries.saturating_add(1),
            backoff,
            timeout: Some(timeout),
        }
    }
}

/// GET `url`, retrying network failures and non-2xx answers.
///
/// Returns the first 2xx [`Response`], or the error from the final attempt
/// (a non-2xx final answer is converted via `error_for_status`).
pub async fn fetch_with_retry(
    client: &Client,
    url: &str,
    config: &RetryConfig,
) -> Result<Response, reqwest::Error> {
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        let mut request = client.get(url);
        if let Some(timeout) = config.timeout {
            request = request.timeout(timeout);
        }

        let outcome = request.send().await.and_then(Response::error_for_status);

        match outcome {
            Ok(response) => return Ok(response),
            Err(e) if attempt >= max_attempts => {
                warn!(
                    "Playlist fetch gave up on {} after {} attempt(s): {}",
                    url, attempt, e
                );
                return Err(e);
            }
            Err(e) => {
                warn!(
                    "Playlist fetch failed for {} (attempt {}/{}): {}; retrying in {}ms",
                    url,
                    attempt,
                    max_attempts,
                    e,
                    config.backoff.as_millis()
                );
            }
        }

        tokio::time::sleep(config.backoff).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn retries_budget_adds_initial_attempt() {
        let cfg = RetryConfig::with_retries(4, Duration::from_secs(1), Duration::from_secs(10));
        assert_eq!(cfg.max_attempts, 5);
        assert_eq!(cfg.timeout, Some(Duration::from_secs(10)));

        let saturated = RetryConfig::with_retries(u32::MAX, Duration::ZERO, Duration::ZERO);
        assert_eq!(saturated.max_attempts, u32::MAX);
    }

    #[tokio::test]
    async fn returns_playlist_on_first_attempt() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/live/index.m3u8"))
            .respond_with(ResponseTemplate::new(200).set_body_string("#EXTM3U\n"))
            .expect(1)
            .mount(&server)
            .await;

        // No per-attempt timeout: the client's own applies.
        let config = RetryConfig {
            max_attempts: 2,
            backoff: Duration::from_millis(1),
            timeout: None,
        };
        let url = format!("{}/live/index.m3u8", server.uri());

        let response = fetch_with_retry(&Client::new(), &url, &config)
            .await
            .unwrap();
        assert_eq!(response.text().await.unwrap(), "#EXTM3U\n");
    }

    #[tokio::test]
    async fn recovers_after_origin_hiccup() {
        let server = MockServer::start().await;

        // 200 fallback (lower priority, mounted first)
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("#EXTM3U\n#EXT-X-ENDLIST\n"))
            .mount(&server)
            .await;

        // Two 503s first (higher priority, mounted last)
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;

        let config = RetryConfig {
            max_attempts: 3,
            backoff: Duration::from_millis(1),
            timeout: None,
        };

        let response = fetch_with_retry(&Client::new(), &server.uri(), &config)
            .await
            .expect("third attempt should succeed");
        assert!(response.text().await.unwrap().contains("ENDLIST"));
    }

    #[tokio::test]
    async fn final_status_error_is_returned() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(2)
            .mount(&server)
            .await;

        let config = RetryConfig {
            max_attempts: 2,
            backoff: Duration::from_millis(1),
            timeout: None,
        };

        let err = fetch_with_retry(&Client::new(), &server.uri(), &config)
            .await
            .unwrap_err();
        assert_eq!(err.status().map(|s| s.as_u16()), Some(404));
    }

    #[tokio::test]
    async fn zero_attempts_still_fetches_once() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let config = RetryConfig {
            max_attempts: 0,
            backoff: Duration::from_millis(1),
            timeout: None,
        };

        assert!(
            fetch_with_retry(&Client::new(), &server.uri(), &config)
                .await
                .is_err()
        );
    }
}
