//! A playlist-driven engine over plain HTTP.
//!
//! It performs the network side of adaptive playback: manifest, level and
//! newest-fragment loads with bounded retry, live refresh every target
//! duration, and the fatal/non-fatal error classification the stream client
//! reacts to. Decoding is left to the host's media element.

use super::config::EngineConfig;
use super::engine::{Engine, EngineError, EngineErrorKind, EngineEvent, EngineFactory, EventSink};
use super::media::SharedMedia;
use crate::http_retry::{RetryConfig, fetch_with_retry};
use m3u8_rs::{MediaPlaylist, Playlist};
use reqwest::Client;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

/// Creates [`HttpEngine`]s sharing one HTTP client.
#[derive(Debug, Clone, Default)]
pub struct HttpEngineFactory {
    client: Client,
    base: Option<Url>,
}

impl HttpEngineFactory {
    pub fn new(client: Client) -> Self {
        Self { client, base: None }
    }

    /// Resolve relative sources (e.g. `/api/proxy?url=…`) against `base`.
    pub fn with_base(mut self, base: Url) -> Self {
        self.base = Some(base);
        self
    }
}

impl EngineFactory for HttpEngineFactory {
    fn is_supported(&self) -> bool {
        true
    }

    fn create(&self, config: &EngineConfig, events: EventSink) -> Box<dyn Engine> {
        Box::new(HttpEngine {
            client: self.client.clone(),
            base: self.base.clone(),
            config: config.clone(),
            events,
            source: None,
            media: None,
            loading: None,
            destroyed: false,
        })
    }
}

pub struct HttpEngine {
    client: Client,
    base: Option<Url>,
    config: EngineConfig,
    events: EventSink,
    source: Option<String>,
    media: Option<SharedMedia>,
    loading: Option<CancellationToken>,
    destroyed: bool,
}

impl HttpEngine {
    fn stop(&mut self) {
        if let Some(token) = self.loading.take() {
            token.cancel();
        }
    }
}

impl Engine for HttpEngine {
    fn load_source(&mut self, url: &str) {
        self.source = Some(url.to_string());
        if self.media.is_some() {
            self.start_load();
        }
    }

    fn attach_media(&mut self, media: SharedMedia) {
        self.media = Some(media);
        if self.source.is_some() {
            self.start_load();
        }
    }

    fn start_load(&mut self) {
        if self.destroyed {
            return;
        }
        self.stop();

        let Some(source) = self.source.as_deref() else {
            return;
        };
        let Some(url) = resolve_source(source, self.base.as_ref()) else {
            self.events.emit(EngineEvent::Error(EngineError::fatal(
                EngineErrorKind::Other,
                format!("cannot resolve source URL {source}"),
            )));
            return;
        };

        debug!("Engine (session {}) loading {}", self.events.generation(), url);
        let cancel = CancellationToken::new();
        let loader = Loader {
            client: self.client.clone(),
            config: self.config.clone(),
            events: self.events.clone(),
            cancel: cancel.clone(),
        };
        tokio::spawn(loader.run(url));
        self.loading = Some(cancel);
    }

    fn recover_media_error(&mut self) {
        // Nothing is decoded here, so there is no pipeline to rebuild.
        debug!(
            "Engine (session {}) media recovery requested",
            self.events.generation()
        );
    }

    fn destroy(&mut self) {
        self.destroyed = true;
        self.stop();
        self.media = None;
    }
}

fn resolve_source(source: &str, base: Option<&Url>) -> Option<Url> {
    match Url::parse(source) {
        Ok(url) => Some(url),
        Err(url::ParseError::RelativeUrlWithoutBase) => base?.join(source).ok(),
        Err(_) => None,
    }
}

enum LoadError {
    Network(reqwest::Error),
    Parse(String),
}

struct Loaded {
    /// Final URL after redirects; relative references resolve against it
    url: Url,
    playlist: Playlist,
}

struct Loader {
    client: Client,
    config: EngineConfig,
    events: EventSink,
    cancel: CancellationToken,
}

impl Loader {
    async fn run(self, url: Url) {
        let cancel = self.cancel.clone();
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Engine (session {}) stopped loading", self.events.generation());
            }
            _ = self.load(url) => {}
        }
    }

    async fn load(&self, manifest_url: Url) {
        let manifest = match self.fetch_playlist(&manifest_url, &self.manifest_retry()).await {
            Ok(loaded) => loaded,
            Err(e) => return self.fail("manifestLoadError", e),
        };

        let (mut level_url, mut pending) = match manifest.playlist {
            Playlist::MasterPlaylist(master) => {
                let variants: Vec<_> = master.variants.iter().filter(|v| !v.is_i_frame).collect();
                let Some(first) = variants.first() else {
                    return self.fail(
                        "manifestParsingError",
                        LoadError::Parse("master playlist lists no variants".into()),
                    );
                };
                let Ok(level_url) = manifest.url.join(&first.uri) else {
                    return self.fail(
                        "manifestParsingError",
                        LoadError::Parse(format!("bad variant URI {}", first.uri)),
                    );
                };
                self.emit(EngineEvent::ManifestParsed {
                    levels: variants.len(),
                });
                (level_url, None)
            }
            Playlist::MediaPlaylist(media) => {
                self.emit(EngineEvent::ManifestParsed { levels: 1 });
                (manifest.url, Some(media))
            }
        };

        let mut last_fragment = None;
        loop {
            let media = match pending.take() {
                Some(media) => media,
                None => match self.fetch_playlist(&level_url, &self.level_retry()).await {
                    Ok(Loaded {
                        url,
                        playlist: Playlist::MediaPlaylist(media),
                    }) => {
                        level_url = url;
                        media
                    }
                    // One master hop only; anything deeper could loop forever.
                    Ok(_) => {
                        return self.fail(
                            "levelParsingError",
                            LoadError::Parse(format!("{level_url} is a nested master playlist")),
                        );
                    }
                    Err(e) => return self.fail("levelLoadError", e),
                },
            };

            let live = !media.end_list;
            self.emit(EngineEvent::LevelLoaded { live });

            if let Err(e) = self
                .load_newest_fragment(&level_url, &media, &mut last_fragment)
                .await
            {
                return self.fail("fragLoadError", e);
            }

            if !live {
                info!(
                    "Engine (session {}) reached end of finite playlist",
                    self.events.generation()
                );
                return;
            }
            tokio::time::sleep(refresh_interval(&media)).await;
        }
    }

    async fn fetch_playlist(&self, url: &Url, retry: &RetryConfig) -> Result<Loaded, LoadError> {
        let response = fetch_with_retry(&self.client, url.as_str(), retry)
            .await
            .map_err(LoadError::Network)?;
        let url = response.url().clone();
        let body = response.bytes().await.map_err(LoadError::Network)?;

        let playlist = m3u8_rs::parse_playlist_res(&body)
            .map_err(|_| LoadError::Parse(format!("unparseable playlist at {url}")))?;
        Ok(Loaded { url, playlist })
    }

    /// Fetch the newest segment once per media sequence number.
    async fn load_newest_fragment(
        &self,
        level_url: &Url,
        media: &MediaPlaylist,
        last_fragment: &mut Option<u64>,
    ) -> Result<(), LoadError> {
        let Some(segment) = media.segments.last() else {
            return Ok(());
        };
        let sequence = media.media_sequence + media.segments.len() as u64 - 1;
        if last_fragment.is_some_and(|last| last >= sequence) {
            return Ok(());
        }

        let url = level_url
            .join(&segment.uri)
            .map_err(|_| LoadError::Parse(format!("bad segment URI {}", segment.uri)))?;
        let response = fetch_with_retry(&self.client, url.as_str(), &self.frag_retry())
            .await
            .map_err(LoadError::Network)?;
        let bytes = response.bytes().await.map_err(LoadError::Network)?;

        debug!(
            "Engine (session {}) fragment {} loaded ({} bytes)",
            self.events.generation(),
            sequence,
            bytes.len()
        );
        *last_fragment = Some(sequence);
        self.emit(EngineEvent::FragmentLoaded);
        Ok(())
    }

    fn emit(&self, event: EngineEvent) {
        if !self.cancel.is_cancelled() {
            self.events.emit(event);
        }
    }

    fn fail(&self, context: &str, error: LoadError) {
        let error = match error {
            LoadError::Network(e) => {
                EngineError::fatal(EngineErrorKind::Network, format!("{context}: {e}"))
            }
            LoadError::Parse(details) => {
                EngineError::fatal(EngineErrorKind::Other, format!("{context}: {details}"))
            }
        };
        warn!(
            "Engine (session {}) fatal {} error: {}",
            self.events.generation(),
            error.kind,
            error.details
        );
        self.emit(EngineEvent::Error(error));
    }

    fn manifest_retry(&self) -> RetryConfig {
        RetryConfig::with_retries(
            self.config.manifest_loading_max_retry,
            Duration::from_millis(self.config.manifest_loading_retry_delay_ms),
            Duration::from_millis(self.config.manifest_loading_timeout_ms),
        )
    }

    fn level_retry(&self) -> RetryConfig {
        RetryConfig::with_retries(
            self.config.level_loading_max_retry,
            Duration::from_millis(self.config.level_loading_retry_delay_ms),
            Duration::from_millis(self.config.level_loading_timeout_ms),
        )
    }

    fn frag_retry(&self) -> RetryConfig {
        RetryConfig::with_retries(
            self.config.frag_loading_max_retry,
            Duration::from_millis(self.config.frag_loading_retry_delay_ms),
            Duration::from_millis(self.config.frag_loading_timeout_ms),
        )
    }
}

fn refresh_interval(media: &MediaPlaylist) -> Duration {
    Duration::from_secs_f64((media.target_duration as f64).max(1.0))
}
