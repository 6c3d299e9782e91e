//! Player tests against a live gateway.
//!
//! A wiremock origin serves the stream, a real gateway proxies it, and the
//! stream client plays through the gateway with the built-in HTTP engine.

use livegate::config::{Config, DEFAULT_USER_AGENT};
use livegate::player::{
    EngineConfig, EngineFactory, EventSink, HttpEngineFactory, MediaElement, PlayError,
    PlayerConfig, PlayerHandle, PlayerSnapshot, PlayerState, SharedMedia,
};
use livegate::server::build_router;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const VOD: &str = "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-TARGETDURATION:2\n\
    #EXT-X-MEDIA-SEQUENCE:0\n#EXTINF:2.0,\nseg0.ts\n#EXTINF:2.0,\nseg1.ts\n#EXT-X-ENDLIST\n";

async fn start_gateway() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind test server");
    let addr = listener.local_addr().unwrap();

    let app = build_router(Config {
        port: 0,
        is_dev: true,
        proxy_path: "/api/proxy".to_string(),
        upstream_timeout_secs: 5,
        segment_max_age_secs: 60,
        default_user_agent: DEFAULT_USER_AGENT.to_string(),
        allow_private_targets: true,
        rate_limit_rpm: 0,
    })
    .unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    addr
}

/// A media element that plays whatever it is given.
#[derive(Default)]
struct HeadlessMedia {
    muted: bool,
}

impl MediaElement for HeadlessMedia {
    fn can_play_native_hls(&self) -> bool {
        false
    }
    fn load_native(&mut self, _url: &str, _events: EventSink) {}
    fn detach(&mut self) {}
    fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
    }
    fn play(&mut self) -> Result<(), PlayError> {
        Ok(())
    }
}

fn player(gateway: SocketAddr, grace: Duration) -> (PlayerHandle, Arc<Mutex<HeadlessMedia>>) {
    let config = PlayerConfig {
        proxy_endpoint: format!("http://{gateway}/api/proxy"),
        network_grace_ms: grace.as_millis() as u64,
        autoplay: true,
        engine: EngineConfig {
            manifest_loading_max_retry: 1,
            level_loading_max_retry: 1,
            frag_loading_max_retry: 1,
            manifest_loading_retry_delay_ms: 100,
            level_loading_retry_delay_ms: 100,
            frag_loading_retry_delay_ms: 100,
            ..EngineConfig::default()
        },
    };
    let media = Arc::new(Mutex::new(HeadlessMedia::default()));
    let engines: Arc<dyn EngineFactory> = Arc::new(HttpEngineFactory::default());
    let handle = PlayerHandle::spawn(config, Some(engines), media.clone() as SharedMedia);
    (handle, media)
}

async fn wait_until(
    updates: &mut watch::Receiver<PlayerSnapshot>,
    what: &str,
    condition: impl FnMut(&PlayerSnapshot) -> bool,
) -> PlayerSnapshot {
    tokio::time::timeout(Duration::from_secs(10), updates.wait_for(condition))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {what}"))
        .expect("player task stopped")
        .clone()
}

async fn mount_vod(origin: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/vod/index.m3u8"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/vnd.apple.mpegurl")
                .set_body_string(VOD),
        )
        .mount(origin)
        .await;
    Mock::given(method("GET"))
        .and(path("/vod/seg1.ts"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0x47; 188]))
        .mount(origin)
        .await;
}

#[tokio::test]
async fn finite_stream_becomes_ready_and_not_live() {
    let origin = MockServer::start().await;
    mount_vod(&origin).await;
    let gateway = start_gateway().await;

    let (handle, _media) = player(gateway, Duration::from_secs(8));
    let ready = Arc::new(AtomicUsize::new(0));
    let counter = ready.clone();
    handle.on_ready(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    let mut updates = handle.subscribe();

    handle.set_source(format!("{}/vod/index.m3u8", origin.uri()));

    let snapshot = wait_until(&mut updates, "ready, not live", |s| {
        s.state == PlayerState::Ready && !s.is_live
    })
    .await;
    assert_eq!(snapshot.error, None);
    assert_eq!(ready.load(Ordering::SeqCst), 1);

    // Every origin request went through the gateway as a browser would send it.
    let requests = origin.received_requests().await.unwrap();
    assert!(requests.iter().all(|r| r.headers.contains_key("sec-fetch-mode")));

    handle.shutdown().await;
}

#[tokio::test]
async fn brief_outage_is_absorbed() {
    let origin = MockServer::start().await;
    mount_vod(&origin).await;
    // Mounted last so it takes priority for the first three requests.
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(3)
        .mount(&origin)
        .await;
    let gateway = start_gateway().await;

    let (handle, _media) = player(gateway, Duration::from_secs(8));
    let mut updates = handle.subscribe();
    let saw_error = Arc::new(AtomicUsize::new(0));
    let mut watcher = handle.subscribe();
    let errors = saw_error.clone();
    tokio::spawn(async move {
        while watcher.changed().await.is_ok() {
            if watcher.borrow().state == PlayerState::Error {
                errors.fetch_add(1, Ordering::SeqCst);
            }
        }
    });

    handle.set_source(format!("{}/vod/index.m3u8", origin.uri()));

    wait_until(&mut updates, "ready", |s| s.state == PlayerState::Ready).await;
    assert_eq!(saw_error.load(Ordering::SeqCst), 0);
    assert_eq!(handle.snapshot().retry_count, 0);

    handle.shutdown().await;
}

#[tokio::test]
async fn dead_origin_surfaces_error_then_retry_recovers() {
    let origin = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&origin)
        .await;
    let gateway = start_gateway().await;

    let (handle, _media) = player(gateway, Duration::from_millis(300));
    let mut updates = handle.subscribe();

    handle.set_source(format!("{}/vod/index.m3u8", origin.uri()));

    let snapshot = wait_until(&mut updates, "error", |s| s.state == PlayerState::Error).await;
    assert_eq!(
        snapshot.error.as_deref(),
        Some("The stream is currently unreachable.")
    );

    // Origin comes back; a manual retry reloads with a cache-busting marker.
    origin.reset().await;
    mount_vod(&origin).await;
    handle.retry();

    let snapshot = wait_until(&mut updates, "ready after retry", |s| {
        s.state == PlayerState::Ready
    })
    .await;
    assert_eq!(snapshot.retry_count, 1);

    handle.shutdown().await;
}

#[tokio::test]
async fn mute_toggle_reaches_media_element() {
    let origin = MockServer::start().await;
    mount_vod(&origin).await;
    let gateway = start_gateway().await;

    let (handle, media) = player(gateway, Duration::from_secs(8));
    let mut updates = handle.subscribe();
    handle.set_source(format!("{}/vod/index.m3u8", origin.uri()));
    wait_until(&mut updates, "ready", |s| s.state == PlayerState::Ready).await;

    handle.set_muted(true);
    wait_until(&mut updates, "muted", |s| s.muted).await;
    assert!(media.lock().unwrap().muted);
    assert_eq!(handle.state(), PlayerState::Ready);

    handle.unmount();
    wait_until(&mut updates, "idle", |s| s.state == PlayerState::Idle).await;
}
