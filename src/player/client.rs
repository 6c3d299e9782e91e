//! The stream client: one playback session per mounted player, bounded
//! auto-recovery, and the state the host UI renders.
//!
//! All inputs (engine events, grace-timer expiries, user commands) arrive on
//! a single inbox and are handled strictly in order by one task. Every
//! engine event carries the generation of the session that produced it;
//! once a session is closed its generation is never current again, so a
//! late event (or timer) from it cannot change state.

use super::config::PlayerConfig;
use super::engine::{EngineError, EngineErrorKind, EngineEvent, EngineFactory, EventSink};
use super::media::{PlayError, SharedMedia, with_media};
use super::session::{Backend, Session};
use super::source::{ChannelSource, cache_bust, is_gateway_url, playback_url};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Player lifecycle as seen by the host UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerState {
    Idle,
    Loading,
    Ready,
    Error,
}

/// Terminal player conditions, displayed in the error overlay.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlayerError {
    #[error("The stream is currently unreachable.")]
    Unreachable,
    #[error("HLS is not supported in this runtime.")]
    Unsupported,
    #[error("This channel is not an HLS stream.")]
    NotHls,
}

/// Everything the host UI needs to render the player.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayerSnapshot {
    pub state: PlayerState,
    pub is_live: bool,
    pub muted: bool,
    pub retry_count: u32,
    /// Human-readable reason while in [`PlayerState::Error`]
    pub error: Option<String>,
}

impl PlayerSnapshot {
    fn idle() -> Self {
        Self {
            state: PlayerState::Idle,
            is_live: true,
            muted: false,
            retry_count: 0,
            error: None,
        }
    }
}

pub type ReadyCallback = Box<dyn FnMut() + Send>;

pub(crate) enum Command {
    SetSource(String),
    Retry,
    SetMuted(bool),
    OnReady(ReadyCallback),
    Unmount,
    Shutdown,
}

pub(crate) enum Message {
    Engine { generation: u64, event: EngineEvent },
    GraceExpired { generation: u64 },
    Command(Command),
}

pub(crate) struct StreamClient {
    config: PlayerConfig,
    engines: Option<Arc<dyn EngineFactory>>,
    media: SharedMedia,
    inbox: mpsc::UnboundedSender<Message>,
    snapshot: watch::Sender<PlayerSnapshot>,
    source: Option<String>,
    session: Option<Session>,
    next_generation: u64,
    state: PlayerState,
    is_live: bool,
    muted: bool,
    retry_count: u32,
    error: Option<PlayerError>,
    ready_callbacks: Vec<ReadyCallback>,
}

impl StreamClient {
    pub(crate) fn new(
        config: PlayerConfig,
        engines: Option<Arc<dyn EngineFactory>>,
        media: SharedMedia,
        inbox: mpsc::UnboundedSender<Message>,
        snapshot: watch::Sender<PlayerSnapshot>,
    ) -> Self {
        Self {
            config,
            engines,
            media,
            inbox,
            snapshot,
            source: None,
            session: None,
            next_generation: 1,
            state: PlayerState::Idle,
            is_live: true,
            muted: false,
            retry_count: 0,
            error: None,
            ready_callbacks: Vec::new(),
        }
    }

    /// Process one inbox message. Returns `false` once shut down.
    pub(crate) fn handle(&mut self, message: Message) -> bool {
        match message {
            Message::Engine { generation, event } => self.on_engine_event(generation, event),
            Message::GraceExpired { generation } => self.on_grace_expired(generation),
            Message::Command(Command::Shutdown) => {
                self.unmount();
                return false;
            }
            Message::Command(command) => self.on_command(command),
        }
        true
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::SetSource(source) => {
                self.source = Some(source);
                self.retry_count = 0;
                self.start_session();
            }
            Command::Retry => self.retry(),
            Command::SetMuted(muted) => {
                self.muted = muted;
                with_media(&self.media, |m| m.set_muted(muted));
                self.publish();
            }
            Command::OnReady(callback) => self.ready_callbacks.push(callback),
            Command::Unmount => self.unmount(),
            Command::Shutdown => {}
        }
    }

    fn start_session(&mut self) {
        self.close_session();

        let Some(source) = self.source.clone() else {
            self.state = PlayerState::Idle;
            self.publish();
            return;
        };

        let generation = self.next_generation;
        self.next_generation += 1;

        let mut url = playback_url(&source, &self.config.proxy_endpoint);
        if self.retry_count > 0 && is_gateway_url(&url, &self.config.proxy_endpoint) {
            url = cache_bust(&url, self.retry_count);
        }

        self.state = PlayerState::Loading;
        self.error = None;
        self.is_live = true;

        let sink = EventSink::new(generation, self.inbox.clone());
        let factory = self
            .engines
            .as_ref()
            .filter(|factory| factory.is_supported())
            .cloned();

        let backend = if let Some(factory) = factory {
            info!("Session {} loading {} through engine", generation, url);
            let mut engine = factory.create(&self.config.engine, sink);
            engine.load_source(&url);
            engine.attach_media(self.media.clone());
            Backend::Engine(engine)
        } else if with_media(&self.media, |m| m.can_play_native_hls()) {
            info!("Session {} loading {} natively", generation, url);
            with_media(&self.media, |m| m.load_native(&url, sink));
            Backend::Native(self.media.clone())
        } else {
            self.fail(
                PlayerError::Unsupported,
                "no playback engine and no native HLS support",
            );
            return;
        };

        self.session = Some(Session::new(generation, url, backend));
        self.publish();
    }

    fn retry(&mut self) {
        if self.source.is_none() {
            debug!("Retry requested with no source mounted");
            return;
        }
        self.close_session();
        self.retry_count += 1;
        info!("Manual retry #{}", self.retry_count);
        self.start_session();
    }

    fn unmount(&mut self) {
        self.close_session();
        self.source = None;
        self.state = PlayerState::Idle;
        self.error = None;
        self.publish();
    }

    fn on_engine_event(&mut self, generation: u64, event: EngineEvent) {
        let Some(session) = self
            .session
            .as_mut()
            .filter(|s| s.generation() == generation)
        else {
            debug!("Dropping {:?} from superseded session {}", event, generation);
            return;
        };

        match event {
            EngineEvent::ManifestParsed { levels } => {
                session.note_load_success();
                debug!("Session {} manifest parsed ({} levels)", generation, levels);
                self.become_ready();
            }
            EngineEvent::LevelLoaded { live } => {
                session.note_load_success();
                if self.is_live != live {
                    info!("Session {} live={}", generation, live);
                    self.is_live = live;
                    self.publish();
                }
            }
            EngineEvent::FragmentLoaded => session.note_load_success(),
            EngineEvent::MediaLoaded { duration } => {
                self.is_live = duration.is_none_or(|d| !d.is_finite());
                self.become_ready();
            }
            EngineEvent::MediaFailed { reason } => self.fail(PlayerError::Unreachable, &reason),
            EngineEvent::Error(error) => self.on_engine_error(error),
        }
    }

    fn on_engine_error(&mut self, error: EngineError) {
        if !error.fatal {
            debug!("Non-fatal {} error: {}", error.kind, error.details);
            return;
        }

        match error.kind {
            EngineErrorKind::Network => {
                let Some(session) = self.session.as_mut() else {
                    return;
                };
                let generation = session.generation();
                warn!(
                    "Fatal network error in session {}: {}; reloading",
                    generation, error.details
                );
                if let Some(engine) = session.engine_mut() {
                    engine.start_load();
                }
                if session.note_network_failure() {
                    let grace = self.config.network_grace();
                    session.arm_grace(schedule_grace(self.inbox.clone(), generation, grace));
                }
            }
            EngineErrorKind::Media => {
                let Some(session) = self.session.as_mut() else {
                    return;
                };
                warn!(
                    "Fatal media error in session {}: {}; recovering",
                    session.generation(),
                    error.details
                );
                if let Some(engine) = session.engine_mut() {
                    engine.recover_media_error();
                }
            }
            EngineErrorKind::Other => self.fail(PlayerError::Unreachable, &error.details),
        }
    }

    fn on_grace_expired(&mut self, generation: u64) {
        let still_failing = self
            .session
            .as_ref()
            .is_some_and(|s| s.generation() == generation && s.is_network_failing());

        if still_failing {
            self.fail(
                PlayerError::Unreachable,
                "network errors persisted past the grace window",
            );
        } else {
            debug!("Grace window of session {} lapsed harmlessly", generation);
        }
    }

    fn become_ready(&mut self) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if !session.mark_ready() {
            return;
        }
        info!(
            "Session {} ready ({})",
            session.generation(),
            session.source_url()
        );

        self.state = PlayerState::Ready;
        self.autoplay();
        for callback in self.ready_callbacks.iter_mut() {
            callback();
        }
        self.publish();
    }

    /// Start playback; muted if the autoplay policy refuses sound.
    fn autoplay(&mut self) {
        if !self.config.autoplay {
            return;
        }

        let fell_back_to_muted = with_media(&self.media, |m| match m.play() {
            Ok(()) => false,
            Err(PlayError::Blocked) => {
                m.set_muted(true);
                if let Err(e) = m.play() {
                    debug!("Muted autoplay failed as well: {}", e);
                }
                true
            }
            Err(e) => {
                debug!("Autoplay failed: {}", e);
                false
            }
        });

        if fell_back_to_muted {
            info!("Autoplay blocked; continuing muted");
            self.muted = true;
        }
    }

    fn fail(&mut self, error: PlayerError, detail: &str) {
        warn!("Player error: {} ({})", error, detail);
        self.close_session();
        self.state = PlayerState::Error;
        self.error = Some(error);
        self.publish();
    }

    fn close_session(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.close();
        }
    }

    fn publish(&self) {
        self.snapshot.send_replace(PlayerSnapshot {
            state: self.state,
            is_live: self.is_live,
            muted: self.muted,
            retry_count: self.retry_count,
            error: self.error.as_ref().map(ToString::to_string),
        });
    }
}

/// Post `GraceExpired` for `generation` after `delay` unless cancelled first.
fn schedule_grace(
    inbox: mpsc::UnboundedSender<Message>,
    generation: u64,
    delay: Duration,
) -> CancellationToken {
    let token = CancellationToken::new();
    let cancelled = token.clone();

    tokio::spawn(async move {
        tokio::select! {
            biased;
            _ = cancelled.cancelled() => {}
            _ = tokio::time::sleep(delay) => {
                let _ = inbox.send(Message::GraceExpired { generation });
            }
        }
    });

    token
}

/// Host-facing handle to a stream client running on its own task.
///
/// Dropping the handle shuts the client down and tears its session down.
pub struct PlayerHandle {
    tx: mpsc::UnboundedSender<Message>,
    snapshot: watch::Receiver<PlayerSnapshot>,
    task: Option<JoinHandle<()>>,
}

impl PlayerHandle {
    /// Spawn a client. `engines` is `None` when no adaptive engine exists in
    /// this runtime; native playback through `media` is tried next.
    pub fn spawn(
        config: PlayerConfig,
        engines: Option<Arc<dyn EngineFactory>>,
        media: SharedMedia,
    ) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(PlayerSnapshot::idle());
        let mut client = StreamClient::new(config, engines, media, tx.clone(), snapshot_tx);

        let task = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                if !client.handle(message) {
                    break;
                }
            }
            debug!("Stream client stopped");
        });

        Self {
            tx,
            snapshot: snapshot_rx,
            task: Some(task),
        }
    }

    /// Mount a channel from the directory.
    pub fn mount(&self, channel: &ChannelSource) -> Result<(), PlayerError> {
        if !channel.is_hls {
            return Err(PlayerError::NotHls);
        }
        self.set_source(channel.source_url.clone());
        Ok(())
    }

    /// Replace the source; the previous session is torn down first.
    pub fn set_source(&self, source_url: impl Into<String>) {
        self.send(Command::SetSource(source_url.into()));
    }

    /// Tear down and reload the current source with a cache-busted URL.
    pub fn retry(&self) {
        self.send(Command::Retry);
    }

    pub fn set_muted(&self, muted: bool) {
        self.send(Command::SetMuted(muted));
    }

    /// Register a callback fired once each time a session becomes ready.
    pub fn on_ready(&self, callback: impl FnMut() + Send + 'static) {
        self.send(Command::OnReady(Box::new(callback)));
    }

    pub fn unmount(&self) {
        self.send(Command::Unmount);
    }

    pub fn snapshot(&self) -> PlayerSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn state(&self) -> PlayerState {
        self.snapshot.borrow().state
    }

    pub fn is_live(&self) -> bool {
        self.snapshot.borrow().is_live
    }

    /// Watch every state change.
    pub fn subscribe(&self) -> watch::Receiver<PlayerSnapshot> {
        self.snapshot.clone()
    }

    /// Stop the client and wait for its session to be torn down.
    pub async fn shutdown(mut self) {
        self.send(Command::Shutdown);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    fn send(&self, command: Command) {
        if self.tx.send(Message::Command(command)).is_err() {
            warn!("Stream client task is no longer running");
        }
    }
}

impl Drop for PlayerHandle {
    fn drop(&mut self) {
        if self.task.is_some() {
            let _ = self.tx.send(Message::Command(Command::Shutdown));
        }
    }
}
