//! The seam between the stream client and an adaptive-bitrate engine.
//!
//! An engine fetches and buffers media on its own and reports what happens
//! through an [`EventSink`]. The client never calls back into the engine
//! from an event; it reacts to events in arrival order on its own task.

use super::client::Message;
use super::config::EngineConfig;
use super::media::SharedMedia;
use std::fmt;
use tokio::sync::mpsc;

/// Failure classes an engine reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineErrorKind {
    /// Manifest, level or fragment load failures
    Network,
    /// Decode / buffer append failures
    Media,
    /// Anything else (unparseable manifest, internal engine failure)
    Other,
}

impl fmt::Display for EngineErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EngineErrorKind::Network => "network",
            EngineErrorKind::Media => "media",
            EngineErrorKind::Other => "other",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineError {
    pub kind: EngineErrorKind,
    /// Fatal errors stop the engine until recovery is requested
    pub fatal: bool,
    pub details: String,
}

impl EngineError {
    pub fn fatal(kind: EngineErrorKind, details: impl Into<String>) -> Self {
        Self {
            kind,
            fatal: true,
            details: details.into(),
        }
    }

    pub fn recoverable(kind: EngineErrorKind, details: impl Into<String>) -> Self {
        Self {
            kind,
            fatal: false,
            details: details.into(),
        }
    }
}

/// Lifecycle notifications from an engine or the native media element.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// First (or refreshed) manifest parsed; `levels` variants available
    ManifestParsed { levels: usize },
    /// A media playlist loaded; `live` is false once ENDLIST is seen
    LevelLoaded { live: bool },
    FragmentLoaded,
    Error(EngineError),
    /// Native playback reached loaded metadata; `None` duration means unbounded
    MediaLoaded { duration: Option<f64> },
    /// Native playback failed to load the source
    MediaFailed { reason: String },
}

/// Where an engine (or native element) reports events for one session.
///
/// Each sink is stamped with the generation of the session it was created
/// for, so events from a torn-down session are recognisable and dropped.
#[derive(Debug, Clone)]
pub struct EventSink {
    generation: u64,
    tx: mpsc::UnboundedSender<Message>,
}

impl EventSink {
    pub(crate) fn new(generation: u64, tx: mpsc::UnboundedSender<Message>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Post an event; returns `false` if the client is gone.
    pub fn emit(&self, event: EngineEvent) -> bool {
        self.tx
            .send(Message::Engine {
                generation: self.generation,
                event,
            })
            .is_ok()
    }
}

/// A running adaptive-bitrate engine owned by exactly one session.
pub trait Engine: Send {
    fn load_source(&mut self, url: &str);
    fn attach_media(&mut self, media: SharedMedia);
    /// Restart loading after a fatal network error
    fn start_load(&mut self);
    /// Rebuild the media pipeline after a fatal media error
    fn recover_media_error(&mut self);
    /// Stop all work; no events may be emitted afterwards
    fn destroy(&mut self);
}

/// Builds engines when the runtime supports them.
pub trait EngineFactory: Send + Sync {
    fn is_supported(&self) -> bool;
    fn create(&self, config: &EngineConfig, events: EventSink) -> Box<dyn Engine>;
}
