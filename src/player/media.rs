use super::engine::EventSink;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Why `play()` did not start playback.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlayError {
    /// Autoplay policy refused unmuted playback
    #[error("playback blocked by autoplay policy")]
    Blocked,
    #[error("playback failed: {0}")]
    Failed(String),
}

/// The host's video element.
pub trait MediaElement: Send {
    /// Whether the element can play HLS without an engine
    fn can_play_native_hls(&self) -> bool;
    /// Point the element at `url`, reporting load/error events to `events`
    fn load_native(&mut self, url: &str, events: EventSink);
    /// Drop any natively loaded source
    fn detach(&mut self);
    fn set_muted(&mut self, muted: bool);
    fn play(&mut self) -> Result<(), PlayError>;
}

/// Media element shared between the client and its current engine.
pub type SharedMedia = Arc<Mutex<dyn MediaElement>>;

/// Run `f` against the element, recovering the guard if a holder panicked.
pub(crate) fn with_media<R>(media: &SharedMedia, f: impl FnOnce(&mut dyn MediaElement) -> R) -> R {
    let mut guard = media.lock().unwrap_or_else(|p| p.into_inner());
    f(&mut *guard)
}
