//! One playback attempt: the engine (or native source) plus its pending
//! recovery timer.
//!
//! A session is closed exactly once, either explicitly through
//! [`Session::close`] or on drop, and closing always cancels the grace timer
//! before tearing the backend down.

use super::engine::Engine;
use super::media::{SharedMedia, with_media};
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub(crate) enum Backend {
    Engine(Box<dyn Engine>),
    /// Source assigned directly to the media element
    Native(SharedMedia),
}

pub(crate) struct Session {
    generation: u64,
    source_url: String,
    backend: Option<Backend>,
    grace: Option<CancellationToken>,
    /// A fatal network error is outstanding and no successful load has followed
    network_failing: bool,
    ready_fired: bool,
}

impl Session {
    pub(crate) fn new(generation: u64, source_url: String, backend: Backend) -> Self {
        Self {
            generation,
            source_url,
            backend: Some(backend),
            grace: None,
            network_failing: false,
            ready_fired: false,
        }
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn source_url(&self) -> &str {
        &self.source_url
    }

    pub(crate) fn engine_mut(&mut self) -> Option<&mut (dyn Engine + 'static)> {
        match self.backend.as_mut() {
            Some(Backend::Engine(engine)) => Some(engine.as_mut()),
            _ => None,
        }
    }

    /// Mark a fatal network error. Returns `true` if no grace timer is pending
    /// yet, i.e. the caller should schedule one.
    pub(crate) fn note_network_failure(&mut self) -> bool {
        self.network_failing = true;
        self.grace.is_none()
    }

    pub(crate) fn arm_grace(&mut self, token: CancellationToken) {
        self.grace = Some(token);
    }

    pub(crate) fn is_network_failing(&self) -> bool {
        self.network_failing
    }

    /// A load succeeded: the outstanding failure (if any) is resolved.
    pub(crate) fn note_load_success(&mut self) {
        self.network_failing = false;
        if let Some(token) = self.grace.take() {
            token.cancel();
        }
    }

    /// Flip the ready flag; `true` only the first time.
    pub(crate) fn mark_ready(&mut self) -> bool {
        !std::mem::replace(&mut self.ready_fired, true)
    }

    /// Cancel the grace timer and tear down the backend. Idempotent.
    pub(crate) fn close(&mut self) {
        if let Some(token) = self.grace.take() {
            token.cancel();
        }
        match self.backend.take() {
            Some(Backend::Engine(mut engine)) => {
                debug!("Destroying engine for session {}", self.generation);
                engine.destroy();
            }
            Some(Backend::Native(media)) => {
                debug!("Detaching native source for session {}", self.generation);
                with_media(&media, |m| m.detach());
            }
            None => {}
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}
