//! Player-side resilience for live HLS channels.
//!
//! [`PlayerHandle`] owns a stream client that routes every source through
//! the gateway, keeps one playback session alive at a time, and hides short
//! network outages behind a grace window before reporting the stream as
//! unreachable. Adaptive engines plug in through [`EngineFactory`];
//! [`HttpEngineFactory`] is the built-in one.

pub mod client;
pub mod config;
pub mod engine;
pub mod http_engine;
pub mod media;
mod session;
pub mod source;

pub use client::{PlayerError, PlayerHandle, PlayerSnapshot, PlayerState};
pub use config::{EngineConfig, PlayerConfig};
pub use engine::{Engine, EngineError, EngineErrorKind, EngineEvent, EngineFactory, EventSink};
pub use http_engine::HttpEngineFactory;
pub use media::{MediaElement, PlayError, SharedMedia};
pub use source::{ChannelSource, cache_bust, is_gateway_url, playback_url};
