//! livegate: an HLS playlist-rewriting reverse proxy and the resilient
//! stream client that plays through it.
//!
//! The [`server`] module hosts the gateway that fetches third-party origins
//! on behalf of browsers and rewrites playlists via [`hls::rewriter`]. The
//! [`player`] module holds the playback session state machine.

pub mod config;
pub mod error;
pub mod hls;
pub mod http_retry;
pub mod metrics;
pub mod player;
pub mod server;
