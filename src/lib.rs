//! Same-origin CORS relay.
//!
//! Fetches a caller-specified URL, re-emits the response with permissive
//! CORS headers and rewrites HLS playlists so every segment and
//! sub-playlist request is routed back through the relay.

pub mod config;
pub mod error;
pub mod hls;
pub mod metrics;
pub mod relay;
pub mod server;
pub mod upstream;
