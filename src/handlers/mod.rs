//! HTTP and WebSocket request handlers.
//!
//! - `calls`: call initiation and service status
//! - `media_stream`: the per-call telephony WebSocket
//! - `recordings`: recording listing, download, and control

pub mod calls;
pub mod media_stream;
pub mod recordings;
