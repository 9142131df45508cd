//! Telephony-to-speech-model relay server.
//!
//! Bridges a telephony provider's media-stream WebSocket to a realtime
//! speech model: one session per call, bidirectional μ-law audio relayed
//! verbatim, barge-in truncation driven by the model's VAD, model-invoked
//! function dispatch, and optional per-call WAV capture.

pub mod config;
pub mod core;
pub mod errors;
pub mod handlers;
pub mod routes;
pub mod state;

pub use config::ServerConfig;
pub use errors::{AppError, AppResult};
pub use state::{AppState, SharedState};
