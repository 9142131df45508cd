//! Speech-model leg: wire protocol and WebSocket client.

pub mod client;
pub mod messages;

pub use client::{MODEL_REALTIME_URL, ModelError, ModelLeg};
pub use messages::{
    AudioConfig, AudioFormat, AudioInput, AudioOutput, ClientEvent, ConversationItem, ServerEvent,
    SessionConfig, ToolDef, TurnDetection,
};
