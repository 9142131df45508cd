//! Speech-model realtime wire protocol.
//!
//! Client and server event types for the model leg's WebSocket. All events
//! are JSON-encoded with a `type` tag.
//!
//! Client events (sent to the model):
//! - session.update - One-time session configuration
//! - input_audio_buffer.append - Ingress audio payload
//! - conversation.item.create - Function-call result injection
//! - conversation.item.truncate - Barge-in truncation
//! - response.create - Request generation
//!
//! Server events (received from the model):
//! - session.created / session.updated
//! - input_audio_buffer.speech_started / speech_stopped
//! - response.output_audio.delta - Egress audio chunk keyed by item id
//! - response.function_call_arguments.done - Completed tool call
//! - response.done
//! - error

use serde::{Deserialize, Serialize};

// =============================================================================
// Session Configuration
// =============================================================================

/// Session configuration sent once after the model leg opens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Session kind; always "realtime"
    #[serde(rename = "type")]
    pub session_type: String,

    /// Model identifier
    pub model: String,

    /// Requested output modalities; audio only for a phone call
    pub output_modalities: Vec<String>,

    /// Declared tool manifest
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDef>>,

    /// Tool choice strategy
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,

    /// Audio codec, voice and turn-detection configuration
    pub audio: AudioConfig,

    /// Resolved persona instructions
    pub instructions: String,
}

/// Audio configuration for both directions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Ingress format and turn detection
    pub input: AudioInput,
    /// Egress format and voice
    pub output: AudioOutput,
}

/// Ingress audio settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioInput {
    /// Codec envelope, e.g. `audio/pcmu`
    pub format: AudioFormat,
    /// Turn detection; server-side VAD drives barge-in
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_detection: Option<TurnDetection>,
}

/// Egress audio settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioOutput {
    /// Codec envelope, e.g. `audio/pcmu`
    pub format: AudioFormat,
    /// Synthesis voice
    pub voice: String,
}

/// Audio codec envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioFormat {
    /// MIME-style codec name
    #[serde(rename = "type")]
    pub format_type: String,
}

impl AudioFormat {
    /// G.711 μ-law, the codec the telephony leg natively exchanges.
    pub fn pcmu() -> Self {
        AudioFormat {
            format_type: "audio/pcmu".to_string(),
        }
    }
}

/// Turn detection configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TurnDetection {
    /// Server-side voice activity detection
    #[serde(rename = "server_vad")]
    ServerVad {},
}

/// Tool definition declared in the session configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDef {
    /// Tool type (always "function")
    #[serde(rename = "type")]
    pub tool_type: String,
    /// Function name
    pub name: String,
    /// Function description
    pub description: String,
    /// Function parameters JSON schema
    pub parameters: serde_json::Value,
}

// =============================================================================
// Conversation Items
// =============================================================================

/// Conversation item carried by `conversation.item.create`.
///
/// The relay only ever creates function-call-output items; the full message
/// shape is kept for inbound `conversation.item.created` events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationItem {
    /// Item type
    #[serde(rename = "type")]
    pub item_type: String,
    /// Item role (user, assistant, system)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Correlation token for a function call
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_id: Option<String>,
    /// Serialized function output
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

impl ConversationItem {
    /// Build a function-call-output item correlated to `call_id`.
    pub fn function_call_output(call_id: &str, output: String) -> Self {
        ConversationItem {
            item_type: "function_call_output".to_string(),
            role: None,
            call_id: Some(call_id.to_string()),
            output: Some(output),
        }
    }
}

// =============================================================================
// Client Events (sent to the model)
// =============================================================================

/// Client events sent to the speech model.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// One-time session configuration
    #[serde(rename = "session.update")]
    SessionUpdate {
        /// Session configuration
        session: SessionConfig,
    },

    /// Append ingress audio to the model's input buffer
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend {
        /// Base64-encoded audio, relayed verbatim from the telephony leg
        audio: String,
    },

    /// Inject a conversation item (function-call result)
    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate {
        /// Item to create
        item: ConversationItem,
    },

    /// Discard the model's record of assistant audio beyond `audio_end_ms`
    #[serde(rename = "conversation.item.truncate")]
    ConversationItemTruncate {
        /// Assistant item being truncated
        item_id: String,
        /// Content index within the item
        content_index: u32,
        /// Elapsed playback time actually heard by the caller
        audio_end_ms: u64,
    },

    /// Request the model generate a response
    #[serde(rename = "response.create")]
    ResponseCreate,
}

// =============================================================================
// Server Events (received from the model)
// =============================================================================

/// Server events received from the speech model.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// Error occurred
    #[serde(rename = "error")]
    Error {
        /// Error details
        error: ApiError,
    },

    /// Session created
    #[serde(rename = "session.created")]
    SessionCreated {},

    /// Session configuration applied
    #[serde(rename = "session.updated")]
    SessionUpdated {},

    /// VAD detected the caller started speaking
    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted {},

    /// VAD detected the caller stopped speaking
    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped {},

    /// Egress audio chunk
    #[serde(rename = "response.output_audio.delta")]
    AudioDelta {
        /// Base64-encoded audio, relayed verbatim to the telephony leg
        delta: String,
        /// Assistant output item this chunk belongs to
        #[serde(default)]
        item_id: Option<String>,
    },

    /// A tool call's arguments are complete
    #[serde(rename = "response.function_call_arguments.done")]
    FunctionCallArgumentsDone {
        /// Tool-call correlation token assigned by the model
        call_id: String,
        /// Function name
        #[serde(default)]
        name: Option<String>,
        /// Raw JSON arguments
        #[serde(default)]
        arguments: String,
    },

    /// Generation finished
    #[serde(rename = "response.done")]
    ResponseDone {},

    /// Conversation item added
    #[serde(rename = "conversation.item.created")]
    ConversationItemCreated {},

    /// Any event type this relay does not handle. Ignored for
    /// forward-compatibility.
    #[serde(other)]
    Unknown,
}

/// Error payload on the model leg.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiError {
    /// Error category
    #[serde(rename = "type", default)]
    pub error_type: Option<String>,
    /// Human-readable message
    #[serde(default)]
    pub message: Option<String>,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialize_audio_append() {
        let event = ClientEvent::InputAudioBufferAppend {
            audio: "bXVsYXc=".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "input_audio_buffer.append");
        assert_eq!(json["audio"], "bXVsYXc=");
    }

    #[test]
    fn test_serialize_truncate() {
        let event = ClientEvent::ConversationItemTruncate {
            item_id: "I1".to_string(),
            content_index: 0,
            audio_end_ms: 150,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "conversation.item.truncate");
        assert_eq!(json["item_id"], "I1");
        assert_eq!(json["audio_end_ms"], 150);
    }

    #[test]
    fn test_serialize_function_output_item() {
        let event = ClientEvent::ConversationItemCreate {
            item: ConversationItem::function_call_output("fc_1", "{\"success\":true}".to_string()),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["item"]["type"], "function_call_output");
        assert_eq!(json["item"]["call_id"], "fc_1");
        assert!(json["item"].get("role").is_none());
    }

    #[test]
    fn test_parse_audio_delta() {
        let json = r#"{
            "type": "response.output_audio.delta",
            "response_id": "r1",
            "item_id": "I1",
            "output_index": 0,
            "content_index": 0,
            "delta": "YXVkaW8="
        }"#;
        let event: ServerEvent = serde_json::from_str(json).unwrap();
        match event {
            ServerEvent::AudioDelta { delta, item_id } => {
                assert_eq!(delta, "YXVkaW8=");
                assert_eq!(item_id.as_deref(), Some("I1"));
            }
            other => panic!("Expected audio delta, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_function_call_done() {
        let json = r#"{
            "type": "response.function_call_arguments.done",
            "call_id": "fc_9",
            "name": "sendSms",
            "arguments": "{\"message\":\"hi\"}"
        }"#;
        let event: ServerEvent = serde_json::from_str(json).unwrap();
        match event {
            ServerEvent::FunctionCallArgumentsDone {
                call_id,
                name,
                arguments,
            } => {
                assert_eq!(call_id, "fc_9");
                assert_eq!(name.as_deref(), Some("sendSms"));
                assert!(arguments.contains("message"));
            }
            other => panic!("Expected function call done, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_server_event_ignored() {
        let event: ServerEvent =
            serde_json::from_str(r#"{"type": "rate_limits.updated", "rate_limits": []}"#).unwrap();
        assert!(matches!(event, ServerEvent::Unknown));
    }

    #[test]
    fn test_session_config_shape() {
        let config = SessionConfig {
            session_type: "realtime".to_string(),
            model: "gpt-4o-realtime-preview".to_string(),
            output_modalities: vec!["audio".to_string()],
            tools: None,
            tool_choice: Some("auto".to_string()),
            audio: AudioConfig {
                input: AudioInput {
                    format: AudioFormat::pcmu(),
                    turn_detection: Some(TurnDetection::ServerVad {}),
                },
                output: AudioOutput {
                    format: AudioFormat::pcmu(),
                    voice: "marin".to_string(),
                },
            },
            instructions: "Be brief.".to_string(),
        };

        let json = serde_json::to_value(ClientEvent::SessionUpdate { session: config }).unwrap();
        assert_eq!(json["type"], "session.update");
        assert_eq!(json["session"]["audio"]["input"]["format"]["type"], "audio/pcmu");
        assert_eq!(
            json["session"]["audio"]["input"]["turn_detection"]["type"],
            "server_vad"
        );
        assert_eq!(json["session"]["audio"]["output"]["voice"], "marin");
    }
}
