//! Telephony media-stream wire protocol.
//!
//! JSON control-plane messages exchanged with the telephony leg over its
//! media WebSocket. The audio payload itself is an opaque base64-encoded
//! G.711 μ-law frame; this module never looks inside it.
//!
//! Inbound events: `start`, `media`, `mark`, `stop`.
//! Outbound events: `media` (audio towards the caller), `mark` (playback
//! acknowledgment request), `clear` (discard queued playback).

use serde::{Deserialize, Serialize};

/// Mark token name attached to every outbound media frame.
///
/// The telephony leg echoes the mark back once the frame before it has been
/// played, which is the only playback-progress signal available.
pub const RESPONSE_MARK_NAME: &str = "responsePart";

// =============================================================================
// Inbound Events (telephony leg -> relay)
// =============================================================================

/// Events received from the telephony media stream.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum TelephonyEvent {
    /// Media stream started; carries the stream and call identifiers.
    Start {
        /// Stream start details
        start: StreamStart,
    },

    /// A single inbound audio frame.
    Media {
        /// Frame payload and timing
        media: MediaFrame,
    },

    /// Playback acknowledgment for a previously sent mark.
    Mark {
        /// Echoed mark token
        #[serde(default)]
        mark: Option<MarkFrame>,
    },

    /// Media stream stopped.
    Stop {
        /// Stop details (call identifier)
        #[serde(default)]
        stop: Option<StreamStop>,
    },

    /// Any event type this relay does not know about. Ignored for
    /// forward-compatibility.
    #[serde(other)]
    Unknown,
}

/// `start` event payload.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamStart {
    /// Transport-level stream identifier assigned by the telephony leg
    pub stream_sid: String,
    /// Call identifier this stream belongs to
    pub call_sid: String,
    /// Custom parameters attached when the stream was provisioned
    #[serde(default)]
    pub custom_parameters: std::collections::HashMap<String, String>,
}

/// `media` event payload.
#[derive(Debug, Clone, Deserialize)]
pub struct MediaFrame {
    /// Frame timestamp in milliseconds since stream start, as a decimal
    /// string on the wire
    pub timestamp: String,
    /// Base64-encoded μ-law audio
    pub payload: String,
}

impl MediaFrame {
    /// Parse the wire timestamp. `None` for a malformed value; the payload
    /// is still worth relaying, but the interruption clock must not move on
    /// a frame whose timing is unknown.
    pub fn timestamp_ms(&self) -> Option<u64> {
        self.timestamp.parse().ok()
    }
}

/// `mark` acknowledgment payload.
#[derive(Debug, Clone, Deserialize)]
pub struct MarkFrame {
    /// Token name echoed back by the telephony leg
    pub name: String,
}

/// `stop` event payload.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamStop {
    /// Call identifier for the stream being stopped
    #[serde(default)]
    pub call_sid: Option<String>,
}

// =============================================================================
// Outbound Events (relay -> telephony leg)
// =============================================================================

/// Events produced for the telephony media stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum TelephonyOutEvent {
    /// Outbound audio frame.
    Media {
        /// Stream the frame belongs to
        #[serde(rename = "streamSid")]
        stream_sid: String,
        /// Frame payload
        media: OutboundMedia,
    },

    /// Request a playback acknowledgment once preceding audio has played.
    Mark {
        /// Stream the mark belongs to
        #[serde(rename = "streamSid")]
        stream_sid: String,
        /// Mark token
        mark: OutboundMark,
    },

    /// Discard any queued but unplayed audio immediately.
    Clear {
        /// Stream whose buffer is cleared
        #[serde(rename = "streamSid")]
        stream_sid: String,
    },
}

/// Outbound media payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboundMedia {
    /// Base64-encoded μ-law audio, passed through verbatim from the model leg
    pub payload: String,
}

/// Outbound mark token.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboundMark {
    /// Token name; echoed back in the acknowledgment
    pub name: String,
}

impl TelephonyOutEvent {
    /// Build an outbound audio frame.
    pub fn media(stream_sid: &str, payload: String) -> Self {
        TelephonyOutEvent::Media {
            stream_sid: stream_sid.to_string(),
            media: OutboundMedia { payload },
        }
    }

    /// Build a playback mark request.
    pub fn mark(stream_sid: &str) -> Self {
        TelephonyOutEvent::Mark {
            stream_sid: stream_sid.to_string(),
            mark: OutboundMark {
                name: RESPONSE_MARK_NAME.to_string(),
            },
        }
    }

    /// Build a buffer-clear instruction.
    pub fn clear(stream_sid: &str) -> Self {
        TelephonyOutEvent::Clear {
            stream_sid: stream_sid.to_string(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
