//! Per-call session state and the process-wide session registry.
//!
//! Call metadata is deposited by the call-initiation interface before the
//! media stream opens, then consumed when the telephony leg reports stream
//! start. From that point a [`CallSession`] is the single mutable record for
//! the call; all relay bookkeeping (ingress clock, mark queue, utterance
//! tracking) lives here and is mutated only through the relay engine.

use std::collections::VecDeque;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

/// Caller-supplied call configuration, resolved at call-initiation time.
#[derive(Debug, Clone, PartialEq)]
pub struct CallMetadata {
    /// Conversation language
    pub language: String,
    /// Persona preset identifier; `None` selects the default persona
    pub persona_type: Option<String>,
    /// Whether both audio directions are captured for this call
    pub recording_enabled: bool,
    /// Dialed number; kept for the excluded call-placement collaborator
    pub phone_number: String,
}

/// Mutable per-call record. One exists per active call, keyed by call id.
#[derive(Debug, Clone)]
pub struct CallSession {
    /// Opaque call identifier; primary key for the call's lifetime
    pub call_id: String,
    /// Transport stream identifier; unset until media begins
    pub stream_id: Option<String>,
    /// Conversation language, immutable for the call
    pub language: String,
    /// Persona preset, immutable for the call
    pub persona_type: Option<String>,
    /// Recording flag, fixed at call start
    pub recording_enabled: bool,
    /// Clock value of the most recent ingress frame; non-decreasing
    pub latest_ingress_timestamp_ms: u64,
    /// The model's most recent in-progress output item, if audible
    pub last_assistant_item_id: Option<String>,
    /// Pending playback-acknowledgment tokens, FIFO
    pub playback_mark_queue: VecDeque<String>,
    /// Ingress timestamp at which the current utterance began playing.
    /// Set if and only if `last_assistant_item_id` is set.
    pub egress_start_timestamp_ms: Option<u64>,
}

impl CallSession {
    /// Create a fresh session for `call_id` from its resolved metadata.
    pub fn new(call_id: &str, metadata: &CallMetadata) -> Self {
        CallSession {
            call_id: call_id.to_string(),
            stream_id: None,
            language: metadata.language.clone(),
            persona_type: metadata.persona_type.clone(),
            recording_enabled: metadata.recording_enabled,
            latest_ingress_timestamp_ms: 0,
            last_assistant_item_id: None,
            playback_mark_queue: VecDeque::new(),
            egress_start_timestamp_ms: None,
        }
    }

    /// True while an assistant utterance is audibly in flight.
    pub fn utterance_in_flight(&self) -> bool {
        !self.playback_mark_queue.is_empty() && self.egress_start_timestamp_ms.is_some()
    }
}

/// Shared handle to a call's session.
pub type SharedSession = Arc<Mutex<CallSession>>;

/// Process-wide registry of active calls.
///
/// The only shared mutable structure besides the recorder manager. Access is
/// keyed by call id; concurrent creation and removal from different calls'
/// handler tasks is safe.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, SharedSession>,
    pending: DashMap<String, CallMetadata>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deposit metadata for a call whose media stream has not started yet.
    pub fn register_call(&self, call_id: &str, metadata: CallMetadata) {
        self.pending.insert(call_id.to_string(), metadata);
    }

    /// Take (and consume) pending metadata for a call, if any was deposited.
    pub fn take_metadata(&self, call_id: &str) -> Option<CallMetadata> {
        self.pending.remove(call_id).map(|(_, m)| m)
    }

    /// Create the session record for an active call. Replaces any stale
    /// record with the same id, preserving the at-most-one invariant.
    pub fn create(&self, call_id: &str, metadata: &CallMetadata) -> SharedSession {
        let session = Arc::new(Mutex::new(CallSession::new(call_id, metadata)));
        self.sessions.insert(call_id.to_string(), session.clone());
        session
    }

    /// Look up an active call. Not-found is a normal condition (late
    /// messages after teardown); callers fall back to defaults.
    pub fn get(&self, call_id: &str) -> Option<SharedSession> {
        self.sessions.get(call_id).map(|entry| entry.clone())
    }

    /// Drop the session record at call end.
    pub fn remove(&self, call_id: &str) {
        self.sessions.remove(call_id);
        self.pending.remove(call_id);
    }

    /// Number of currently active calls.
    pub fn active_calls(&self) -> usize {
        self.sessions.len()
    }
}

// =============================================================================
// Tests
// =============================================================================
