//! Bidirectional relay engine between the telephony leg and the model leg.
//!
//! [`RelayCore`] is a synchronous state machine over one call's
//! [`CallSession`]: every inbound event from either leg is reduced to a list
//! of [`RelayAction`]s for the surrounding handler to execute against the
//! real sockets and recorder. Keeping the engine free of I/O makes the
//! barge-in arithmetic and mark bookkeeping directly testable.
//!
//! # Barge-in
//!
//! When the model's VAD reports the caller started speaking while assistant
//! audio is audibly in flight (mark queue non-empty, utterance start
//! recorded), the engine truncates the model's record of the utterance at
//! the elapsed playback time and clears the telephony playback buffer. The
//! elapsed time is `latest_ingress - egress_start`, both in the ingress
//! clock domain; true playback completion is not observable, so
//! frame-arrival time stands in for it.

use tracing::{debug, info, warn};

use super::model::messages::{ClientEvent, ServerEvent};
use super::session::SharedSession;
use super::telephony::{RESPONSE_MARK_NAME, TelephonyEvent, TelephonyOutEvent};

/// Relay lifecycle for one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    /// Session created, peer leg not yet confirmed
    Initializing,
    /// Both legs open, frames flowing
    Active,
    /// Either leg signaled stop; tearing down
    Closing,
    /// Terminal; resources released
    Closed,
}

/// Side effects the handler must carry out, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayAction {
    /// Send an event to the model leg
    ToModel(ClientEvent),
    /// Send an event to the telephony leg (ordinary egress path)
    ToTelephony(TelephonyOutEvent),
    /// Send a buffer-clear to the telephony leg. Distinct from
    /// `ToTelephony` so the handler can route it past queued media frames.
    ClearPlayback(TelephonyOutEvent),
    /// Mirror an ingress payload into the capture sink
    RecordIngress(String),
    /// Mirror an egress payload into the capture sink
    RecordEgress(String),
    /// Begin capturing this call
    StartRecording,
    /// Finalize the capture
    StopRecording,
    /// Execute a model-initiated function call and reply on the model leg
    DispatchFunction {
        /// Function name; absent names dispatch as unknown
        name: Option<String>,
        /// Raw JSON arguments
        arguments: String,
        /// Tool-call correlation token
        call_id: String,
    },
    /// Close the model leg (telephony leg stopped first)
    CloseModelLeg,
}

/// Per-call relay state machine.
pub struct RelayCore {
    session: SharedSession,
    state: RelayState,
}

impl RelayCore {
    /// Engine for a freshly created session; starts in `Initializing`.
    pub fn new(session: SharedSession) -> Self {
        RelayCore {
            session,
            state: RelayState::Initializing,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> RelayState {
        self.state
    }

    /// Session handle, for the composing handler.
    pub fn session(&self) -> &SharedSession {
        &self.session
    }

    /// Peer-leg open confirmation: `Initializing -> Active`.
    pub fn peer_confirmed(&mut self) {
        if self.state == RelayState::Initializing {
            self.state = RelayState::Active;
        }
    }

    /// Either leg signaled stop or errored: `-> Closing`.
    pub fn begin_close(&mut self) {
        if self.state != RelayState::Closed {
            self.state = RelayState::Closing;
        }
    }

    /// Remaining leg closed and recorder finalized: `-> Closed`.
    pub fn finish_close(&mut self) {
        self.state = RelayState::Closed;
    }

    // =========================================================================
    // Telephony leg (ingress + control)
    // =========================================================================

    /// Reduce one telephony-leg event to relay actions.
    pub fn on_telephony_event(&mut self, event: TelephonyEvent) -> Vec<RelayAction> {
        match event {
            TelephonyEvent::Start { start } => {
                let mut session = self.session.lock();
                session.stream_id = Some(start.stream_sid.clone());
                // Fresh stream, fresh interruption clock
                session.latest_ingress_timestamp_ms = 0;
                session.egress_start_timestamp_ms = None;
                session.last_assistant_item_id = None;
                info!(
                    call_id = %session.call_id,
                    stream_id = %start.stream_sid,
                    language = %session.language,
                    recording = session.recording_enabled,
                    "Media stream started"
                );
                if session.recording_enabled {
                    vec![RelayAction::StartRecording]
                } else {
                    vec![]
                }
            }

            TelephonyEvent::Media { media } => {
                let mut session = self.session.lock();
                // A frame with an unparseable timestamp is still relayed,
                // but the interruption clock keeps its last known value;
                // letting it collapse to 0 would truncate a later barge-in
                // at the wrong position.
                match media.timestamp_ms() {
                    Some(ts) => session.latest_ingress_timestamp_ms = ts,
                    None => warn!(
                        call_id = %session.call_id,
                        raw = %media.timestamp,
                        "Malformed ingress timestamp; clock unchanged"
                    ),
                }

                // Forward to the model leg before mirroring to the recorder
                // so capture never adds latency to the conversational path.
                let mut actions = vec![RelayAction::ToModel(ClientEvent::InputAudioBufferAppend {
                    audio: media.payload.clone(),
                })];
                if session.recording_enabled {
                    actions.push(RelayAction::RecordIngress(media.payload));
                }
                actions
            }

            TelephonyEvent::Mark { .. } => {
                let mut session = self.session.lock();
                if session.playback_mark_queue.pop_front().is_none() {
                    debug!(call_id = %session.call_id, "Mark ack with empty queue");
                }
                vec![]
            }

            TelephonyEvent::Stop { .. } => {
                self.begin_close();
                let session = self.session.lock();
                info!(call_id = %session.call_id, "Media stream stopped");
                let mut actions = Vec::new();
                if session.recording_enabled {
                    actions.push(RelayAction::StopRecording);
                }
                actions.push(RelayAction::CloseModelLeg);
                actions
            }

            TelephonyEvent::Unknown => {
                debug!("Ignoring unknown telephony event");
                vec![]
            }
        }
    }

    // =========================================================================
    // Model leg (egress + control)
    // =========================================================================

    /// Reduce one model-leg event to relay actions.
    pub fn on_model_event(&mut self, event: ServerEvent) -> Vec<RelayAction> {
        match event {
            ServerEvent::AudioDelta { delta, item_id } => self.on_audio_delta(delta, item_id),

            ServerEvent::SpeechStarted {} => self.on_speech_started(),

            ServerEvent::FunctionCallArgumentsDone {
                call_id,
                name,
                arguments,
            } => {
                info!(function = ?name, call_id = %call_id, "Function call arguments complete");
                vec![RelayAction::DispatchFunction {
                    name,
                    arguments,
                    call_id,
                }]
            }

            ServerEvent::Error { error } => {
                warn!(
                    error_type = ?error.error_type,
                    message = ?error.message,
                    "Model leg reported an error"
                );
                vec![]
            }

            ServerEvent::SessionCreated {} | ServerEvent::SessionUpdated {} => {
                debug!("Model session configured");
                vec![]
            }

            ServerEvent::SpeechStopped {}
            | ServerEvent::ResponseDone {}
            | ServerEvent::ConversationItemCreated {}
            | ServerEvent::Unknown => vec![],
        }
    }

    /// Egress path: wrap the delta for the telephony leg, track the
    /// utterance, enqueue a playback mark.
    fn on_audio_delta(&mut self, delta: String, item_id: Option<String>) -> Vec<RelayAction> {
        let mut session = self.session.lock();
        let Some(stream_id) = session.stream_id.clone() else {
            // Delta before the stream started; nowhere to play it.
            debug!(call_id = %session.call_id, "Dropping egress audio before stream start");
            return vec![];
        };

        let mut actions = vec![RelayAction::ToTelephony(TelephonyOutEvent::media(
            &stream_id,
            delta.clone(),
        ))];

        if session.recording_enabled {
            actions.push(RelayAction::RecordEgress(delta));
        }

        // The playback window opens with the first delta of an identified
        // utterance. An id-less delta is relayed but never pins the window:
        // without an item id there is nothing to truncate, and a window
        // with no item would make barge-in clear playback it cannot
        // truncate.
        if let Some(item_id) = item_id {
            session.last_assistant_item_id = Some(item_id);
        }
        if session.last_assistant_item_id.is_some() && session.egress_start_timestamp_ms.is_none()
        {
            session.egress_start_timestamp_ms = Some(session.latest_ingress_timestamp_ms);
        }

        session
            .playback_mark_queue
            .push_back(RESPONSE_MARK_NAME.to_string());
        actions.push(RelayAction::ToTelephony(TelephonyOutEvent::mark(
            &stream_id,
        )));

        actions
    }

    /// Barge-in: truncate the model's record of the in-flight utterance and
    /// clear queued playback. A no-op when nothing is audibly in flight;
    /// that is ordinary turn-taking, not an interruption.
    fn on_speech_started(&mut self) -> Vec<RelayAction> {
        let mut session = self.session.lock();
        if !session.utterance_in_flight() {
            return vec![];
        }

        let start = session
            .egress_start_timestamp_ms
            .unwrap_or(session.latest_ingress_timestamp_ms);
        let elapsed_ms = session.latest_ingress_timestamp_ms.saturating_sub(start);

        let mut actions = Vec::new();
        if let Some(item_id) = session.last_assistant_item_id.clone() {
            info!(
                call_id = %session.call_id,
                item_id = %item_id,
                elapsed_ms,
                "Barge-in: truncating assistant utterance"
            );
            actions.push(RelayAction::ToModel(ClientEvent::ConversationItemTruncate {
                item_id,
                content_index: 0,
                audio_end_ms: elapsed_ms,
            }));
        }

        if let Some(stream_id) = session.stream_id.as_deref() {
            actions.push(RelayAction::ClearPlayback(TelephonyOutEvent::clear(
                stream_id,
            )));
        }

        session.playback_mark_queue.clear();
        session.last_assistant_item_id = None;
        session.egress_start_timestamp_ms = None;

        actions
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::session::{CallMetadata, SessionRegistry};
    use crate::core::telephony::{MediaFrame, StreamStart};

    fn metadata(recording: bool) -> CallMetadata {
        CallMetadata {
            language: "hindi".to_string(),
            persona_type: None,
            recording_enabled: recording,
            phone_number: "+15550100".to_string(),
        }
    }

    fn engine(recording: bool) -> RelayCore {
        let registry = SessionRegistry::new();
        let session = registry.create("C1", &metadata(recording));
        RelayCore::new(session)
    }

    fn start_event(stream: &str, call: &str) -> TelephonyEvent {
        TelephonyEvent::Start {
            start: StreamStart {
                stream_sid: stream.to_string(),
                call_sid: call.to_string(),
                custom_parameters: Default::default(),
            },
        }
    }

    fn media_event(timestamp: u64, payload: &str) -> TelephonyEvent {
        TelephonyEvent::Media {
            media: MediaFrame {
                timestamp: timestamp.to_string(),
                payload: payload.to_string(),
            },
        }
    }

    fn delta(engine: &mut RelayCore, item: &str) -> Vec<RelayAction> {
        engine.on_model_event(ServerEvent::AudioDelta {
            delta: "YXVkaW8=".to_string(),
            item_id: Some(item.to_string()),
        })
    }

    #[test]
    fn test_lifecycle_transitions() {
        let mut engine = engine(false);
        assert_eq!(engine.state(), RelayState::Initializing);
        engine.peer_confirmed();
        assert_eq!(engine.state(), RelayState::Active);
        engine.begin_close();
        assert_eq!(engine.state(), RelayState::Closing);
        engine.finish_close();
        assert_eq!(engine.state(), RelayState::Closed);
    }

    #[test]
    fn test_ingress_updates_clock_and_forwards_first() {
        let mut engine = engine(true);
        engine.on_telephony_event(start_event("S1", "C1"));

        let actions = engine.on_telephony_event(media_event(100, "YQ=="));
        assert_eq!(
            actions[0],
            RelayAction::ToModel(ClientEvent::InputAudioBufferAppend {
                audio: "YQ==".to_string()
            })
        );
        // Recorder mirror comes after the model forward
        assert_eq!(actions[1], RelayAction::RecordIngress("YQ==".to_string()));
        assert_eq!(engine.session().lock().latest_ingress_timestamp_ms, 100);
    }

    #[test]
    fn test_ingress_clock_tracks_latest_frame() {
        let mut engine = engine(false);
        engine.on_telephony_event(start_event("S1", "C1"));
        for ts in [0u64, 20, 40, 160, 1000] {
            engine.on_telephony_event(media_event(ts, "YQ=="));
            assert_eq!(engine.session().lock().latest_ingress_timestamp_ms, ts);
        }
    }

    #[test]
    fn test_malformed_timestamp_keeps_ingress_clock() {
        let mut engine = engine(false);
        engine.on_telephony_event(start_event("S1", "C1"));
        engine.on_telephony_event(media_event(200, "YQ=="));
        delta(&mut engine, "I1");

        // The garbage frame is still relayed, but the clock holds at 200.
        let actions = engine.on_telephony_event(TelephonyEvent::Media {
            media: MediaFrame {
                timestamp: "garbage".to_string(),
                payload: "Yg==".to_string(),
            },
        });
        assert!(matches!(actions[0], RelayAction::ToModel(_)));
        assert_eq!(engine.session().lock().latest_ingress_timestamp_ms, 200);

        // A later barge-in truncates at the real elapsed time.
        engine.on_telephony_event(media_event(350, "Yw=="));
        let actions = engine.on_model_event(ServerEvent::SpeechStarted {});
        assert_eq!(
            actions[0],
            RelayAction::ToModel(ClientEvent::ConversationItemTruncate {
                item_id: "I1".to_string(),
                content_index: 0,
                audio_end_ms: 150,
            })
        );
    }

    #[test]
    fn test_idless_delta_does_not_pin_playback_window() {
        let mut engine = engine(false);
        engine.on_telephony_event(start_event("S1", "C1"));
        engine.on_telephony_event(media_event(200, "YQ=="));

        let actions = engine.on_model_event(ServerEvent::AudioDelta {
            delta: "YXVkaW8=".to_string(),
            item_id: None,
        });
        assert!(matches!(actions[0], RelayAction::ToTelephony(_)));
        {
            let session = engine.session().lock();
            assert!(session.egress_start_timestamp_ms.is_none());
            assert!(session.last_assistant_item_id.is_none());
        }

        // With no identified utterance, speech onset is plain turn-taking.
        assert!(engine.on_model_event(ServerEvent::SpeechStarted {}).is_empty());

        // Once an id arrives, the window opens at the current clock.
        engine.on_telephony_event(media_event(300, "Yg=="));
        delta(&mut engine, "I1");
        assert_eq!(
            engine.session().lock().egress_start_timestamp_ms,
            Some(300)
        );
    }

    #[test]
    fn test_no_recording_actions_when_disabled() {
        let mut engine = engine(false);
        let actions = engine.on_telephony_event(start_event("S1", "C1"));
        assert!(actions.is_empty());

        let actions = engine.on_telephony_event(media_event(0, "YQ=="));
        assert_eq!(actions.len(), 1);
    }

    #[test]
    fn test_egress_delta_enqueues_exactly_one_mark() {
        let mut engine = engine(false);
        engine.on_telephony_event(start_event("S1", "C1"));

        let actions = delta(&mut engine, "I1");
        let marks = actions
            .iter()
            .filter(|a| matches!(a, RelayAction::ToTelephony(TelephonyOutEvent::Mark { .. })))
            .count();
        assert_eq!(marks, 1);
        assert_eq!(engine.session().lock().playback_mark_queue.len(), 1);

        delta(&mut engine, "I1");
        assert_eq!(engine.session().lock().playback_mark_queue.len(), 2);
    }

    #[test]
    fn test_mark_ack_dequeues_one_and_never_underflows() {
        let mut engine = engine(false);
        engine.on_telephony_event(start_event("S1", "C1"));
        delta(&mut engine, "I1");

        engine.on_telephony_event(TelephonyEvent::Mark { mark: None });
        assert_eq!(engine.session().lock().playback_mark_queue.len(), 0);

        // Extra acks are absorbed without panicking
        engine.on_telephony_event(TelephonyEvent::Mark { mark: None });
        assert_eq!(engine.session().lock().playback_mark_queue.len(), 0);
    }

    #[test]
    fn test_egress_start_pinned_on_first_delta_only() {
        let mut engine = engine(false);
        engine.on_telephony_event(start_event("S1", "C1"));
        engine.on_telephony_event(media_event(200, "YQ=="));

        delta(&mut engine, "I1");
        assert_eq!(
            engine.session().lock().egress_start_timestamp_ms,
            Some(200)
        );

        engine.on_telephony_event(media_event(300, "Yg=="));
        delta(&mut engine, "I1");
        // Still the first delta's pin
        assert_eq!(
            engine.session().lock().egress_start_timestamp_ms,
            Some(200)
        );
    }

    #[test]
    fn test_barge_in_noop_when_nothing_in_flight() {
        let mut engine = engine(false);
        engine.on_telephony_event(start_event("S1", "C1"));
        engine.on_telephony_event(media_event(100, "YQ=="));

        let actions = engine.on_model_event(ServerEvent::SpeechStarted {});
        assert!(actions.is_empty());
    }

    #[test]
    fn test_barge_in_noop_after_all_marks_acked() {
        let mut engine = engine(false);
        engine.on_telephony_event(start_event("S1", "C1"));
        delta(&mut engine, "I1");
        engine.on_telephony_event(TelephonyEvent::Mark { mark: None });

        let actions = engine.on_model_event(ServerEvent::SpeechStarted {});
        assert!(actions.is_empty());
    }

    #[test]
    fn test_barge_in_truncates_and_clears() {
        let mut engine = engine(false);
        engine.on_telephony_event(start_event("S1", "C1"));
        engine.on_telephony_event(media_event(200, "YQ=="));
        delta(&mut engine, "I1");
        engine.on_telephony_event(media_event(350, "Yg=="));

        let actions = engine.on_model_event(ServerEvent::SpeechStarted {});
        assert_eq!(actions.len(), 2);
        assert_eq!(
            actions[0],
            RelayAction::ToModel(ClientEvent::ConversationItemTruncate {
                item_id: "I1".to_string(),
                content_index: 0,
                audio_end_ms: 150,
            })
        );
        assert_eq!(
            actions[1],
            RelayAction::ClearPlayback(TelephonyOutEvent::clear("S1"))
        );

        let session = engine.session().lock();
        assert!(session.playback_mark_queue.is_empty());
        assert!(session.last_assistant_item_id.is_none());
        assert!(session.egress_start_timestamp_ms.is_none());
    }

    #[test]
    fn test_second_barge_in_is_noop() {
        let mut engine = engine(false);
        engine.on_telephony_event(start_event("S1", "C1"));
        engine.on_telephony_event(media_event(200, "YQ=="));
        delta(&mut engine, "I1");

        assert!(!engine.on_model_event(ServerEvent::SpeechStarted {}).is_empty());
        assert!(engine.on_model_event(ServerEvent::SpeechStarted {}).is_empty());
    }

    #[test]
    fn test_function_call_done_becomes_dispatch_action() {
        let mut engine = engine(false);
        let actions = engine.on_model_event(ServerEvent::FunctionCallArgumentsDone {
            call_id: "fc_1".to_string(),
            name: Some("sendSms".to_string()),
            arguments: "{\"message\":\"hi\"}".to_string(),
        });

        assert_eq!(
            actions,
            vec![RelayAction::DispatchFunction {
                name: Some("sendSms".to_string()),
                arguments: "{\"message\":\"hi\"}".to_string(),
                call_id: "fc_1".to_string(),
            }]
        );
    }

    #[test]
    fn test_stop_closes_model_leg_and_finalizes_recording() {
        let mut engine = engine(true);
        engine.on_telephony_event(start_event("S1", "C1"));

        let actions = engine.on_telephony_event(TelephonyEvent::Stop { stop: None });
        assert_eq!(
            actions,
            vec![RelayAction::StopRecording, RelayAction::CloseModelLeg]
        );
        assert_eq!(engine.state(), RelayState::Closing);
    }

    #[test]
    fn test_delta_before_stream_start_is_dropped() {
        let mut engine = engine(false);
        let actions = delta(&mut engine, "I1");
        assert!(actions.is_empty());
        assert!(engine.session().lock().playback_mark_queue.is_empty());
    }

    #[test]
    fn test_model_error_and_unknown_events_are_ignored() {
        let mut engine = engine(false);
        let error: ServerEvent = serde_json::from_str(
            r#"{"type": "error", "error": {"type": "server_error", "message": "boom"}}"#,
        )
        .unwrap();
        assert!(engine.on_model_event(error).is_empty());
        assert!(engine.on_model_event(ServerEvent::Unknown).is_empty());
    }
}
