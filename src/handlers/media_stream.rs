//! Per-call media-stream WebSocket handler.
//!
//! Each accepted connection runs one call end to end:
//!
//! 1. Wait for the telephony `start` event and consume the call's pending
//!    metadata.
//! 2. Open the model leg, configure the session with the resolved
//!    per-language instructions and the function manifest.
//! 3. Drive the relay engine from both legs, executing the actions it emits.
//! 4. Tear everything down when either leg closes.
//!
//! Outbound telephony traffic goes through a dedicated writer task with two
//! channels: ordinary media/marks, and a control channel for `clear` that is
//! drained first so a barge-in is never stuck behind queued audio.

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::core::functions::FunctionRegistry;
use crate::core::model::{MODEL_REALTIME_URL, ModelLeg};
use crate::core::model::messages::{
    AudioConfig, AudioFormat, AudioInput, AudioOutput, ClientEvent, SessionConfig, TurnDetection,
};
use crate::core::recording::SharedRecorder;
use crate::core::relay::{RelayAction, RelayCore};
use crate::core::session::CallMetadata;
use crate::core::telephony::{StreamStart, TelephonyEvent, TelephonyOutEvent};
use crate::state::SharedState;

/// Channel capacity for outbound telephony frames.
const WRITER_CHANNEL_CAPACITY: usize = 256;

/// `GET /media-stream` WebSocket upgrade.
pub async fn media_stream_handler(
    State(state): State<SharedState>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| async move {
        run_call(state, socket).await;
    })
}

/// Everything the action executor needs for one call.
struct CallContext<'a> {
    call_id: &'a str,
    media_tx: &'a mpsc::Sender<TelephonyOutEvent>,
    clear_tx: &'a mpsc::Sender<TelephonyOutEvent>,
    model_tx: &'a mpsc::Sender<ClientEvent>,
    recorder: &'a SharedRecorder,
    functions: &'a FunctionRegistry,
}

/// Drive one call to completion.
async fn run_call(state: SharedState, socket: WebSocket) {
    let (sink, mut source) = socket.split();

    // Writer task owns the telephony sink for the rest of the call.
    let (media_tx, media_rx) = mpsc::channel(WRITER_CHANNEL_CAPACITY);
    let (clear_tx, clear_rx) = mpsc::channel(8);
    let writer = tokio::spawn(telephony_writer(sink, media_rx, clear_rx));

    let Some(start) = await_stream_start(&mut source).await else {
        drop(media_tx);
        drop(clear_tx);
        let _ = writer.await;
        return;
    };

    let call_id = start.call_sid.clone();
    let metadata = state
        .sessions
        .take_metadata(&call_id)
        .unwrap_or_else(|| CallMetadata {
            language: state.config.default_language.clone(),
            persona_type: None,
            recording_enabled: false,
            phone_number: String::new(),
        });
    let language = metadata.language.clone();

    let session = state.sessions.create(&call_id, &metadata);
    let recorder = state.recorders.get_or_create(&call_id);
    let mut relay = RelayCore::new(session);

    // Open the model leg; without it the call cannot proceed.
    let mut model_leg = match ModelLeg::connect(
        MODEL_REALTIME_URL,
        &state.config.openai_api_key,
        &state.config.model,
        state.config.temperature,
    )
    .await
    {
        Ok(leg) => leg,
        Err(e) => {
            error!(call_id = %call_id, "Failed to open model leg: {e}");
            state.sessions.remove(&call_id);
            state.recorders.remove(&call_id);
            drop(media_tx);
            drop(clear_tx);
            let _ = writer.await;
            return;
        }
    };

    let model_tx = model_leg.sender();
    let context = CallContext {
        call_id: &call_id,
        media_tx: &media_tx,
        clear_tx: &clear_tx,
        model_tx: &model_tx,
        recorder: &recorder,
        functions: &state.functions,
    };

    // Replay the start event through the engine (recording kick-off).
    let start_actions = relay.on_telephony_event(TelephonyEvent::Start { start });
    execute_actions(&context, start_actions).await;

    let session_config = build_session_config(&state, &language);
    if let Err(e) = model_leg
        .initialize_session(session_config, state.config.greeting_delay())
        .await
    {
        error!(call_id = %call_id, "Failed to configure model session: {e}");
    } else {
        relay.peer_confirmed();
    }

    // Main relay loop: both legs feed the engine until one of them ends.
    loop {
        tokio::select! {
            inbound = source.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<TelephonyEvent>(&text) {
                            Ok(event) => {
                                let actions = relay.on_telephony_event(event);
                                if !execute_actions(&context, actions).await {
                                    break;
                                }
                            }
                            Err(e) => warn!(call_id = %call_id, "Unparseable telephony event: {e}"),
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!(call_id = %call_id, "Telephony leg closed");
                        relay.begin_close();
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(call_id = %call_id, "Telephony socket error: {e}");
                        relay.begin_close();
                        break;
                    }
                    Some(Ok(_)) => {}
                }
            }

            event = model_leg.next_event() => {
                match event {
                    Some(event) => {
                        let actions = relay.on_model_event(event);
                        if !execute_actions(&context, actions).await {
                            break;
                        }
                    }
                    None => {
                        info!(call_id = %call_id, "Model leg closed");
                        relay.begin_close();
                        break;
                    }
                }
            }
        }
    }

    // Teardown. An abrupt disconnect skips the telephony stop event, so the
    // recorder may still be live here.
    {
        let mut recorder = recorder.lock();
        if recorder.is_recording() {
            match recorder.stop() {
                Ok(paths) => info!(call_id = %call_id, ?paths, "Recording finalized at teardown"),
                Err(e) => warn!(call_id = %call_id, "Failed to finalize recording: {e}"),
            }
        }
    }

    drop(context);
    drop(model_tx);
    model_leg.close().await;
    state.sessions.remove(&call_id);
    state.recorders.remove(&call_id);
    relay.finish_close();

    drop(media_tx);
    drop(clear_tx);
    let _ = writer.await;
    info!(call_id = %call_id, "Call ended");
}

/// Read telephony events until the stream start arrives.
async fn await_stream_start(
    source: &mut SplitStream<WebSocket>,
) -> Option<StreamStart> {
    loop {
        match source.next().await {
            Some(Ok(Message::Text(text))) => match serde_json::from_str::<TelephonyEvent>(&text) {
                Ok(TelephonyEvent::Start { start }) => return Some(start),
                Ok(TelephonyEvent::Stop { .. }) => return None,
                Ok(_) => {}
                Err(e) => warn!("Unparseable telephony event before start: {e}"),
            },
            Some(Ok(Message::Close(_))) | None => return None,
            Some(Err(e)) => {
                warn!("Telephony socket error before start: {e}");
                return None;
            }
            Some(Ok(_)) => {}
        }
    }
}

/// Telephony writer task. The control channel (buffer clears) is drained
/// before queued media so barge-in takes effect immediately.
async fn telephony_writer(
    mut sink: SplitSink<WebSocket, Message>,
    mut media_rx: mpsc::Receiver<TelephonyOutEvent>,
    mut clear_rx: mpsc::Receiver<TelephonyOutEvent>,
) {
    loop {
        let event = tokio::select! {
            biased;
            ctrl = clear_rx.recv() => ctrl,
            frame = media_rx.recv() => frame,
        };
        // Both senders are dropped together at teardown.
        let Some(event) = event else { break };

        let json = match serde_json::to_string(&event) {
            Ok(j) => j,
            Err(e) => {
                error!("Failed to serialize telephony event: {e}");
                continue;
            }
        };
        if let Err(e) = sink.send(Message::Text(json.into())).await {
            debug!("Telephony writer ending: {e}");
            break;
        }
    }
    let _ = sink.send(Message::Close(None)).await;
}

/// Execute relay actions in order. Returns false when the call must end.
async fn execute_actions(context: &CallContext<'_>, actions: Vec<RelayAction>) -> bool {
    for action in actions {
        match action {
            RelayAction::ToModel(event) => {
                if context.model_tx.send(event).await.is_err() {
                    warn!(call_id = %context.call_id, "Model leg gone; ending call");
                    return false;
                }
            }

            RelayAction::ToTelephony(event) => {
                if context.media_tx.send(event).await.is_err() {
                    warn!(call_id = %context.call_id, "Telephony writer gone; ending call");
                    return false;
                }
            }

            RelayAction::ClearPlayback(event) => {
                if context.clear_tx.send(event).await.is_err() {
                    warn!(call_id = %context.call_id, "Telephony writer gone; ending call");
                    return false;
                }
            }

            RelayAction::RecordIngress(payload) => {
                context.recorder.lock().add_incoming_audio(&payload);
            }

            RelayAction::RecordEgress(payload) => {
                context.recorder.lock().add_outgoing_audio(&payload);
            }

            RelayAction::StartRecording => {
                if let Err(e) = context.recorder.lock().start() {
                    warn!(call_id = %context.call_id, "Failed to start recording: {e}");
                }
            }

            RelayAction::StopRecording => {
                let result = context.recorder.lock().stop();
                match result {
                    Ok(paths) => info!(call_id = %context.call_id, ?paths, "Recording finalized"),
                    Err(e) => warn!(call_id = %context.call_id, "Failed to stop recording: {e}"),
                }
            }

            RelayAction::DispatchFunction {
                name,
                arguments,
                call_id,
            } => {
                let name = name.unwrap_or_default();
                let (result, events) = context
                    .functions
                    .dispatch(&name, &arguments, &call_id)
                    .await;
                info!(
                    call_id = %context.call_id,
                    function = %name,
                    success = result.success,
                    "Function dispatched"
                );
                for event in events {
                    if context.model_tx.send(event).await.is_err() {
                        warn!(call_id = %context.call_id, "Model leg gone; ending call");
                        return false;
                    }
                }
            }

            RelayAction::CloseModelLeg => return false,
        }
    }
    true
}

/// Session configuration for one call: μ-law both ways, server VAD, the
/// function manifest, and the language-resolved instructions.
fn build_session_config(state: &SharedState, language: &str) -> SessionConfig {
    SessionConfig {
        session_type: "realtime".to_string(),
        model: state.config.model.clone(),
        output_modalities: vec!["audio".to_string()],
        tools: Some(state.functions.manifest()),
        tool_choice: Some("auto".to_string()),
        audio: AudioConfig {
            input: AudioInput {
                format: AudioFormat::pcmu(),
                turn_detection: Some(TurnDetection::ServerVad {}),
            },
            output: AudioOutput {
                format: AudioFormat::pcmu(),
                voice: state.config.voice.clone(),
            },
        },
        instructions: state.config.load_instructions(language),
    }
}
