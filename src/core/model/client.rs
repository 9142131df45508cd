//! Speech-model realtime WebSocket client.
//!
//! One [`ModelLeg`] exists per call. It owns the WebSocket to the model
//! provider and exposes two channels: an outbound [`ClientEvent`] sender and
//! an inbound [`ServerEvent`] receiver, both drained by the call's handler
//! task. A background task multiplexes the socket.
//!
//! There is no reconnection: the model holds the entire conversation context
//! in the session, so a dropped leg is unrecoverable and ends the call.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, error, info, warn};
use url::Url;

use super::messages::{ClientEvent, ServerEvent, SessionConfig};

/// Realtime endpoint; the model is selected by query parameter.
pub const MODEL_REALTIME_URL: &str = "wss://api.openai.com/v1/realtime";

/// Channel capacity for both directions of the leg.
const LEG_CHANNEL_CAPACITY: usize = 256;

/// Model-leg failures.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Model connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Model leg closed")]
    LegClosed,
}

/// Live WebSocket leg to the speech model for one call.
pub struct ModelLeg {
    sender: mpsc::Sender<ClientEvent>,
    events: mpsc::Receiver<ServerEvent>,
    task: JoinHandle<()>,
}

impl ModelLeg {
    /// Open the leg and start its socket task.
    ///
    /// `endpoint` is the base realtime URL ([`MODEL_REALTIME_URL`] in
    /// production; tests point it at a local listener).
    pub async fn connect(
        endpoint: &str,
        api_key: &str,
        model: &str,
        temperature: f32,
    ) -> Result<Self, ModelError> {
        let url = format!("{endpoint}?model={model}&temperature={temperature}");
        let request = build_connect_request(&url, api_key)?;

        let (ws_stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| ModelError::ConnectionFailed(e.to_string()))?;

        info!(model, "Connected to speech model");

        let (mut ws_sink, mut ws_source) = ws_stream.split();
        let (out_tx, mut out_rx) = mpsc::channel::<ClientEvent>(LEG_CHANNEL_CAPACITY);
        let (event_tx, event_rx) = mpsc::channel::<ServerEvent>(LEG_CHANNEL_CAPACITY);

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    outbound = out_rx.recv() => {
                        let Some(event) = outbound else {
                            // Leg handle dropped; close the socket politely.
                            let _ = ws_sink.send(Message::Close(None)).await;
                            break;
                        };
                        let json = match serde_json::to_string(&event) {
                            Ok(j) => j,
                            Err(e) => {
                                error!("Failed to serialize client event: {e}");
                                continue;
                            }
                        };
                        if let Err(e) = ws_sink.send(Message::Text(json.into())).await {
                            error!("Model leg send failed: {e}");
                            break;
                        }
                    }

                    inbound = ws_source.next() => {
                        match inbound {
                            Some(Ok(Message::Text(text))) => {
                                match serde_json::from_str::<ServerEvent>(&text) {
                                    Ok(event) => {
                                        if event_tx.send(event).await.is_err() {
                                            break;
                                        }
                                    }
                                    Err(e) => {
                                        warn!("Unparseable model event: {e}");
                                    }
                                }
                            }
                            Some(Ok(Message::Ping(data))) => {
                                if let Err(e) = ws_sink.send(Message::Pong(data)).await {
                                    error!("Failed to send pong: {e}");
                                    break;
                                }
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                info!("Model leg closed by peer");
                                break;
                            }
                            Some(Err(e)) => {
                                error!("Model leg socket error: {e}");
                                break;
                            }
                            Some(Ok(_)) => {}
                        }
                    }
                }
            }
            debug!("Model leg task ended");
        });

        Ok(ModelLeg {
            sender: out_tx,
            events: event_rx,
            task,
        })
    }

    /// Send one event to the model.
    pub async fn send(&self, event: ClientEvent) -> Result<(), ModelError> {
        self.sender
            .send(event)
            .await
            .map_err(|_| ModelError::LegClosed)
    }

    /// Clone the outbound sender for tasks that need their own handle.
    pub fn sender(&self) -> mpsc::Sender<ClientEvent> {
        self.sender.clone()
    }

    /// Next event from the model; `None` means the leg closed.
    pub async fn next_event(&mut self) -> Option<ServerEvent> {
        self.events.recv().await
    }

    /// Configure the session, then ask for the opening utterance after
    /// `greeting_delay`. The delay gives the telephony leg time to finish
    /// its own setup so the greeting's first frames are not dropped; it
    /// runs on a detached task so ingress relaying starts immediately.
    pub async fn initialize_session(
        &self,
        session: SessionConfig,
        greeting_delay: Duration,
    ) -> Result<(), ModelError> {
        self.send(ClientEvent::SessionUpdate { session }).await?;

        let sender = self.sender.clone();
        tokio::spawn(async move {
            tokio::time::sleep(greeting_delay).await;
            if sender.send(ClientEvent::ResponseCreate).await.is_err() {
                debug!("Leg closed before greeting request");
            }
        });

        Ok(())
    }

    /// Tear the leg down. Dropping the sender lets the socket task send a
    /// close frame; the abort is a backstop for a wedged socket.
    pub async fn close(self) {
        drop(self.sender);
        drop(self.events);
        let _ = tokio::time::timeout(Duration::from_secs(2), self.task).await;
    }
}

/// Build the upgrade request with authentication headers.
fn build_connect_request(url: &str, api_key: &str) -> Result<http::Request<()>, ModelError> {
    let parsed = Url::parse(url).map_err(|e| ModelError::ConnectionFailed(e.to_string()))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| ModelError::ConnectionFailed("endpoint has no host".to_string()))?
        .to_string();
    let host = match parsed.port() {
        Some(port) => format!("{host}:{port}"),
        None => host,
    };

    http::Request::builder()
        .uri(url)
        .header("Authorization", format!("Bearer {api_key}"))
        .header("OpenAI-Beta", "realtime=v1")
        .header(
            "Sec-WebSocket-Key",
            tungstenite::handshake::client::generate_key(),
        )
        .header("Sec-WebSocket-Version", "13")
        .header("Connection", "Upgrade")
        .header("Upgrade", "websocket")
        .header("Host", host)
        .body(())
        .map_err(|e| ModelError::ConnectionFailed(e.to_string()))
}

// =============================================================================
// Tests
// =============================================================================
