//! Call initiation and service status handlers.

use axum::Json;
use axum::extract::State;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;
use uuid::Uuid;

use crate::core::session::CallMetadata;
use crate::errors::{AppError, AppResult};
use crate::state::SharedState;

/// `POST /calls` request body.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRequest {
    /// Number to dial; placement itself happens out of process
    pub phone_number: String,
    /// Requested conversation language
    pub language: Option<String>,
    /// Persona preset
    pub persona_type: Option<String>,
    /// Capture both audio directions for this call
    #[serde(default)]
    pub enable_recording: bool,
}

/// Deposit metadata for a call whose media stream will open shortly.
///
/// The returned call id is what the telephony side passes back as the
/// stream's `callSid`; the media-stream handler consumes the metadata then.
pub async fn create_call(
    State(state): State<SharedState>,
    Json(request): Json<CallRequest>,
) -> AppResult<Json<Value>> {
    if request.phone_number.trim().is_empty() {
        return Err(AppError::BadRequest("phoneNumber is required".to_string()));
    }

    let call_id = Uuid::new_v4().to_string();
    let language = state.config.resolve_language(request.language.as_deref());

    info!(
        call_id = %call_id,
        phone_number = %request.phone_number,
        language = %language,
        persona = ?request.persona_type,
        recording = request.enable_recording,
        "Call registered"
    );

    state.sessions.register_call(
        &call_id,
        CallMetadata {
            language: language.clone(),
            persona_type: request.persona_type.clone(),
            recording_enabled: request.enable_recording,
            phone_number: request.phone_number.clone(),
        },
    );

    Ok(Json(json!({
        "success": true,
        "callId": call_id,
        "language": language,
        "recordingEnabled": request.enable_recording,
    })))
}

/// `GET /` service status.
pub async fn health_check(State(state): State<SharedState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "activeCalls": state.sessions.active_calls(),
        "defaultLanguage": state.config.default_language,
        "supportedLanguages": state.config.supported_languages,
        "functions": state.functions.names(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_request_camel_case() {
        let request: CallRequest = serde_json::from_str(
            r#"{"phoneNumber": "+15550100", "language": "kannada", "enableRecording": true}"#,
        )
        .unwrap();
        assert_eq!(request.phone_number, "+15550100");
        assert_eq!(request.language.as_deref(), Some("kannada"));
        assert!(request.enable_recording);
        assert!(request.persona_type.is_none());
    }

    #[test]
    fn test_call_request_recording_defaults_off() {
        let request: CallRequest =
            serde_json::from_str(r#"{"phoneNumber": "+15550100"}"#).unwrap();
        assert!(!request.enable_recording);
    }
}
