//! Recording management handlers: list, download, delete, and manual
//! start/stop of capture for an active call.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::info;

use crate::errors::{AppError, AppResult};
use crate::state::SharedState;

const WAV_CONTENT_TYPE: &str = "audio/wav";

/// Artifact filenames are flat; anything that could escape the recordings
/// directory is rejected.
fn is_valid_filename(filename: &str) -> bool {
    !filename.is_empty()
        && !filename.contains("..")
        && !filename.contains('/')
        && !filename.contains('\\')
        && filename.ends_with(".wav")
}

/// One entry in the recording listing.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingEntry {
    pub filename: String,
    pub call_id: String,
    pub timestamp: String,
    /// Direction component of the filename: incoming, outgoing, conversation
    #[serde(rename = "type")]
    pub direction: String,
    pub size: u64,
    /// Filesystem modification time, RFC 3339; absent when unavailable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

/// Split `{call_id}_{unix_millis}_{direction}.wav` into its components.
fn parse_artifact_name(filename: &str) -> Option<(String, String, String)> {
    let stem = filename.strip_suffix(".wav")?;
    // The direction and timestamp never contain underscores; the call id may.
    let (rest, direction) = stem.rsplit_once('_')?;
    let (call_id, timestamp) = rest.rsplit_once('_')?;
    Some((
        call_id.to_string(),
        timestamp.to_string(),
        direction.to_string(),
    ))
}

/// `GET /recordings` list persisted artifacts.
pub async fn list_recordings(State(state): State<SharedState>) -> AppResult<Json<Value>> {
    let dir = state.recorders.dir();
    if !dir.exists() {
        return Ok(Json(json!({ "recordings": [] })));
    }

    let mut recordings = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let filename = entry.file_name().to_string_lossy().to_string();
        if !filename.ends_with(".wav") {
            continue;
        }
        let Some((call_id, timestamp, direction)) = parse_artifact_name(&filename) else {
            continue;
        };
        let metadata = entry.metadata().await.ok();
        let size = metadata.as_ref().map(|m| m.len()).unwrap_or(0);
        let created_at = metadata
            .and_then(|m| m.modified().ok())
            .map(time::OffsetDateTime::from)
            .and_then(|t| t.format(&time::format_description::well_known::Rfc3339).ok());
        recordings.push(RecordingEntry {
            filename,
            call_id,
            timestamp,
            direction,
            size,
            created_at,
        });
    }

    recordings.sort_by(|a, b| a.filename.cmp(&b.filename));
    Ok(Json(json!({ "recordings": recordings })))
}

/// `GET /recordings/{filename}` download one artifact.
pub async fn download_recording(
    State(state): State<SharedState>,
    Path(filename): Path<String>,
) -> AppResult<Response> {
    if !is_valid_filename(&filename) {
        return Err(AppError::BadRequest("Invalid recording filename".to_string()));
    }

    let path = state.recorders.dir().join(&filename);
    let contents = tokio::fs::read(&path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            AppError::NotFound("Recording not found".to_string())
        } else {
            AppError::Io(e)
        }
    })?;

    let headers = [
        (header::CONTENT_TYPE, WAV_CONTENT_TYPE.to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{filename}\""),
        ),
    ];
    Ok((StatusCode::OK, headers, contents).into_response())
}

/// `DELETE /recordings/{filename}` remove one artifact.
pub async fn delete_recording(
    State(state): State<SharedState>,
    Path(filename): Path<String>,
) -> AppResult<Json<Value>> {
    if !is_valid_filename(&filename) {
        return Err(AppError::BadRequest("Invalid recording filename".to_string()));
    }

    let path = state.recorders.dir().join(&filename);
    tokio::fs::remove_file(&path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            AppError::NotFound("Recording not found".to_string())
        } else {
            AppError::Io(e)
        }
    })?;

    info!(filename = %filename, "Recording deleted");
    Ok(Json(json!({
        "success": true,
        "message": format!("Recording {filename} deleted"),
    })))
}

/// `POST /recordings/{call_id}/start` begin capture mid-call.
///
/// The call must be active; creating a recorder for an arbitrary id would
/// leave an entry in the manager that no teardown ever removes.
pub async fn start_recording(
    State(state): State<SharedState>,
    Path(call_id): Path<String>,
) -> AppResult<Json<Value>> {
    if state.sessions.get(&call_id).is_none() {
        return Err(AppError::NotFound(format!("No active call {call_id}")));
    }

    let recorder = state.recorders.get_or_create(&call_id);
    recorder.lock().start()?;

    info!(call_id = %call_id, "Recording started via API");
    Ok(Json(json!({
        "success": true,
        "message": format!("Recording started for call {call_id}"),
    })))
}

/// `POST /recordings/{call_id}/stop` finalize capture and report artifacts.
pub async fn stop_recording(
    State(state): State<SharedState>,
    Path(call_id): Path<String>,
) -> AppResult<Json<Value>> {
    let recorder = state
        .recorders
        .get(&call_id)
        .ok_or_else(|| AppError::NotFound(format!("No recorder for call {call_id}")))?;
    let paths = recorder.lock().stop()?;

    info!(call_id = %call_id, "Recording stopped via API");
    Ok(Json(json!({
        "success": true,
        "message": format!("Recording stopped for call {call_id}"),
        "files": {
            "incoming": paths.incoming,
            "outgoing": paths.outgoing,
            "conversation": paths.conversation,
        },
    })))
}
