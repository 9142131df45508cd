//! Synchronized capture of both audio directions to durable storage.
//!
//! Each call may own one [`CallRecorder`]. While recording, the relay mirrors
//! every ingress and egress payload into the recorder's direction buffer;
//! `stop()` expands the buffered μ-law audio to 16-bit PCM and persists one
//! WAV file per non-empty direction, plus a merged conversation artifact
//! when both directions captured audio.
//!
//! Artifacts are named `{call_id}_{unix_millis}_{direction}.wav` so the
//! listing endpoint can reconstruct call id, capture time and direction from
//! the filename alone.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use base64::prelude::*;
use dashmap::DashMap;
use parking_lot::Mutex;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

/// Telephony-leg audio is G.711 μ-law at 8 kHz mono.
pub const CAPTURE_SAMPLE_RATE: u32 = 8000;

/// Errors reported by the capture sink.
#[derive(Debug, Error)]
pub enum RecordingError {
    /// `start()` on a recorder that is already capturing
    #[error("Recording already in progress")]
    AlreadyRecording,

    /// `stop()` on a recorder that is not capturing
    #[error("No recording in progress")]
    NotRecording,

    /// Artifact could not be written
    #[error("Failed to write recording: {0}")]
    Write(#[from] hound::Error),

    /// Recordings directory could not be prepared
    #[error("Recording storage unavailable: {0}")]
    Storage(#[from] std::io::Error),
}

/// Audio direction of a captured buffer or persisted artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Caller towards the model
    Incoming,
    /// Model towards the caller
    Outgoing,
    /// Both directions merged into one artifact
    Conversation,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Incoming => "incoming",
            Direction::Outgoing => "outgoing",
            Direction::Conversation => "conversation",
        }
    }
}

/// Paths produced by `stop()`. Any subset may be absent if that direction
/// never received audio.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordingPaths {
    pub incoming: Option<PathBuf>,
    pub outgoing: Option<PathBuf>,
    pub conversation: Option<PathBuf>,
}

impl RecordingPaths {
    /// True when at least one artifact was persisted.
    pub fn any(&self) -> bool {
        self.incoming.is_some() || self.outgoing.is_some() || self.conversation.is_some()
    }
}

/// Expand one G.711 μ-law byte to a linear 16-bit sample.
fn mulaw_to_linear(byte: u8) -> i16 {
    let byte = !byte;
    let sign = byte & 0x80;
    let exponent = (byte >> 4) & 0x07;
    let mantissa = byte & 0x0f;

    let mut sample = (((mantissa as i32) << 3) + 0x84) << exponent;
    sample -= 0x84;

    if sign != 0 { -(sample as i16) } else { sample as i16 }
}

/// Per-call recorder holding both direction buffers.
pub struct CallRecorder {
    call_id: String,
    dir: PathBuf,
    recording: bool,
    /// Capture start, unix milliseconds; part of every artifact name
    started_at_ms: u64,
    incoming: Vec<u8>,
    outgoing: Vec<u8>,
}

impl CallRecorder {
    /// Idle recorder persisting artifacts for `call_id` under `dir`.
    pub fn new(call_id: &str, dir: &Path) -> Self {
        CallRecorder {
            call_id: call_id.to_string(),
            dir: dir.to_path_buf(),
            recording: false,
            started_at_ms: 0,
            incoming: Vec::new(),
            outgoing: Vec::new(),
        }
    }

    /// Whether the recorder is currently capturing.
    pub fn is_recording(&self) -> bool {
        self.recording
    }

    /// Begin capturing. Starting an active recorder is an error and leaves
    /// in-flight buffers untouched.
    pub fn start(&mut self) -> Result<(), RecordingError> {
        if self.recording {
            return Err(RecordingError::AlreadyRecording);
        }
        self.recording = true;
        self.started_at_ms = unix_millis();
        info!(call_id = %self.call_id, "Recording started");
        Ok(())
    }

    /// Mirror an ingress payload (base64 μ-law). No-op when idle.
    pub fn add_incoming_audio(&mut self, payload_b64: &str) {
        Self::append(self.recording, &mut self.incoming, payload_b64);
    }

    /// Mirror an egress payload (base64 μ-law). No-op when idle.
    pub fn add_outgoing_audio(&mut self, payload_b64: &str) {
        Self::append(self.recording, &mut self.outgoing, payload_b64);
    }

    fn append(recording: bool, buffer: &mut Vec<u8>, payload_b64: &str) {
        if !recording {
            return;
        }
        match BASE64_STANDARD.decode(payload_b64) {
            Ok(bytes) => buffer.extend_from_slice(&bytes),
            Err(e) => warn!("Dropping undecodable audio payload: {e}"),
        }
    }

    /// Finalize the capture: persist whatever buffers are non-empty and
    /// return the produced paths. Stopping an idle recorder is an error.
    pub fn stop(&mut self) -> Result<RecordingPaths, RecordingError> {
        if !self.recording {
            return Err(RecordingError::NotRecording);
        }
        self.recording = false;

        std::fs::create_dir_all(&self.dir)?;

        let incoming = std::mem::take(&mut self.incoming);
        let outgoing = std::mem::take(&mut self.outgoing);

        let mut paths = RecordingPaths::default();
        if !incoming.is_empty() {
            paths.incoming = Some(self.write_wav(Direction::Incoming, &decode(&incoming))?);
        }
        if !outgoing.is_empty() {
            paths.outgoing = Some(self.write_wav(Direction::Outgoing, &decode(&outgoing))?);
        }
        if !incoming.is_empty() && !outgoing.is_empty() {
            let merged = mix(&decode(&incoming), &decode(&outgoing));
            paths.conversation = Some(self.write_wav(Direction::Conversation, &merged)?);
        }

        info!(
            call_id = %self.call_id,
            incoming = paths.incoming.is_some(),
            outgoing = paths.outgoing.is_some(),
            "Recording stopped"
        );
        Ok(paths)
    }

    fn artifact_path(&self, direction: Direction) -> PathBuf {
        self.dir.join(format!(
            "{}_{}_{}.wav",
            self.call_id,
            self.started_at_ms,
            direction.as_str()
        ))
    }

    fn write_wav(&self, direction: Direction, samples: &[i16]) -> Result<PathBuf, RecordingError> {
        let path = self.artifact_path(direction);
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: CAPTURE_SAMPLE_RATE,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec)?;
        for &sample in samples {
            writer.write_sample(sample)?;
        }
        writer.finalize()?;
        debug!(path = %path.display(), "Recording artifact written");
        Ok(path)
    }
}

fn unix_millis() -> u64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as u64
}

fn decode(mulaw: &[u8]) -> Vec<i16> {
    mulaw.iter().map(|&b| mulaw_to_linear(b)).collect()
}

/// Sample-wise saturating mix of both directions. The buffers are appended
/// in arrival order, so the mix approximates the conversation as heard.
fn mix(a: &[i16], b: &[i16]) -> Vec<i16> {
    let len = a.len().max(b.len());
    (0..len)
        .map(|i| {
            let x = a.get(i).copied().unwrap_or(0) as i32;
            let y = b.get(i).copied().unwrap_or(0) as i32;
            (x + y).clamp(i16::MIN as i32, i16::MAX as i32) as i16
        })
        .collect()
}

/// Shared handle to a call's recorder.
pub type SharedRecorder = Arc<Mutex<CallRecorder>>;

/// Process-wide map of active recorders, keyed by call id.
pub struct RecorderManager {
    dir: PathBuf,
    recorders: DashMap<String, SharedRecorder>,
}

impl RecorderManager {
    /// Manager persisting artifacts under `dir`.
    pub fn new(dir: PathBuf) -> Self {
        RecorderManager {
            dir,
            recorders: DashMap::new(),
        }
    }

    /// Directory artifacts are persisted to.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Fetch the call's recorder without creating one.
    pub fn get(&self, call_id: &str) -> Option<SharedRecorder> {
        self.recorders.get(call_id).map(|entry| entry.clone())
    }

    /// Fetch the call's recorder, creating an idle one if absent.
    pub fn get_or_create(&self, call_id: &str) -> SharedRecorder {
        self.recorders
            .entry(call_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(CallRecorder::new(call_id, &self.dir))))
            .clone()
    }

    /// Drop the call's recorder at call end.
    pub fn remove(&self, call_id: &str) {
        self.recorders.remove(call_id);
    }
}

// =============================================================================
// Tests
// =============================================================================
