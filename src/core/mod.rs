//! Core relay machinery: per-call sessions, both wire protocols, the relay
//! engine, function dispatch, and audio capture.

pub mod functions;
pub mod model;
pub mod recording;
pub mod relay;
pub mod session;
pub mod telephony;

pub use functions::{Capability, FunctionRegistry, FunctionResult};
pub use recording::{CallRecorder, Direction, RecorderManager, RecordingError, RecordingPaths};
pub use relay::{RelayAction, RelayCore, RelayState};
pub use session::{CallMetadata, CallSession, SessionRegistry, SharedSession};
pub use telephony::{TelephonyEvent, TelephonyOutEvent};
