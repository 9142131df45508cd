//! Shared application state.

use std::sync::Arc;

use crate::config::ServerConfig;
use crate::core::functions::FunctionRegistry;
use crate::core::recording::RecorderManager;
use crate::core::session::SessionRegistry;

/// State shared across all handlers.
///
/// Per-call mutable state lives inside the registries; `AppState` itself is
/// immutable after startup.
pub struct AppState {
    /// Server configuration
    pub config: ServerConfig,
    /// Active call sessions and pending call metadata
    pub sessions: SessionRegistry,
    /// Per-call audio capture
    pub recorders: RecorderManager,
    /// Model-invocable functions
    pub functions: FunctionRegistry,
}

/// Shared handle passed to axum handlers.
pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        let recorders = RecorderManager::new(config.recordings_dir.clone());
        AppState {
            config,
            sessions: SessionRegistry::new(),
            recorders,
            functions: FunctionRegistry::with_builtins(),
        }
    }
}
