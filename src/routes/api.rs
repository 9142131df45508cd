//! REST route configuration.
//!
//! - `GET /` service status
//! - `POST /calls` register a call before its media stream opens
//! - `GET /recordings`, `GET|DELETE /recordings/{filename}` artifact access
//! - `POST /recordings/{call_id}/start|stop` capture control

use axum::Router;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

use crate::handlers::{calls, recordings};
use crate::state::SharedState;

pub fn create_api_router() -> Router<SharedState> {
    Router::new()
        .route("/", get(calls::health_check))
        .route("/calls", post(calls::create_call))
        .route("/recordings", get(recordings::list_recordings))
        .route(
            "/recordings/{filename}",
            get(recordings::download_recording).delete(recordings::delete_recording),
        )
        .route(
            "/recordings/{call_id}/start",
            post(recordings::start_recording),
        )
        .route(
            "/recordings/{call_id}/stop",
            post(recordings::stop_recording),
        )
        .layer(TraceLayer::new_for_http())
}
