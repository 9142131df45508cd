//! Media-stream WebSocket route configuration.
//!
//! `GET /media-stream` - WebSocket upgrade for the telephony media stream.
//! The telephony provider connects here once a registered call is answered;
//! the JSON control protocol (`start`/`media`/`mark`/`stop`) begins after
//! the upgrade.

use axum::Router;
use axum::routing::get;
use tower_http::trace::TraceLayer;

use crate::handlers::media_stream::media_stream_handler;
use crate::state::SharedState;

pub fn create_ws_router() -> Router<SharedState> {
    Router::new()
        .route("/media-stream", get(media_stream_handler))
        .layer(TraceLayer::new_for_http())
}
