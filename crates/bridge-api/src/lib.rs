//! The HTTP/JSON surface and realtime relay. Every handler here is a thin
//! projection onto exactly one `bridge_core::Session` operation — no
//! decision logic lives in this crate.

mod dto;
mod routes;
mod ws;

use std::sync::Arc;

use axum::Router;
use bridge_core::Session;
use tower_http::cors::CorsLayer;

pub fn router(session: Arc<Session>) -> Router {
    Router::new()
        .merge(routes::router())
        .route("/ws", axum::routing::get(ws::ws_handler))
        .layer(CorsLayer::permissive())
        .with_state(session)
}
