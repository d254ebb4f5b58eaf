use std::sync::Arc;

use axum::extract::State;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use bridge_core::Session;
use bridge_proto::{ErrorKind, MissionError};

use crate::dto::{
    ArmRequest, ErrorResponse, HealthDto, MissionStartRequest, MissionStatusDto, SetModeRequest, SuccessResponse,
    TelemetryDto,
};

pub fn router() -> Router<Arc<Session>> {
    Router::new()
        .route("/connect", post(connect))
        .route("/disconnect", post(disconnect))
        .route("/telemetry", get(telemetry))
        .route("/health", get(health))
        .route("/logs", get(logs))
        .route("/logs/clear", post(clear_logs))
        .route("/set_mode", post(set_mode))
        .route("/arm", post(arm))
        .route("/mission/start", post(mission_start))
        .route("/mission/stop", post(mission_stop))
        .route("/mission/status", get(mission_status))
}

fn ok() -> impl IntoResponse {
    Json(SuccessResponse { success: true })
}

fn failed(e: &MissionError) -> impl IntoResponse {
    Json(ErrorResponse::from(e))
}

async fn connect(State(session): State<Arc<Session>>) -> impl IntoResponse {
    match session.connect().await {
        Ok(()) => ok().into_response(),
        Err(e) => failed(&e).into_response(),
    }
}

async fn disconnect(State(session): State<Arc<Session>>) -> impl IntoResponse {
    match session.disconnect().await {
        Ok(()) => ok().into_response(),
        Err(e) => failed(&e).into_response(),
    }
}

async fn telemetry(State(session): State<Arc<Session>>) -> impl IntoResponse {
    let snap = session.state().snapshot().await;
    Json(TelemetryDto::from(&snap))
}

async fn health(State(session): State<Arc<Session>>) -> impl IntoResponse {
    let snap = session.state().snapshot().await;
    Json(HealthDto::from(&snap))
}

async fn logs(State(session): State<Arc<Session>>) -> impl IntoResponse {
    Json(serde_json::json!({ "logs": session.log().read() }))
}

async fn clear_logs(State(session): State<Arc<Session>>) -> impl IntoResponse {
    session.log().clear();
    ok()
}

async fn set_mode(State(session): State<Arc<Session>>, Json(req): Json<SetModeRequest>) -> impl IntoResponse {
    let Some(mode) = req.mode else {
        return failed(&MissionError::new(ErrorKind::ParameterError, "mode is required", "provide a mode name"))
            .into_response();
    };
    match session.set_mode(&mode).await {
        Ok(()) => ok().into_response(),
        Err(e) => failed(&e).into_response(),
    }
}

async fn arm(State(session): State<Arc<Session>>, Json(req): Json<ArmRequest>) -> impl IntoResponse {
    match session.arm(req.arm).await {
        Ok(()) => ok().into_response(),
        Err(e) => failed(&e).into_response(),
    }
}

async fn mission_start(State(session): State<Arc<Session>>, Json(req): Json<MissionStartRequest>) -> impl IntoResponse {
    match session.mission_start(req.waypoints, req.settings).await {
        Ok(()) => ok().into_response(),
        Err(e) => failed(&e).into_response(),
    }
}

async fn mission_stop(State(session): State<Arc<Session>>) -> impl IntoResponse {
    match session.mission_stop().await {
        Ok(()) => ok().into_response(),
        Err(e) => failed(&e).into_response(),
    }
}

async fn mission_status(State(session): State<Arc<Session>>) -> impl IntoResponse {
    let snap = session.state().snapshot().await;
    Json(MissionStatusDto::from(&snap))
}
