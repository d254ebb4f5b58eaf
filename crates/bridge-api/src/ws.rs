use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use bridge_core::Session;
use bridge_proto::{LogEntry, MissionSettings, Waypoint};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};

use crate::dto::{ErrorResponse, TelemetryDto};

const TELEMETRY_HZ: u64 = 1;

pub async fn ws_handler(ws: WebSocketUpgrade, State(session): State<Arc<Session>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, session))
}

#[derive(Serialize)]
#[serde(tag = "event", content = "data")]
enum WsOutMsg<'a> {
    Identify(&'static str),
    Telemetry(TelemetryDto),
    Logs(&'a LogEntry),
    CommandResponse(CommandResponse),
}

#[derive(Serialize)]
struct CommandResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_type: Option<String>,
}

impl From<Result<(), bridge_proto::MissionError>> for CommandResponse {
    fn from(r: Result<(), bridge_proto::MissionError>) -> Self {
        match r {
            Ok(()) => Self { success: true, error: None, error_type: None },
            Err(e) => {
                let resp = ErrorResponse::from(&e);
                Self { success: false, error: Some(resp.error), error_type: Some(resp.error_type) }
            }
        }
    }
}

#[derive(Deserialize)]
#[serde(tag = "event", content = "data")]
enum WsInMsg {
    Command(CommandPayload),
    Mission(MissionPayload),
}

#[derive(Deserialize)]
struct CommandPayload {
    #[serde(rename = "type")]
    kind: String,
    mode: Option<String>,
    arm: Option<bool>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
enum MissionPayload {
    Start { waypoints: Vec<Waypoint>, settings: MissionSettings },
    Stop,
}

/// Identifies as `"drone"` on upgrade, then publishes telemetry at 1 Hz and
/// every new log entry; accepts `command` and `mission` frames that mirror
/// the HTTP request bodies and answers with a `command_response` carrying
/// the same error shape as the HTTP API.
async fn handle_socket(socket: WebSocket, session: Arc<Session>) {
    let (log_tx, mut log_rx) = broadcast::channel::<LogEntry>(256);
    session.log().set_publisher(Box::new({
        let log_tx = log_tx.clone();
        move |entry: &LogEntry| {
            let _ = log_tx.send(entry.clone());
        }
    }));

    let (mut sender, mut receiver) = socket.split();
    if send_text(&mut sender, &WsOutMsg::Identify("drone")).await.is_err() {
        return;
    }

    let mut telemetry_tick = tokio::time::interval(Duration::from_secs(TELEMETRY_HZ));
    let (resp_tx, mut resp_rx) = mpsc::unbounded_channel::<CommandResponse>();

    let send_session = session.clone();
    let send_task = async move {
        loop {
            tokio::select! {
                _ = telemetry_tick.tick() => {
                    let snap = send_session.state().snapshot().await;
                    let msg = WsOutMsg::Telemetry(TelemetryDto::from(&snap));
                    if send_text(&mut sender, &msg).await.is_err() {
                        break;
                    }
                }
                recv = log_rx.recv() => {
                    match recv {
                        Ok(entry) => {
                            let msg = WsOutMsg::Logs(&entry);
                            if send_text(&mut sender, &msg).await.is_err() {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
                resp = resp_rx.recv() => {
                    match resp {
                        Some(resp) => {
                            let msg = WsOutMsg::CommandResponse(resp);
                            if send_text(&mut sender, &msg).await.is_err() {
                                break;
                            }
                        }
                        // recv_task only drops resp_tx when the client's read
                        // half is gone, so there is nothing left to push to.
                        None => break,
                    }
                }
            }
        }
    };

    let recv_session = session.clone();
    let recv_task = async move {
        while let Some(Ok(msg)) = receiver.next().await {
            let Message::Text(text) = msg else { continue };
            let Ok(parsed) = serde_json::from_str::<WsInMsg>(&text) else { continue };
            let resp = match parsed {
                WsInMsg::Command(cmd) if cmd.kind == "set_mode" => match cmd.mode {
                    Some(mode) => Some(recv_session.set_mode(&mode).await),
                    None => None,
                },
                WsInMsg::Command(cmd) if cmd.kind == "arm" => match cmd.arm {
                    Some(arm) => Some(recv_session.arm(arm).await),
                    None => None,
                },
                WsInMsg::Command(_) => None,
                WsInMsg::Mission(MissionPayload::Start { waypoints, settings }) => {
                    Some(recv_session.mission_start(waypoints, settings).await)
                }
                WsInMsg::Mission(MissionPayload::Stop) => Some(recv_session.mission_stop().await),
            };
            if let Some(result) = resp {
                let _ = resp_tx.send(CommandResponse::from(result));
            }
        }
    };

    tokio::join!(send_task, recv_task);
}

async fn send_text(
    sender: &mut futures::stream::SplitSink<WebSocket, Message>,
    msg: &WsOutMsg<'_>,
) -> Result<(), axum::Error> {
    let text = serde_json::to_string(msg).unwrap_or_default();
    sender.send(Message::Text(text.into())).await
}
