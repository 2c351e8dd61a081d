use std::sync::Arc;

use anyhow::{Error, Result, anyhow};
use axum::{
    Router,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::get,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::{net::TcpListener, sync::watch};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::{
    clients::health::HealthChecker,
    models::{health::HealthStatus, notification::room_for},
    realtime::{RealtimeTransport, RoomHub, SessionId},
};

pub struct AppState {
    pub health_checker: HealthChecker,
    pub hub: Arc<RoomHub>,
}

/// Messages a realtime client may send.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum ClientEvent {
    Join {
        #[serde(rename = "userId")]
        user_id: i64,
    },
    Leave {
        #[serde(rename = "userId")]
        user_id: i64,
    },
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_api_server(
    port: u16,
    state: Arc<AppState>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Error> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| anyhow!("Failed to bind {}: {}", addr, e))?;

    info!(address = %addr, "HTTP server started");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            while shutdown.changed().await.is_ok() {
                if *shutdown.borrow() {
                    break;
                }
            }
        })
        .await
        .map_err(|e| anyhow!("HTTP server error: {}", e))?;

    info!("HTTP server stopped");

    Ok(())
}

async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_checker.check_all().await;

    let status_code = match health.status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state.hub.clone()))
}

async fn handle_socket(socket: WebSocket, hub: Arc<RoomHub>) {
    let (session, mut events) = hub.connect();
    let (mut sender, mut receiver) = socket.split();

    info!(session = %session, "Realtime client connected");

    let send_task = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let json = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(e) => {
                    warn!(error = %e, "Failed to serialize realtime event");
                    continue;
                }
            };

            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => handle_client_event(hub.as_ref(), session, text.as_str()),
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(session = %session, error = %e, "WebSocket receive error");
                break;
            }
        }
    }

    hub.disconnect(session);
    send_task.abort();

    info!(session = %session, "Realtime client disconnected");
}

fn handle_client_event(hub: &RoomHub, session: SessionId, text: &str) {
    match serde_json::from_str::<ClientEvent>(text) {
        Ok(ClientEvent::Join { user_id }) => hub.join_room(session, &room_for(user_id)),
        Ok(ClientEvent::Leave { user_id }) => hub.leave_room(session, &room_for(user_id)),
        Err(e) => {
            debug!(session = %session, error = %e, "Ignoring unrecognised client message");
        }
    }
}
