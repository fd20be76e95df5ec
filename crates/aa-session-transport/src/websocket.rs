//! WebSocket and HTTP transport for session UIs.

use std::sync::Arc;

use aa_session::{OrchestratorError, SessionControl};
use aa_session_core::SessionSnapshot;
use axum::{
    Json, Router,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::StatusCode,
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post},
};
use futures::{SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::protocol::{ClientMessage, ServerMessage};

/// Transport state.
#[derive(Clone)]
pub struct WsState {
    pub control: Arc<dyn SessionControl>,
}

impl WsState {
    #[must_use]
    pub fn new(control: Arc<dyn SessionControl>) -> Self {
        Self { control }
    }
}

/// Orchestrator error rendered as an HTTP response.
pub struct ApiError(pub OrchestratorError);

impl ApiError {
    const fn status(&self) -> StatusCode {
        match &self.0 {
            OrchestratorError::Busy | OrchestratorError::InvalidState { .. } => {
                StatusCode::CONFLICT
            }
            OrchestratorError::NotInitialized => StatusCode::SERVICE_UNAVAILABLE,
            OrchestratorError::Disposed => StatusCode::GONE,
            OrchestratorError::Failed(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(ServerMessage::from(&self.0))).into_response()
    }
}

type ApiResult = Result<Json<SessionSnapshot>, ApiError>;

async fn get_session(State(state): State<WsState>) -> Json<SessionSnapshot> {
    Json(state.control.snapshot())
}

async fn post_login(State(state): State<WsState>) -> ApiResult {
    state.control.login().await.map(Json).map_err(ApiError)
}

async fn post_logout(State(state): State<WsState>) -> ApiResult {
    state.control.logout().await.map(Json).map_err(ApiError)
}

async fn post_refresh(State(state): State<WsState>) -> ApiResult {
    state.control.refresh().await.map(Json).map_err(ApiError)
}

/// Session events as server-sent events, ending once the session is disposed.
async fn get_events(
    State(state): State<WsState>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let events = state
        .control
        .event_stream()
        .map(|event| Event::default().json_data(event));
    Sse::new(events).keep_alive(KeepAlive::default())
}

/// WebSocket upgrade handler.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<WsState>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Run one client request against the session.
///
/// Operations that may take a while are awaited here; callers that must stay
/// responsive spawn this.
pub async fn dispatch(control: &dyn SessionControl, msg: ClientMessage) -> ServerMessage {
    match msg {
        ClientMessage::Login => control.login().await.into(),
        ClientMessage::Logout => control.logout().await.into(),
        ClientMessage::Refresh => control.refresh().await.into(),
        ClientMessage::GetSnapshot => ServerMessage::snapshot(control.snapshot()),
        ClientMessage::Ping => ServerMessage::Pong,
    }
}

async fn handle_socket(socket: WebSocket, state: WsState) {
    let connection = Uuid::new_v4();
    tracing::info!(%connection, "Session client connected");
    let (mut sender, mut receiver) = socket.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(j) => j,
                Err(e) => {
                    tracing::error!("Failed to serialize message: {e}");
                    continue;
                }
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    // Current snapshot first, then every change until the orchestrator is disposed.
    let updates_task = {
        let tx = tx.clone();
        let mut updates = state.control.subscribe();
        tokio::spawn(async move {
            while let Some(snapshot) = updates.next().await {
                if tx.send(ServerMessage::snapshot(snapshot)).is_err() {
                    break;
                }
            }
        })
    };

    while let Some(msg) = receiver.next().await {
        let msg = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                Ok(s) => s.into(),
                Err(_) => continue,
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::error!(%connection, "WebSocket error: {e}");
                break;
            }
        };

        let client_msg: ClientMessage = match serde_json::from_str(&msg) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(%connection, "Invalid client message: {e}");
                let _ = tx.send(ServerMessage::invalid_message(format!("Invalid message: {e}")));
                continue;
            }
        };
        tracing::debug!(%connection, "Client request: {client_msg:?}");

        let control = Arc::clone(&state.control);
        let tx = tx.clone();
        tokio::spawn(async move {
            let reply = dispatch(control.as_ref(), client_msg).await;
            let _ = tx.send(reply);
        });
    }

    updates_task.abort();
    send_task.abort();
    tracing::info!(%connection, "Session client disconnected");
}

/// Create the session router.
///
/// Routes:
/// - `GET /ws` - WebSocket speaking `ClientMessage` / `ServerMessage`
/// - `GET /session` - current snapshot
/// - `GET /session/events` - event history then live events (SSE)
/// - `POST /session/login`, `/session/logout`, `/session/refresh`
///
/// # Example
/// ```ignore
/// let app = Router::new().merge(create_session_router(orchestrator));
/// ```
#[must_use]
pub fn create_session_router(control: Arc<dyn SessionControl>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/session", get(get_session))
        .route("/session/events", get(get_events))
        .route("/session/login", post(post_login))
        .route("/session/logout", post(post_logout))
        .route("/session/refresh", post(post_refresh))
        .layer(TraceLayer::new_for_http())
        .with_state(WsState::new(control))
}
