use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message as WsMessage, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;

use forge_types::{ClientMessage, ServerMessage, TERMINAL_ENDPOINT};

use crate::web::registry::{Attached, Outbound, SessionRegistry, SessionSummary};

/// Application state shared across routes
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
}

/// Create router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route(TERMINAL_ENDPOINT, get(terminal_handler))
        .route("/api/terminal/sessions", get(list_sessions))
        .route("/api/terminal/sessions/:id", get(get_session))
        .route("/health", get(health))
        .with_state(state)
}

/// Query string of the terminal endpoint
#[derive(Debug, Default, Deserialize)]
pub struct TerminalQuery {
    pub runspace: Option<String>,
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
}

impl TerminalQuery {
    pub fn runspace(&self) -> Option<&str> {
        non_empty(&self.runspace)
    }

    pub fn session_id(&self) -> Option<&str> {
        non_empty(&self.session_id)
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// GET /api/terminal/sessions - List live terminal sessions
async fn list_sessions(State(state): State<AppState>) -> Json<serde_json::Value> {
    let sessions = state.registry.list().await;
    Json(serde_json::json!({ "sessions": sessions }))
}

/// GET /api/terminal/sessions/:id - One session
async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionSummary>, AppError> {
    let session = state
        .registry
        .get(&id)
        .await
        .ok_or_else(|| AppError::NotFound(format!("Session '{}' not found", id)))?;
    Ok(Json(session.summary().await))
}

/// GET /health
async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "sessions": state.registry.len().await,
    }))
}

/// GET /terminal - WebSocket endpoint
async fn terminal_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<TerminalQuery>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, query))
}

/// Handle one terminal socket from attach to close
async fn handle_socket(mut socket: WebSocket, state: AppState, query: TerminalQuery) {
    let attached = match state
        .registry
        .connect(query.runspace(), query.session_id())
        .await
    {
        Ok(attached) => attached,
        Err(e) => {
            tracing::warn!(
                error = %e,
                runspace = ?query.runspace(),
                session_id = ?query.session_id(),
                "terminal connection rejected"
            );
            if let Ok(json) = ServerMessage::error(e.to_string()).to_json() {
                let _ = socket.send(WsMessage::Text(json)).await;
            }
            let _ = socket
                .send(WsMessage::Close(Some(CloseFrame {
                    code: close_code::ERROR,
                    reason: "session unavailable".into(),
                })))
                .await;
            return;
        }
    };

    let Attached {
        session,
        connection,
        mut outbound,
        restored,
    } = attached;
    tracing::debug!(session_id = %session.id(), connection = %connection, restored, "socket attached");

    let (mut ws_sink, mut ws_stream) = socket.split();

    // Writer: drains this connection's outbound queue in order
    let mut send_task = tokio::spawn(async move {
        while let Some(item) = outbound.recv().await {
            match item {
                Outbound::Message(message) => {
                    let json = match message.to_json() {
                        Ok(json) => json,
                        Err(e) => {
                            tracing::warn!(error = %e, "failed to encode server message");
                            continue;
                        }
                    };
                    if ws_sink.send(WsMessage::Text(json)).await.is_err() {
                        break;
                    }
                }
                Outbound::Close => {
                    let _ = ws_sink
                        .send(WsMessage::Close(Some(CloseFrame {
                            code: close_code::NORMAL,
                            reason: "".into(),
                        })))
                        .await;
                    break;
                }
            }
        }
    });

    loop {
        tokio::select! {
            _ = &mut send_task => break,
            frame = ws_stream.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => match ClientMessage::parse(&text) {
                    Ok(message) => {
                        state
                            .registry
                            .handle_client_message(&session, connection, message)
                            .await;
                    }
                    Err(e) => {
                        tracing::warn!(
                            session_id = %session.id(),
                            connection = %connection,
                            error = %e,
                            "dropping malformed client message"
                        );
                    }
                },
                Some(Ok(WsMessage::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(connection = %connection, error = %e, "socket error");
                    break;
                }
            }
        }
    }

    send_task.abort();
    state.registry.detach(&session, connection).await;
}

/// Error handling
#[derive(Debug)]
enum AppError {
    NotFound(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
        };

        let body = Json(serde_json::json!({
            "error": message,
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(runspace: Option<&str>, session_id: Option<&str>) -> TerminalQuery {
        TerminalQuery {
            runspace: runspace.map(String::from),
            session_id: session_id.map(String::from),
        }
    }

    #[test]
    fn test_blank_query_values_are_absent() {
        let q = query(Some(""), Some("  "));
        assert_eq!(q.runspace(), None);
        assert_eq!(q.session_id(), None);

        let q = query(Some("api"), Some("abc"));
        assert_eq!(q.runspace(), Some("api"));
        assert_eq!(q.session_id(), Some("abc"));
    }
}
