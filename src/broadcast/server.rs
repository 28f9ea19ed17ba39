use crate::broadcast::hub::Broadcaster;
use crate::broadcast::protocol::ServerMessage;
use crate::download::{JobFile, JobState};
use crate::error::{PullError, Result};
use crate::progress::{ProgressSnapshot, ProgressStore, StatusReport};
use crate::validate::Validator;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use parking_lot::Mutex;
use serde::Deserialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

/// Shared handles for the HTTP and WebSocket handlers
#[derive(Clone)]
pub struct AppState {
    pub broadcaster: Arc<Broadcaster>,
    pub validator: Arc<Mutex<Validator>>,
    pub store: ProgressStore,
    pub job_file: JobFile,
}

impl AppState {
    fn status(&self) -> StatusReport {
        let job_running = matches!(self.job_file.state(), JobState::Running(_));
        StatusReport::build(&self.store.load(), job_running)
    }
}

#[derive(Debug, Deserialize)]
struct CategoryQuery {
    category: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/api/status", get(status_handler))
        .route("/api/progress", get(progress_handler))
        .route("/api/validate", get(validate_all_handler))
        .route("/api/validate/summary", get(summary_handler))
        .route("/api/validate/{preset_id}", get(validate_preset_handler))
        .with_state(state)
}

/// Serve the router and run the broadcaster until `shutdown` resolves
pub async fn serve<S>(
    listener: TcpListener,
    state: AppState,
    poll_interval: Duration,
    shutdown: S,
) -> Result<()>
where
    S: Future<Output = ()> + Send + 'static,
{
    let addr = listener
        .local_addr()
        .map_err(|e| PullError::Server(format!("Listener has no address: {e}")))?;
    tracing::info!("Progress server listening on http://{addr}");

    let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);

    let broadcaster = Arc::clone(&state.broadcaster);
    let mut broadcaster_stop = stop_rx.clone();
    let ticker = tokio::spawn(async move {
        broadcaster
            .run(poll_interval, async move {
                let _ = broadcaster_stop.wait_for(|stopped| *stopped).await;
            })
            .await;
    });

    let result = axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            shutdown.await;
            let _ = stop_tx.send(true);
        })
        .await
        .map_err(|e| PullError::Server(e.to_string()));

    drop(stop_rx);
    if let Err(e) = ticker.await {
        tracing::warn!("Broadcaster task ended abnormally: {e}");
    }

    result
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state.broadcaster))
}

/// One client: forward hub messages out, answer inbound messages
async fn handle_socket(mut socket: WebSocket, hub: Arc<Broadcaster>) {
    let (id, mut outbound) = hub.register();
    hub.send_to(id, ServerMessage::progress(hub.current()));

    loop {
        tokio::select! {
            message = outbound.recv() => {
                let Some(message) = message else { break };
                let text = match message.to_json() {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::error!("Failed to encode message: {e}");
                        continue;
                    }
                };
                if socket.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            inbound = socket.recv() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        let reply = hub.handle_message(text.as_str());
                        hub.send_to(id, reply);
                    }
                    Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    hub.unregister(id);
}

async fn status_handler(State(state): State<AppState>) -> Json<StatusReport> {
    Json(state.status())
}

async fn progress_handler(State(state): State<AppState>) -> Json<ProgressSnapshot> {
    Json(state.store.load())
}

/// Run `f` against the validator on the blocking pool
///
/// Validation walks the install tree, so it stays off the async workers.
async fn with_validator<T, F>(state: &AppState, f: F) -> Result<T>
where
    F: FnOnce(&mut Validator) -> T + Send + 'static,
    T: Send + 'static,
{
    let validator = Arc::clone(&state.validator);
    tokio::task::spawn_blocking(move || f(&mut *validator.lock()))
        .await
        .map_err(|e| PullError::Other(format!("Validation task failed: {e}")))
}

fn error_response(e: &PullError) -> Response {
    let code = match e {
        PullError::NotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (code, Json(serde_json::json!({ "error": e.to_string() }))).into_response()
}

async fn validate_all_handler(
    State(state): State<AppState>,
    Query(query): Query<CategoryQuery>,
) -> Response {
    let result = with_validator(&state, move |validator| {
        validator.validate_all_presets(query.category.as_deref())
    })
    .await;
    match result {
        Ok(reports) => Json(reports).into_response(),
        Err(e) => error_response(&e),
    }
}

async fn summary_handler(State(state): State<AppState>) -> Response {
    match with_validator(&state, |validator| validator.get_summary()).await {
        Ok(summary) => Json(summary).into_response(),
        Err(e) => error_response(&e),
    }
}

async fn validate_preset_handler(
    State(state): State<AppState>,
    Path(preset_id): Path<String>,
) -> Response {
    let result = with_validator(&state, move |validator| validator.validate_preset(&preset_id))
        .await
        .and_then(|report| report);
    match result {
        Ok(report) => Json(report).into_response(),
        Err(e) => error_response(&e),
    }
}
