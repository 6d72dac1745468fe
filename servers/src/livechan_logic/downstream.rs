use crate::livechan_logic::config::Config;
use crate::livechan_logic::state::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, Path, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures_util::StreamExt;
use lib_livechan::{ChannelSink, ListenerFilter};
use serde_json::json;
use std::net::SocketAddr;
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;

pub async fn run(
    config: Config,
    app_state: AppState,
    mut shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let addr = config.bind_addr()?;
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    log::info!("Downstream server listening on {}", addr);

    axum::serve(listener, router(app_state).into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async move {
            shutdown.recv().await.ok();
            log::info!("Downstream server shutting down.");
        })
        .await?;
    Ok(())
}

pub fn router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/boards", get(boards_handler))
        .route("/boards/{board}", get(board_handler))
        .route("/ws/status", get(status_ws_handler))
        .route("/ws", get(all_ws_handler))
        .route("/ws/{board}", get(board_ws_handler))
        .route("/ws/{board}/{thread}", get(thread_ws_handler))
        .layer(CorsLayer::permissive())
        .with_state(app_state)
}

async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn boards_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({ "boards": state.sources().list() }))
}

async fn board_handler(Path(board): Path<String>, State(state): State<AppState>) -> Response {
    match state.sources().get(&board) {
        Some(meta) => Json(meta).into_response(),
        None => not_found(&board),
    }
}

async fn status_ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> Response {
    upgrade(ws, addr, state, ListenerFilter::status())
}

async fn all_ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> Response {
    upgrade(ws, addr, state, ListenerFilter::all())
}

async fn board_ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Path(board): Path<String>,
    State(state): State<AppState>,
) -> Response {
    if !state.sources().contains(&board) {
        return not_found(&board);
    }
    upgrade(ws, addr, state, ListenerFilter::source(board))
}

async fn thread_ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Path((board, thread)): Path<(String, String)>,
    State(state): State<AppState>,
) -> Response {
    let Ok(thread) = thread.parse::<u64>() else {
        return api_error(StatusCode::NOT_FOUND, "Thread must be numeric");
    };
    if !state.sources().contains(&board) {
        return not_found(&board);
    }
    upgrade(ws, addr, state, ListenerFilter::thread(board, thread))
}

fn not_found(board: &str) -> Response {
    api_error(StatusCode::NOT_FOUND, &format!("Board /{}/ does not exist", board))
}

/// Error body shared by every endpoint: `{ "_error": { "code", "message" } }`.
fn api_error(status: StatusCode, message: &str) -> Response {
    let body = json!({ "_error": { "code": status.as_u16(), "message": message } });
    (status, Json(body)).into_response()
}

fn upgrade(ws: WebSocketUpgrade, addr: SocketAddr, state: AppState, filter: ListenerFilter) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, addr, state, filter))
}

async fn handle_socket(mut socket: WebSocket, addr: SocketAddr, state: AppState, filter: ListenerFilter) {
    let (sink, mut frames) = ChannelSink::channel(state.listener_queue);
    let id = state.hub.subscribe(sink, filter);
    log::info!("Client {} connected as listener {}", addr, id);

    loop {
        tokio::select! {
            // Frames queued by the hub; `None` once the hub closed this listener
            frame = frames.recv() => match frame {
                Some(text) => {
                    if socket.send(Message::Text(text.as_ref().into())).await.is_err() {
                        break; // client disconnected
                    }
                }
                None => break,
            },
            // Clients only ever send control frames
            incoming = socket.next() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }

    state.hub.unsubscribe(id);
    let _ = socket.send(Message::Close(None)).await;
    log::info!("Client {} disconnected", addr);
}

#[cfg(test)]
mod tests {
    use super::*;
    use lib_livechan::{DispatchHub, HubSettings, PollTuning, SourceMeta, SourceRegistry};
    use std::sync::Arc;

    async fn serve() -> (String, AppState) {
        let sources = Arc::new(SourceRegistry::new(PollTuning::default()));
        sources.upsert(vec![SourceMeta::new("g", "Technology"), SourceMeta::new("v", "Video Games")]);
        let state = AppState::new(DispatchHub::new(sources, HubSettings::default()), 16);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = router(state.clone()).into_make_service_with_connect_info::<SocketAddr>();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}", addr), state)
    }

    async fn ws_get(base: &str, path: &str) -> reqwest::Response {
        reqwest::Client::new()
            .get(format!("{}{}", base, path))
            .header("Connection", "Upgrade")
            .header("Upgrade", "websocket")
            .header("Sec-WebSocket-Version", "13")
            .header("Sec-WebSocket-Key", "dGhlIHNhbXBsZSBub25jZQ==")
            .send()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn health_and_board_listing() {
        let (base, _) = serve().await;

        let health = reqwest::get(format!("{}/health", base)).await.unwrap();
        assert_eq!(health.status(), reqwest::StatusCode::OK);
        assert_eq!(health.text().await.unwrap(), "OK");

        let boards: serde_json::Value = reqwest::get(format!("{}/boards", base)).await.unwrap().json().await.unwrap();
        assert_eq!(boards["boards"][0]["board"], "g");
        assert_eq!(boards["boards"][1]["title"], "Video Games");

        let board: serde_json::Value = reqwest::get(format!("{}/boards/v", base)).await.unwrap().json().await.unwrap();
        assert_eq!(board["board"], "v");

        let missing = reqwest::get(format!("{}/boards/zz", base)).await.unwrap();
        assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);
        let error: serde_json::Value = missing.json().await.unwrap();
        assert_eq!(error["_error"]["code"], 404);
        assert_eq!(error["_error"]["message"], "Board /zz/ does not exist");
    }

    #[tokio::test]
    async fn unknown_boards_and_bad_threads_are_rejected() {
        let (base, state) = serve().await;

        assert_eq!(ws_get(&base, "/ws/zz").await.status(), reqwest::StatusCode::NOT_FOUND);
        assert_eq!(ws_get(&base, "/ws/zz/1").await.status(), reqwest::StatusCode::NOT_FOUND);
        let bad_thread = ws_get(&base, "/ws/g/abc").await;
        assert_eq!(bad_thread.status(), reqwest::StatusCode::NOT_FOUND);
        let error: serde_json::Value = bad_thread.json().await.unwrap();
        assert_eq!(error["_error"]["code"], 404);
        assert_eq!(error["_error"]["message"], "Thread must be numeric");
        assert_eq!(state.hub.listener_count(), 0);
    }

    #[tokio::test]
    async fn known_board_upgrades() {
        let (base, _) = serve().await;

        assert_eq!(ws_get(&base, "/ws/g").await.status(), reqwest::StatusCode::SWITCHING_PROTOCOLS);
        assert_eq!(ws_get(&base, "/ws/g/123").await.status(), reqwest::StatusCode::SWITCHING_PROTOCOLS);
        assert_eq!(ws_get(&base, "/ws/status").await.status(), reqwest::StatusCode::SWITCHING_PROTOCOLS);
    }
}
