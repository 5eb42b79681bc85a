use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chain_reaction_server::error::SessionError;
use chain_reaction_server::server_protocol::{
    parse_client_message, ParsedClientMessage, ServerMessage,
};
use chain_reaction_server::server_utils::{
    grid_size_or_default, normalize_stale_timeout_ms, normalize_sweep_interval_ms,
};
use chain_reaction_server::session::{Dispatch, SessionCoordinator, SessionOptions, SessionResult};
use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::{mpsc, Mutex};
use tower_http::services::{ServeDir, ServeFile};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

type SharedState = Arc<Mutex<ServerState>>;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    #[arg(long, env = "PORT", default_value_t = 3000)]
    port: u16,
    #[arg(long, env = "STALE_ROOM_SECS", default_value_t = 600)]
    stale_room_secs: u64,
    #[arg(long, env = "SWEEP_INTERVAL_SECS", default_value_t = 60)]
    sweep_interval_secs: u64,
    #[arg(long, env = "STATIC_DIR")]
    static_dir: Option<PathBuf>,
}

#[derive(Clone)]
struct ClientContext {
    tx: mpsc::Sender<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum QueuePolicy {
    DropOnFull,
    DisconnectOnFull,
}

struct ServerState {
    clients: HashMap<String, ClientContext>,
    coordinator: SessionCoordinator,
}

impl ServerState {
    fn new(options: SessionOptions) -> Self {
        Self {
            clients: HashMap::new(),
            coordinator: SessionCoordinator::new(options),
        }
    }

    fn apply(&mut self, client_id: &str, message: ParsedClientMessage, now_ms: u64) -> SessionResult {
        let coordinator = &mut self.coordinator;
        match message {
            ParsedClientMessage::CreateRoom { grid_size } => {
                coordinator.create_room(client_id, grid_size_or_default(grid_size), now_ms)
            }
            ParsedClientMessage::AutoMatch { grid_size } => {
                coordinator.auto_match(client_id, grid_size_or_default(grid_size), now_ms)
            }
            ParsedClientMessage::JoinRoom { room_code } => {
                coordinator.join_room(client_id, &room_code, now_ms)
            }
            ParsedClientMessage::Move { row, col } => {
                coordinator.submit_move(client_id, row, col, now_ms)
            }
            ParsedClientMessage::CancelWaiting => coordinator.cancel_waiting(client_id, now_ms),
            ParsedClientMessage::LeaveRoom => coordinator.leave_room(client_id, now_ms),
            ParsedClientMessage::RequestRematch => coordinator.request_rematch(client_id, now_ms),
            ParsedClientMessage::DeclineRematch => coordinator.decline_rematch(client_id, now_ms),
            ParsedClientMessage::Ping { t } => Ok(vec![Dispatch {
                to: client_id.to_string(),
                message: ServerMessage::Pong { t },
            }]),
        }
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let options = SessionOptions {
        stale_after_ms: normalize_stale_timeout_ms(cli.stale_room_secs),
        ..SessionOptions::default()
    };

    let state = Arc::new(Mutex::new(ServerState::new(options)));
    start_sweep_loop(
        state.clone(),
        normalize_sweep_interval_ms(cli.sweep_interval_secs),
    );

    let app = Router::new()
        .route("/health", get(health))
        .route("/ws", get(ws_handler))
        .with_state(state);

    let app = if let Some(static_dir) = resolve_static_dir(cli.static_dir) {
        let index_file = static_dir.join("index.html");
        info!(root = %static_dir.to_string_lossy(), "serving static files");
        app.fallback_service(
            ServeDir::new(static_dir).not_found_service(ServeFile::new(index_file)),
        )
    } else {
        warn!("static file root not found; serving websocket and health only");
        app
    };

    let bind_addr = format!("0.0.0.0:{}", cli.port);
    let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(listener) => listener,
        Err(error) => {
            error!(%bind_addr, %error, "failed to bind server socket");
            std::process::exit(1);
        }
    };

    info!(port = cli.port, "listening");
    if let Err(error) = axum::serve(listener, app).await {
        error!(%error, "server runtime failed");
        std::process::exit(1);
    }
}

fn resolve_static_dir(configured: Option<PathBuf>) -> Option<PathBuf> {
    if let Some(path) = configured {
        if path.join("index.html").is_file() {
            return Some(path);
        }
    }

    let candidates = [PathBuf::from("public"), PathBuf::from("../public")];
    candidates
        .into_iter()
        .find(|path| path.join("index.html").is_file())
}

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<SharedState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(state, socket))
}

async fn handle_socket(state: SharedState, socket: WebSocket) {
    let client_id = make_id("conn");
    let (tx, mut rx) = mpsc::channel::<String>(256);

    {
        let mut guard = state.lock().await;
        guard
            .clients
            .insert(client_id.clone(), ClientContext { tx: tx.clone() });
        guard.coordinator.connect(&client_id);
    }
    debug!(connection = %client_id, "socket opened");

    let (mut ws_sender, mut ws_receiver) = socket.split();
    let writer = tokio::spawn(async move {
        while let Some(payload) = rx.recv().await {
            if ws_sender.send(Message::Text(payload.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(received) = ws_receiver.next().await {
        let Ok(message) = received else {
            break;
        };

        match message {
            Message::Text(raw) => {
                handle_client_message(state.clone(), &client_id, raw.to_string()).await;
            }
            Message::Binary(raw) => {
                if let Ok(text) = String::from_utf8(raw.to_vec()) {
                    handle_client_message(state.clone(), &client_id, text).await;
                } else {
                    let mut guard = state.lock().await;
                    send_error(&mut guard, &client_id, &SessionError::InvalidMessage);
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    handle_disconnect(state, &client_id).await;
    drop(tx);
    let _ = writer.await;
}

async fn handle_client_message(state: SharedState, client_id: &str, raw: String) {
    let mut guard = state.lock().await;
    let Some(message) = parse_client_message(&raw) else {
        debug!(connection = client_id, "unparseable message");
        send_error(&mut guard, client_id, &SessionError::InvalidMessage);
        return;
    };

    match guard.apply(client_id, message, now_ms()) {
        Ok(dispatches) => deliver(&mut guard, dispatches, QueuePolicy::DisconnectOnFull),
        Err(error) => {
            debug!(connection = client_id, reason = error.reason(), "request rejected");
            send_error(&mut guard, client_id, &error);
        }
    }
}

async fn handle_disconnect(state: SharedState, client_id: &str) {
    let mut guard = state.lock().await;
    let dispatches = disconnect_client_internal(&mut guard, client_id);
    deliver(&mut guard, dispatches, QueuePolicy::DisconnectOnFull);
    debug!(connection = client_id, "socket closed");
}

fn disconnect_client_internal(state: &mut ServerState, client_id: &str) -> Vec<Dispatch> {
    if state.clients.remove(client_id).is_none() {
        return Vec::new();
    }
    state.coordinator.disconnect(client_id, now_ms())
}

fn start_sweep_loop(state: SharedState, interval_ms: u64) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(interval_ms));
        loop {
            interval.tick().await;
            let mut guard = state.lock().await;
            let dispatches = guard.coordinator.sweep_stale(now_ms());
            if !dispatches.is_empty() {
                info!(notified = dispatches.len(), "stale sweep");
            }
            deliver(&mut guard, dispatches, QueuePolicy::DropOnFull);
        }
    });
}

/// Sends each dispatch to its connection. Under `DisconnectOnFull` a client
/// whose queue is full is dropped, and the leave notifications that produces
/// are delivered in turn.
fn deliver(state: &mut ServerState, dispatches: Vec<Dispatch>, policy: QueuePolicy) {
    let mut pending: VecDeque<Dispatch> = dispatches.into();
    while let Some(dispatch) = pending.pop_front() {
        let payload = match serde_json::to_string(&dispatch.message) {
            Ok(payload) => payload,
            Err(error) => {
                error!(connection = %dispatch.to, %error, "failed to serialize message");
                continue;
            }
        };
        let send_failed = state
            .clients
            .get(&dispatch.to)
            .map(|client| client.tx.try_send(payload).is_err())
            .unwrap_or(false);
        if send_failed && policy == QueuePolicy::DisconnectOnFull {
            warn!(connection = %dispatch.to, "outbound queue full; disconnecting");
            pending.extend(disconnect_client_internal(state, &dispatch.to));
        }
    }
}

fn send_error(state: &mut ServerState, client_id: &str, error: &SessionError) {
    deliver(
        state,
        vec![Dispatch {
            to: client_id.to_string(),
            message: ServerMessage::error(error),
        }],
        QueuePolicy::DisconnectOnFull,
    );
}

fn make_id(prefix: &str) -> String {
    let seq = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}_{seq}")
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
