//! Shared mock backends for integration tests.

#![allow(dead_code)]

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use freight_link::config::ClientConfig;

/// What the mock API saw for one request.
#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub path: String,
    pub authorization: Option<String>,
    pub request_id: Option<String>,
}

type Responder = Arc<dyn Fn(u32) -> (u16, Value) + Send + Sync>;

#[derive(Clone)]
struct ApiState {
    calls: Arc<AtomicU32>,
    seen: Arc<Mutex<Vec<SeenRequest>>>,
    responder: Responder,
}

/// A programmable REST backend. `responder` gets the zero-based call index.
pub struct MockApi {
    pub addr: SocketAddr,
    calls: Arc<AtomicU32>,
    seen: Arc<Mutex<Vec<SeenRequest>>>,
}

impl MockApi {
    pub fn base_url(&self) -> String {
        format!("http://{}/api", self.addr)
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn seen(&self) -> Vec<SeenRequest> {
        self.seen.lock().unwrap().clone()
    }
}

pub async fn start_programmable_api<F>(responder: F) -> MockApi
where
    F: Fn(u32) -> (u16, Value) + Send + Sync + 'static,
{
    let state = ApiState {
        calls: Arc::new(AtomicU32::new(0)),
        seen: Arc::new(Mutex::new(Vec::new())),
        responder: Arc::new(responder),
    };
    let mock = MockApi {
        addr: "127.0.0.1:0".parse().unwrap(),
        calls: state.calls.clone(),
        seen: state.seen.clone(),
    };

    let app = Router::new().fallback(api_handler).with_state(state);
    let listener = TcpListener::bind(mock.addr).await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    MockApi { addr, ..mock }
}

async fn api_handler(State(state): State<ApiState>, uri: axum::http::Uri, headers: HeaderMap) -> Response {
    let call = state.calls.fetch_add(1, Ordering::SeqCst);
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok()).map(str::to_string);
    state.seen.lock().unwrap().push(SeenRequest {
        path: uri.path().to_string(),
        authorization: header(AUTHORIZATION.as_str()),
        request_id: header("x-request-id"),
    });

    let (status, body) = (state.responder)(call);
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(body)).into_response()
}

/// An address nothing listens on.
pub async fn unused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

#[derive(Debug, Clone)]
enum PushCommand {
    Frame(String),
    DropConnections,
}

#[derive(Clone)]
struct PushState {
    tokens: Vec<String>,
    connections: Arc<AtomicU32>,
    credentials: Arc<Mutex<Vec<String>>>,
    received: Arc<Mutex<Vec<String>>>,
    commands: broadcast::Sender<PushCommand>,
}

/// A websocket push server accepting `Authorization: Bearer <token>` for a
/// fixed set of tokens.
pub struct MockPush {
    pub addr: SocketAddr,
    state: PushState,
}

impl MockPush {
    pub fn url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    /// Completed, authenticated connections so far.
    pub fn connections(&self) -> u32 {
        self.state.connections.load(Ordering::SeqCst)
    }

    /// Token behind each accepted connection, in order.
    pub fn credentials(&self) -> Vec<String> {
        self.state.credentials.lock().unwrap().clone()
    }

    /// Text frames received from clients.
    pub fn received(&self) -> Vec<String> {
        self.state.received.lock().unwrap().clone()
    }

    /// Send `frame` to every connected client.
    pub fn push(&self, frame: &str) {
        let _ = self.state.commands.send(PushCommand::Frame(frame.to_string()));
    }

    /// Drop every connection without a close handshake.
    pub fn drop_connections(&self) {
        let _ = self.state.commands.send(PushCommand::DropConnections);
    }

    pub async fn wait_for_connections(&self, count: u32) {
        wait_until(|| self.connections() >= count).await;
    }

    pub async fn wait_for_frame(&self, needle: &str) {
        wait_until(|| self.received().iter().any(|f| f.contains(needle))).await;
    }
}

pub async fn start_push_server(token: &str) -> MockPush {
    start_push_server_for(&[token]).await
}

pub async fn start_push_server_for(tokens: &[&str]) -> MockPush {
    let (commands, _) = broadcast::channel(64);
    let state = PushState {
        tokens: tokens.iter().map(|t| t.to_string()).collect(),
        connections: Arc::new(AtomicU32::new(0)),
        credentials: Arc::new(Mutex::new(Vec::new())),
        received: Arc::new(Mutex::new(Vec::new())),
        commands,
    };

    let app = Router::new().route("/ws", get(ws_handler)).with_state(state.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    MockPush { addr, state }
}

async fn ws_handler(ws: WebSocketUpgrade, headers: HeaderMap, State(state): State<PushState>) -> Response {
    let token = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .filter(|t| state.tokens.iter().any(|known| known == t))
        .map(str::to_string);
    let Some(token) = token else {
        return StatusCode::UNAUTHORIZED.into_response();
    };
    ws.on_upgrade(move |socket| {
        state.credentials.lock().unwrap().push(token);
        serve_socket(socket, state)
    })
}

async fn serve_socket(mut socket: WebSocket, state: PushState) {
    let mut commands = state.commands.subscribe();
    state.connections.fetch_add(1, Ordering::SeqCst);

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Ok(PushCommand::Frame(text)) => {
                    if socket.send(Message::Text(text.into())).await.is_err() {
                        return;
                    }
                }
                Ok(PushCommand::DropConnections) | Err(_) => return,
            },
            inbound = socket.recv() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    state.received.lock().unwrap().push(text.as_str().to_string());
                }
                Some(Ok(_)) => {}
                Some(Err(_)) | None => return,
            },
        }
    }
}

/// Poll `condition` every 10ms for up to 5s.
pub async fn wait_until<F: Fn() -> bool>(condition: F) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not met within 5s");
}

/// Config with fast retries, push disabled unless a URL is given.
pub fn client_config(api_base: &str, push_url: Option<String>) -> ClientConfig {
    let mut config = ClientConfig::default();
    config.api.base_url = api_base.to_string();
    config.api.timeout_secs = 5;
    config.retries.initial_delay_ms = 10;
    config.retries.max_delay_ms = 50;
    match push_url {
        Some(url) => {
            config.push.url = url;
            config.push.initial_delay_ms = 50;
            config.push.max_delay_ms = 200;
        }
        None => config.push.enabled = false,
    }
    config
}
