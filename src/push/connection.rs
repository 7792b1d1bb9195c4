//! Push connection lifecycle.
//!
//! # Responsibilities
//! - Open an authenticated websocket to the push endpoint
//! - Feed inbound frames to the [`EventDispatcher`]
//! - Detect loss (close, error, idle timeout) and reconnect with backoff
//! - Re-authenticate on every credential change; stop when the session is cleared or `close` is called
//!
//! # State Transitions
//! ```text
//! Closed → Connecting: connect()
//! Connecting | Reconnecting → Open: handshake succeeded
//! Open | Connecting → Reconnecting: connection lost, attempt failed or credential changed
//! any → Closed: close(), session cleared, credential rejected, attempts exhausted
//! ```
//!
//! # Design Decisions
//! - Reconnect delays use their own BackoffPolicy, not the REST retry budget
//! - Connect attempts go through the `"push-socket"` circuit breaker
//! - Every (re)connect reads the current credential; none means Closed
//! - Frames are only dispatched while Open
//! - Joined rooms are re-joined after every reconnect

use futures_util::{SinkExt, StreamExt};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::config::PushConfig;
use crate::error::{ClientError, ClientResult, PushError};
use crate::observability::metrics;
use crate::push::dispatcher::EventDispatcher;
use crate::push::events::{OutboundFrame, Room};
use crate::resilience::timeouts::with_timeout;
use crate::resilience::{BackoffPolicy, CircuitBreaker};
use crate::session::{SessionContext, SessionEpoch};

/// Breaker name guarding push connects.
pub const PUSH_DEPENDENCY: &str = "push-socket";

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type StateListener = Arc<dyn Fn(ConnectionState) + Send + Sync>;

/// Push connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Reconnecting,
    Closed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Closed => "closed",
        }
    }

    /// Lightweight status text for a UI indicator; `None` when nothing
    /// needs showing.
    pub fn indicator(&self) -> Option<&'static str> {
        match self {
            ConnectionState::Connecting => Some("Connecting..."),
            ConnectionState::Reconnecting => Some("Reconnecting..."),
            ConnectionState::Open | ConnectionState::Closed => None,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection parameters.
#[derive(Debug, Clone)]
pub struct PushSettings {
    pub url: String,
    pub connect_timeout: Duration,
    pub backoff: BackoffPolicy,
    /// Consecutive failed reconnects before giving up; `None` retries forever.
    pub max_reconnect_attempts: Option<u32>,
    pub ping_interval: Duration,
    pub idle_timeout: Duration,
}

impl From<&PushConfig> for PushSettings {
    fn from(config: &PushConfig) -> Self {
        Self {
            url: config.url.clone(),
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
            backoff: BackoffPolicy::new(
                Duration::from_millis(config.initial_delay_ms),
                Duration::from_millis(config.max_delay_ms),
            ),
            max_reconnect_attempts: config.max_reconnect_attempts,
            ping_interval: Duration::from_millis(config.ping_interval_ms),
            idle_timeout: Duration::from_millis(config.idle_timeout_ms),
        }
    }
}

struct RunHandle {
    close: watch::Sender<bool>,
    task: JoinHandle<()>,
}

struct Shared {
    settings: PushSettings,
    session: Arc<SessionContext>,
    dispatcher: EventDispatcher,
    breaker: Arc<CircuitBreaker>,
    state: watch::Sender<ConnectionState>,
    listeners: Mutex<Vec<StateListener>>,
    /// Bumped by every connect/close; stale run loops stop publishing.
    generation: AtomicU64,
    outbound: Mutex<Option<(u64, mpsc::UnboundedSender<String>)>>,
    rooms: Mutex<BTreeSet<Room>>,
    run: Mutex<Option<RunHandle>>,
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        let changed = self.state.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
        if !changed {
            return;
        }
        tracing::info!(state = state.as_str(), "Push connection state changed");
        metrics::record_push_state(state);

        let listeners: Vec<StateListener> = self.listeners.lock().expect("state listeners poisoned").clone();
        for listener in listeners {
            listener(state);
        }
    }

    /// Publish `state` only if `generation` is still the live run.
    fn publish(&self, generation: u64, state: ConnectionState) {
        if self.generation.load(Ordering::SeqCst) == generation {
            self.set_state(state);
        }
    }

    fn install_outbound(&self, generation: u64, sender: mpsc::UnboundedSender<String>) {
        if self.generation.load(Ordering::SeqCst) == generation {
            *self.outbound.lock().expect("outbound slot poisoned") = Some((generation, sender));
        }
    }

    fn clear_outbound(&self, generation: u64) {
        let mut outbound = self.outbound.lock().expect("outbound slot poisoned");
        if outbound.as_ref().is_some_and(|(g, _)| *g == generation) {
            *outbound = None;
        }
    }
}

/// Owns the persistent push connection.
#[derive(Clone)]
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

impl ConnectionManager {
    pub fn new(
        settings: PushSettings,
        session: Arc<SessionContext>,
        dispatcher: EventDispatcher,
        breaker: Arc<CircuitBreaker>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Closed);
        Self {
            shared: Arc::new(Shared {
                settings,
                session,
                dispatcher,
                breaker,
                state,
                listeners: Mutex::new(Vec::new()),
                generation: AtomicU64::new(0),
                outbound: Mutex::new(None),
                rooms: Mutex::new(BTreeSet::new()),
                run: Mutex::new(None),
            }),
        }
    }

    pub fn settings(&self) -> &PushSettings {
        &self.shared.settings
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Call `handler` on every state transition.
    pub fn on_state_change<F>(&self, handler: F)
    where
        F: Fn(ConnectionState) + Send + Sync + 'static,
    {
        self.shared
            .listeners
            .lock()
            .expect("state listeners poisoned")
            .push(Arc::new(handler));
    }

    /// Start the connection loop. No-op while a loop is already running.
    /// Must be called from within a Tokio runtime.
    pub fn connect(&self) {
        let mut run = self.shared.run.lock().expect("connection handle poisoned");
        if run.as_ref().is_some_and(|handle| !handle.task.is_finished()) {
            tracing::debug!("Push connection loop already running");
            return;
        }
        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (close, close_rx) = watch::channel(false);
        let task = tokio::spawn(run_loop(self.shared.clone(), generation, close_rx));
        *run = Some(RunHandle { close, task });
    }

    /// Stop the connection loop and move to Closed.
    pub fn close(&self) {
        if self.stop().is_some() {
            tracing::info!("Push channel closed");
        }
    }

    /// Like [`close`](Self::close), waiting for the loop to finish.
    pub async fn shutdown(&self) {
        if let Some(task) = self.stop() {
            let _ = task.await;
            tracing::info!("Push channel shut down");
        }
    }

    fn stop(&self) -> Option<JoinHandle<()>> {
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        let handle = self.shared.run.lock().expect("connection handle poisoned").take();
        self.shared.outbound.lock().expect("outbound slot poisoned").take();
        self.shared.set_state(ConnectionState::Closed);
        handle.map(|handle| {
            handle.close.send_replace(true);
            handle.task
        })
    }

    /// Send a frame on the live connection.
    pub fn send(&self, frame: &OutboundFrame) -> Result<(), PushError> {
        let text = serde_json::to_string(frame)?;
        let outbound = self.shared.outbound.lock().expect("outbound slot poisoned");
        match outbound.as_ref() {
            Some((_, sender)) => sender.send(text).map_err(|_| PushError::NotConnected),
            None => Err(PushError::NotConnected),
        }
    }

    /// Join `room` now if connected, and after every reconnect.
    pub fn join_room(&self, room: Room) -> Result<(), PushError> {
        let frame = room.join_frame();
        let added = self.shared.rooms.lock().expect("rooms poisoned").insert(room);
        if !added {
            return Ok(());
        }
        self.send_when_connected(&frame)
    }

    /// Leave `room` and stop re-joining it.
    pub fn leave_room(&self, room: &Room) -> Result<(), PushError> {
        let removed = self.shared.rooms.lock().expect("rooms poisoned").remove(room);
        if !removed {
            return Ok(());
        }
        self.send_when_connected(&room.leave_frame())
    }

    pub fn rooms(&self) -> Vec<Room> {
        self.shared.rooms.lock().expect("rooms poisoned").iter().cloned().collect()
    }

    pub fn typing_start(&self, conversation_id: &str) -> Result<(), PushError> {
        self.send(&OutboundFrame::TypingStart {
            conversation_id: conversation_id.to_string(),
        })
    }

    pub fn typing_stop(&self, conversation_id: &str) -> Result<(), PushError> {
        self.send(&OutboundFrame::TypingStop {
            conversation_id: conversation_id.to_string(),
        })
    }

    fn send_when_connected(&self, frame: &OutboundFrame) -> Result<(), PushError> {
        match self.send(frame) {
            Err(PushError::NotConnected) => Ok(()),
            other => other,
        }
    }
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("url", &self.shared.settings.url)
            .field("state", &self.state())
            .finish()
    }
}

enum PumpExit {
    Closed,
    SessionChanged,
    Lost(String),
}

async fn run_loop(shared: Arc<Shared>, generation: u64, mut close: watch::Receiver<bool>) {
    let settings = shared.settings.clone();
    let mut session = shared.session.watch();
    let mut failures: u32 = 0;
    shared.publish(generation, ConnectionState::Connecting);

    loop {
        session.borrow_and_update();
        let Some(token) = shared.session.token() else {
            tracing::info!("No session credential, push channel stays closed");
            break;
        };

        let connecting = shared.breaker.execute(|| open_socket(&settings, &token));
        let outcome = tokio::select! {
            _ = closed(&mut close) => return,
            outcome = connecting => outcome,
        };

        match outcome {
            Ok(socket) => {
                failures = 0;
                tracing::info!(url = %settings.url, "Push channel connected");
                shared.publish(generation, ConnectionState::Open);
                match pump(&shared, generation, socket, &mut close, &mut session).await {
                    PumpExit::Closed => return,
                    PumpExit::SessionChanged => {
                        tracing::info!("Session changed, dropping the socket authenticated with the old credential");
                        shared.publish(generation, ConnectionState::Reconnecting);
                        continue;
                    }
                    PumpExit::Lost(reason) => tracing::warn!(reason = %reason, "Push connection lost"),
                }
            }
            Err(error) if error.is_auth_rejection() => {
                tracing::warn!("Push handshake rejected the credential, not reconnecting");
                break;
            }
            Err(error) => tracing::warn!(attempt = failures + 1, error = %error, "Push connection attempt failed"),
        }

        if let Some(max) = settings.max_reconnect_attempts {
            if failures >= max {
                tracing::error!(attempts = failures, "Giving up on push reconnection");
                break;
            }
        }
        let delay = settings.backoff.delay_for(failures);
        failures += 1;
        shared.publish(generation, ConnectionState::Reconnecting);
        tracing::info!(attempt = failures, delay_ms = delay.as_millis() as u64, "Reconnecting push channel");

        tokio::select! {
            _ = closed(&mut close) => return,
            _ = session_changed(&mut session) => {
                tracing::info!("Session changed while reconnecting");
            }
            _ = sleep(delay) => {}
        }
    }

    shared.publish(generation, ConnectionState::Closed);
}

async fn pump(
    shared: &Shared,
    generation: u64,
    socket: Socket,
    close: &mut watch::Receiver<bool>,
    session: &mut watch::Receiver<SessionEpoch>,
) -> PumpExit {
    let settings = &shared.settings;
    let (mut sink, mut stream) = socket.split();
    let (sender, mut outbound) = mpsc::unbounded_channel::<String>();
    shared.install_outbound(generation, sender);

    let rooms: Vec<Room> = shared.rooms.lock().expect("rooms poisoned").iter().cloned().collect();
    for room in &rooms {
        let Ok(text) = serde_json::to_string(&room.join_frame()) else {
            continue;
        };
        if let Err(e) = sink.send(Message::Text(text.into())).await {
            shared.clear_outbound(generation);
            return PumpExit::Lost(e.to_string());
        }
        tracing::debug!(room = %room.name(), "Re-joined room");
    }

    let mut heartbeat = tokio::time::interval_at(Instant::now() + settings.ping_interval, settings.ping_interval);
    let idle = sleep(settings.idle_timeout);
    tokio::pin!(idle);

    let exit = loop {
        tokio::select! {
            _ = closed(close) => {
                let _ = sink.send(Message::Close(None)).await;
                break PumpExit::Closed;
            }
            _ = session_changed(session) => {
                let _ = sink.send(Message::Close(None)).await;
                break PumpExit::SessionChanged;
            }
            Some(text) = outbound.recv() => {
                if let Err(e) = sink.send(Message::Text(text.into())).await {
                    break PumpExit::Lost(e.to_string());
                }
            }
            _ = heartbeat.tick() => {
                if let Err(e) = sink.send(Message::Ping(Default::default())).await {
                    break PumpExit::Lost(e.to_string());
                }
            }
            _ = &mut idle => {
                break PumpExit::Lost(format!("no traffic for {:?}", settings.idle_timeout));
            }
            message = stream.next() => {
                idle.as_mut().reset(Instant::now() + settings.idle_timeout);
                match message {
                    Some(Ok(Message::Text(text))) => {
                        let text: &str = &text;
                        shared.dispatcher.dispatch(text);
                    }
                    Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                        Ok(text) => {
                            shared.dispatcher.dispatch(text);
                        }
                        Err(_) => tracing::debug!(len = bytes.len(), "Dropping non-UTF-8 binary frame"),
                    },
                    Some(Ok(Message::Close(frame))) => {
                        let reason = match &frame {
                            Some(frame) => {
                                let reason: &str = &frame.reason;
                                reason.to_string()
                            }
                            None => String::new(),
                        };
                        break PumpExit::Lost(format!("server closed the connection ({})", reason));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break PumpExit::Lost(e.to_string()),
                    None => break PumpExit::Lost("stream ended".to_string()),
                }
            }
        }
    };

    shared.clear_outbound(generation);
    exit
}

async fn open_socket(settings: &PushSettings, token: &str) -> ClientResult<Socket> {
    let mut request = settings
        .url
        .as_str()
        .into_client_request()
        .map_err(|e| ClientError::InvalidRequest(format!("push URL '{}': {}", settings.url, e)))?;
    let bearer = HeaderValue::from_str(&format!("Bearer {}", token))
        .map_err(|_| ClientError::InvalidRequest("session token is not a valid header value".to_string()))?;
    request.headers_mut().insert(AUTHORIZATION, bearer);

    with_timeout(settings.connect_timeout, async move {
        let (socket, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(map_handshake_error)?;
        Ok(socket)
    })
    .await
}

fn map_handshake_error(error: tungstenite::Error) -> ClientError {
    match error {
        tungstenite::Error::Http(response) => ClientError::Http {
            status: response.status().as_u16(),
            message: "push handshake rejected".to_string(),
        },
        tungstenite::Error::Io(e) => ClientError::Network { message: e.to_string() },
        tungstenite::Error::Url(e) => ClientError::InvalidRequest(e.to_string()),
        other => ClientError::Transport(other.to_string()),
    }
}

/// Resolves once `close()` has been signalled.
async fn closed(close: &mut watch::Receiver<bool>) {
    while !*close.borrow_and_update() {
        if close.changed().await.is_err() {
            return;
        }
    }
}

/// Resolves on the next credential change (clear, login or token swap).
/// Never resolves if the session context is gone.
async fn session_changed(session: &mut watch::Receiver<SessionEpoch>) {
    if session.changed().await.is_err() {
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::BreakerSettings;

    fn manager(session: Arc<SessionContext>) -> ConnectionManager {
        let settings = PushSettings::from(&PushConfig {
            url: "ws://127.0.0.1:9/ws".into(),
            ..PushConfig::default()
        });
        ConnectionManager::new(
            settings,
            session,
            EventDispatcher::new(),
            Arc::new(CircuitBreaker::new(PUSH_DEPENDENCY, BreakerSettings::default())),
        )
    }

    #[test]
    fn test_indicator_text() {
        assert_eq!(ConnectionState::Reconnecting.indicator(), Some("Reconnecting..."));
        assert_eq!(ConnectionState::Open.indicator(), None);
        assert_eq!(ConnectionState::Closed.to_string(), "closed");
    }

    #[test]
    fn test_settings_from_config() {
        let config = PushConfig {
            initial_delay_ms: 500,
            max_delay_ms: 8000,
            max_reconnect_attempts: Some(4),
            ..PushConfig::default()
        };
        let settings = PushSettings::from(&config);
        assert_eq!(settings.backoff.initial_delay(), Duration::from_millis(500));
        assert_eq!(settings.backoff.max_delay(), Duration::from_millis(8000));
        assert_eq!(settings.max_reconnect_attempts, Some(4));
        assert_eq!(settings.idle_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_send_requires_connection_but_rooms_are_remembered() {
        let manager = manager(Arc::new(SessionContext::new()));
        let typing = manager.typing_start("c-1");
        assert!(matches!(typing, Err(PushError::NotConnected)));

        manager.join_room(Room::Load("42".into())).unwrap();
        manager.join_room(Room::Conversation("c-1".into())).unwrap();
        manager.join_room(Room::Load("42".into())).unwrap();
        assert_eq!(manager.rooms().len(), 2);

        manager.leave_room(&Room::Load("42".into())).unwrap();
        assert_eq!(manager.rooms(), vec![Room::Conversation("c-1".into())]);
    }

    #[tokio::test]
    async fn test_connect_without_session_closes() {
        let manager = manager(Arc::new(SessionContext::new()));
        let mut state = manager.watch_state();
        manager.connect();
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                state.changed().await.unwrap();
                if *state.borrow_and_update() == ConnectionState::Closed {
                    break;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(manager.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_notifies() {
        let manager = manager(Arc::new(SessionContext::with_token("tok")));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        manager.on_state_change(move |state| s.lock().unwrap().push(state));

        let mut state = manager.watch_state();
        manager.connect();
        state.changed().await.unwrap();
        assert_ne!(*state.borrow_and_update(), ConnectionState::Closed);

        manager.shutdown().await;
        manager.close();

        assert_eq!(manager.state(), ConnectionState::Closed);
        assert_eq!(seen.lock().unwrap().last(), Some(&ConnectionState::Closed));
    }
}
