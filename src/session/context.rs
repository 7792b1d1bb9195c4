//! Session credential store.

use serde_json::Value;
use std::sync::{Mutex, RwLock};
use tokio::sync::watch;

/// Whether a credential is currently held.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Anonymous,
    Authenticated,
}

/// What session watchers observe. `epoch` advances on every credential
/// change, so a clear followed by a new login is never coalesced away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionEpoch {
    pub epoch: u64,
    pub status: SessionStatus,
}

#[derive(Clone)]
struct Session {
    token: String,
    profile: Option<Value>,
}

type ClearedHandler = Box<dyn Fn() + Send + Sync>;

/// Holder of the bearer credential and the cached user profile.
pub struct SessionContext {
    session: RwLock<Option<Session>>,
    status: watch::Sender<SessionEpoch>,
    cleared_handlers: Mutex<Vec<ClearedHandler>>,
}

impl SessionContext {
    /// An anonymous session.
    pub fn new() -> Self {
        let (status, _) = watch::channel(SessionEpoch {
            epoch: 0,
            status: SessionStatus::Anonymous,
        });
        Self {
            session: RwLock::new(None),
            status,
            cleared_handlers: Mutex::new(Vec::new()),
        }
    }

    /// A session already holding `token`, e.g. restored from disk.
    pub fn with_token(token: impl Into<String>) -> Self {
        let context = Self::new();
        context.begin(token, None);
        context
    }

    pub fn token(&self) -> Option<String> {
        self.read().as_ref().map(|s| s.token.clone())
    }

    pub fn profile(&self) -> Option<Value> {
        self.read().as_ref().and_then(|s| s.profile.clone())
    }

    pub fn is_authenticated(&self) -> bool {
        self.read().is_some()
    }

    /// Start a session after a successful login.
    pub fn begin(&self, token: impl Into<String>, profile: Option<Value>) {
        *self.write() = Some(Session {
            token: token.into(),
            profile,
        });
        let epoch = self.advance(SessionStatus::Authenticated);
        tracing::info!(epoch, "Session started");
    }

    /// Replace the credential, keeping the cached profile.
    pub fn set_token(&self, token: impl Into<String>) {
        let token = token.into();
        {
            let mut session = self.write();
            match session.as_mut() {
                Some(existing) => existing.token = token,
                None => *session = Some(Session { token, profile: None }),
            }
        }
        let epoch = self.advance(SessionStatus::Authenticated);
        tracing::debug!(epoch, "Session credential replaced");
    }

    /// Wipe the credential and profile. Returns `false` if there was no
    /// session; cleared handlers only fire on an actual transition.
    pub fn clear_session(&self) -> bool {
        let had_session = self.write().take().is_some();
        if !had_session {
            return false;
        }
        let epoch = self.advance(SessionStatus::Anonymous);
        tracing::warn!(epoch, "Session cleared");

        let handlers = self.cleared_handlers.lock().expect("session handlers poisoned");
        for handler in handlers.iter() {
            handler();
        }
        true
    }

    /// Register a callback run every time the session is cleared.
    pub fn on_session_cleared<F>(&self, handler: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.cleared_handlers
            .lock()
            .expect("session handlers poisoned")
            .push(Box::new(handler));
    }

    /// Observe credential changes.
    pub fn watch(&self) -> watch::Receiver<SessionEpoch> {
        self.status.subscribe()
    }

    /// Current epoch; bumped by `begin`, `set_token` and `clear_session`.
    pub fn epoch(&self) -> u64 {
        self.status.borrow().epoch
    }

    fn advance(&self, status: SessionStatus) -> u64 {
        let mut epoch = 0;
        self.status.send_modify(|current| {
            current.epoch += 1;
            current.status = status;
            epoch = current.epoch;
        });
        epoch
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Option<Session>> {
        self.session.read().expect("session lock poisoned")
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Option<Session>> {
        self.session.write().expect("session lock poisoned")
    }
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("authenticated", &self.is_authenticated())
            .field("token", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_begin_and_clear() {
        let session = SessionContext::new();
        assert!(session.token().is_none());

        session.begin("tok-1", Some(json!({"name": "Dispatch"})));
        assert_eq!(session.token().as_deref(), Some("tok-1"));
        assert_eq!(session.profile(), Some(json!({"name": "Dispatch"})));

        assert!(session.clear_session());
        assert!(!session.is_authenticated());
        assert!(session.profile().is_none());
    }

    #[test]
    fn test_cleared_handlers_fire_once_per_transition() {
        let session = SessionContext::with_token("tok");
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        session.on_session_cleared(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(session.clear_session());
        assert!(!session.clear_session());
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_set_token_keeps_profile() {
        let session = SessionContext::new();
        session.begin("old", Some(json!({"id": 7})));
        session.set_token("new");
        assert_eq!(session.token().as_deref(), Some("new"));
        assert_eq!(session.profile(), Some(json!({"id": 7})));
    }

    #[test]
    fn test_watch_observes_transitions() {
        let session = SessionContext::new();
        let mut status = session.watch();
        assert_eq!(status.borrow_and_update().status, SessionStatus::Anonymous);

        session.begin("tok", None);
        assert!(status.has_changed().unwrap());
        assert_eq!(status.borrow_and_update().status, SessionStatus::Authenticated);

        session.clear_session();
        assert_eq!(status.borrow_and_update().status, SessionStatus::Anonymous);
    }

    #[test]
    fn test_clear_then_login_is_visible_to_watchers() {
        let session = SessionContext::with_token("tok");
        let mut status = session.watch();
        let seen = status.borrow_and_update().epoch;

        session.clear_session();
        session.begin("other-user-token", None);

        assert!(status.has_changed().unwrap());
        let latest = *status.borrow_and_update();
        assert_eq!(latest.status, SessionStatus::Authenticated);
        assert_eq!(latest.epoch, seen + 2);
        assert_eq!(session.epoch(), seen + 2);
    }

    #[test]
    fn test_noop_clear_keeps_epoch() {
        let session = SessionContext::new();
        session.clear_session();
        assert_eq!(session.epoch(), 0);
        session.set_token("tok");
        assert_eq!(session.epoch(), 1);
    }

    #[test]
    fn test_debug_redacts_token() {
        let session = SessionContext::with_token("secret-token");
        assert!(!format!("{:?}", session).contains("secret-token"));
    }
}
