//! Event dispatcher.
//!
//! # Responsibilities
//! - Keep a registry of handlers per event type, in registration order
//! - Decode inbound frames and fan them out to every registered handler
//! - Isolate handlers from each other and from the connection
//!
//! # Design Decisions
//! - Unknown event types are dropped silently
//! - A panicking handler is caught and reported; siblings still run
//! - Handlers run outside the registry lock, so a handler may
//!   subscribe or unsubscribe while being dispatched
//! - Unsubscribing is idempotent and also happens on drop

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use thiserror::Error;

use crate::observability::metrics;
use crate::observability::{ErrorContext, ErrorReporter, TracingReporter};
use crate::push::events::{EventKind, PushFrame};

/// Callback invoked with an event's payload.
pub type Handler = Arc<dyn Fn(&Value) + Send + Sync>;

/// Opaque handle identifying one registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

impl fmt::Display for HandlerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Failures contained at the dispatch boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    #[error("handler {handler} for '{kind}' panicked: {message}")]
    HandlerPanicked {
        kind: EventKind,
        handler: HandlerId,
        message: String,
    },

    #[error("payload for '{kind}' could not be decoded: {message}")]
    Decode { kind: EventKind, message: String },
}

/// What happened to one inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Recognized type; `handlers` were invoked, `failed` of them panicked.
    Delivered {
        kind: EventKind,
        handlers: usize,
        failed: usize,
    },
    /// Well-formed frame with a type this client does not know.
    Unknown(String),
    /// Not a `{type, payload}` envelope.
    Malformed,
}

#[derive(Default)]
struct Registry {
    next_id: AtomicU64,
    handlers: Mutex<HashMap<EventKind, BTreeMap<HandlerId, Handler>>>,
}

impl Registry {
    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<EventKind, BTreeMap<HandlerId, Handler>>> {
        self.handlers.lock().expect("dispatcher registry poisoned")
    }

    fn remove(&self, id: HandlerId) -> bool {
        let mut handlers = self.lock();
        let mut removed = false;
        handlers.retain(|_, by_id| {
            removed |= by_id.remove(&id).is_some();
            !by_id.is_empty()
        });
        removed
    }
}

/// Typed publish/subscribe bus for server-pushed events.
#[derive(Clone)]
pub struct EventDispatcher {
    registry: Arc<Registry>,
    reporter: Arc<dyn ErrorReporter>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::with_reporter(Arc::new(TracingReporter))
    }

    pub fn with_reporter(reporter: Arc<dyn ErrorReporter>) -> Self {
        Self {
            registry: Arc::new(Registry::default()),
            reporter,
        }
    }

    /// Register `handler` for `kind`. The returned guard unsubscribes when
    /// [`Subscription::unsubscribe`] is called or when it is dropped.
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let id = self.register(kind, Arc::new(handler));
        Subscription {
            kind,
            id,
            registry: Arc::downgrade(&self.registry),
            active: AtomicBool::new(true),
        }
    }

    /// Like [`subscribe`](Self::subscribe), decoding the payload into `T`
    /// first. Payloads that do not decode are reported and skipped.
    pub fn subscribe_as<T, F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        T: DeserializeOwned,
        F: Fn(T) + Send + Sync + 'static,
    {
        let reporter = self.reporter.clone();
        self.subscribe(kind, move |payload| match T::deserialize(payload) {
            Ok(value) => handler(value),
            Err(e) => {
                let error = DispatchError::Decode {
                    kind,
                    message: e.to_string(),
                };
                reporter.report_error(&error, &ErrorContext::new("push_decode").dependency(kind.as_str()));
            }
        })
    }

    /// Low-level registration; pair with [`deregister`](Self::deregister).
    pub fn register(&self, kind: EventKind, handler: Handler) -> HandlerId {
        let id = HandlerId(self.registry.next_id.fetch_add(1, Ordering::Relaxed));
        self.registry.lock().entry(kind).or_default().insert(id, handler);
        tracing::debug!(event = kind.as_str(), handler = %id, "Handler registered");
        id
    }

    /// Remove a registration. Returns `false` if it was already gone.
    pub fn deregister(&self, id: HandlerId) -> bool {
        self.registry.remove(id)
    }

    /// Decode a raw text frame and fan it out.
    pub fn dispatch(&self, raw: &str) -> DispatchOutcome {
        match serde_json::from_str::<PushFrame>(raw) {
            Ok(frame) => self.dispatch_frame(&frame),
            Err(e) => {
                tracing::debug!(error = %e, "Dropping malformed push frame");
                metrics::record_push_frame("malformed");
                DispatchOutcome::Malformed
            }
        }
    }

    /// Fan out an already-decoded frame.
    pub fn dispatch_frame(&self, frame: &PushFrame) -> DispatchOutcome {
        let Some(kind) = EventKind::from_wire(&frame.kind) else {
            tracing::trace!(event = %frame.kind, "Ignoring unknown push event");
            metrics::record_push_frame("unknown");
            return DispatchOutcome::Unknown(frame.kind.clone());
        };

        let handlers: Vec<(HandlerId, Handler)> = self
            .registry
            .lock()
            .get(&kind)
            .map(|by_id| by_id.iter().map(|(id, h)| (*id, h.clone())).collect())
            .unwrap_or_default();

        let mut failed = 0;
        for (id, handler) in &handlers {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| handler(&frame.payload))) {
                failed += 1;
                let error = DispatchError::HandlerPanicked {
                    kind,
                    handler: *id,
                    message: panic_message(panic.as_ref()),
                };
                self.reporter
                    .report_error(&error, &ErrorContext::new("push_handler").dependency(kind.as_str()));
            }
        }

        metrics::record_push_frame("dispatched");
        DispatchOutcome::Delivered {
            kind,
            handlers: handlers.len(),
            failed,
        }
    }

    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.registry.lock().get(&kind).map_or(0, BTreeMap::len)
    }

    /// Drop every registration.
    pub fn clear(&self) {
        self.registry.lock().clear();
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = self.registry.lock();
        let counts: BTreeMap<&str, usize> = registry.iter().map(|(k, v)| (k.as_str(), v.len())).collect();
        f.debug_struct("EventDispatcher").field("handlers", &counts).finish()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Live registration returned by [`EventDispatcher::subscribe`].
pub struct Subscription {
    kind: EventKind,
    id: HandlerId,
    registry: Weak<Registry>,
    active: AtomicBool,
}

impl Subscription {
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn id(&self) -> HandlerId {
        self.id
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Stop receiving events. Safe to call any number of times.
    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
            tracing::debug!(event = self.kind.as_str(), handler = %self.id, "Handler unsubscribed");
        }
    }

    /// Keep the handler registered for the dispatcher's lifetime.
    pub fn detach(self) -> HandlerId {
        self.active.store(false, Ordering::SeqCst);
        self.id
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("kind", &self.kind)
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}
