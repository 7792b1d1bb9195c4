//! Push channel subsystem.
//!
//! # Data Flow
//! ```text
//! backend ──websocket──▶ connection.rs (ConnectionManager)
//!                             │  text frames, only while Open
//!                             ▼
//!                        dispatcher.rs (EventDispatcher)
//!                             │  decode {type, payload}, fan out
//!                             ▼
//!                        subscriber callbacks
//! ```
//!
//! # Design Decisions
//! - At-most-once delivery; events missed while disconnected are not replayed
//! - The connection never blocks on a slow subscriber beyond its own call
//! - Unknown event types are forward-compatible no-ops

pub mod connection;
pub mod dispatcher;
pub mod events;

pub use connection::{ConnectionManager, ConnectionState, PushSettings, PUSH_DEPENDENCY};
pub use dispatcher::{DispatchError, DispatchOutcome, EventDispatcher, Handler, HandlerId, Subscription};
pub use events::{EventKind, OutboundFrame, PushFrame, Room};
