//! Session subsystem.
//!
//! # Data Flow
//! ```text
//! login success ──▶ SessionContext::begin ──▶ epoch += 1, Authenticated
//!                                               │
//!     RequestPipeline (outbound) ◀── token() ───┤
//!     ConnectionManager (handshake) ◀── watch() ┘
//!
//! 401 / logout ──▶ SessionContext::clear_session ──▶ epoch += 1, Anonymous
//!                                                  ──▶ cleared handlers
//!                                                  ──▶ Navigator (login redirect)
//! ```
//!
//! # Design Decisions
//! - One explicit context object, injected, never global
//! - Only login success sets the credential; only 401 and logout clear it
//! - Observers watch an epoch channel instead of polling the credential

pub mod context;
pub mod navigation;

pub use context::{SessionContext, SessionEpoch, SessionStatus};
pub use navigation::{is_login_surface, HeadlessNavigator, Navigator};
