//! HTTP session boundary: middleware, runtime bridge, and routes.
//!
//! This crate puts `sesh-core` on the wire. The pieces:
//!
//! - [`manager::SessionManager`] — the single decode/resolve/commit path.
//!   Both access paths below go through it, which is what guarantees they
//!   observe the same session record.
//! - [`middleware::SessionLayer`] — a tower layer that decodes the session
//!   cookie on ingress, exposes a [`manager::SessionHandle`] in request
//!   extensions, and re-encodes the record into the response's own
//!   `Set-Cookie` on egress (redirects included).
//! - [`bridge::RuntimeBridge`] — binds a long-lived interactive runtime to
//!   the same session state, with an explicit navigation-push channel.
//! - [`routes`] — the state-transfer endpoint and the parity demo page.

pub mod app;
pub mod bridge;
pub mod manager;
pub mod middleware;
pub mod routes;
pub mod stats;

pub use app::{build_router, AppState};
pub use bridge::{
    NavigationInstruction, NavigationReceiver, RuntimeBridge, RuntimeConnection,
    RuntimeSessionHandle,
};
pub use manager::{FreshReason, SessionHandle, SessionLayerError, SessionManager, SessionOrigin};
pub use middleware::{SessionLayer, SessionService};
pub use stats::{DecodeStats, DecodeStatsSnapshot};
