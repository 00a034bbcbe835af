//! Router assembly.

use std::sync::Arc;

use axum::routing::get;
use axum::Router;

use crate::bridge::RuntimeBridge;
use crate::manager::SessionManager;
use crate::middleware::SessionLayer;
use crate::routes;

/// Shared application state for the routes.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Bridge built over the same manager the session layer uses.
    pub bridge: RuntimeBridge,
    /// Root path the transfer endpoint redirects to.
    pub root: String,
}

/// Builds the application router with the session layer applied.
#[must_use]
pub fn build_router(manager: Arc<SessionManager>, root: String) -> Router {
    let state = AppState {
        bridge: RuntimeBridge::new(Arc::clone(&manager)),
        root,
    };

    Router::new()
        .route("/", get(routes::index))
        .route("/transfer", get(routes::transfer))
        .layer(SessionLayer::new(manager))
        .with_state(state)
}
