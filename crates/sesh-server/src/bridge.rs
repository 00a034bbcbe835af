//! Binds a long-lived interactive runtime to HTTP session state.
//!
//! The runtime's connection handshake is an HTTP request, so the bridge
//! resolves it through the same [`SessionManager`] path as the per-request
//! middleware. That shared path is what keeps a value written by the
//! runtime visible to the next plain HTTP request and vice versa; the
//! bridge never holds its own decoded copy of the record.
//!
//! Each presented envelope must be resolved exactly once. A handler running
//! inside [`SessionLayer`](crate::middleware::SessionLayer) already has the
//! request's resolved handle in its extensions and binds it with
//! [`RuntimeBridge::attach`]; [`RuntimeBridge::connect`] is for handshake
//! requests that arrive outside the layer and resolves the headers itself.

use std::sync::Arc;

use http::header::HeaderMap;
use serde_json::Value;
use sesh_core::session::SessionId;
use sesh_core::store::StoreError;
use tokio::sync::mpsc;

use crate::manager::{SessionHandle, SessionManager, SessionOrigin};

/// An instruction for the connected client to navigate elsewhere.
///
/// Navigation is pushed explicitly over the connection's channel rather
/// than inferred from session state, so a redirect issued by the runtime
/// and a redirect issued by an HTTP route behave identically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationInstruction {
    /// Absolute-path target the client should load.
    pub target: String,
}

/// Receives navigation pushes for one runtime connection.
#[derive(Debug)]
pub struct NavigationReceiver {
    rx: mpsc::UnboundedReceiver<NavigationInstruction>,
}

impl NavigationReceiver {
    /// Waits for the next navigation push. Returns `None` once the
    /// session handle side of the connection is dropped.
    pub async fn recv(&mut self) -> Option<NavigationInstruction> {
        self.rx.recv().await
    }
}

/// Connects interactive runtimes to session state.
#[derive(Debug, Clone)]
pub struct RuntimeBridge {
    manager: Arc<SessionManager>,
}

impl RuntimeBridge {
    /// Wraps the shared manager.
    #[must_use]
    pub const fn new(manager: Arc<SessionManager>) -> Self {
        Self { manager }
    }

    /// Resolves the handshake request's session and opens a connection.
    ///
    /// Only for handshake requests that did not pass through the session
    /// layer. Inside the layer, use [`Self::attach`] with the request's
    /// resolved handle: resolving the same request a second time would
    /// double-count decode failures and mint a second fresh session.
    ///
    /// # Errors
    ///
    /// Returns an error when the backing store is unavailable.
    pub async fn connect(&self, headers: &HeaderMap) -> Result<RuntimeConnection, StoreError> {
        let session = self.manager.resolve(headers).await?;
        Ok(self.attach(session))
    }

    /// Binds an already-resolved session handle to a new connection.
    ///
    /// The handle must come from this bridge's manager; a handle resolved
    /// elsewhere would not share record identity with it.
    #[must_use]
    pub fn attach(&self, session: SessionHandle) -> RuntimeConnection {
        debug_assert!(
            Arc::ptr_eq(session.store(), self.manager.store()),
            "session handle resolved by a different manager"
        );
        let (nav_tx, rx) = mpsc::unbounded_channel();
        RuntimeConnection {
            handle: RuntimeSessionHandle { session, nav_tx },
            navigation: NavigationReceiver { rx },
        }
    }
}

/// One runtime's live binding to a session.
#[derive(Debug)]
pub struct RuntimeConnection {
    /// Session access plus navigation push.
    pub handle: RuntimeSessionHandle,
    /// The client-side end of the navigation channel.
    pub navigation: NavigationReceiver,
}

/// Session access for runtime code, plus explicit navigation push.
#[derive(Debug, Clone)]
pub struct RuntimeSessionHandle {
    session: SessionHandle,
    nav_tx: mpsc::UnboundedSender<NavigationInstruction>,
}

impl RuntimeSessionHandle {
    /// The bound session's identifier.
    #[must_use]
    pub const fn id(&self) -> SessionId {
        self.session.id()
    }

    /// How the bound session came to exist.
    #[must_use]
    pub const fn origin(&self) -> SessionOrigin {
        self.session.origin()
    }

    /// Returns the value stored under `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error when the backing store is unavailable.
    pub async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        self.session.get(key).await
    }

    /// Stores `value` under `key`, visible immediately to HTTP requests
    /// resolving the same session.
    ///
    /// # Errors
    ///
    /// Returns an error when the backing store is unavailable.
    pub async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.session.set(key, value).await
    }

    /// Removes `key`.
    ///
    /// # Errors
    ///
    /// Returns an error when the backing store is unavailable.
    pub async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.session.remove(key).await
    }

    /// Pushes a navigation instruction to the connected client. Returns
    /// `false` when the client side has gone away.
    pub fn push_navigation(&self, target: impl Into<String>) -> bool {
        self.nav_tx
            .send(NavigationInstruction {
                target: target.into(),
            })
            .is_ok()
    }
}
