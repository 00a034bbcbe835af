//! The single decode/resolve/commit path for session state.
//!
//! Every access path — per-request middleware and the long-lived runtime
//! bridge — resolves sessions through one [`SessionManager`]. A resolved
//! [`SessionHandle`] is `(store, id)`, never a decoded copy of the record,
//! so two handles for the same session id always observe the same state.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use cookie::Cookie;
use http::header::{HeaderMap, HeaderValue, COOKIE, SET_COOKIE};
use serde_json::Value;
use sesh_core::envelope::{CookieCodec, EncodeError, EnvelopePayload};
use sesh_core::keyring::SecretKeyRing;
use sesh_core::session::SessionId;
use sesh_core::store::{SessionStore, StorageMode, StoreError};
use sesh_core::time::Clock;
use sesh_core::{CookieAttributes, DecodeFailureKind, SameSitePolicy, SessionConfig};
use thiserror::Error;
use tracing::{debug, warn};

use crate::stats::{DecodeStats, DecodeStatsSnapshot};

/// Failures on the session layer's own paths (never handler failures).
#[derive(Debug, Error)]
pub enum SessionLayerError {
    /// The backing store is unreachable; the request must fail retryably.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The outgoing envelope could not be built.
    #[error(transparent)]
    Encode(#[from] EncodeError),

    /// The envelope does not fit in a `Set-Cookie` header.
    #[error("failed to build set-cookie header: {0}")]
    Header(#[from] http::header::InvalidHeaderValue),
}

/// How the current session came to exist.
///
/// Callers that need exact parity between "no prior session" and
/// "explicitly cleared" read this instead of inferring from absent keys;
/// a decode failure is surfaced here rather than as silent absence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOrigin {
    /// A presented envelope verified and resolved to existing state.
    Resumed,
    /// A fresh session was minted; the reason says why.
    Fresh(FreshReason),
}

impl SessionOrigin {
    /// `true` when the session continued from a presented envelope.
    #[must_use]
    pub const fn is_resumed(self) -> bool {
        matches!(self, Self::Resumed)
    }

    /// The decode failure behind a fresh session, if that is why it is
    /// fresh.
    #[must_use]
    pub const fn decode_failure(self) -> Option<DecodeFailureKind> {
        match self {
            Self::Fresh(FreshReason::DecodeFailed(kind)) => Some(kind),
            _ => None,
        }
    }
}

/// Why a fresh session was minted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreshReason {
    /// The request carried no session cookie: a genuine first visit.
    NoCookie,
    /// The presented envelope failed to decode.
    DecodeFailed(DecodeFailureKind),
    /// A verified reference envelope pointed at server-side state that no
    /// longer exists (e.g. a server-side store restarted).
    MissingServerState,
}

/// A caller's view of one logical session.
///
/// Cheap to clone; all clones share the dirty flag and resolve reads and
/// writes through the same store lookup.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: SessionId,
    origin: SessionOrigin,
    presented_cookie: bool,
    store: Arc<dyn SessionStore>,
    dirty: Arc<AtomicBool>,
}

impl SessionHandle {
    /// The session's identifier.
    #[must_use]
    pub const fn id(&self) -> SessionId {
        self.id
    }

    /// How this session came to exist.
    #[must_use]
    pub const fn origin(&self) -> SessionOrigin {
        self.origin
    }

    /// `true` once any mutation went through this session's handles.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Relaxed)
    }

    /// Returns the value stored under `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error when the backing store is unavailable.
    pub async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        self.store.get(&self.id, key).await
    }

    /// Stores `value` under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error when the backing store is unavailable.
    pub async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.store.set(&self.id, key, value).await?;
        self.dirty.store(true, Ordering::Relaxed);
        Ok(())
    }

    /// Removes `key`. Removing an absent key behaves identically to
    /// removing a present one.
    ///
    /// # Errors
    ///
    /// Returns an error when the backing store is unavailable.
    pub async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.store.delete(&self.id, key).await?;
        self.dirty.store(true, Ordering::Relaxed);
        Ok(())
    }

    /// Discards the whole record (explicit invalidation).
    ///
    /// # Errors
    ///
    /// Returns an error when the backing store is unavailable.
    pub async fn invalidate(&self) -> Result<(), StoreError> {
        self.store.remove(&self.id).await?;
        self.dirty.store(true, Ordering::Relaxed);
        Ok(())
    }

    pub(crate) const fn presented_cookie(&self) -> bool {
        self.presented_cookie
    }

    pub(crate) const fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }
}

/// Owns the ring, codec, store, and decode counters; resolves inbound
/// requests to [`SessionHandle`]s and commits mutated state onto outbound
/// responses.
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    ring: SecretKeyRing,
    codec: CookieCodec,
    cookie_name: String,
    attributes: CookieAttributes,
    clock: Arc<dyn Clock>,
    stats: DecodeStats,
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("cookie_name", &self.cookie_name)
            .field("mode", &self.store.mode())
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    /// Builds a manager from a loaded ring and validated configuration.
    #[must_use]
    pub fn new(
        store: Arc<dyn SessionStore>,
        ring: SecretKeyRing,
        config: &SessionConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let attributes = config.cookie_attributes();
        Self {
            store,
            ring,
            codec: CookieCodec::new(&attributes),
            cookie_name: config.cookie_name.clone(),
            attributes,
            clock,
            stats: DecodeStats::default(),
        }
    }

    /// The shared store behind every handle this manager resolves.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// Point-in-time decode counters.
    #[must_use]
    pub fn stats(&self) -> DecodeStatsSnapshot {
        self.stats.snapshot()
    }

    fn envelope_from_headers(&self, headers: &HeaderMap) -> Option<String> {
        for header in headers.get_all(COOKIE) {
            let Ok(raw) = header.to_str() else { continue };
            for parsed in Cookie::split_parse(raw).flatten() {
                if parsed.name() == self.cookie_name {
                    return Some(parsed.value().to_string());
                }
            }
        }
        None
    }

    /// Resolves the request's session: decode the presented envelope, seed
    /// or locate state in the store, and hand back a live handle.
    ///
    /// Decode failures never fail the request. They mint a fresh empty
    /// session, and are logged and counted so that ring instability stays
    /// distinguishable from genuine expiry.
    ///
    /// # Errors
    ///
    /// Returns an error only when the backing store is unavailable; that
    /// must fail the request retryably rather than silently drop state.
    pub async fn resolve(&self, headers: &HeaderMap) -> Result<SessionHandle, StoreError> {
        let presented = self.envelope_from_headers(headers);
        let presented_cookie = presented.is_some();

        let (id, origin) = match presented {
            None => {
                debug!("no session cookie presented; minting fresh session");
                (SessionId::generate(), SessionOrigin::Fresh(FreshReason::NoCookie))
            },
            Some(envelope) => match self.codec.decode(&envelope, &self.ring, &*self.clock) {
                Ok(decoded) => match decoded.record {
                    Some(record) => {
                        self.store.hydrate(decoded.session_id, record).await?;
                        (decoded.session_id, SessionOrigin::Resumed)
                    },
                    None => {
                        if self.store.contains(&decoded.session_id).await? {
                            self.store.touch(&decoded.session_id).await?;
                            (decoded.session_id, SessionOrigin::Resumed)
                        } else {
                            self.stats.record_missing_server_state();
                            warn!(
                                session_id = %decoded.session_id,
                                "verified reference envelope has no server-side record; \
                                 minting fresh session"
                            );
                            (
                                SessionId::generate(),
                                SessionOrigin::Fresh(FreshReason::MissingServerState),
                            )
                        }
                    },
                },
                Err(err) => {
                    let kind = err.kind();
                    self.stats.record_failure(kind);
                    match kind {
                        DecodeFailureKind::Expired => {
                            debug!(failure = kind.as_str(), "session envelope expired");
                        },
                        DecodeFailureKind::BadSignature => {
                            warn!(
                                failure = kind.as_str(),
                                "session envelope rejected: {err}; if this follows a \
                                 restart, the secret ring is not persisted"
                            );
                        },
                        DecodeFailureKind::Malformed => {
                            warn!(failure = kind.as_str(), "session envelope rejected: {err}");
                        },
                    }
                    (
                        SessionId::generate(),
                        SessionOrigin::Fresh(FreshReason::DecodeFailed(kind)),
                    )
                },
            },
        };

        // A fresh session is not registered in the store until its first
        // mutation; reads resolve to absence either way, and anonymous
        // traffic must not grow the session map.
        Ok(SessionHandle {
            id,
            origin,
            presented_cookie,
            store: Arc::clone(&self.store),
            dirty: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Serializes the session's current state into `headers` as this
    /// response's own `Set-Cookie`.
    ///
    /// This runs on every response egress, so a handler that mutates the
    /// session and returns a redirect commits the mutation on the redirect
    /// itself — never deferred to a later response from a different code
    /// path.
    ///
    /// # Errors
    ///
    /// Returns an error when the store is unavailable or the envelope
    /// cannot be built; callers map this to a retryable failure.
    pub async fn commit(
        &self,
        handle: &SessionHandle,
        headers: &mut HeaderMap,
    ) -> Result<(), SessionLayerError> {
        if !handle.is_dirty() {
            return Ok(());
        }

        let snapshot = self
            .store
            .snapshot(&handle.id())
            .await?
            .unwrap_or_default();

        if snapshot.is_empty() {
            self.store.remove(&handle.id()).await?;
            if handle.presented_cookie() {
                headers.append(SET_COOKIE, self.removal_cookie()?);
            }
            return Ok(());
        }

        let payload = match self.store.mode() {
            StorageMode::Embedded => EnvelopePayload::Inline(snapshot),
            StorageMode::ServerSide => EnvelopePayload::Reference,
        };
        let envelope = self
            .codec
            .encode(handle.id(), &payload, &self.ring, &*self.clock)?;

        let cookie = self
            .base_cookie(envelope)
            .max_age(cookie::time::Duration::seconds(
                i64::try_from(self.attributes.max_age_secs).unwrap_or(i64::MAX),
            ))
            .build();
        headers.append(SET_COOKIE, HeaderValue::from_str(&cookie.to_string())?);
        Ok(())
    }

    fn removal_cookie(&self) -> Result<HeaderValue, SessionLayerError> {
        let cookie = self
            .base_cookie(String::new())
            .max_age(cookie::time::Duration::ZERO)
            .build();
        Ok(HeaderValue::from_str(&cookie.to_string())?)
    }

    fn base_cookie(&self, value: String) -> cookie::CookieBuilder<'static> {
        Cookie::build((self.cookie_name.clone(), value))
            .path("/")
            .http_only(self.attributes.http_only)
            .secure(self.attributes.secure)
            .same_site(match self.attributes.same_site {
                SameSitePolicy::Strict => cookie::SameSite::Strict,
                SameSitePolicy::Lax => cookie::SameSite::Lax,
                SameSitePolicy::None => cookie::SameSite::None,
            })
    }
}
