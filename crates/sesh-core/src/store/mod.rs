//! Pluggable session state backings.
//!
//! A [`SessionStore`] answers attribute reads and writes keyed by
//! [`SessionId`] and integrates with the envelope cycle through
//! [`SessionStore::hydrate`] (seed state decoded from a cookie) and
//! [`SessionStore::snapshot`] (state to serialize back out). Two backings
//! are interchangeable behind this one trait:
//!
//! - **Embedded** ([`StorageMode::Embedded`]): the record rides inside the
//!   signed cookie itself. The store still holds the live in-process copy
//!   so that the middleware path and the runtime-bridge path observe one
//!   record identity, never independently decoded copies.
//! - **Server-side** ([`StorageMode::ServerSide`]): the cookie carries only
//!   the session id; the record lives in the store.
//!
//! Mutations to one session are serialized by a per-key lock; there is no
//! cross-session locking.

mod memory;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::session::{SessionId, SessionRecord};

pub use memory::MemoryStore;

/// Where session attributes live.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageMode {
    /// Attributes embedded in the signed cookie.
    #[default]
    Embedded,
    /// Attributes server-side, keyed by session id.
    ServerSide,
}

/// Errors from a session store.
///
/// Store failures must fail the request retryably; they never silently
/// drop state.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store is unreachable.
    #[error("session store unavailable: {0}")]
    Unavailable(String),

    /// An internal lock was poisoned.
    #[error("session store lock poisoned")]
    LockPoisoned,
}

/// Session state backing, polymorphic over where attributes live.
#[async_trait]
pub trait SessionStore: fmt::Debug + Send + Sync {
    /// Which envelope payload this backing expects.
    fn mode(&self) -> StorageMode;

    /// Returns the value stored under `key` for `id`, if any.
    async fn get(&self, id: &SessionId, key: &str) -> Result<Option<Value>, StoreError>;

    /// Stores `value` under `key` for `id`. The record is created on first
    /// access.
    async fn set(&self, id: &SessionId, key: &str, value: Value) -> Result<(), StoreError>;

    /// Removes `key` for `id`. Deleting an absent key is a no-op.
    async fn delete(&self, id: &SessionId, key: &str) -> Result<(), StoreError>;

    /// Extends the idle expiry for `id`.
    async fn touch(&self, id: &SessionId) -> Result<(), StoreError>;

    /// Seeds the store with a record decoded from an envelope. When a live,
    /// non-empty record already exists for `id`, the existing record wins:
    /// within one process the store copy is never staler than the cookie.
    async fn hydrate(&self, id: SessionId, record: SessionRecord) -> Result<(), StoreError>;

    /// Returns a copy of the current record for `id`, or `None` when the
    /// session is absent or past its idle expiry.
    async fn snapshot(&self, id: &SessionId) -> Result<Option<SessionRecord>, StoreError>;

    /// Discards the record for `id` entirely (explicit invalidation).
    async fn remove(&self, id: &SessionId) -> Result<(), StoreError>;

    /// Returns `true` when a live, unexpired record exists for `id`.
    async fn contains(&self, id: &SessionId) -> Result<bool, StoreError>;

    /// Drops every record past its idle expiry, returning how many were
    /// evicted. Expired records already read as absent; eviction reclaims
    /// their memory. Callers run this periodically.
    async fn evict_expired(&self) -> Result<usize, StoreError>;
}
