//! In-memory session store backing both storage modes.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;

use super::{SessionStore, StorageMode, StoreError};
use crate::session::{SessionId, SessionRecord};
use crate::time::Clock;

/// One live session. The mutex serializes concurrent mutation of a single
/// session (parallel tabs, or the runtime bridge racing a request) without
/// any cross-session locking.
#[derive(Debug)]
struct Entry {
    state: Mutex<EntryState>,
}

#[derive(Debug)]
struct EntryState {
    record: SessionRecord,
    deadline: DateTime<Utc>,
}

impl EntryState {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.deadline
    }
}

/// In-memory [`SessionStore`].
///
/// In [`StorageMode::ServerSide`] this map is the authoritative state; in
/// [`StorageMode::Embedded`] it is the live in-process identity for records
/// whose authoritative copy rides in the cookie. Either way, every access
/// path resolves records through this one map.
#[derive(Debug)]
pub struct MemoryStore {
    mode: StorageMode,
    idle_expiry: Duration,
    clock: Arc<dyn Clock>,
    entries: RwLock<HashMap<SessionId, Arc<Entry>>>,
}

impl MemoryStore {
    /// Creates a store for `mode` with records idling out after
    /// `idle_expiry_secs`.
    #[must_use]
    pub fn new(mode: StorageMode, idle_expiry_secs: u64, clock: Arc<dyn Clock>) -> Self {
        let secs = i64::try_from(idle_expiry_secs).unwrap_or(i64::MAX);
        Self {
            mode,
            idle_expiry: Duration::seconds(secs),
            clock,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Store whose records ride inside the signed cookie.
    #[must_use]
    pub fn embedded(idle_expiry_secs: u64, clock: Arc<dyn Clock>) -> Self {
        Self::new(StorageMode::Embedded, idle_expiry_secs, clock)
    }

    /// Store holding records server-side, keyed by session id.
    #[must_use]
    pub fn server_side(idle_expiry_secs: u64, clock: Arc<dyn Clock>) -> Self {
        Self::new(StorageMode::ServerSide, idle_expiry_secs, clock)
    }

    fn lookup(&self, id: &SessionId) -> Result<Option<Arc<Entry>>, StoreError> {
        let entries = self.entries.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(entries.get(id).cloned())
    }

    fn lookup_or_create(&self, id: SessionId) -> Result<Arc<Entry>, StoreError> {
        let mut entries = self.entries.write().map_err(|_| StoreError::LockPoisoned)?;
        let deadline = self.clock.now() + self.idle_expiry;
        Ok(Arc::clone(entries.entry(id).or_insert_with(|| {
            Arc::new(Entry {
                state: Mutex::new(EntryState {
                    record: SessionRecord::new(),
                    deadline,
                }),
            })
        })))
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    fn mode(&self) -> StorageMode {
        self.mode
    }

    async fn get(&self, id: &SessionId, key: &str) -> Result<Option<Value>, StoreError> {
        let Some(entry) = self.lookup(id)? else {
            return Ok(None);
        };
        let state = entry.state.lock().await;
        if state.is_expired(self.clock.now()) {
            debug!(session_id = %id, "session past idle expiry");
            return Ok(None);
        }
        Ok(state.record.get(key).cloned())
    }

    async fn set(&self, id: &SessionId, key: &str, value: Value) -> Result<(), StoreError> {
        let entry = self.lookup_or_create(*id)?;
        let now = self.clock.now();
        let mut state = entry.state.lock().await;
        if state.is_expired(now) {
            // Stale attributes must not leak into the successor session.
            state.record.clear();
        }
        state.record.set(key, value);
        state.deadline = now + self.idle_expiry;
        Ok(())
    }

    async fn delete(&self, id: &SessionId, key: &str) -> Result<(), StoreError> {
        let Some(entry) = self.lookup(id)? else {
            return Ok(());
        };
        let now = self.clock.now();
        let mut state = entry.state.lock().await;
        if state.is_expired(now) {
            return Ok(());
        }
        state.record.remove(key);
        state.deadline = now + self.idle_expiry;
        Ok(())
    }

    async fn touch(&self, id: &SessionId) -> Result<(), StoreError> {
        let Some(entry) = self.lookup(id)? else {
            return Ok(());
        };
        let now = self.clock.now();
        let mut state = entry.state.lock().await;
        if !state.is_expired(now) {
            state.deadline = now + self.idle_expiry;
        }
        Ok(())
    }

    async fn hydrate(&self, id: SessionId, record: SessionRecord) -> Result<(), StoreError> {
        let entry = self.lookup_or_create(id)?;
        let now = self.clock.now();
        let mut state = entry.state.lock().await;
        if state.is_expired(now) || state.record.is_empty() {
            state.record = record;
        }
        state.deadline = now + self.idle_expiry;
        Ok(())
    }

    async fn snapshot(&self, id: &SessionId) -> Result<Option<SessionRecord>, StoreError> {
        let Some(entry) = self.lookup(id)? else {
            return Ok(None);
        };
        let state = entry.state.lock().await;
        if state.is_expired(self.clock.now()) {
            return Ok(None);
        }
        Ok(Some(state.record.clone()))
    }

    async fn remove(&self, id: &SessionId) -> Result<(), StoreError> {
        let mut entries = self.entries.write().map_err(|_| StoreError::LockPoisoned)?;
        entries.remove(id);
        Ok(())
    }

    async fn contains(&self, id: &SessionId) -> Result<bool, StoreError> {
        let Some(entry) = self.lookup(id)? else {
            return Ok(false);
        };
        let state = entry.state.lock().await;
        Ok(!state.is_expired(self.clock.now()))
    }

    async fn evict_expired(&self) -> Result<usize, StoreError> {
        let now = self.clock.now();
        let mut entries = self.entries.write().map_err(|_| StoreError::LockPoisoned)?;
        let before = entries.len();
        // An entry whose mutex is held is in active use; skip it and let
        // the next sweep reconsider it.
        entries.retain(|_, entry| match entry.state.try_lock() {
            Ok(state) => !state.is_expired(now),
            Err(_) => true,
        });
        Ok(before - entries.len())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::time::{FixedClock, SystemClock};

    fn store_with_clock(idle_secs: u64) -> (MemoryStore, Arc<FixedClock>) {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let store = MemoryStore::server_side(idle_secs, clock.clone());
        (store, clock)
    }

    #[tokio::test]
    async fn set_get_delete_roundtrip() {
        let store = MemoryStore::server_side(60, Arc::new(SystemClock));
        let id = SessionId::generate();

        assert_eq!(store.get(&id, "value").await.unwrap(), None);

        store.set(&id, "value", json!("A")).await.unwrap();
        assert_eq!(store.get(&id, "value").await.unwrap(), Some(json!("A")));

        store.delete(&id, "value").await.unwrap();
        assert_eq!(store.get(&id, "value").await.unwrap(), None);
        assert!(store.contains(&id).await.unwrap());
    }

    #[tokio::test]
    async fn delete_absent_key_matches_delete_present_key() {
        let store = MemoryStore::server_side(60, Arc::new(SystemClock));
        let id = SessionId::generate();

        // Clearing before anything exists: no error, no value.
        store.delete(&id, "value").await.unwrap();
        assert_eq!(store.get(&id, "value").await.unwrap(), None);

        // Clearing after a set: same observable outcome.
        store.set(&id, "value", json!("A")).await.unwrap();
        store.delete(&id, "value").await.unwrap();
        assert_eq!(store.get(&id, "value").await.unwrap(), None);
    }

    #[tokio::test]
    async fn sessions_are_isolated() {
        let store = MemoryStore::server_side(60, Arc::new(SystemClock));
        let a = SessionId::generate();
        let b = SessionId::generate();

        store.set(&a, "value", json!("A")).await.unwrap();
        assert_eq!(store.get(&b, "value").await.unwrap(), None);
    }

    #[tokio::test]
    async fn idle_expiry_hides_record_and_touch_extends() {
        let (store, clock) = store_with_clock(60);
        let id = SessionId::generate();
        store.set(&id, "value", json!("A")).await.unwrap();

        clock.advance_secs(30);
        store.touch(&id).await.unwrap();

        // 30 + 45 > 60, but the touch reset the deadline.
        clock.advance_secs(45);
        assert_eq!(store.get(&id, "value").await.unwrap(), Some(json!("A")));

        clock.advance_secs(61);
        assert_eq!(store.get(&id, "value").await.unwrap(), None);
        assert!(!store.contains(&id).await.unwrap());
        assert_eq!(store.snapshot(&id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn set_after_expiry_starts_clean() {
        let (store, clock) = store_with_clock(60);
        let id = SessionId::generate();
        store.set(&id, "stale", json!(1)).await.unwrap();

        clock.advance_secs(120);
        store.set(&id, "fresh", json!(2)).await.unwrap();

        assert_eq!(store.get(&id, "stale").await.unwrap(), None);
        assert_eq!(store.get(&id, "fresh").await.unwrap(), Some(json!(2)));
    }

    #[tokio::test]
    async fn hydrate_seeds_only_when_no_live_state() {
        let store = MemoryStore::embedded(60, Arc::new(SystemClock));
        let id = SessionId::generate();

        let mut from_cookie = SessionRecord::new();
        from_cookie.set("value", json!("from_cookie"));
        store.hydrate(id, from_cookie).await.unwrap();
        assert_eq!(
            store.get(&id, "value").await.unwrap(),
            Some(json!("from_cookie"))
        );

        // A later hydrate (browser refresh with a stale cookie) must not
        // clobber the live record.
        store.set(&id, "value", json!("live")).await.unwrap();
        let mut stale = SessionRecord::new();
        stale.set("value", json!("stale"));
        store.hydrate(id, stale).await.unwrap();
        assert_eq!(store.get(&id, "value").await.unwrap(), Some(json!("live")));
    }

    #[tokio::test]
    async fn remove_discards_record() {
        let store = MemoryStore::server_side(60, Arc::new(SystemClock));
        let id = SessionId::generate();
        store.set(&id, "value", json!("A")).await.unwrap();

        store.remove(&id).await.unwrap();
        assert!(!store.contains(&id).await.unwrap());
        assert_eq!(store.snapshot(&id).await.unwrap(), None);
    }

    #[tokio::test]
    async fn evict_expired_drops_only_expired_entries() {
        let (store, clock) = store_with_clock(60);
        let old = SessionId::generate();
        let live = SessionId::generate();

        store.set(&old, "value", json!("old")).await.unwrap();
        clock.advance_secs(30);
        store.set(&live, "value", json!("live")).await.unwrap();

        // 70s: `old` (deadline 60) is past expiry, `live` (deadline 90)
        // is not.
        clock.advance_secs(40);
        assert_eq!(store.evict_expired().await.unwrap(), 1);

        assert!(!store.contains(&old).await.unwrap());
        assert_eq!(
            store.get(&live, "value").await.unwrap(),
            Some(json!("live"))
        );

        // Idempotent: nothing left to evict.
        assert_eq!(store.evict_expired().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn concurrent_writes_to_one_session_all_land() {
        let store = Arc::new(MemoryStore::server_side(60, Arc::new(SystemClock)));
        let id = SessionId::generate();

        let mut handles = Vec::new();
        for i in 0..16 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.set(&id, &format!("k{i}"), json!(i)).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let snapshot = store.snapshot(&id).await.unwrap().unwrap();
        assert_eq!(snapshot.len(), 16);
    }
}
