//! Session identity and attribute record.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

/// Opaque token identifying one browser session.
///
/// Generated when no valid envelope is presented; immutable once issued.
/// Re-keying a session means minting a new `SessionId`, never mutating an
/// existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Mints a new random session identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Error returned when a session identifier fails to parse.
#[derive(Debug, Error)]
#[error("invalid session id: {0}")]
pub struct SessionIdParseError(#[from] uuid::Error);

impl FromStr for SessionId {
    type Err = SessionIdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Attribute map scoped to one [`SessionId`].
///
/// Created on first access, mutated by request handlers and the runtime
/// bridge, discarded on expiry or explicit invalidation. Keys are ordered
/// so the serialized form is canonical; the envelope MAC is computed over
/// these bytes and must be stable across processes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionRecord {
    entries: BTreeMap<String, Value>,
}

impl SessionRecord {
    /// Creates an empty record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value stored under `key`, if any.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    /// Stores `value` under `key`, replacing any prior value.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.entries.insert(key.into(), value);
    }

    /// Removes `key`. Removing an absent key is a no-op; clearing is
    /// idempotent by construction.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.entries.remove(key)
    }

    /// Drops every attribute.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Returns `true` when the record holds no attributes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of stored attributes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Iterates over the attributes in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.entries.iter()
    }
}

impl FromIterator<(String, Value)> for SessionRecord {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn session_id_roundtrips_through_display() {
        let id = SessionId::generate();
        let parsed: SessionId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn session_id_rejects_garbage() {
        assert!("not-a-uuid".parse::<SessionId>().is_err());
    }

    #[test]
    fn record_set_get_remove() {
        let mut record = SessionRecord::new();
        assert!(record.is_empty());

        record.set("value", json!("this_is_dummy_value"));
        assert_eq!(record.get("value"), Some(&json!("this_is_dummy_value")));
        assert_eq!(record.len(), 1);

        assert_eq!(record.remove("value"), Some(json!("this_is_dummy_value")));
        assert!(record.is_empty());
    }

    #[test]
    fn removing_absent_key_is_noop() {
        let mut record = SessionRecord::new();
        assert!(record.remove("value").is_none());
        assert!(record.is_empty());
    }

    #[test]
    fn serialized_form_is_key_ordered() {
        let mut record = SessionRecord::new();
        record.set("zebra", json!(1));
        record.set("apple", json!(2));

        let bytes = serde_json::to_string(&record).unwrap();
        assert_eq!(bytes, r#"{"apple":2,"zebra":1}"#);
    }
}
