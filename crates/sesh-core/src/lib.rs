//! Core primitives for durable signed browser sessions.
//!
//! This crate owns everything below the HTTP boundary:
//!
//! - **`keyring`**: signing/verification key material with an externally
//!   persisted lifecycle. The ring is loaded deterministically at startup
//!   and is never regenerated per process instance.
//! - **`envelope`**: the versioned, MAC-signed cookie envelope and its
//!   encode/decode cycle, including secret rotation and expiry.
//! - **`session`**: the session identity and attribute record.
//! - **`store`**: pluggable session state backings (cookie-embedded or
//!   server-side), polymorphic behind one trait.
//! - **`config`**: TOML configuration with fail-closed validation.
//! - **`time`**: an injectable clock so expiry is testable.
//!
//! The crate deliberately has no HTTP dependencies; the middleware and
//! runtime-bridge layers live in `sesh-server`.

pub mod config;
pub mod envelope;
pub mod keyring;
pub mod session;
pub mod store;
pub mod time;

pub use config::{ConfigError, CookieAttributes, Environment, SameSitePolicy, SessionConfig};
pub use envelope::{
    CookieCodec, DecodeError, DecodeFailureKind, DecodedEnvelope, EncodeError, EnvelopePayload,
    ENVELOPE_VERSION,
};
pub use keyring::{KeyRingError, Secret, SecretKeyRing, MAC_SIZE, SECRET_SIZE};
pub use session::{SessionId, SessionIdParseError, SessionRecord};
pub use store::{MemoryStore, SessionStore, StorageMode, StoreError};
pub use time::{Clock, FixedClock, SystemClock};
