//! Signing/verification key material with an externally persisted lifecycle.
//!
//! The ring holds one *current* signing secret plus zero or more *retired*
//! secrets that remain valid for verification. Rotation adds a new current
//! secret while retaining the prior one, so envelopes minted before the
//! rotation still verify; dropping a retired secret invalidates everything
//! it signed.
//!
//! # Fail-closed loading
//!
//! [`SecretKeyRing::load`] is the only supported production entry point and
//! it refuses to serve when the persisted source is missing, unreadable, or
//! malformed. The ring is **never** derived from per-process random state:
//! a process-lifetime random secret silently invalidates every session on
//! restart, which is exactly the defect this crate exists to eliminate.
//! [`SecretKeyRing::generate`] exists for explicit first-boot provisioning
//! (paired with [`SecretKeyRing::persist`]) and for tests, never as an
//! implicit fallback.

use std::fmt;
use std::path::{Path, PathBuf};

use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::{Choice, ConstantTimeEq};
use thiserror::Error;
use zeroize::Zeroizing;

type HmacSha256 = Hmac<Sha256>;

const B64: base64::engine::GeneralPurpose = base64::engine::general_purpose::STANDARD;

/// Size of one ring secret in bytes.
pub const SECRET_SIZE: usize = 32;

/// Size of an HMAC-SHA256 tag in bytes.
pub const MAC_SIZE: usize = 32;

/// Errors raised by ring loading, persistence, and signing.
///
/// Every variant produced during startup is fatal: the process must refuse
/// to serve signed sessions rather than continue with an ephemeral ring.
#[derive(Debug, Error)]
pub enum KeyRingError {
    /// The persisted ring source could not be read.
    #[error("failed to read secret ring from {path}: {source}")]
    Unloadable {
        /// Path of the persisted ring source.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The persisted ring source is not valid TOML.
    #[error("failed to parse secret ring: {0}")]
    Malformed(#[from] toml::de::Error),

    /// A secret failed validation (bad encoding or wrong length).
    #[error("invalid secret material: {0}")]
    InvalidSecret(String),

    /// The ring could not be serialized for persistence.
    #[error("failed to serialize secret ring: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// The ring could not be written to its persisted source.
    #[error("failed to persist secret ring to {path}: {source}")]
    Persist {
        /// Destination path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

/// One 32-byte HMAC secret. Zeroized on drop; never printed.
#[derive(Clone)]
pub struct Secret(Zeroizing<[u8; SECRET_SIZE]>);

impl Secret {
    /// Wraps raw secret bytes.
    #[must_use]
    pub fn from_bytes(bytes: [u8; SECRET_SIZE]) -> Self {
        Self(Zeroizing::new(bytes))
    }

    /// Decodes a standard-base64 secret, enforcing the exact length.
    ///
    /// # Errors
    ///
    /// Returns [`KeyRingError::InvalidSecret`] on bad encoding or length.
    pub fn from_base64(encoded: &str) -> Result<Self, KeyRingError> {
        let decoded = B64
            .decode(encoded)
            .map_err(|e| KeyRingError::InvalidSecret(format!("bad base64: {e}")))?;
        let bytes: [u8; SECRET_SIZE] = decoded.try_into().map_err(|v: Vec<u8>| {
            KeyRingError::InvalidSecret(format!(
                "expected {SECRET_SIZE} bytes, got {}",
                v.len()
            ))
        })?;
        Ok(Self::from_bytes(bytes))
    }

    /// Generates a fresh random secret from the OS RNG.
    #[must_use]
    pub fn generate() -> Self {
        use rand::RngCore;

        let mut bytes = [0u8; SECRET_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self::from_bytes(bytes)
    }

    fn to_base64(&self) -> String {
        B64.encode(self.0.as_ref())
    }

    fn mac(&self, payload: &[u8]) -> Result<[u8; MAC_SIZE], KeyRingError> {
        let mut mac = HmacSha256::new_from_slice(self.0.as_ref())
            .map_err(|e| KeyRingError::InvalidSecret(format!("unusable hmac key: {e}")))?;
        mac.update(payload);
        Ok(mac.finalize().into_bytes().into())
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(..)")
    }
}

/// On-disk representation of the ring (base64-encoded secrets).
#[derive(Serialize, Deserialize)]
struct KeyRingFile {
    current: String,
    #[serde(default)]
    retired: Vec<String>,
}

/// Ordered set of secrets with one designated current signing secret.
///
/// All secrets in the ring are valid for verification; only the current
/// secret signs. Invariant: given the same persisted source, the ring's
/// contents are identical across every process instance in a deployment
/// and across restarts.
#[derive(Debug, Clone)]
pub struct SecretKeyRing {
    current: Secret,
    retired: Vec<Secret>,
}

impl SecretKeyRing {
    /// Loads the ring from its persisted TOML source.
    ///
    /// # Errors
    ///
    /// Fails closed on any read, parse, or validation error; callers must
    /// treat the failure as startup-fatal and never substitute a random
    /// ring.
    pub fn load(path: &Path) -> Result<Self, KeyRingError> {
        let content = std::fs::read_to_string(path).map_err(|source| KeyRingError::Unloadable {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    /// Parses a ring from TOML content.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or any secret is malformed.
    pub fn from_toml(content: &str) -> Result<Self, KeyRingError> {
        let file: KeyRingFile = toml::from_str(content)?;
        let current = Secret::from_base64(&file.current)?;
        let retired = file
            .retired
            .iter()
            .map(|s| Secret::from_base64(s))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { current, retired })
    }

    /// Builds a ring from explicit secrets.
    #[must_use]
    pub fn from_secrets(current: Secret, retired: Vec<Secret>) -> Self {
        Self { current, retired }
    }

    /// Generates a single-secret ring from the OS RNG.
    ///
    /// Provisioning/test helper only. A generated ring is worthless until
    /// persisted: every envelope it signs dies with the process.
    #[must_use]
    pub fn generate() -> Self {
        Self {
            current: Secret::generate(),
            retired: Vec::new(),
        }
    }

    /// Writes the ring to `path` as TOML, replacing any existing file.
    ///
    /// The write goes through a sibling temp file followed by a rename so
    /// a crash cannot leave a truncated ring behind.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn persist(&self, path: &Path) -> Result<(), KeyRingError> {
        let file = KeyRingFile {
            current: self.current.to_base64(),
            retired: self.retired.iter().map(Secret::to_base64).collect(),
        };
        let content = toml::to_string_pretty(&file)?;

        let tmp = path.with_extension("tmp");
        let write_err = |source| KeyRingError::Persist {
            path: path.to_path_buf(),
            source,
        };
        std::fs::write(&tmp, content).map_err(write_err)?;
        std::fs::rename(&tmp, path).map_err(write_err)?;
        Ok(())
    }

    /// Signs `payload` with the current secret.
    ///
    /// # Errors
    ///
    /// Returns an error only if the secret is unusable as an HMAC key,
    /// which cannot happen for well-formed 32-byte secrets.
    pub fn sign(&self, payload: &[u8]) -> Result<[u8; MAC_SIZE], KeyRingError> {
        self.current.mac(payload)
    }

    /// Verifies `mac` against every secret in the ring.
    ///
    /// Verification succeeds if any ring member produced the tag, which is
    /// what allows rotation without invalidating live sessions. Each
    /// candidate comparison is constant-time; a secret that fails to key
    /// an HMAC simply does not match.
    #[must_use]
    pub fn verify(&self, payload: &[u8], mac: &[u8]) -> bool {
        let mut matched = Choice::from(0u8);
        for secret in std::iter::once(&self.current).chain(&self.retired) {
            if let Ok(computed) = secret.mac(payload) {
                matched |= computed.ct_eq(mac);
            }
        }
        bool::from(matched)
    }

    /// Installs `new_current` as the signing secret, retaining the prior
    /// current secret for verification.
    pub fn rotate(&mut self, new_current: Secret) {
        let previous = std::mem::replace(&mut self.current, new_current);
        self.retired.insert(0, previous);
    }

    /// Drops every retired secret, invalidating all envelopes they signed.
    pub fn drop_retired(&mut self) {
        self.retired.clear();
    }

    /// Total number of secrets in the ring.
    #[must_use]
    pub fn secret_count(&self) -> usize {
        1 + self.retired.len()
    }
}
