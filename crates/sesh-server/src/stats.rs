//! Decode-failure counters.
//!
//! A decode failure degrades gracefully to a fresh session, which renders
//! exactly like a genuine first visit. Without these counters a secret-ring
//! instability (every cookie rejected after a restart) is indistinguishable
//! from ordinary expiry in production — the "value lost" symptom. The
//! middleware increments one counter per failure class; operators alert on
//! `bad_signature`.

use std::sync::atomic::{AtomicU64, Ordering};

use sesh_core::DecodeFailureKind;

/// Monotonic counters for observable session-decode degradation.
#[derive(Debug, Default)]
pub struct DecodeStats {
    malformed: AtomicU64,
    bad_signature: AtomicU64,
    expired: AtomicU64,
    missing_server_state: AtomicU64,
}

impl DecodeStats {
    /// Records one decode failure of the given class.
    pub fn record_failure(&self, kind: DecodeFailureKind) {
        let counter = match kind {
            DecodeFailureKind::Malformed => &self.malformed,
            DecodeFailureKind::BadSignature => &self.bad_signature,
            DecodeFailureKind::Expired => &self.expired,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a verified reference envelope whose server-side record was
    /// gone.
    pub fn record_missing_server_state(&self) {
        self.missing_server_state.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a point-in-time copy of all counters.
    #[must_use]
    pub fn snapshot(&self) -> DecodeStatsSnapshot {
        DecodeStatsSnapshot {
            malformed: self.malformed.load(Ordering::Relaxed),
            bad_signature: self.bad_signature.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
            missing_server_state: self.missing_server_state.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time counter values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeStatsSnapshot {
    /// Structurally invalid envelopes.
    pub malformed: u64,
    /// Signature mismatches (possible ring instability).
    pub bad_signature: u64,
    /// Normal lifecycle expiries.
    pub expired: u64,
    /// Verified reference envelopes with no server-side record.
    pub missing_server_state: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_per_class() {
        let stats = DecodeStats::default();
        stats.record_failure(DecodeFailureKind::BadSignature);
        stats.record_failure(DecodeFailureKind::BadSignature);
        stats.record_failure(DecodeFailureKind::Expired);
        stats.record_missing_server_state();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.bad_signature, 2);
        assert_eq!(snapshot.expired, 1);
        assert_eq!(snapshot.malformed, 0);
        assert_eq!(snapshot.missing_server_state, 1);
    }
}
