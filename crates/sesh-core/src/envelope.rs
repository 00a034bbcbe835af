//! Versioned, MAC-signed cookie envelope.
//!
//! Wire format (opaque to the browser):
//!
//! ```text
//! v1.<base64url(payload-json)>.<base64url(hmac-sha256 tag)>
//! ```
//!
//! The tag covers `v1.<payload-b64>`, so neither the version header nor the
//! payload can be altered without detection. The payload carries the session
//! id, the issuance timestamp, the max-age, and either the inline
//! [`SessionRecord`] (stateless backing) or nothing (server-side backing,
//! where the id is the reference).
//!
//! Decode must succeed if verification passes against *any* secret currently
//! in the ring; this is what makes rotation possible. Expiry is evaluated
//! against the decoding host's clock. Cross-host clock skew is out of scope,
//! mitigated only by a conservative max-age.

use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::CookieAttributes;
use crate::keyring::{KeyRingError, SecretKeyRing};
use crate::session::{SessionId, SessionRecord};
use crate::time::Clock;

/// Current envelope format version header.
pub const ENVELOPE_VERSION: &str = "v1";

const B64URL: base64::engine::GeneralPurpose = base64::engine::general_purpose::URL_SAFE_NO_PAD;

/// Hard cap on accepted envelope length. Anything longer than a browser
/// would ever send back is rejected before any parsing work.
const MAX_ENVELOPE_LEN: usize = 8192;

/// What the envelope carries for the session state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvelopePayload {
    /// The full record rides in the cookie (stateless backing).
    Inline(SessionRecord),
    /// Only the session id rides in the cookie; the record lives
    /// server-side keyed by that id.
    Reference,
}

/// Serialized payload body. `data: None` encodes [`EnvelopePayload::Reference`].
#[derive(Debug, Serialize, Deserialize)]
struct EnvelopeBody {
    sid: SessionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<SessionRecord>,
    iat: i64,
    max_age: u64,
}

/// Result of a successful decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedEnvelope {
    /// The session this envelope belongs to.
    pub session_id: SessionId,
    /// Inline record, when the backing is stateless.
    pub record: Option<SessionRecord>,
    /// When the envelope was minted.
    pub issued_at: DateTime<Utc>,
}

/// Failures while encoding an envelope.
#[derive(Debug, Error)]
pub enum EncodeError {
    /// The record could not be serialized.
    #[error("failed to serialize session payload: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The ring could not sign the payload.
    #[error(transparent)]
    Sign(#[from] KeyRingError),
}

/// Decode failure taxonomy.
///
/// None of these propagate to the browser: the middleware degrades every
/// variant to "no prior session" and the request proceeds as a fresh first
/// visit. They are logged and counted so that ring instability is never
/// mistaken for genuine expiry.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Structurally invalid envelope. Treat as absent, log.
    #[error("malformed session envelope: {0}")]
    MalformedEnvelope(String),

    /// Tag did not verify against any ring secret. Treat as absent, log at
    /// elevated severity: this may indicate ring instability across a
    /// restart rather than client tampering.
    #[error("session envelope signature did not match any ring secret")]
    BadSignature,

    /// Normal lifecycle expiry. Treat as absent, no escalation.
    #[error("session envelope expired at {expired_at}")]
    Expired {
        /// Instant at which the envelope stopped being valid.
        expired_at: DateTime<Utc>,
    },
}

impl DecodeError {
    /// Classifies the failure for counters and origin signals.
    #[must_use]
    pub const fn kind(&self) -> DecodeFailureKind {
        match self {
            Self::MalformedEnvelope(_) => DecodeFailureKind::Malformed,
            Self::BadSignature => DecodeFailureKind::BadSignature,
            Self::Expired { .. } => DecodeFailureKind::Expired,
        }
    }
}

/// Coarse decode-failure class, used by counters and the session origin
/// signal so callers can distinguish ring instability from expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeFailureKind {
    /// Structurally invalid envelope.
    Malformed,
    /// Signature mismatch against the whole ring.
    BadSignature,
    /// Past issuance + max-age.
    Expired,
}

impl DecodeFailureKind {
    /// Stable label for logs and counters.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Malformed => "malformed_envelope",
            Self::BadSignature => "bad_signature",
            Self::Expired => "expired",
        }
    }
}

/// Serializes and deserializes session payloads into signed envelopes.
#[derive(Debug, Clone)]
pub struct CookieCodec {
    max_age_secs: u64,
}

impl CookieCodec {
    /// Creates a codec minting envelopes valid for `attributes.max_age_secs`.
    #[must_use]
    pub const fn new(attributes: &CookieAttributes) -> Self {
        Self {
            max_age_secs: attributes.max_age_secs,
        }
    }

    /// Encodes a signed envelope for `session_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be serialized or signed.
    pub fn encode(
        &self,
        session_id: SessionId,
        payload: &EnvelopePayload,
        ring: &SecretKeyRing,
        clock: &dyn Clock,
    ) -> Result<String, EncodeError> {
        let body = EnvelopeBody {
            sid: session_id,
            data: match payload {
                EnvelopePayload::Inline(record) => Some(record.clone()),
                EnvelopePayload::Reference => None,
            },
            iat: clock.now().timestamp(),
            max_age: self.max_age_secs,
        };

        let body_b64 = B64URL.encode(serde_json::to_vec(&body)?);
        let signed_portion = format!("{ENVELOPE_VERSION}.{body_b64}");
        let mac = ring.sign(signed_portion.as_bytes())?;
        Ok(format!("{signed_portion}.{}", B64URL.encode(mac)))
    }

    /// Decodes and verifies an envelope.
    ///
    /// Steps, in order: structural split, signature verification against
    /// every ring secret, expiry check, payload deserialization. The
    /// signature is checked *before* the payload is parsed so malformed
    /// JSON behind a bad tag reports [`DecodeError::BadSignature`], the
    /// signal that matters for ring-stability diagnosis.
    ///
    /// # Errors
    ///
    /// Returns the [`DecodeError`] taxonomy; see the type docs.
    pub fn decode(
        &self,
        envelope: &str,
        ring: &SecretKeyRing,
        clock: &dyn Clock,
    ) -> Result<DecodedEnvelope, DecodeError> {
        if envelope.len() > MAX_ENVELOPE_LEN {
            return Err(DecodeError::MalformedEnvelope(format!(
                "envelope exceeds {MAX_ENVELOPE_LEN} bytes"
            )));
        }

        let mut parts = envelope.splitn(3, '.');
        let (version, body_b64, mac_b64) = match (parts.next(), parts.next(), parts.next()) {
            (Some(v), Some(b), Some(m)) => (v, b, m),
            _ => {
                return Err(DecodeError::MalformedEnvelope(
                    "expected three dot-separated segments".to_string(),
                ));
            },
        };
        if version != ENVELOPE_VERSION {
            return Err(DecodeError::MalformedEnvelope(format!(
                "unsupported envelope version {version:?}"
            )));
        }

        let mac = B64URL
            .decode(mac_b64)
            .map_err(|e| DecodeError::MalformedEnvelope(format!("bad mac encoding: {e}")))?;

        let signed_portion = format!("{version}.{body_b64}");
        if !ring.verify(signed_portion.as_bytes(), &mac) {
            return Err(DecodeError::BadSignature);
        }

        // Past this point the bytes are authenticated; failures below mean
        // the envelope was minted by a buggy peer, not forged.
        let body_bytes = B64URL
            .decode(body_b64)
            .map_err(|e| DecodeError::MalformedEnvelope(format!("bad payload encoding: {e}")))?;
        let body: EnvelopeBody = serde_json::from_slice(&body_bytes)
            .map_err(|e| DecodeError::MalformedEnvelope(format!("bad payload json: {e}")))?;

        let issued_at = Utc
            .timestamp_opt(body.iat, 0)
            .single()
            .ok_or_else(|| DecodeError::MalformedEnvelope("issuance timestamp out of range".to_string()))?;
        let max_age = i64::try_from(body.max_age)
            .map_err(|_| DecodeError::MalformedEnvelope("max-age out of range".to_string()))?;
        let expires_at = issued_at
            .checked_add_signed(chrono::Duration::seconds(max_age))
            .ok_or_else(|| DecodeError::MalformedEnvelope("expiry out of range".to_string()))?;
        if clock.now() >= expires_at {
            return Err(DecodeError::Expired {
                expired_at: expires_at,
            });
        }

        Ok(DecodedEnvelope {
            session_id: body.sid,
            record: body.data,
            issued_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::config::CookieAttributes;
    use crate::time::FixedClock;

    fn codec(max_age_secs: u64) -> CookieCodec {
        CookieCodec::new(&CookieAttributes {
            max_age_secs,
            ..CookieAttributes::default()
        })
    }

    fn test_clock() -> FixedClock {
        FixedClock::new(chrono::Utc::now())
    }

    fn sample_record() -> SessionRecord {
        let mut record = SessionRecord::new();
        record.set("value", json!("this_is_dummy_value"));
        record.set("count", json!(3));
        record
    }

    #[test]
    fn inline_roundtrip() {
        let ring = SecretKeyRing::generate();
        let clock = test_clock();
        let codec = codec(3600);
        let id = SessionId::generate();
        let record = sample_record();

        let envelope = codec
            .encode(id, &EnvelopePayload::Inline(record.clone()), &ring, &clock)
            .unwrap();
        let decoded = codec.decode(&envelope, &ring, &clock).unwrap();

        assert_eq!(decoded.session_id, id);
        assert_eq!(decoded.record, Some(record));
        assert_eq!(decoded.issued_at.timestamp(), clock.now().timestamp());
    }

    #[test]
    fn reference_roundtrip_carries_no_record() {
        let ring = SecretKeyRing::generate();
        let clock = test_clock();
        let codec = codec(3600);
        let id = SessionId::generate();

        let envelope = codec
            .encode(id, &EnvelopePayload::Reference, &ring, &clock)
            .unwrap();
        let decoded = codec.decode(&envelope, &ring, &clock).unwrap();

        assert_eq!(decoded.session_id, id);
        assert_eq!(decoded.record, None);
    }

    #[test]
    fn decode_with_ring_from_other_process_instance() {
        // Restart stability: the decoding ring is a fresh load of the same
        // persisted source, not the instance that signed.
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("keyring.toml");
        let signing_ring = SecretKeyRing::generate();
        signing_ring.persist(&path).unwrap();

        let clock = test_clock();
        let codec = codec(3600);
        let id = SessionId::generate();
        let envelope = codec
            .encode(id, &EnvelopePayload::Inline(sample_record()), &signing_ring, &clock)
            .unwrap();

        let restarted_ring = SecretKeyRing::load(&path).unwrap();
        let decoded = codec.decode(&envelope, &restarted_ring, &clock).unwrap();
        assert_eq!(decoded.session_id, id);
    }

    #[test]
    fn freshly_randomized_ring_rejects_prior_envelope() {
        // The documented defect: a per-process random ring cannot verify
        // envelopes minted before the restart.
        let ring = SecretKeyRing::generate();
        let clock = test_clock();
        let codec = codec(3600);

        let envelope = codec
            .encode(
                SessionId::generate(),
                &EnvelopePayload::Inline(sample_record()),
                &ring,
                &clock,
            )
            .unwrap();

        let random_ring = SecretKeyRing::generate();
        assert!(matches!(
            codec.decode(&envelope, &random_ring, &clock),
            Err(DecodeError::BadSignature)
        ));
    }

    #[test]
    fn rotation_keeps_prior_envelopes_valid_until_secret_dropped() {
        let mut ring = SecretKeyRing::generate();
        let clock = test_clock();
        let codec = codec(3600);

        let envelope = codec
            .encode(
                SessionId::generate(),
                &EnvelopePayload::Inline(sample_record()),
                &ring,
                &clock,
            )
            .unwrap();

        ring.rotate(crate::keyring::Secret::generate());
        assert!(codec.decode(&envelope, &ring, &clock).is_ok());

        ring.drop_retired();
        assert!(matches!(
            codec.decode(&envelope, &ring, &clock),
            Err(DecodeError::BadSignature)
        ));
    }

    #[test]
    fn expired_envelope_reports_expired() {
        let ring = SecretKeyRing::generate();
        let clock = test_clock();
        let codec = codec(60);

        let envelope = codec
            .encode(
                SessionId::generate(),
                &EnvelopePayload::Inline(sample_record()),
                &ring,
                &clock,
            )
            .unwrap();

        clock.advance_secs(61);
        assert!(matches!(
            codec.decode(&envelope, &ring, &clock),
            Err(DecodeError::Expired { .. })
        ));
    }

    #[test]
    fn envelope_valid_just_before_deadline() {
        let ring = SecretKeyRing::generate();
        let clock = test_clock();
        let codec = codec(60);

        let envelope = codec
            .encode(
                SessionId::generate(),
                &EnvelopePayload::Inline(sample_record()),
                &ring,
                &clock,
            )
            .unwrap();

        clock.advance_secs(59);
        assert!(codec.decode(&envelope, &ring, &clock).is_ok());
    }

    #[test]
    fn tampered_payload_is_bad_signature() {
        let ring = SecretKeyRing::generate();
        let clock = test_clock();
        let codec = codec(3600);

        let envelope = codec
            .encode(
                SessionId::generate(),
                &EnvelopePayload::Inline(sample_record()),
                &ring,
                &clock,
            )
            .unwrap();

        // Flip a byte inside the payload segment.
        let mut parts: Vec<String> = envelope.split('.').map(str::to_string).collect();
        let mut body = parts[1].clone().into_bytes();
        body[0] = if body[0] == b'A' { b'B' } else { b'A' };
        parts[1] = String::from_utf8(body).unwrap();
        let tampered = parts.join(".");

        assert!(matches!(
            codec.decode(&tampered, &ring, &clock),
            Err(DecodeError::BadSignature)
        ));
    }

    #[test]
    fn structural_garbage_is_malformed() {
        let ring = SecretKeyRing::generate();
        let clock = test_clock();
        let codec = codec(3600);

        for garbage in ["", "v1", "v1.onlytwo", "v2.a.b", "not an envelope at all"] {
            assert!(
                matches!(
                    codec.decode(garbage, &ring, &clock),
                    Err(DecodeError::MalformedEnvelope(_))
                ),
                "expected malformed for {garbage:?}"
            );
        }
    }

    #[test]
    fn oversized_envelope_is_malformed() {
        let ring = SecretKeyRing::generate();
        let clock = test_clock();
        let codec = codec(3600);
        let oversized = format!("v1.{}.{}", "A".repeat(MAX_ENVELOPE_LEN), "B".repeat(64));
        assert!(matches!(
            codec.decode(&oversized, &ring, &clock),
            Err(DecodeError::MalformedEnvelope(_))
        ));
    }

    #[test]
    fn failure_kinds_classify() {
        assert_eq!(
            DecodeError::BadSignature.kind(),
            DecodeFailureKind::BadSignature
        );
        assert_eq!(
            DecodeError::MalformedEnvelope(String::new()).kind(),
            DecodeFailureKind::Malformed
        );
        assert_eq!(
            DecodeError::Expired {
                expired_at: chrono::Utc::now()
            }
            .kind(),
            DecodeFailureKind::Expired
        );
    }

    mod properties {
        use proptest::prelude::*;

        use super::*;

        fn record_strategy() -> impl Strategy<Value = SessionRecord> {
            proptest::collection::btree_map(
                "[a-z_]{1,12}",
                prop_oneof![
                    "[ -~]{0,32}".prop_map(|s| json!(s)),
                    any::<i64>().prop_map(|n| json!(n)),
                    any::<bool>().prop_map(|b| json!(b)),
                ],
                0..6,
            )
            .prop_map(|m| m.into_iter().collect())
        }

        proptest! {
            #[test]
            fn roundtrip_preserves_record(record in record_strategy()) {
                let ring = SecretKeyRing::generate();
                let clock = test_clock();
                let codec = codec(3600);
                let id = SessionId::generate();

                let envelope = codec
                    .encode(id, &EnvelopePayload::Inline(record.clone()), &ring, &clock)
                    .unwrap();
                let decoded = codec.decode(&envelope, &ring, &clock).unwrap();
                prop_assert_eq!(decoded.session_id, id);
                prop_assert_eq!(decoded.record, Some(record));
            }
        }
    }
}
