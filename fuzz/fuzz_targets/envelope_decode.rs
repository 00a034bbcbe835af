//! Fuzz harness for `CookieCodec::decode`.
//!
//! Feeds arbitrary byte sequences as candidate envelopes. Whatever the
//! input, decoding must return a structured error rather than panic:
//! invalid UTF-8 never reaches the codec, and malformed segments, bogus
//! base64, oversized bodies, and truncated tags all map to the decode
//! error taxonomy.

#![no_main]

use std::sync::OnceLock;

use libfuzzer_sys::fuzz_target;
use sesh_core::keyring::SecretKeyRing;
use sesh_core::time::SystemClock;
use sesh_core::{CookieAttributes, CookieCodec};

fn codec() -> &'static (CookieCodec, SecretKeyRing) {
    static STATE: OnceLock<(CookieCodec, SecretKeyRing)> = OnceLock::new();
    STATE.get_or_init(|| {
        (
            CookieCodec::new(&CookieAttributes::default()),
            SecretKeyRing::generate(),
        )
    })
}

fuzz_target!(|data: &[u8]| {
    let Ok(envelope) = std::str::from_utf8(data) else {
        return;
    };
    let (codec, ring) = codec();
    let _ = codec.decode(envelope, ring, &SystemClock);
});
