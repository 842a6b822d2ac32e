use std::fmt;

use rand::RngCore;
use sha2::{Digest, Sha256};

/// Single-use nonce for Apple sign-in.
///
/// The SHA-256 hex digest goes to the native dialog; the raw value goes to the
/// gateway with the identity token. Not `Clone`: [`into_raw`](Self::into_raw)
/// consumes it, so one nonce backs exactly one attempt.
pub struct AppleNonce {
    raw: String,
    hashed: String,
}

impl AppleNonce {
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        let raw = hex::encode(bytes);
        let hashed = hex::encode(Sha256::digest(raw.as_bytes()));
        Self { raw, hashed }
    }

    pub fn hashed(&self) -> &str {
        &self.hashed
    }

    pub fn into_raw(self) -> String {
        self.raw
    }
}

impl fmt::Debug for AppleNonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AppleNonce(<redacted>)")
    }
}
