//! Content fingerprints used as deduplication keys.

use std::fmt;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::Result;

/// First [`Fingerprint::LEN`] bytes of the SHA-256 of a canonical payload
///
/// Only the payload is hashed. Envelope fields such as request ids and
/// metadata differ on every hop of the same logical write and must not
/// change its identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; Fingerprint::LEN]);

impl Fingerprint {
    pub const LEN: usize = 8;

    /// Fingerprint raw canonical bytes
    pub fn from_bytes(data: &[u8]) -> Self {
        let digest = Sha256::digest(data);
        let mut bytes = [0u8; Self::LEN];
        bytes.copy_from_slice(&digest[..Self::LEN]);
        Self(bytes)
    }

    /// Fingerprint a payload through its canonical bincode encoding
    pub fn of<T: Serialize>(payload: &T) -> Result<Self> {
        let canonical = bincode::serialize(payload)?;
        Ok(Self::from_bytes(&canonical))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Serialize;

    #[derive(Serialize)]
    struct Write {
        key: String,
        value: String,
    }

    #[test]
    fn test_same_payload_same_fingerprint() {
        let a = Fingerprint::of(&Write { key: "mykey".into(), value: "myvalue".into() }).unwrap();
        let b = Fingerprint::of(&Write { key: "mykey".into(), value: "myvalue".into() }).unwrap();
        let c = Fingerprint::of(&Write { key: "mykey".into(), value: "other".into() }).unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_display_is_hex() {
        let fp = Fingerprint::from_bytes(b"abc");
        let rendered = fp.to_string();
        assert_eq!(rendered.len(), Fingerprint::LEN * 2);
        // sha256("abc") = ba7816bf8f01cfea...
        assert_eq!(rendered, "ba7816bf8f01cfea");
    }
}
