//! SHA-256 digests used for job hashing and cache addressing.

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use std::fmt;

/// A 256-bit content digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Digest(pub [u8; 32]);

impl Digest {
    pub fn of_bytes(bytes: &[u8]) -> Self {
        let mut h = Sha256::new();
        h.update(bytes);
        Digest(h.finalize().into())
    }

    pub fn to_hex(&self) -> String {
        let mut s = String::with_capacity(64);
        for b in self.0 {
            s.push_str(&format!("{:02x}", b));
        }
        s
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({}..)", &self.to_hex()[..12])
    }
}

/// Incremental digest builder with length-prefixed field framing, so that
/// adjacent fields can never alias each other's byte runs.
pub struct DigestBuilder {
    inner: Sha256,
}

impl DigestBuilder {
    pub fn new(domain: &str) -> Self {
        let mut inner = Sha256::new();
        inner.update((domain.len() as u64).to_le_bytes());
        inner.update(domain.as_bytes());
        Self { inner }
    }

    pub fn field(mut self, bytes: &[u8]) -> Self {
        self.inner.update((bytes.len() as u64).to_le_bytes());
        self.inner.update(bytes);
        self
    }

    pub fn str_field(self, s: &str) -> Self {
        self.field(s.as_bytes())
    }

    /// Floats hash by IEEE-754 bit pattern; identical values, identical bits.
    pub fn f64_field(self, v: f64) -> Self {
        self.field(&v.to_bits().to_le_bytes())
    }

    pub fn digest_field(self, d: &Digest) -> Self {
        self.field(&d.0)
    }

    pub fn finish(self) -> Digest {
        Digest(self.inner.finalize().into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn framing_prevents_field_aliasing() {
        let a = DigestBuilder::new("t").str_field("ab").str_field("c").finish();
        let b = DigestBuilder::new("t").str_field("a").str_field("bc").finish();
        assert_ne!(a, b);
    }

    #[test]
    fn domain_separates() {
        let a = DigestBuilder::new("stage_a").str_field("x").finish();
        let b = DigestBuilder::new("stage_b").str_field("x").finish();
        assert_ne!(a, b);
    }

    #[test]
    fn hex_roundtrip_shape() {
        let d = Digest::of_bytes(b"hello");
        assert_eq!(d.to_hex().len(), 64);
        assert_eq!(d, Digest::of_bytes(b"hello"));
    }
}
