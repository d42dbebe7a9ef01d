//! SHA-256 Helpers
//!
//! Two flavors of hashing live here:
//! - plain SHA-256 for the public seed commitment, so any third party can
//!   check `H(server_seed)` with stock tooling
//! - domain-separated SHA-256 for internal derivations, so a digest computed
//!   for one purpose can never be replayed for another

use sha2::{Digest, Sha256};

/// 256-bit digest.
pub type Digest32 = [u8; 32];

/// Plain SHA-256 of raw bytes.
pub fn sha256(data: &[u8]) -> Digest32 {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Incremental SHA-256 with a leading domain separator.
///
/// Update order is part of the public contract; callers must feed fields in
/// a fixed, documented order.
pub struct DomainHasher {
    hasher: Sha256,
}

impl DomainHasher {
    /// Start a digest under the given domain.
    pub fn new(domain: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(domain);
        Self { hasher }
    }

    /// Feed raw bytes.
    #[inline]
    pub fn update_bytes(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    /// Feed a u64 (little-endian).
    #[inline]
    pub fn update_u64(&mut self, value: u64) {
        self.hasher.update(value.to_le_bytes());
    }

    /// Finish and return the digest.
    pub fn finalize(self) -> Digest32 {
        self.hasher.finalize().into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_known_value() {
        // SHA-256 of the empty string, the canonical test vector.
        assert_eq!(
            hex::encode(sha256(b"")),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_domain_separation() {
        let mut a = DomainHasher::new(b"DOMAIN_A");
        a.update_bytes(b"payload");
        let mut b = DomainHasher::new(b"DOMAIN_B");
        b.update_bytes(b"payload");
        assert_ne!(a.finalize(), b.finalize());
    }

    #[test]
    fn test_domain_hasher_deterministic() {
        let digest = |seq: u64| {
            let mut h = DomainHasher::new(b"TEST_V1");
            h.update_bytes(b"seed");
            h.update_u64(seq);
            h.finalize()
        };
        assert_eq!(digest(7), digest(7));
        assert_ne!(digest(7), digest(8));
    }

}
