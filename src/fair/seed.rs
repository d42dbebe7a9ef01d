//! Server Seed and Hash Commitment
//!
//! Each round gets a fresh 32-byte secret from the OS CSPRNG. Its SHA-256
//! is published before any bet is accepted; the seed itself stays secret
//! until the round has crashed. Publishing the hash first proves the seed
//! existed before betting without revealing it.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;

use crate::core::hash::Digest32;

/// Errors decoding a seed or commitment from its hex form.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SeedError {
    /// Not valid hex.
    #[error("invalid hex: {0}")]
    InvalidHex(String),
    /// Wrong decoded length.
    #[error("expected 32 bytes, got {0}")]
    WrongLength(usize),
}

/// Per-round secret. 32 bytes of OS entropy.
///
/// `Debug` is redacted so the secret can never leak through logs before the
/// reveal.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerSeed([u8; 32]);

impl ServerSeed {
    /// Generate a fresh seed from the OS CSPRNG.
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut bytes = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Construct from raw bytes (tests, verifier input).
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Parse from the revealed hex form.
    pub fn from_hex(s: &str) -> Result<Self, SeedError> {
        let bytes = hex::decode(s).map_err(|e| SeedError::InvalidHex(e.to_string()))?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|v: Vec<u8>| SeedError::WrongLength(v.len()))?;
        Ok(Self(arr))
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Hex form used in the public history record.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// The public commitment: plain SHA-256 of the seed bytes.
    ///
    /// Deliberately undomained so anyone can recompute it with a stock
    /// SHA-256 tool from the revealed hex.
    pub fn commitment(&self) -> SeedHash {
        let mut hasher = Sha256::new();
        hasher.update(self.0);
        SeedHash(hasher.finalize().into())
    }
}

impl fmt::Debug for ServerSeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ServerSeed(<redacted>)")
    }
}

/// Published commitment to a [`ServerSeed`].
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedHash(Digest32);

impl SeedHash {
    /// Construct from raw digest bytes.
    pub const fn from_bytes(bytes: Digest32) -> Self {
        Self(bytes)
    }

    /// Parse from hex.
    pub fn from_hex(s: &str) -> Result<Self, SeedError> {
        let bytes = hex::decode(s).map_err(|e| SeedError::InvalidHex(e.to_string()))?;
        let arr: Digest32 = bytes
            .try_into()
            .map_err(|v: Vec<u8>| SeedError::WrongLength(v.len()))?;
        Ok(Self(arr))
    }

    /// Raw digest bytes.
    pub fn as_bytes(&self) -> &Digest32 {
        &self.0
    }

    /// Hex form used on the wire.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for SeedHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SeedHash({})", hex::encode(self.0))
    }
}
