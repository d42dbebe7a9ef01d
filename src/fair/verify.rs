//! Third-Party Round Verifier
//!
//! A revealed round is certified fair when two independent checks pass:
//! the revealed seed hashes to the pre-published commitment, and the
//! derivation recomputed from the revealed values equals the crash point
//! the round actually used.
//!
//! This module is pure: no clocks, no storage, no live round state. Anyone
//! holding the public history record can run it offline, which is the whole
//! point of the commitment scheme.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::units::Bps;
use crate::fair::crash::derive_crash_bps;
use crate::fair::seed::{SeedError, SeedHash, ServerSeed};

/// The public record of a crashed round, exactly as exposed in history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundProof {
    /// Revealed server seed, hex.
    pub server_seed: String,
    /// Commitment published before betting, hex.
    pub server_seed_hash: String,
    /// Client seed mixed into the derivation.
    pub client_seed: String,
    /// Round sequence number (the derivation nonce).
    pub sequence: u64,
    /// The crash point the round claims to have used.
    pub crash_bps: Bps,
}

/// Why verification failed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum VerifyError {
    /// A hex field could not be decoded.
    #[error("malformed proof field: {0}")]
    Malformed(#[from] SeedError),

    /// The revealed seed does not hash to the published commitment.
    #[error("commitment mismatch: H(seed) = {computed}, published {published}")]
    CommitmentMismatch {
        /// Hash of the revealed seed.
        computed: String,
        /// Commitment published at round creation.
        published: String,
    },

    /// The derivation does not reproduce the claimed crash point.
    #[error("crash point mismatch: derived {derived} bps, claimed {claimed} bps")]
    CrashPointMismatch {
        /// Crash point recomputed from the revealed values.
        derived: Bps,
        /// Crash point in the proof.
        claimed: Bps,
    },
}

/// Verify a revealed round.
///
/// Returns `Ok(())` iff the seed matches its commitment AND the derivation
/// reproduces the claimed crash point.
pub fn verify_round(proof: &RoundProof) -> Result<(), VerifyError> {
    let seed = ServerSeed::from_hex(&proof.server_seed)?;
    let published = SeedHash::from_hex(&proof.server_seed_hash)?;

    let computed = seed.commitment();
    if computed != published {
        return Err(VerifyError::CommitmentMismatch {
            computed: computed.to_hex(),
            published: published.to_hex(),
        });
    }

    let derived = derive_crash_bps(&seed, &proof.client_seed, proof.sequence);
    if derived != proof.crash_bps {
        return Err(VerifyError::CrashPointMismatch {
            derived,
            claimed: proof.crash_bps,
        });
    }

    Ok(())
}

/// Convenience wrapper returning a bare boolean.
pub fn is_valid(proof: &RoundProof) -> bool {
    verify_round(proof).is_ok()
}
