//! Provably-Fair Protocol
//!
//! Commit–derive–reveal for the per-round crash point:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    FAIRNESS ENGINE                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  seed.rs    - server seed generation + SHA-256 commitment   │
//! │  crash.rs   - crash-point derivation F(seed, client, seq)   │
//! │  verify.rs  - pure offline verifier over revealed values    │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! The commitment is published before any bet is accepted; the seed is
//! revealed only once the round has crashed; the verifier needs nothing but
//! the revealed strings and the public sequence number.

pub mod crash;
pub mod seed;
pub mod verify;

// Re-export key types
pub use crash::{derive_crash_bps, MAX_CRASH_BPS};
pub use seed::{SeedError, SeedHash, ServerSeed};
pub use verify::{is_valid, verify_round, RoundProof, VerifyError};
