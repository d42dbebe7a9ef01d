//! Core deterministic primitives.
//!
//! Everything in this module is pure integer math and hashing: no I/O, no
//! wall clock, no randomness. The fairness verifier and every observer of
//! the multiplier curve depend on these staying bit-for-bit reproducible.

pub mod curve;
pub mod hash;
pub mod units;

// Re-export core types
pub use curve::GrowthCurve;
pub use hash::{sha256, Digest32, DomainHasher};
pub use units::{Amount, Bps, Profit, BPS_ONE};
