//! # Crashpoint Round Engine
//!
//! Authoritative server core for a provably-fair crash game: one shared
//! multiplier rises from 1.00x until a pre-committed crash point; players
//! who cash out first win `stake x multiplier`, everyone else loses the
//! stake.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    CRASHPOINT SERVER                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Deterministic primitives                 │
//! │  ├── units.rs    - Minor-unit money, basis-point multipliers│
//! │  ├── hash.rs     - SHA-256 helpers (commitment, derivation) │
//! │  └── curve.rs    - Public multiplier growth curve           │
//! │                                                             │
//! │  fair/           - Provably-fair protocol (pure)            │
//! │  ├── seed.rs     - Server seed + hash commitment            │
//! │  ├── crash.rs    - Crash-point derivation                   │
//! │  └── verify.rs   - Offline third-party verifier             │
//! │                                                             │
//! │  game/           - Round lifecycle                          │
//! │  ├── round.rs    - Pending/Active/Crashed state machine     │
//! │  ├── bet.rs      - Bets and terminal settlement fields      │
//! │  ├── events.rs   - Broadcast events for observers           │
//! │  └── clock.rs    - The one authoritative timer task         │
//! │                                                             │
//! │  ledger/         - Balances + settlement                    │
//! │  store/          - Repository with conditional updates      │
//! │  network/        - WebSocket server + wire protocol         │
//! │  engine.rs       - The single owner of the shared round     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Correctness Guarantees
//!
//! - The crash point is derived exactly once, at round creation, from a
//!   seed whose hash is published before any bet is accepted; the pure
//!   verifier in `fair/` certifies any revealed round offline.
//! - Settlement math is integer-only; every multiplier a client reports is
//!   clamped to the server's own curve evaluation before money moves.
//! - Each bet leaves Active exactly once: cash-out and crash settlement
//!   race through a conditional status transition, and the loser gets a
//!   Conflict instead of a second payout.
//! - Balances are unsigned and mutated only through single conditional
//!   operations; a failed check moves nothing.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod core;
pub mod engine;
pub mod fair;
pub mod game;
pub mod ledger;
pub mod network;
pub mod store;

// Re-export commonly used types
pub use crate::core::units::{Amount, Bps, Profit, BPS_ONE};
pub use config::{EngineConfig, ServerConfig};
pub use engine::{Engine, EngineError};
pub use fair::{verify_round, RoundProof, ServerSeed};
pub use game::{
    AccountKind, Bet, BetId, BetStatus, Round, RoundClock, RoundEvent, RoundId, RoundState, UserId,
};
pub use ledger::{Ledger, Settlement, SettlementError};
pub use store::MemoryStore;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
