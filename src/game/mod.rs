//! Round Lifecycle
//!
//! The domain model for the shared round and its bets, plus the
//! authoritative clock that drives every state transition.
//!
//! ## Module Structure
//!
//! - `round`: Round, the Pending/Active/Crashed state machine
//! - `bet`: Bet, account kinds, terminal settlement fields
//! - `events`: broadcast events observers synchronize on
//! - `clock`: the tokio driver that owns all transitions

pub mod bet;
pub mod clock;
pub mod events;
pub mod round;

// Re-export key types
pub use bet::{AccountKind, Bet, BetId, BetStatus, UserId};
pub use clock::RoundClock;
pub use events::RoundEvent;
pub use round::{Round, RoundError, RoundId, RoundRecord, RoundState};
