//! Round Events
//!
//! Everything observers need to mirror the authoritative clock. The round
//! clock and settlement publish these on a broadcast channel; the network
//! layer fans them out to every connected client.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::curve::GrowthCurve;
use crate::core::units::{Amount, Bps, Profit};
use crate::game::bet::{AccountKind, BetId, UserId};
use crate::game::round::{RoundId, RoundRecord};

/// A state change in the shared round, broadcast to all observers.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RoundEvent {
    /// A new round is open for betting. Carries the commitment and the
    /// curve parameters so clients can reproduce the multiplier locally.
    RoundOpened {
        /// Round identifier.
        round_id: RoundId,
        /// Sequence number (derivation nonce).
        sequence: u64,
        /// Seed commitment, hex.
        server_seed_hash: String,
        /// Client seed in effect for this round.
        client_seed: String,
        /// When betting closes.
        betting_closes_at: DateTime<Utc>,
        /// Public growth curve parameters.
        curve: GrowthCurve,
    },

    /// Betting closed; the multiplier is rising from `started_at`.
    RoundStarted {
        /// Round identifier.
        round_id: RoundId,
        /// Authoritative start instant all observers derive the curve from.
        started_at: DateTime<Utc>,
    },

    /// Periodic multiplier sample while the round is Active. Advisory for
    /// display; settlement always recomputes from `started_at`.
    MultiplierTick {
        /// Round identifier.
        round_id: RoundId,
        /// Server-computed multiplier.
        multiplier_bps: Bps,
        /// Elapsed active time in milliseconds.
        elapsed_ms: u64,
    },

    /// The round crashed. The seed is revealed here; the full record is
    /// sufficient to run the verifier.
    RoundCrashed {
        /// Round identifier.
        round_id: RoundId,
        /// Final multiplier.
        crash_bps: Bps,
        /// Revealed seed, hex.
        server_seed: String,
        /// Crash instant.
        ended_at: DateTime<Utc>,
    },

    /// All still-open bets on a crashed round were settled as lost.
    RoundSettled {
        /// Round identifier.
        round_id: RoundId,
        /// Number of bets that went to Lost.
        lost_bets: usize,
    },

    /// A bet was accepted (public feed).
    BetPlaced {
        /// Round the bet is on.
        round_id: RoundId,
        /// Bet identifier.
        bet_id: BetId,
        /// Betting player.
        user_id: UserId,
        /// Account the stake came from.
        account: AccountKind,
        /// Stake in minor units.
        stake: Amount,
    },

    /// A bet cashed out (public feed).
    BetCashedOut {
        /// Round the bet was on.
        round_id: RoundId,
        /// Bet identifier.
        bet_id: BetId,
        /// Betting player.
        user_id: UserId,
        /// Multiplier the cash-out settled at.
        multiplier_bps: Bps,
        /// Profit in minor units.
        profit: Profit,
    },

    /// A crashed round's public record (history push for late joiners).
    RoundRecorded {
        /// The verifier-ready record.
        record: RoundRecord,
    },
}

impl RoundEvent {
    /// The round this event concerns.
    pub fn round_id(&self) -> RoundId {
        match self {
            Self::RoundOpened { round_id, .. }
            | Self::RoundStarted { round_id, .. }
            | Self::MultiplierTick { round_id, .. }
            | Self::RoundCrashed { round_id, .. }
            | Self::RoundSettled { round_id, .. }
            | Self::BetPlaced { round_id, .. }
            | Self::BetCashedOut { round_id, .. } => *round_id,
            Self::RoundRecorded { record } => record.id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_json_round_trip() {
        let event = RoundEvent::MultiplierTick {
            round_id: RoundId::new(),
            multiplier_bps: 23_400,
            elapsed_ms: 14_200,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("multiplier_tick"));
        let parsed: RoundEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.round_id(), event.round_id());
    }

    #[test]
    fn test_round_id_accessor() {
        let id = RoundId::new();
        let event = RoundEvent::RoundSettled {
            round_id: id,
            lost_bets: 3,
        };
        assert_eq!(event.round_id(), id);
    }
}
