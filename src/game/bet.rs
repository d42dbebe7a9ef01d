//! Bet and Account Types
//!
//! A bet is created Active with its stake already debited, and leaves
//! Active exactly once: CashedOut (credit stake + profit) or Lost (no
//! credit, the stake is gone). The terminal transition is the linearization
//! point settlement serializes on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::units::{cashout_profit, gross_payout, Amount, Bps, Profit};
use crate::game::round::RoundId;

/// Unique bet identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BetId(pub Uuid);

impl BetId {
    /// Mint a fresh id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for BetId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for BetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Player identifier, derived from the auth subject.
///
/// Implements Ord for deterministic BTreeMap ordering.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct UserId(pub [u8; 16]);

impl UserId {
    /// Create from raw bytes.
    pub const fn new(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Hex form used on the wire and in logs.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

/// Which balance a bet plays against.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountKind {
    /// Play-money balance, seeded at first login.
    Demo,
    /// Real balance, funded externally.
    Real,
}

/// Settlement status of a bet.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BetStatus {
    /// Stake debited, outcome open.
    Active,
    /// Player cashed out before the crash.
    CashedOut,
    /// Round crashed with the bet still open.
    Lost,
}

/// A single bet on a round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bet {
    /// Bet identifier.
    pub id: BetId,
    /// Owning round.
    pub round_id: RoundId,
    /// Owning player.
    pub user_id: UserId,
    /// Balance the stake was debited from.
    pub account: AccountKind,
    /// Stake in minor units, debited at placement.
    pub stake: Amount,
    /// Settlement status.
    pub status: BetStatus,
    /// Multiplier at cash-out; set iff CashedOut.
    pub cashout_multiplier_bps: Option<Bps>,
    /// Signed result: `stake * (m - 1)` if CashedOut, `-stake` if Lost.
    pub profit: Option<Profit>,
    /// When the bet was placed.
    pub placed_at: DateTime<Utc>,
    /// When the bet left Active.
    pub settled_at: Option<DateTime<Utc>>,
}

impl Bet {
    /// Create an Active bet. The caller has already debited the stake.
    pub fn place(
        round_id: RoundId,
        user_id: UserId,
        account: AccountKind,
        stake: Amount,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: BetId::new(),
            round_id,
            user_id,
            account,
            stake,
            status: BetStatus::Active,
            cashout_multiplier_bps: None,
            profit: None,
            placed_at: now,
            settled_at: None,
        }
    }

    /// Apply the CashedOut outcome. Caller guarantees the bet was Active.
    pub(crate) fn settle_cashout(&mut self, multiplier: Bps, now: DateTime<Utc>) {
        self.status = BetStatus::CashedOut;
        self.cashout_multiplier_bps = Some(multiplier);
        self.profit = Some(cashout_profit(self.stake, multiplier) as Profit);
        self.settled_at = Some(now);
    }

    /// Apply the Lost outcome. Caller guarantees the bet was Active.
    pub(crate) fn settle_lost(&mut self, now: DateTime<Utc>) {
        self.status = BetStatus::Lost;
        self.profit = Some(-(self.stake as Profit));
        self.settled_at = Some(now);
    }

    /// Total credit owed for a cash-out at `multiplier`: stake + profit.
    pub fn payout_at(&self, multiplier: Bps) -> Amount {
        gross_payout(self.stake, multiplier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::units::BPS_ONE;

    fn sample_bet() -> Bet {
        Bet::place(
            RoundId::new(),
            UserId::new([1; 16]),
            AccountKind::Demo,
            4_000,
            Utc::now(),
        )
    }

    #[test]
    fn test_placed_bet_is_active() {
        let bet = sample_bet();
        assert_eq!(bet.status, BetStatus::Active);
        assert!(bet.cashout_multiplier_bps.is_none());
        assert!(bet.profit.is_none());
        assert!(bet.settled_at.is_none());
    }

    #[test]
    fn test_cashout_fields() {
        let mut bet = sample_bet();
        bet.settle_cashout(20_000, Utc::now());
        assert_eq!(bet.status, BetStatus::CashedOut);
        assert_eq!(bet.cashout_multiplier_bps, Some(20_000));
        assert_eq!(bet.profit, Some(4_000));
        assert!(bet.settled_at.is_some());
    }

    #[test]
    fn test_cashout_at_one_keeps_stake_only() {
        let mut bet = sample_bet();
        bet.settle_cashout(BPS_ONE, Utc::now());
        assert_eq!(bet.profit, Some(0));
        assert_eq!(bet.payout_at(BPS_ONE), 4_000);
    }

    #[test]
    fn test_lost_fields() {
        let mut bet = sample_bet();
        bet.settle_lost(Utc::now());
        assert_eq!(bet.status, BetStatus::Lost);
        assert_eq!(bet.profit, Some(-4_000));
        assert!(bet.cashout_multiplier_bps.is_none());
    }

    #[test]
    fn test_payout_at() {
        let bet = sample_bet();
        assert_eq!(bet.payout_at(20_000), 8_000);
        assert_eq!(bet.payout_at(15_000), 6_000);
    }

    #[test]
    fn test_user_id_hex() {
        let id = UserId::new([0xAB; 16]);
        assert_eq!(id.to_hex(), "ab".repeat(16));
    }
}
