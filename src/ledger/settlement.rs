//! Bet Settlement
//!
//! The three money-moving operations: place a bet (conditional debit +
//! insert), cash out (CAS to CashedOut + credit), and settle a crash
//! (batch CAS to Lost, no credit - the stake left at placement).
//!
//! Per bet there is exactly one terminal transition. Cash-out and
//! crash-settlement race for it through the store's conditional updates;
//! whichever lands first wins, and the loser surfaces a Conflict instead of
//! double-settling. Money-moving operations are never retried here; a
//! caller retry against an already-settled bet is rejected, not re-paid.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::core::units::{Amount, Bps, DisplayAmount, DisplayBps, BPS_ONE};
use crate::game::bet::{AccountKind, Bet, BetId, BetStatus, UserId};
use crate::game::round::{RoundId, RoundState};
use crate::ledger::balance::{Ledger, LedgerError};
use crate::store::{MemoryStore, StoreError};

/// Which class of failure a [`SettlementError`] is, so callers can tell
/// "your request was malformed" from "the world changed under you" from
/// "you lost a race".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad input; nothing was checked against live state.
    Validation,
    /// Well-formed, but a live-state precondition failed.
    Precondition,
    /// Lost a race against another settlement path.
    Conflict,
    /// The referenced round or bet does not exist.
    NotFound,
}

/// Settlement failures. Every variant leaves balances and bets untouched.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SettlementError {
    /// Stake below the configured minimum.
    #[error("stake {0} is below the minimum")]
    StakeBelowMinimum(Amount),

    /// Stake above the configured maximum.
    #[error("stake {0} is above the maximum")]
    StakeAboveMaximum(Amount),

    /// A multiplier below 1.00x can never be a valid cash-out.
    #[error("claimed multiplier {0} bps is below 1.00x")]
    MultiplierBelowOne(Bps),

    /// Unknown round.
    #[error("round not found")]
    RoundNotFound,

    /// Unknown bet.
    #[error("bet not found")]
    BetNotFound,

    /// The round no longer accepts bets.
    #[error("betting is closed for this round")]
    BettingClosed,

    /// One active bet per (round, user, account).
    #[error("user already has an active bet on this round")]
    DuplicateBet,

    /// The conditional debit found less than the stake.
    #[error("insufficient balance: have {have}, need {need}")]
    InsufficientBalance {
        /// Balance at the check.
        have: Amount,
        /// Requested stake.
        need: Amount,
    },

    /// Cash-out on a round that has not started rising yet.
    #[error("round is not active")]
    RoundNotActive,

    /// Cash-out arrived after the round crashed: too late, not a balance
    /// problem.
    #[error("round already crashed")]
    RoundCrashed,

    /// The bet already left Active; carries what it settled as.
    #[error("bet already settled ({0:?})")]
    AlreadySettled(BetStatus),

    /// settle_crash ran twice; the second invocation is refused.
    #[error("round already settled")]
    RoundAlreadySettled,

    /// Crash settlement requested while the round has not crashed.
    #[error("round has not crashed")]
    RoundNotCrashed,
}

impl SettlementError {
    /// Classify for the wire-level error taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::StakeBelowMinimum(_)
            | Self::StakeAboveMaximum(_)
            | Self::MultiplierBelowOne(_) => ErrorKind::Validation,
            Self::RoundNotFound | Self::BetNotFound => ErrorKind::NotFound,
            Self::BettingClosed
            | Self::DuplicateBet
            | Self::InsufficientBalance { .. }
            | Self::RoundNotActive
            | Self::RoundNotCrashed => ErrorKind::Precondition,
            Self::RoundCrashed | Self::AlreadySettled(_) | Self::RoundAlreadySettled => {
                ErrorKind::Conflict
            }
        }
    }
}

impl From<LedgerError> for SettlementError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InsufficientBalance { have, need } => {
                Self::InsufficientBalance { have, need }
            }
        }
    }
}

/// Successful bet placement.
#[derive(Debug, Clone)]
pub struct BetReceipt {
    /// The active bet.
    pub bet: Bet,
    /// Balance after the stake debit.
    pub new_balance: Amount,
}

/// Successful cash-out.
#[derive(Debug, Clone)]
pub struct CashoutReceipt {
    /// The settled bet.
    pub bet: Bet,
    /// Profit portion (stake excluded), in minor units.
    pub profit: Amount,
    /// Stake + profit, the amount credited.
    pub total_payout: Amount,
    /// Multiplier the settlement used after clamping.
    pub cashout_multiplier_bps: Bps,
    /// Balance after the credit.
    pub new_balance: Amount,
}

/// Settlement engine over the store and ledger.
pub struct Settlement {
    store: Arc<MemoryStore>,
    ledger: Arc<Ledger>,
    config: EngineConfig,
}

impl Settlement {
    /// Build over shared store and ledger.
    pub fn new(store: Arc<MemoryStore>, ledger: Arc<Ledger>, config: EngineConfig) -> Self {
        Self {
            store,
            ledger,
            config,
        }
    }

    /// Place a bet: conditional stake debit + bet insert.
    ///
    /// The debit happens first; if the guarded insert then refuses (round
    /// advanced, duplicate bet), the debit is compensated before returning,
    /// so no failure path leaves money missing.
    pub fn place_bet(
        &self,
        user: UserId,
        round_id: RoundId,
        stake: Amount,
        account: AccountKind,
        now: DateTime<Utc>,
    ) -> Result<BetReceipt, SettlementError> {
        if stake < self.config.min_stake {
            return Err(SettlementError::StakeBelowMinimum(stake));
        }
        if stake > self.config.max_stake {
            return Err(SettlementError::StakeAboveMaximum(stake));
        }

        // Cheap pre-check so an obviously closed round fails before any
        // balance movement. The authoritative check is inside the insert.
        let round = self
            .store
            .round(round_id)
            .ok_or(SettlementError::RoundNotFound)?;
        if !round.accepts_bets(self.config.allow_late_bets) {
            return Err(SettlementError::BettingClosed);
        }

        let new_balance = self.ledger.try_debit(user, account, stake)?;

        let bet = Bet::place(round_id, user, account, stake, now);
        if let Err(err) = self
            .store
            .insert_bet_checked(bet.clone(), self.config.allow_late_bets)
        {
            // Compensate the debit; the bet was never created.
            self.ledger.credit(user, account, stake);
            debug!(user = %user.to_hex(), %round_id, "bet insert refused: {err}");
            return Err(match err {
                StoreError::RoundNotFound => SettlementError::RoundNotFound,
                StoreError::DuplicateActiveBet => SettlementError::DuplicateBet,
                _ => SettlementError::BettingClosed,
            });
        }

        info!(
            bet_id = %bet.id,
            user = %user.to_hex(),
            stake = %DisplayAmount(stake),
            ?account,
            "bet placed"
        );
        Ok(BetReceipt { bet, new_balance })
    }

    /// Cash out an active bet.
    ///
    /// The payout multiplier is the claimed value clamped to the
    /// server-computed multiplier at `now`; client-reported values can only
    /// lower the payout, never raise it. The status CAS is the race
    /// decision point; the credit follows it unconditionally.
    pub fn cash_out(
        &self,
        bet_id: BetId,
        claimed_bps: Bps,
        now: DateTime<Utc>,
    ) -> Result<CashoutReceipt, SettlementError> {
        if claimed_bps < BPS_ONE {
            return Err(SettlementError::MultiplierBelowOne(claimed_bps));
        }

        let bet = self
            .store
            .bet(bet_id)
            .ok_or(SettlementError::BetNotFound)?;
        let round = self
            .store
            .round(bet.round_id)
            .ok_or(SettlementError::RoundNotFound)?;

        // The authoritative value. The curve is monotonic, so a value
        // computed here can only be <= the value at the CAS instant; the
        // clamp can never overpay.
        let server_bps = round.multiplier_at(&self.config.curve, now);
        let effective = claimed_bps.min(server_bps);

        let settled = self
            .store
            .transition_cashout(bet_id, effective, now)
            .map_err(|err| match err {
                StoreError::BetNotFound => SettlementError::BetNotFound,
                StoreError::RoundNotFound => SettlementError::RoundNotFound,
                StoreError::BetAlreadySettled(status) => SettlementError::AlreadySettled(status),
                StoreError::RoundNotActive(RoundState::Crashed) => SettlementError::RoundCrashed,
                StoreError::RoundNotActive(_) => SettlementError::RoundNotActive,
                _ => SettlementError::RoundNotActive,
            })?;

        let total_payout = settled.payout_at(effective);
        let profit = total_payout.saturating_sub(settled.stake);
        let new_balance = self
            .ledger
            .credit(settled.user_id, settled.account, total_payout);

        info!(
            %bet_id,
            multiplier = %DisplayBps(effective),
            payout = %DisplayAmount(total_payout),
            "bet cashed out"
        );
        Ok(CashoutReceipt {
            bet: settled,
            profit,
            total_payout,
            cashout_multiplier_bps: effective,
            new_balance,
        })
    }

    /// Settle every still-open bet on a crashed round as lost.
    ///
    /// No balance movement: the stake was already debited at placement.
    /// The store's settled-flag guard makes a second invocation an error
    /// rather than a second batch.
    pub fn settle_crash(
        &self,
        round_id: RoundId,
        now: DateTime<Utc>,
    ) -> Result<Vec<Bet>, SettlementError> {
        let lost = self
            .store
            .settle_round_crash(round_id, now)
            .map_err(|err| match err {
                StoreError::RoundNotFound => SettlementError::RoundNotFound,
                StoreError::RoundAlreadySettled => SettlementError::RoundAlreadySettled,
                _ => SettlementError::RoundNotCrashed,
            })?;

        info!(%round_id, lost_bets = lost.len(), "crash settled");
        Ok(lost)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use crate::fair::seed::ServerSeed;
    use crate::game::round::Round;

    struct Fixture {
        store: Arc<MemoryStore>,
        ledger: Arc<Ledger>,
        settlement: Settlement,
        user: UserId,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let ledger = Arc::new(Ledger::new());
        let config = EngineConfig::default();
        let settlement = Settlement::new(store.clone(), ledger.clone(), config);
        let user = UserId::new([1; 16]);
        ledger.credit(user, AccountKind::Demo, 10_000); // 100.00
        Fixture {
            store,
            ledger,
            settlement,
            user,
        }
    }

    fn pending_round(store: &MemoryStore) -> Round {
        let round = Round::open_with_seed(
            ServerSeed::from_bytes([3; 32]),
            1,
            "settlement-test".to_string(),
            Duration::seconds(10),
            Utc::now(),
        );
        store.insert_round(round.clone());
        round
    }

    fn activate(store: &MemoryStore, id: RoundId) {
        store
            .update_round(id, |r| r.activate(Utc::now()))
            .unwrap()
            .unwrap();
    }

    fn crash(store: &MemoryStore, id: RoundId) {
        store
            .update_round(id, |r| r.crash(Utc::now()))
            .unwrap()
            .unwrap();
    }

    #[test]
    fn test_place_bet_debits_balance() {
        // Balance 100.00, stake 40.00 -> balance 60.00, bet Active.
        let f = fixture();
        let round = pending_round(&f.store);
        let receipt = f
            .settlement
            .place_bet(f.user, round.id, 4_000, AccountKind::Demo, Utc::now())
            .unwrap();

        assert_eq!(receipt.new_balance, 6_000);
        assert_eq!(receipt.bet.status, BetStatus::Active);
        assert_eq!(f.ledger.balance(f.user, AccountKind::Demo), 6_000);
    }

    #[test]
    fn test_cashout_at_two_x() {
        // 40.00 at 2.00x -> credit 80.00, balance 140.00, profit 40.00.
        let f = fixture();
        let round = pending_round(&f.store);
        let receipt = f
            .settlement
            .place_bet(f.user, round.id, 4_000, AccountKind::Demo, Utc::now())
            .unwrap();
        activate(&f.store, round.id);

        // Claim 2.00x against a far-later server clock so the clamp keeps
        // the claimed value.
        let later = Utc::now() + Duration::seconds(300);
        let cashout = f
            .settlement
            .cash_out(receipt.bet.id, 20_000, later)
            .unwrap();

        assert_eq!(cashout.cashout_multiplier_bps, 20_000.min(round.crash_bps));
        if round.crash_bps >= 20_000 {
            assert_eq!(cashout.profit, 4_000);
            assert_eq!(cashout.total_payout, 8_000);
            assert_eq!(cashout.new_balance, 14_000);
        }
        assert_eq!(cashout.bet.status, BetStatus::CashedOut);
    }

    #[test]
    fn test_unclaimed_bet_loses_on_crash() {
        // Stake 40.00 left open; crash settles it Lost with profit -40.00
        // and no further balance movement.
        let f = fixture();
        let round = pending_round(&f.store);
        let receipt = f
            .settlement
            .place_bet(f.user, round.id, 4_000, AccountKind::Demo, Utc::now())
            .unwrap();
        activate(&f.store, round.id);
        crash(&f.store, round.id);

        let balance_before = f.ledger.balance(f.user, AccountKind::Demo);
        let lost = f.settlement.settle_crash(round.id, Utc::now()).unwrap();

        assert_eq!(lost.len(), 1);
        assert_eq!(lost[0].id, receipt.bet.id);
        assert_eq!(lost[0].status, BetStatus::Lost);
        assert_eq!(lost[0].profit, Some(-4_000));
        assert_eq!(f.ledger.balance(f.user, AccountKind::Demo), balance_before);
    }

    #[test]
    fn test_inflated_claim_is_clamped() {
        // Claiming 50.00x when the server clock says less pays the server
        // value, never the claim.
        let f = fixture();
        let round = pending_round(&f.store);
        let receipt = f
            .settlement
            .place_bet(f.user, round.id, 1_000, AccountKind::Demo, Utc::now())
            .unwrap();
        activate(&f.store, round.id);

        // Immediately after activation the authoritative multiplier is
        // 1.00x; a 50x claim must settle at 1.00x.
        let cashout = f
            .settlement
            .cash_out(receipt.bet.id, 500_000, Utc::now())
            .unwrap();
        assert!(cashout.cashout_multiplier_bps < 500_000);
        assert_eq!(cashout.cashout_multiplier_bps, BPS_ONE);
        assert_eq!(cashout.total_payout, 1_000);
        assert_eq!(cashout.profit, 0);
    }

    #[test]
    fn test_validation_errors() {
        let f = fixture();
        let round = pending_round(&f.store);

        let below = f
            .settlement
            .place_bet(f.user, round.id, 0, AccountKind::Demo, Utc::now());
        assert!(matches!(below, Err(SettlementError::StakeBelowMinimum(0))));
        assert_eq!(below.unwrap_err().kind(), ErrorKind::Validation);

        let claim = f.settlement.cash_out(BetId::new(), 9_999, Utc::now());
        assert!(matches!(
            claim,
            Err(SettlementError::MultiplierBelowOne(9_999))
        ));
    }

    #[test]
    fn test_insufficient_balance_moves_nothing() {
        let f = fixture();
        let round = pending_round(&f.store);
        let err = f
            .settlement
            .place_bet(f.user, round.id, 99_999, AccountKind::Demo, Utc::now())
            .unwrap_err();
        assert_eq!(
            err,
            SettlementError::InsufficientBalance {
                have: 10_000,
                need: 99_999
            }
        );
        assert_eq!(err.kind(), ErrorKind::Precondition);
        assert_eq!(f.ledger.balance(f.user, AccountKind::Demo), 10_000);
        assert!(f.store.bets_for_round(round.id).is_empty());
    }

    #[test]
    fn test_duplicate_bet_is_compensated() {
        let f = fixture();
        let round = pending_round(&f.store);
        f.settlement
            .place_bet(f.user, round.id, 2_000, AccountKind::Demo, Utc::now())
            .unwrap();

        let err = f
            .settlement
            .place_bet(f.user, round.id, 3_000, AccountKind::Demo, Utc::now())
            .unwrap_err();
        assert_eq!(err, SettlementError::DuplicateBet);

        // Only the first stake is gone; the refused debit was refunded.
        assert_eq!(f.ledger.balance(f.user, AccountKind::Demo), 8_000);
    }

    #[test]
    fn test_bet_on_crashed_round_rejected() {
        let f = fixture();
        let round = pending_round(&f.store);
        activate(&f.store, round.id);
        crash(&f.store, round.id);

        let err = f
            .settlement
            .place_bet(f.user, round.id, 1_000, AccountKind::Demo, Utc::now())
            .unwrap_err();
        assert_eq!(err, SettlementError::BettingClosed);
        assert_eq!(f.ledger.balance(f.user, AccountKind::Demo), 10_000);
    }

    #[test]
    fn test_cashout_after_crash_is_conflict() {
        let f = fixture();
        let round = pending_round(&f.store);
        let receipt = f
            .settlement
            .place_bet(f.user, round.id, 1_000, AccountKind::Demo, Utc::now())
            .unwrap();
        activate(&f.store, round.id);
        crash(&f.store, round.id);

        let err = f
            .settlement
            .cash_out(receipt.bet.id, 15_000, Utc::now())
            .unwrap_err();
        assert_eq!(err, SettlementError::RoundCrashed);
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(f.ledger.balance(f.user, AccountKind::Demo), 9_000);
    }

    #[test]
    fn test_resubmitted_cashout_not_double_paid() {
        let f = fixture();
        let round = pending_round(&f.store);
        let receipt = f
            .settlement
            .place_bet(f.user, round.id, 1_000, AccountKind::Demo, Utc::now())
            .unwrap();
        activate(&f.store, round.id);

        f.settlement
            .cash_out(receipt.bet.id, BPS_ONE, Utc::now())
            .unwrap();
        let balance = f.ledger.balance(f.user, AccountKind::Demo);

        let err = f
            .settlement
            .cash_out(receipt.bet.id, BPS_ONE, Utc::now())
            .unwrap_err();
        assert_eq!(err, SettlementError::AlreadySettled(BetStatus::CashedOut));
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(f.ledger.balance(f.user, AccountKind::Demo), balance);
    }

    #[test]
    fn test_cashout_races_crash_settlement() {
        // Run the race many times; every outcome must be exactly-once.
        for _ in 0..50 {
            let f = fixture();
            let round = pending_round(&f.store);
            let receipt = f
                .settlement
                .place_bet(f.user, round.id, 1_000, AccountKind::Demo, Utc::now())
                .unwrap();
            activate(&f.store, round.id);

            let balance_after_place = f.ledger.balance(f.user, AccountKind::Demo);
            let settlement = Settlement::new(
                f.store.clone(),
                f.ledger.clone(),
                EngineConfig::default(),
            );
            let store = f.store.clone();
            let bet_id = receipt.bet.id;
            let round_id = round.id;

            let casher = std::thread::spawn(move || {
                settlement.cash_out(bet_id, BPS_ONE, Utc::now())
            });
            let crasher = std::thread::spawn(move || {
                store
                    .update_round(round_id, |r| r.crash(Utc::now()))
                    .unwrap()
                    .unwrap();
                store.settle_round_crash(round_id, Utc::now()).unwrap()
            });

            let cash_result = casher.join().expect("casher panicked");
            let lost = crasher.join().expect("crasher panicked");

            let final_bet = f.store.bet(bet_id).unwrap();
            let balance = f.ledger.balance(f.user, AccountKind::Demo);

            match cash_result {
                Ok(receipt) => {
                    // Cash-out won: the crash batch must not contain it.
                    assert!(lost.is_empty());
                    assert_eq!(final_bet.status, BetStatus::CashedOut);
                    assert_eq!(balance, balance_after_place + receipt.total_payout);
                }
                Err(err) => {
                    // Crash won: conflict, no credit.
                    assert_eq!(err.kind(), ErrorKind::Conflict);
                    assert_eq!(lost.len(), 1);
                    assert_eq!(final_bet.status, BetStatus::Lost);
                    assert_eq!(balance, balance_after_place);
                }
            }
        }
    }
}
