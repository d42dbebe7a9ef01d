//! Round/Bet Repository
//!
//! In-memory store for rounds and bets. Rounds and bets live under one
//! `RwLock` so every conditional update here is a single linearizable
//! decision: the bet-status transitions in particular are the
//! compare-and-set primitive settlement builds exactly-once semantics on.
//!
//! Critical sections are short and contain no awaits, so a std lock is the
//! right tool. A durable repository would replace this module behind the
//! same conditional-update surface.

use std::collections::{BTreeMap, VecDeque};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::game::bet::{AccountKind, Bet, BetId, BetStatus, UserId};
use crate::game::round::{Round, RoundId, RoundRecord, RoundState};
use crate::core::units::Bps;

/// How many finished rounds (and their bets) to retain as history.
const HISTORY_RETENTION: usize = 256;

/// Conditional-update failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    /// Unknown round id.
    #[error("round not found")]
    RoundNotFound,

    /// Unknown bet id.
    #[error("bet not found")]
    BetNotFound,

    /// The round no longer accepts bets.
    #[error("round is not accepting bets (state {0:?})")]
    RoundNotAccepting(RoundState),

    /// The user already has an active bet on this round and account.
    #[error("duplicate active bet on this round")]
    DuplicateActiveBet,

    /// The bet already left Active; carries what it settled as.
    #[error("bet already settled ({0:?})")]
    BetAlreadySettled(BetStatus),

    /// The round is not Active, so no cash-out can land.
    #[error("round is not active (state {0:?})")]
    RoundNotActive(RoundState),

    /// settle_crash already ran for this round.
    #[error("round already settled")]
    RoundAlreadySettled,
}

#[derive(Default)]
struct StoreInner {
    rounds: BTreeMap<RoundId, Round>,
    bets: BTreeMap<BetId, Bet>,
    /// Round insertion order, newest last. Drives history and retention.
    order: VecDeque<RoundId>,
}

/// Shared in-memory repository.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<StoreInner>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a freshly opened round, pruning history past retention.
    pub fn insert_round(&self, round: Round) {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.order.push_back(round.id);
        inner.rounds.insert(round.id, round);

        while inner.order.len() > HISTORY_RETENTION {
            if let Some(old) = inner.order.pop_front() {
                inner.rounds.remove(&old);
                inner.bets.retain(|_, b| b.round_id != old);
            }
        }
    }

    /// Snapshot of a round.
    pub fn round(&self, id: RoundId) -> Option<Round> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.rounds.get(&id).cloned()
    }

    /// Mutate a round under the lock, returning the closure's result.
    pub fn update_round<R>(
        &self,
        id: RoundId,
        f: impl FnOnce(&mut Round) -> R,
    ) -> Result<R, StoreError> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let round = inner.rounds.get_mut(&id).ok_or(StoreError::RoundNotFound)?;
        Ok(f(round))
    }

    /// Snapshot of a bet.
    pub fn bet(&self, id: BetId) -> Option<Bet> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.bets.get(&id).cloned()
    }

    /// All bets on a round, any status.
    pub fn bets_for_round(&self, round_id: RoundId) -> Vec<Bet> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner
            .bets
            .values()
            .filter(|b| b.round_id == round_id)
            .cloned()
            .collect()
    }

    /// Insert a bet iff, at this instant, the round still accepts bets and
    /// the user has no other active bet on it for the same account.
    ///
    /// The round-state recheck happens under the same lock as the insert,
    /// so a bet can never land on a round that already advanced.
    pub fn insert_bet_checked(&self, bet: Bet, allow_late: bool) -> Result<(), StoreError> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());

        let round = inner
            .rounds
            .get(&bet.round_id)
            .ok_or(StoreError::RoundNotFound)?;
        if !round.accepts_bets(allow_late) {
            return Err(StoreError::RoundNotAccepting(round.state));
        }

        let duplicate = inner.bets.values().any(|b| {
            b.round_id == bet.round_id
                && b.user_id == bet.user_id
                && b.account == bet.account
                && b.status == BetStatus::Active
        });
        if duplicate {
            return Err(StoreError::DuplicateActiveBet);
        }

        inner.bets.insert(bet.id, bet);
        Ok(())
    }

    /// CAS: Active -> CashedOut at `multiplier`, iff the owning round is
    /// still Active. Returns the settled bet.
    ///
    /// This is the per-bet linearization point: exactly one of
    /// `transition_cashout` / `settle_round_crash` wins a given bet.
    pub fn transition_cashout(
        &self,
        bet_id: BetId,
        multiplier: Bps,
        now: DateTime<Utc>,
    ) -> Result<Bet, StoreError> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());

        let (status, round_id) = inner
            .bets
            .get(&bet_id)
            .map(|b| (b.status, b.round_id))
            .ok_or(StoreError::BetNotFound)?;
        if status != BetStatus::Active {
            return Err(StoreError::BetAlreadySettled(status));
        }

        let round_state = inner
            .rounds
            .get(&round_id)
            .map(|r| r.state)
            .ok_or(StoreError::RoundNotFound)?;
        if round_state != RoundState::Active {
            return Err(StoreError::RoundNotActive(round_state));
        }

        let bet = inner
            .bets
            .get_mut(&bet_id)
            .ok_or(StoreError::BetNotFound)?;
        bet.settle_cashout(multiplier, now);
        Ok(bet.clone())
    }

    /// Batch: every still-Active bet on a crashed round goes to Lost.
    ///
    /// Guarded by the round's `settled` flag so a second invocation is an
    /// error instead of a double settlement. Returns the bets that lost.
    pub fn settle_round_crash(
        &self,
        round_id: RoundId,
        now: DateTime<Utc>,
    ) -> Result<Vec<Bet>, StoreError> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());

        let round = inner
            .rounds
            .get_mut(&round_id)
            .ok_or(StoreError::RoundNotFound)?;
        if round.state != RoundState::Crashed {
            return Err(StoreError::RoundNotActive(round.state));
        }
        if round.settled {
            return Err(StoreError::RoundAlreadySettled);
        }
        round.settled = true;

        let mut lost = Vec::new();
        for bet in inner.bets.values_mut() {
            if bet.round_id == round_id && bet.status == BetStatus::Active {
                bet.settle_lost(now);
                lost.push(bet.clone());
            }
        }
        Ok(lost)
    }

    /// Whether a user currently holds an active bet on a round.
    pub fn active_bet(
        &self,
        round_id: RoundId,
        user_id: UserId,
        account: AccountKind,
    ) -> Option<Bet> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner
            .bets
            .values()
            .find(|b| {
                b.round_id == round_id
                    && b.user_id == user_id
                    && b.account == account
                    && b.status == BetStatus::Active
            })
            .cloned()
    }

    /// Public records of crashed rounds, newest first.
    pub fn recent_records(&self, limit: usize) -> Vec<RoundRecord> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner
            .order
            .iter()
            .rev()
            .filter_map(|id| inner.rounds.get(id))
            .filter_map(|r| r.record())
            .take(limit)
            .collect()
    }
}
