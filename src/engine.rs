//! Round Engine
//!
//! The single authoritative owner of the shared round. Request handlers
//! hold an `Arc<Engine>` and go through it for every read and mutation;
//! observers follow the broadcast channel. Nothing reads ambient global
//! state.
//!
//! The engine validates every transition against its own clock and curve,
//! so an externally requested transition can never run ahead of the real
//! elapsed time.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::core::units::{Amount, Bps, DisplayBps};
use crate::fair::seed::ServerSeed;
use crate::game::bet::{AccountKind, Bet, BetId, UserId};
use crate::game::events::RoundEvent;
use crate::game::round::{Round, RoundError, RoundId, RoundRecord, RoundState};
use crate::ledger::balance::Ledger;
use crate::ledger::settlement::{
    BetReceipt, CashoutReceipt, ErrorKind, Settlement, SettlementError,
};
use crate::store::MemoryStore;

/// Capacity of the event broadcast channel.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Engine-level errors: settlement failures, transition failures, and the
/// few validations that live above both.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    /// A settlement operation failed.
    #[error(transparent)]
    Settlement(#[from] SettlementError),

    /// A round transition or lookup failed.
    #[error(transparent)]
    Round(#[from] RoundError),

    /// A round is still Pending or Active; sequential rounds only.
    #[error("previous round has not crashed yet")]
    PreviousRoundOpen,

    /// Client seeds are bounded visible ASCII.
    #[error("client seed must be 1..=64 visible ASCII characters")]
    InvalidClientSeed,
}

impl EngineError {
    /// Classify for the wire-level error taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Settlement(err) => err.kind(),
            Self::Round(RoundError::NotFound) | Self::Round(RoundError::NoCurrentRound) => {
                ErrorKind::NotFound
            }
            Self::Round(_) | Self::PreviousRoundOpen => ErrorKind::Precondition,
            Self::InvalidClientSeed => ErrorKind::Validation,
        }
    }
}

/// Outcome of one clock tick against the current round.
#[derive(Debug, Clone, Copy)]
pub struct TickOutcome {
    /// Server-computed multiplier at the tick.
    pub multiplier_bps: Bps,
    /// Elapsed active milliseconds at the tick.
    pub elapsed_ms: u64,
    /// Whether the growth curve has reached the crash point.
    pub crash_due: bool,
}

/// The authoritative round engine.
pub struct Engine {
    config: EngineConfig,
    store: Arc<MemoryStore>,
    ledger: Arc<Ledger>,
    settlement: Settlement,
    /// The one round currently owned by the clock.
    current: RwLock<Option<RoundId>>,
    /// Monotonic sequence; the fairness nonce.
    sequence: AtomicU64,
    /// User-suggested seed for the next round, if any.
    next_client_seed: Mutex<Option<String>>,
    events: broadcast::Sender<RoundEvent>,
}

impl Engine {
    /// Build an engine with fresh stores.
    pub fn new(config: EngineConfig) -> Arc<Self> {
        let store = Arc::new(MemoryStore::new());
        let ledger = Arc::new(Ledger::new());
        let settlement = Settlement::new(store.clone(), ledger.clone(), config.clone());
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            config,
            store,
            ledger,
            settlement,
            current: RwLock::new(None),
            sequence: AtomicU64::new(0),
            next_client_seed: Mutex::new(None),
            events,
        })
    }

    /// Engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Subscribe to the round event stream.
    pub fn subscribe(&self) -> broadcast::Receiver<RoundEvent> {
        self.events.subscribe()
    }

    fn publish(&self, event: RoundEvent) {
        // No receivers is fine; the clock runs regardless.
        let _ = self.events.send(event);
    }

    // =========================================================================
    // Round lifecycle (clock-owned)
    // =========================================================================

    /// Open a new round. Refused while the previous round is still live.
    pub fn open_round(&self, now: DateTime<Utc>) -> Result<Round, EngineError> {
        let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
        if let Some(id) = *current {
            if let Some(prev) = self.store.round(id) {
                if prev.state != RoundState::Crashed {
                    return Err(EngineError::PreviousRoundOpen);
                }
            }
        }

        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let client_seed = self
            .next_client_seed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .unwrap_or_else(|| hex::encode(rand::random::<[u8; 8]>()));

        let betting_window = ChronoDuration::from_std(self.config.betting_window)
            .unwrap_or_else(|_| ChronoDuration::seconds(10));
        let round = Round::open(sequence, client_seed, betting_window, now);

        self.store.insert_round(round.clone());
        *current = Some(round.id);

        info!(
            round_id = %round.id,
            sequence,
            seed_hash = %round.seed_hash.to_hex(),
            "round opened"
        );
        self.publish(RoundEvent::RoundOpened {
            round_id: round.id,
            sequence,
            server_seed_hash: round.seed_hash.to_hex(),
            client_seed: round.client_seed.clone(),
            betting_closes_at: round.betting_closes_at,
            curve: self.config.curve,
        });
        Ok(round)
    }

    /// Pending -> Active, only once the betting window has elapsed by the
    /// server's own clock.
    pub fn activate_round(
        &self,
        round_id: RoundId,
        now: DateTime<Utc>,
    ) -> Result<Round, EngineError> {
        let round = self.store.round(round_id).ok_or(RoundError::NotFound)?;
        if round.state == RoundState::Pending && now < round.betting_closes_at {
            return Err(RoundError::BettingStillOpen.into());
        }

        let round = self
            .store
            .update_round(round_id, |r| -> Result<Round, RoundError> {
                r.activate(now)?;
                Ok(r.clone())
            })
            .map_err(|_| RoundError::NotFound)??;

        info!(round_id = %round.id, "round started");
        self.publish(RoundEvent::RoundStarted {
            round_id,
            started_at: now,
        });
        Ok(round)
    }

    /// One clock tick: compute the multiplier, broadcast it, and report
    /// whether the crash point has been reached.
    pub fn tick_round(
        &self,
        round_id: RoundId,
        now: DateTime<Utc>,
    ) -> Result<TickOutcome, EngineError> {
        let round = self.store.round(round_id).ok_or(RoundError::NotFound)?;
        if round.state != RoundState::Active {
            return Err(RoundError::InvalidTransition {
                from: round.state,
                to: RoundState::Active,
            }
            .into());
        }

        let elapsed_ms = round.elapsed_ms(now);
        let raw = self.config.curve.multiplier_bps(elapsed_ms);
        let crash_due = raw >= round.crash_bps;
        let multiplier_bps = raw.min(round.crash_bps);

        if !crash_due {
            self.publish(RoundEvent::MultiplierTick {
                round_id,
                multiplier_bps,
                elapsed_ms,
            });
        }
        Ok(TickOutcome {
            multiplier_bps,
            elapsed_ms,
            crash_due,
        })
    }

    /// Active -> Crashed, only once the curve has actually reached the
    /// crash point. Reveals the seed and settles all open bets as lost.
    pub fn crash_round(
        &self,
        round_id: RoundId,
        now: DateTime<Utc>,
    ) -> Result<(Round, Vec<Bet>), EngineError> {
        let round = self.store.round(round_id).ok_or(RoundError::NotFound)?;
        if round.state == RoundState::Active {
            let raw = self.config.curve.multiplier_bps(round.elapsed_ms(now));
            if raw < round.crash_bps {
                return Err(RoundError::CrashPointNotReached {
                    current: raw,
                    required: round.crash_bps,
                }
                .into());
            }
        }

        let round = self
            .store
            .update_round(round_id, |r| -> Result<Round, RoundError> {
                r.crash(now)?;
                Ok(r.clone())
            })
            .map_err(|_| RoundError::NotFound)??;

        // The seed is readable now; broadcast the reveal before settling so
        // observers see the crash the instant it is decided.
        let revealed = round
            .revealed_seed()
            .map(ServerSeed::to_hex)
            .unwrap_or_default();
        info!(
            round_id = %round.id,
            crash = %DisplayBps(round.crash_bps),
            "round crashed"
        );
        self.publish(RoundEvent::RoundCrashed {
            round_id,
            crash_bps: round.crash_bps,
            server_seed: revealed,
            ended_at: now,
        });

        let lost = self.settlement.settle_crash(round_id, now)?;
        self.publish(RoundEvent::RoundSettled {
            round_id,
            lost_bets: lost.len(),
        });
        if let Some(record) = self.store.round(round_id).and_then(|r| r.record()) {
            self.publish(RoundEvent::RoundRecorded { record });
        }
        Ok((round, lost))
    }

    /// `POST /rounds`: return the live round, or open a fresh one if the
    /// previous round has crashed (or none exists).
    pub fn ensure_round(&self, now: DateTime<Utc>) -> Result<Round, EngineError> {
        if let Some(round) = self.current_round() {
            if round.state != RoundState::Crashed {
                return Ok(round);
            }
        }
        match self.open_round(now) {
            // Lost the creation race (usually to the clock); the winner's
            // round is the answer.
            Err(EngineError::PreviousRoundOpen) => self
                .current_round()
                .ok_or_else(|| RoundError::NoCurrentRound.into()),
            other => other,
        }
    }

    /// `PATCH /rounds`: an externally requested transition, re-validated
    /// against the engine's own elapsed-time computation. Client-supplied
    /// timestamps are ignored.
    pub fn request_transition(
        &self,
        round_id: RoundId,
        target: RoundState,
        now: DateTime<Utc>,
    ) -> Result<Round, EngineError> {
        match target {
            RoundState::Active => self.activate_round(round_id, now),
            RoundState::Crashed => self.crash_round(round_id, now).map(|(round, _)| round),
            RoundState::Pending => {
                let round = self.store.round(round_id).ok_or(RoundError::NotFound)?;
                Err(RoundError::InvalidTransition {
                    from: round.state,
                    to: RoundState::Pending,
                }
                .into())
            }
        }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// The round currently owned by the clock.
    pub fn current_round(&self) -> Option<Round> {
        let current = self.current.read().unwrap_or_else(|e| e.into_inner());
        current.and_then(|id| self.store.round(id))
    }

    /// Authoritative multiplier of the current round at `now`.
    pub fn multiplier_now(&self, now: DateTime<Utc>) -> Result<(RoundId, Bps), EngineError> {
        let round = self.current_round().ok_or(RoundError::NoCurrentRound)?;
        let bps = round.multiplier_at(&self.config.curve, now);
        Ok((round.id, bps))
    }

    /// Public verifier-ready history, newest first.
    pub fn history(&self, limit: usize) -> Vec<RoundRecord> {
        self.store.recent_records(limit)
    }

    /// A bet by id.
    pub fn bet(&self, bet_id: BetId) -> Option<Bet> {
        self.store.bet(bet_id)
    }

    // =========================================================================
    // Player operations
    // =========================================================================

    /// Place a bet on a round.
    pub fn place_bet(
        &self,
        user: UserId,
        round_id: RoundId,
        stake: Amount,
        account: AccountKind,
        now: DateTime<Utc>,
    ) -> Result<BetReceipt, EngineError> {
        let receipt = self
            .settlement
            .place_bet(user, round_id, stake, account, now)?;
        self.publish(RoundEvent::BetPlaced {
            round_id,
            bet_id: receipt.bet.id,
            user_id: user,
            account,
            stake,
        });
        Ok(receipt)
    }

    /// Cash out an active bet.
    pub fn cash_out(
        &self,
        bet_id: BetId,
        claimed_bps: Bps,
        now: DateTime<Utc>,
    ) -> Result<CashoutReceipt, EngineError> {
        let receipt = self.settlement.cash_out(bet_id, claimed_bps, now)?;
        self.publish(RoundEvent::BetCashedOut {
            round_id: receipt.bet.round_id,
            bet_id,
            user_id: receipt.bet.user_id,
            multiplier_bps: receipt.cashout_multiplier_bps,
            profit: receipt.profit as i64,
        });
        Ok(receipt)
    }

    /// Suggest the client seed for the next round. Applied at that round's
    /// creation so its crash point is still derived exactly once.
    pub fn set_next_client_seed(&self, seed: &str) -> Result<(), EngineError> {
        let ok = !seed.is_empty()
            && seed.len() <= 64
            && seed.chars().all(|c| c.is_ascii_graphic() || c == ' ');
        if !ok {
            return Err(EngineError::InvalidClientSeed);
        }
        let mut slot = self
            .next_client_seed
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        *slot = Some(seed.to_string());
        debug!("client seed staged for next round");
        Ok(())
    }

    // =========================================================================
    // Balances
    // =========================================================================

    /// Balance for a user and account kind.
    pub fn balance(&self, user: UserId, account: AccountKind) -> Amount {
        self.ledger.balance(user, account)
    }

    /// Seed the demo balance at first authentication.
    pub fn ensure_demo_balance(&self, user: UserId) -> Amount {
        self.ledger
            .ensure_seeded(user, AccountKind::Demo, self.config.demo_starting_balance)
    }

    /// Credit a real-account deposit that already cleared externally.
    /// The payment gateway itself is out of scope.
    pub fn deposit(&self, user: UserId, account: AccountKind, amount: Amount) -> Amount {
        self.ledger.credit(user, account, amount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::units::BPS_ONE;

    fn engine() -> Arc<Engine> {
        Engine::new(EngineConfig::default())
    }

    fn funded_user(engine: &Engine, byte: u8) -> UserId {
        let user = UserId::new([byte; 16]);
        engine.deposit(user, AccountKind::Demo, 10_000);
        user
    }

    #[test]
    fn test_open_round_publishes_commitment_not_seed() {
        let engine = engine();
        let mut events = engine.subscribe();
        let round = engine.open_round(Utc::now()).unwrap();

        match events.try_recv().unwrap() {
            RoundEvent::RoundOpened {
                round_id,
                server_seed_hash,
                ..
            } => {
                assert_eq!(round_id, round.id);
                assert_eq!(server_seed_hash, round.seed_hash.to_hex());
            }
            other => panic!("expected RoundOpened, got {:?}", other),
        }
    }

    #[test]
    fn test_sequential_rounds_only() {
        let engine = engine();
        let now = Utc::now();
        engine.open_round(now).unwrap();
        assert!(matches!(
            engine.open_round(now),
            Err(EngineError::PreviousRoundOpen)
        ));
    }

    #[test]
    fn test_activation_waits_for_betting_window() {
        let engine = engine();
        let now = Utc::now();
        let round = engine.open_round(now).unwrap();

        // Too early: the window is still open.
        let err = engine.activate_round(round.id, now).unwrap_err();
        assert_eq!(err, EngineError::Round(RoundError::BettingStillOpen));

        // At the deadline it goes through.
        let activated = engine
            .activate_round(round.id, round.betting_closes_at)
            .unwrap();
        assert_eq!(activated.state, RoundState::Active);
    }

    #[test]
    fn test_crash_requires_curve_to_reach_crash_point() {
        let engine = engine();
        let now = Utc::now();
        let round = engine.open_round(now).unwrap();
        let started = round.betting_closes_at;
        engine.activate_round(round.id, started).unwrap();

        // Immediately after start the curve sits at 1.00x; every crash
        // point is >= 1.00x, and an instant crash is legal, so only assert
        // rejection when the threshold is genuinely unmet.
        if round.crash_bps > BPS_ONE {
            let err = engine.crash_round(round.id, started).unwrap_err();
            assert!(matches!(
                err,
                EngineError::Round(RoundError::CrashPointNotReached { .. })
            ));
        }

        // Ten minutes in, the curve is saturated past any crash point.
        let (crashed, _) = engine
            .crash_round(round.id, started + ChronoDuration::seconds(600))
            .unwrap();
        assert_eq!(crashed.state, RoundState::Crashed);
    }

    #[test]
    fn test_full_lifecycle_with_bets() {
        let engine = engine();
        let now = Utc::now();
        let winner = funded_user(&engine, 1);
        let loser = funded_user(&engine, 2);

        let round = engine.open_round(now).unwrap();
        let win_bet = engine
            .place_bet(winner, round.id, 4_000, AccountKind::Demo, now)
            .unwrap();
        let lose_bet = engine
            .place_bet(loser, round.id, 4_000, AccountKind::Demo, now)
            .unwrap();
        assert_eq!(win_bet.new_balance, 6_000);
        assert_eq!(lose_bet.new_balance, 6_000);

        let started = round.betting_closes_at;
        engine.activate_round(round.id, started).unwrap();

        // Winner cashes out at 1.00x right at the start (always legal).
        let cashout = engine
            .cash_out(win_bet.bet.id, BPS_ONE, started)
            .unwrap();
        assert_eq!(cashout.total_payout, 4_000);
        assert_eq!(engine.balance(winner, AccountKind::Demo), 10_000);

        let (_, lost) = engine
            .crash_round(round.id, started + ChronoDuration::seconds(600))
            .unwrap();
        assert_eq!(lost.len(), 1);
        assert_eq!(lost[0].id, lose_bet.bet.id);
        // Loss settles without touching the balance again.
        assert_eq!(engine.balance(loser, AccountKind::Demo), 6_000);

        // History now carries a verifiable record.
        let history = engine.history(10);
        assert_eq!(history.len(), 1);
        let record = &history[0];
        let proof = crate::fair::verify::RoundProof {
            server_seed: record.server_seed.clone(),
            server_seed_hash: record.server_seed_hash.clone(),
            client_seed: record.client_seed.clone(),
            sequence: record.sequence,
            crash_bps: record.crash_bps,
        };
        assert!(crate::fair::verify::verify_round(&proof).is_ok());
    }

    #[test]
    fn test_late_bet_rejected_by_policy() {
        let engine = engine();
        let now = Utc::now();
        let user = funded_user(&engine, 3);
        let round = engine.open_round(now).unwrap();
        engine
            .activate_round(round.id, round.betting_closes_at)
            .unwrap();

        let err = engine
            .place_bet(user, round.id, 1_000, AccountKind::Demo, now)
            .unwrap_err();
        assert_eq!(err, EngineError::Settlement(SettlementError::BettingClosed));
    }

    #[test]
    fn test_ensure_round_is_idempotent_while_live() {
        let engine = engine();
        let now = Utc::now();
        let first = engine.ensure_round(now).unwrap();
        let second = engine.ensure_round(now).unwrap();
        assert_eq!(first.id, second.id);
    }

    #[test]
    fn test_staged_client_seed_applies_to_next_round() {
        let engine = engine();
        engine.set_next_client_seed("my lucky seed").unwrap();
        let round = engine.open_round(Utc::now()).unwrap();
        assert_eq!(round.client_seed, "my lucky seed");

        // Not sticky: the following round auto-generates.
        let started = round.betting_closes_at;
        engine.activate_round(round.id, started).unwrap();
        engine
            .crash_round(round.id, started + ChronoDuration::seconds(600))
            .unwrap();
        let next = engine.open_round(Utc::now()).unwrap();
        assert_ne!(next.client_seed, "my lucky seed");
    }

    #[test]
    fn test_client_seed_validation() {
        let engine = engine();
        assert_eq!(
            engine.set_next_client_seed(""),
            Err(EngineError::InvalidClientSeed)
        );
        assert_eq!(
            engine.set_next_client_seed(&"x".repeat(65)),
            Err(EngineError::InvalidClientSeed)
        );
        assert_eq!(
            engine.set_next_client_seed("seed\nwith\ncontrol"),
            Err(EngineError::InvalidClientSeed)
        );
        assert!(engine.set_next_client_seed("ok seed 123").is_ok());
    }

    #[test]
    fn test_request_transition_rejects_backwards() {
        let engine = engine();
        let now = Utc::now();
        let round = engine.open_round(now).unwrap();
        let err = engine
            .request_transition(round.id, RoundState::Pending, now)
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Round(RoundError::InvalidTransition { .. })
        ));
        assert_eq!(err.kind(), ErrorKind::Precondition);
    }

    #[test]
    fn test_demo_balance_seeded_once() {
        let engine = engine();
        let user = UserId::new([9; 16]);
        let config_amount = engine.config().demo_starting_balance;
        assert_eq!(engine.ensure_demo_balance(user), config_amount);
        // Spending and re-authenticating does not top the balance back up.
        let round = engine.open_round(Utc::now()).unwrap();
        engine
            .place_bet(user, round.id, 500, AccountKind::Demo, Utc::now())
            .unwrap();
        assert_eq!(engine.ensure_demo_balance(user), config_amount - 500);
    }
}
