//! Round State Machine
//!
//! A round moves `Pending -> Active -> Crashed` and never back. The crash
//! point is derived exactly once, at construction, from the committed seed;
//! the seed itself becomes readable only once the round is Crashed. The
//! round clock owns every transition; external transition requests are
//! re-validated against the server's own elapsed-time computation.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::core::curve::GrowthCurve;
use crate::core::units::{Bps, BPS_ONE};
use crate::fair::crash::derive_crash_bps;
use crate::fair::seed::{SeedHash, ServerSeed};
use crate::fair::verify::RoundProof;

/// Unique round identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RoundId(pub Uuid);

impl RoundId {
    /// Mint a fresh id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RoundId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RoundId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Lifecycle state of a round.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundState {
    /// Betting open, multiplier fixed at 1.00x.
    Pending,
    /// Multiplier rising.
    Active,
    /// Terminal; multiplier frozen at the crash point.
    Crashed,
}

/// Round transition and lookup errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RoundError {
    /// No round with that id.
    #[error("round not found")]
    NotFound,

    /// No round currently open.
    #[error("no current round")]
    NoCurrentRound,

    /// The requested transition is not legal from the current state.
    #[error("invalid transition: {from:?} -> {to:?}")]
    InvalidTransition {
        /// State the round was in.
        from: RoundState,
        /// State the caller asked for.
        to: RoundState,
    },

    /// Activation requested before the betting window elapsed.
    #[error("betting window still open")]
    BettingStillOpen,

    /// Crash requested before the multiplier reached the crash point.
    #[error("crash point not reached: at {current} bps, crash at {required} bps")]
    CrashPointNotReached {
        /// Server-computed multiplier at the request.
        current: Bps,
        /// The round's crash point.
        required: Bps,
    },
}

/// One betting round.
///
/// `server_seed` and `crash_bps` are unpredictable-before-the-fact values;
/// the seed is private until Crashed and the crash point must never be sent
/// to clients while the round is live.
#[derive(Clone, Debug)]
pub struct Round {
    /// Round identifier.
    pub id: RoundId,
    /// Monotonic sequence number, the derivation nonce.
    pub sequence: u64,
    /// Secret seed, revealed via [`Round::revealed_seed`] after crash.
    server_seed: ServerSeed,
    /// Public commitment, published at creation.
    pub seed_hash: SeedHash,
    /// Client-influenced seed mixed into the derivation.
    pub client_seed: String,
    /// Crash point, derived once at creation.
    pub crash_bps: Bps,
    /// Current lifecycle state.
    pub state: RoundState,
    /// When the round was created (betting opened).
    pub created_at: DateTime<Utc>,
    /// When betting closes and the multiplier starts rising.
    pub betting_closes_at: DateTime<Utc>,
    /// Set at Pending -> Active.
    pub started_at: Option<DateTime<Utc>>,
    /// Set at Active -> Crashed.
    pub ended_at: Option<DateTime<Utc>>,
    /// Whether settle_crash has already run for this round.
    pub settled: bool,
}

impl Round {
    /// Create a round with a fresh seed.
    pub fn open(sequence: u64, client_seed: String, betting_window: Duration, now: DateTime<Utc>) -> Self {
        Self::open_with_seed(ServerSeed::generate(), sequence, client_seed, betting_window, now)
    }

    /// Create a round from a known seed (deterministic tests, replay).
    pub fn open_with_seed(
        server_seed: ServerSeed,
        sequence: u64,
        client_seed: String,
        betting_window: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        let seed_hash = server_seed.commitment();
        let crash_bps = derive_crash_bps(&server_seed, &client_seed, sequence);
        Self {
            id: RoundId::new(),
            sequence,
            server_seed,
            seed_hash,
            client_seed,
            crash_bps,
            state: RoundState::Pending,
            created_at: now,
            betting_closes_at: now + betting_window,
            started_at: None,
            ended_at: None,
            settled: false,
        }
    }

    /// Whether a bet may be placed right now under the given policy.
    pub fn accepts_bets(&self, allow_late: bool) -> bool {
        match self.state {
            RoundState::Pending => true,
            RoundState::Active => allow_late,
            RoundState::Crashed => false,
        }
    }

    /// Milliseconds of active play at `now`. Zero before activation.
    pub fn elapsed_ms(&self, now: DateTime<Utc>) -> u64 {
        match self.started_at {
            Some(started) => (now - started).num_milliseconds().max(0) as u64,
            None => 0,
        }
    }

    /// The authoritative multiplier at `now`.
    ///
    /// Pending rounds sit at 1.00x, crashed rounds are frozen at the crash
    /// point, active rounds follow the public growth curve capped by the
    /// crash point.
    pub fn multiplier_at(&self, curve: &GrowthCurve, now: DateTime<Utc>) -> Bps {
        match self.state {
            RoundState::Pending => BPS_ONE,
            RoundState::Crashed => self.crash_bps,
            RoundState::Active => curve
                .multiplier_bps(self.elapsed_ms(now))
                .min(self.crash_bps),
        }
    }

    /// Pending -> Active. Records `started_at`.
    pub fn activate(&mut self, now: DateTime<Utc>) -> Result<(), RoundError> {
        if self.state != RoundState::Pending {
            return Err(RoundError::InvalidTransition {
                from: self.state,
                to: RoundState::Active,
            });
        }
        self.state = RoundState::Active;
        self.started_at = Some(now);
        Ok(())
    }

    /// Active -> Crashed. Records `ended_at`; the seed becomes readable.
    pub fn crash(&mut self, now: DateTime<Utc>) -> Result<(), RoundError> {
        if self.state != RoundState::Active {
            return Err(RoundError::InvalidTransition {
                from: self.state,
                to: RoundState::Crashed,
            });
        }
        self.state = RoundState::Crashed;
        self.ended_at = Some(now);
        Ok(())
    }

    /// The server seed, readable only once the round is Crashed.
    pub fn revealed_seed(&self) -> Option<&ServerSeed> {
        match self.state {
            RoundState::Crashed => Some(&self.server_seed),
            _ => None,
        }
    }

    /// Public history record; `None` until the round has crashed.
    pub fn record(&self) -> Option<RoundRecord> {
        let seed = self.revealed_seed()?;
        Some(RoundRecord {
            id: self.id,
            sequence: self.sequence,
            server_seed: seed.to_hex(),
            server_seed_hash: self.seed_hash.to_hex(),
            client_seed: self.client_seed.clone(),
            crash_bps: self.crash_bps,
            started_at: self.started_at,
            ended_at: self.ended_at,
        })
    }

    /// Verifier input for a crashed round.
    pub fn proof(&self) -> Option<RoundProof> {
        let record = self.record()?;
        Some(RoundProof {
            server_seed: record.server_seed,
            server_seed_hash: record.server_seed_hash,
            client_seed: record.client_seed,
            sequence: record.sequence,
            crash_bps: record.crash_bps,
        })
    }
}

/// Public round-history row: everything a third party needs to run the
/// verifier, plus timestamps for the record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundRecord {
    /// Round identifier.
    pub id: RoundId,
    /// Sequence number used as the derivation nonce.
    pub sequence: u64,
    /// Revealed server seed, hex.
    pub server_seed: String,
    /// Pre-published commitment, hex.
    pub server_seed_hash: String,
    /// Client seed.
    pub client_seed: String,
    /// Crash point in basis points.
    pub crash_bps: Bps,
    /// When the multiplier started rising.
    pub started_at: Option<DateTime<Utc>>,
    /// When the round crashed.
    pub ended_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fair::verify::verify_round;

    fn test_round(now: DateTime<Utc>) -> Round {
        Round::open_with_seed(
            ServerSeed::from_bytes([9u8; 32]),
            1,
            "xyz".to_string(),
            Duration::seconds(10),
            now,
        )
    }

    #[test]
    fn test_new_round_is_pending() {
        let now = Utc::now();
        let round = test_round(now);
        assert_eq!(round.state, RoundState::Pending);
        assert_eq!(round.betting_closes_at, now + Duration::seconds(10));
        assert!(round.started_at.is_none());
        assert!(round.crash_bps >= BPS_ONE);
    }

    #[test]
    fn test_seed_hidden_until_crash() {
        let now = Utc::now();
        let mut round = test_round(now);
        assert!(round.revealed_seed().is_none());
        assert!(round.record().is_none());

        round.activate(now).unwrap();
        assert!(round.revealed_seed().is_none());

        round.crash(now + Duration::seconds(5)).unwrap();
        assert!(round.revealed_seed().is_some());
        assert!(round.record().is_some());
    }

    #[test]
    fn test_transitions_are_one_way() {
        let now = Utc::now();
        let mut round = test_round(now);

        // Cannot crash from Pending.
        assert!(matches!(
            round.crash(now),
            Err(RoundError::InvalidTransition { .. })
        ));

        round.activate(now).unwrap();
        // Cannot activate twice.
        assert!(matches!(
            round.activate(now),
            Err(RoundError::InvalidTransition { .. })
        ));

        round.crash(now).unwrap();
        // Terminal: neither transition is legal now.
        assert!(round.activate(now).is_err());
        assert!(round.crash(now).is_err());
    }

    #[test]
    fn test_multiplier_by_state() {
        let now = Utc::now();
        let curve = GrowthCurve::default();
        let mut round = test_round(now);

        assert_eq!(round.multiplier_at(&curve, now), BPS_ONE);

        round.activate(now).unwrap();
        assert_eq!(round.multiplier_at(&curve, now), BPS_ONE);
        let later = now + Duration::milliseconds(300);
        let live = round.multiplier_at(&curve, later);
        assert!(live <= round.crash_bps);
        assert!(live >= BPS_ONE);

        round.crash(later).unwrap();
        // Frozen at crash point no matter how much time passes.
        let much_later = now + Duration::seconds(3600);
        assert_eq!(round.multiplier_at(&curve, much_later), round.crash_bps);
    }

    #[test]
    fn test_multiplier_capped_by_crash_point() {
        let now = Utc::now();
        let curve = GrowthCurve::default();
        let mut round = test_round(now);
        round.activate(now).unwrap();
        // Far in the future the raw curve is at its cap; the round value
        // must still not exceed its own crash point.
        let far = now + Duration::seconds(600);
        assert_eq!(round.multiplier_at(&curve, far), round.crash_bps);
    }

    #[test]
    fn test_accepts_bets_policy() {
        let now = Utc::now();
        let mut round = test_round(now);
        assert!(round.accepts_bets(false));
        assert!(round.accepts_bets(true));

        round.activate(now).unwrap();
        assert!(!round.accepts_bets(false));
        assert!(round.accepts_bets(true));

        round.crash(now).unwrap();
        assert!(!round.accepts_bets(true));
    }

    #[test]
    fn test_record_verifies() {
        let now = Utc::now();
        let mut round = test_round(now);
        round.activate(now).unwrap();
        round.crash(now).unwrap();

        let proof = round.proof().unwrap();
        assert!(verify_round(&proof).is_ok());
    }

    #[test]
    fn test_crash_point_is_stable() {
        // The crash point is derived at construction and never recomputed.
        let now = Utc::now();
        let mut round = test_round(now);
        let at_creation = round.crash_bps;
        round.activate(now).unwrap();
        round.crash(now).unwrap();
        assert_eq!(round.crash_bps, at_creation);
    }
}
