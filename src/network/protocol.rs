//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket.
//! All messages are serialized as JSON for debugging ease, with optional
//! binary (bincode) for flat records.
//!
//! The request surface mirrors the HTTP-style contract: place bet, cash
//! out, create/advance round, round history, balance reads. The event feed
//! mirrors [`RoundEvent`](crate::game::events::RoundEvent) so every client
//! derives the same multiplier curve from the same `started_at`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::curve::GrowthCurve;
use crate::core::units::{Amount, Bps, Profit};
use crate::engine::EngineError;
use crate::game::bet::{AccountKind, Bet, BetId, BetStatus};
use crate::game::events::RoundEvent;
use crate::game::round::{Round, RoundId, RoundRecord, RoundState};
use crate::ledger::settlement::ErrorKind;

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Authenticate with a provider-issued JWT.
    Auth(AuthRequest),

    /// Place a bet on a round.
    PlaceBet(PlaceBetRequest),

    /// Cash out an active bet.
    CashOut(CashOutRequest),

    /// Create a round if none is live (`POST /rounds`).
    CreateRound,

    /// Request a round transition (`PATCH /rounds`). Re-validated
    /// server-side; any client-supplied timing is ignored.
    AdvanceRound(AdvanceRoundRequest),

    /// Stage a client seed for the next round.
    SetClientSeed {
        /// The seed string (1..=64 visible ASCII characters).
        seed: String,
    },

    /// Request the current round snapshot.
    GetRound,

    /// Request a balance.
    GetBalance {
        /// Which balance.
        account: AccountKind,
    },

    /// Request the public round history (verifier inputs included).
    History {
        /// Maximum records to return.
        limit: usize,
    },

    /// Ping for latency measurement.
    Ping {
        /// Client timestamp, echoed back.
        timestamp: u64,
    },
}

/// Authentication request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthRequest {
    /// Provider-issued JWT.
    pub token: String,
    /// Client version for compatibility checks.
    pub client_version: String,
}

/// Bet placement request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaceBetRequest {
    /// Round to bet on.
    pub round_id: RoundId,
    /// Stake in minor units.
    pub amount: Amount,
    /// Balance to play against.
    pub account: AccountKind,
}

/// Cash-out request. The claimed multiplier is what the client's display
/// showed; settlement clamps it to the authoritative value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CashOutRequest {
    /// Bet to settle.
    pub bet_id: BetId,
    /// Client-observed multiplier in basis points.
    pub claimed_multiplier_bps: Bps,
}

/// Round transition request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvanceRoundRequest {
    /// Round to transition.
    pub round_id: RoundId,
    /// Target state.
    pub target: RoundState,
    /// Client-observed end time. Advisory only; never trusted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Authentication result.
    AuthResult(AuthResult),

    /// Bet accepted.
    BetAccepted {
        /// The active bet.
        bet: BetInfo,
        /// Balance after the debit.
        new_balance: Amount,
    },

    /// Cash-out settled.
    CashedOut {
        /// Settled bet id.
        bet_id: BetId,
        /// Profit portion in minor units.
        profit: Amount,
        /// Stake + profit, the credited amount.
        total_payout: Amount,
        /// Multiplier after clamping.
        cashout_multiplier_bps: Bps,
        /// Balance after the credit.
        new_balance: Amount,
    },

    /// Current round snapshot.
    Round(RoundSnapshot),

    /// Balance response.
    Balance {
        /// Which balance.
        account: AccountKind,
        /// Amount in minor units.
        amount: Amount,
    },

    /// Public round history, newest first.
    History {
        /// Verifier-ready records.
        rounds: Vec<RoundRecord>,
    },

    /// Live round event feed.
    Event(RoundEvent),

    /// Request failed.
    Error(ServerError),

    /// Pong response.
    Pong {
        /// Echoed client timestamp.
        timestamp: u64,
        /// Server wall clock (ms since epoch).
        server_time: u64,
    },

    /// Server is shutting down.
    Shutdown {
        /// Human-readable reason.
        reason: String,
    },
}

/// Authentication result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthResult {
    /// Whether auth succeeded.
    pub success: bool,
    /// Stable user id (hex) on success.
    pub user_id: Option<String>,
    /// Demo balance after first-login seeding.
    pub demo_balance: Option<Amount>,
    /// Error message on failure.
    pub error: Option<String>,
    /// Server version.
    pub server_version: String,
}

/// Wire form of a bet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BetInfo {
    /// Bet id.
    pub id: BetId,
    /// Owning round.
    pub round_id: RoundId,
    /// Owning user (hex).
    pub user_id: String,
    /// Account kind.
    pub account: AccountKind,
    /// Stake in minor units.
    pub stake: Amount,
    /// Settlement status.
    pub status: BetStatus,
    /// Cash-out multiplier, if cashed out.
    pub cashout_multiplier_bps: Option<Bps>,
    /// Signed profit, once settled.
    pub profit: Option<Profit>,
}

impl From<&Bet> for BetInfo {
    fn from(bet: &Bet) -> Self {
        Self {
            id: bet.id,
            round_id: bet.round_id,
            user_id: bet.user_id.to_hex(),
            account: bet.account,
            stake: bet.stake,
            status: bet.status,
            cashout_multiplier_bps: bet.cashout_multiplier_bps,
            profit: bet.profit,
        }
    }
}

/// Public snapshot of a round.
///
/// While the round is live this intentionally omits the crash point and
/// seed; both appear only once the round has crashed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundSnapshot {
    /// Round id.
    pub id: RoundId,
    /// Sequence number (derivation nonce).
    pub sequence: u64,
    /// Seed commitment, hex.
    pub server_seed_hash: String,
    /// Client seed in effect.
    pub client_seed: String,
    /// Lifecycle state.
    pub state: RoundState,
    /// When the round opened.
    pub created_at: DateTime<Utc>,
    /// When betting closes.
    pub betting_closes_at: DateTime<Utc>,
    /// When the multiplier started rising.
    pub started_at: Option<DateTime<Utc>>,
    /// When the round crashed.
    pub ended_at: Option<DateTime<Utc>>,
    /// Server-computed multiplier at snapshot time.
    pub multiplier_bps: Bps,
    /// Curve parameters for local reproduction.
    pub curve: GrowthCurve,
    /// Crash point; only present once crashed.
    pub crash_bps: Option<Bps>,
    /// Revealed seed (hex); only present once crashed.
    pub server_seed: Option<String>,
}

impl RoundSnapshot {
    /// Build a snapshot at `now`. Secrets stay hidden until the crash.
    pub fn of(round: &Round, curve: &GrowthCurve, now: DateTime<Utc>) -> Self {
        let crashed = round.state == RoundState::Crashed;
        Self {
            id: round.id,
            sequence: round.sequence,
            server_seed_hash: round.seed_hash.to_hex(),
            client_seed: round.client_seed.clone(),
            state: round.state,
            created_at: round.created_at,
            betting_closes_at: round.betting_closes_at,
            started_at: round.started_at,
            ended_at: round.ended_at,
            multiplier_bps: round.multiplier_at(curve, now),
            curve: *curve,
            crash_bps: crashed.then_some(round.crash_bps),
            server_seed: round.revealed_seed().map(|s| s.to_hex()),
        }
    }
}

/// Server error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerError {
    /// Error code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
}

/// Error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Authentication failed.
    AuthFailed,
    /// Operation requires authentication.
    NotAuthenticated,
    /// Malformed or invalid request input.
    Validation,
    /// Well-formed request, but live state refused it.
    Precondition,
    /// Lost a settlement race ("too late", not "not enough").
    Conflict,
    /// Referenced round or bet does not exist.
    NotFound,
    /// Internal error.
    InternalError,
}

impl From<ErrorKind> for ErrorCode {
    fn from(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::Validation => Self::Validation,
            ErrorKind::Precondition => Self::Precondition,
            ErrorKind::Conflict => Self::Conflict,
            ErrorKind::NotFound => Self::NotFound,
        }
    }
}

impl From<&EngineError> for ServerError {
    fn from(err: &EngineError) -> Self {
        Self {
            code: err.kind().into(),
            message: err.to_string(),
        }
    }
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl RoundRecord {
    /// Serialize to binary (flat struct; safe for bincode).
    pub fn to_bytes(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(self)
    }

    /// Deserialize from binary.
    pub fn from_bytes(data: &[u8]) -> Result<Self, bincode::Error> {
        bincode::deserialize(data)
    }
}
