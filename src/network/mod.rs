//! Network Layer
//!
//! WebSocket request surface and event distribution. This layer is
//! **non-authoritative**: every settlement decision happens in the engine,
//! and every round transition belongs to the clock.

pub mod auth;
pub mod protocol;
pub mod server;

pub use auth::{validate_token, AuthConfig, AuthError, TokenClaims};
pub use protocol::{
    ClientMessage, ErrorCode, RoundSnapshot, ServerError, ServerMessage,
};
pub use server::{GameServer, GameServerError};
