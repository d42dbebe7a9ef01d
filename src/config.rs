//! Configuration
//!
//! Engine timing/policy knobs and server settings, with defaults and an
//! environment-variable path for deployment. The growth-curve parameters
//! live here too: they are part of the public contract and are published
//! with every round.

use std::net::SocketAddr;
use std::time::Duration;

use crate::core::curve::GrowthCurve;
use crate::core::units::Amount;

/// Round engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long betting stays open after a round is created.
    pub betting_window: Duration,
    /// Pause between a crash and the next round opening.
    pub cooldown: Duration,
    /// Cadence of the clock's multiplier checks and tick broadcasts.
    pub tick_interval: Duration,
    /// Minimum stake in minor units.
    pub min_stake: Amount,
    /// Maximum stake in minor units.
    pub max_stake: Amount,
    /// Whether bets are accepted after the round goes Active.
    /// The single explicit late-join policy: off means Pending only.
    pub allow_late_bets: bool,
    /// Demo balance granted at first authentication.
    pub demo_starting_balance: Amount,
    /// Public multiplier growth curve.
    pub curve: GrowthCurve,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            betting_window: Duration::from_secs(10),
            cooldown: Duration::from_secs(5),
            tick_interval: Duration::from_millis(100),
            min_stake: 10,            // 0.10
            max_stake: 100_000_00,    // 100,000.00
            allow_late_bets: false,
            demo_starting_balance: 100_000, // 1,000.00
            curve: GrowthCurve::default(),
        }
    }
}

impl EngineConfig {
    /// Build from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            betting_window: env_secs("CRASH_BETTING_WINDOW_SECS")
                .unwrap_or(defaults.betting_window),
            cooldown: env_secs("CRASH_COOLDOWN_SECS").unwrap_or(defaults.cooldown),
            tick_interval: env_millis("CRASH_TICK_INTERVAL_MS")
                .unwrap_or(defaults.tick_interval),
            min_stake: env_u64("CRASH_MIN_STAKE").unwrap_or(defaults.min_stake),
            max_stake: env_u64("CRASH_MAX_STAKE").unwrap_or(defaults.max_stake),
            allow_late_bets: std::env::var("CRASH_ALLOW_LATE_BETS")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(defaults.allow_late_bets),
            demo_starting_balance: env_u64("CRASH_DEMO_BALANCE")
                .unwrap_or(defaults.demo_starting_balance),
            curve: defaults.curve,
        }
    }
}

/// Network server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Idle timeout before a silent connection is dropped.
    pub idle_timeout: Duration,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".parse().expect("static addr parses"),
            max_connections: 1000,
            idle_timeout: Duration::from_secs(300),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ServerConfig {
    /// Build from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind_addr: std::env::var("CRASH_BIND_ADDR")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.bind_addr),
            max_connections: env_u64("CRASH_MAX_CONNECTIONS")
                .map(|v| v as usize)
                .unwrap_or(defaults.max_connections),
            idle_timeout: env_secs("CRASH_IDLE_TIMEOUT_SECS").unwrap_or(defaults.idle_timeout),
            version: defaults.version,
        }
    }
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn env_secs(key: &str) -> Option<Duration> {
    env_u64(key).map(Duration::from_secs)
}

fn env_millis(key: &str) -> Option<Duration> {
    env_u64(key).map(Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.betting_window, Duration::from_secs(10));
        assert_eq!(config.tick_interval, Duration::from_millis(100));
        assert!(!config.allow_late_bets);
        assert!(config.min_stake > 0);
        assert!(config.max_stake > config.min_stake);
    }

    #[test]
    fn test_server_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.max_connections, 1000);
        assert_eq!(config.bind_addr.port(), 8080);
    }
}
