//! Round Clock
//!
//! The single timer task that owns the round lifecycle: open a round, wait
//! out the betting window, activate, tick the multiplier until the curve
//! reaches the crash point, crash + settle, cool down, repeat. Request
//! handlers never drive transitions themselves; they only observe.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{error, info, instrument, warn};

use crate::engine::Engine;

/// Drives one round after another until shut down.
pub struct RoundClock {
    engine: Arc<Engine>,
}

impl RoundClock {
    /// Build a clock over the engine.
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }

    /// Run rounds until the shutdown signal fires.
    #[instrument(skip(self, shutdown))]
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!("round clock running");
        loop {
            let round = match self.engine.open_round(Utc::now()) {
                Ok(round) => round,
                Err(err) => {
                    // Only reachable if a previous round was left un-crashed;
                    // back off and retry rather than spinning.
                    error!("failed to open round: {err}");
                    tokio::select! {
                        _ = sleep(self.engine.config().cooldown) => continue,
                        _ = shutdown.recv() => break,
                    }
                }
            };

            // Betting window.
            let wait = (round.betting_closes_at - Utc::now())
                .to_std()
                .unwrap_or(Duration::ZERO);
            tokio::select! {
                _ = sleep(wait) => {}
                _ = shutdown.recv() => break,
            }

            if let Err(err) = self.engine.activate_round(round.id, Utc::now()) {
                error!(round_id = %round.id, "failed to activate round: {err}");
                continue;
            }

            // Active phase: sample the curve until the crash point is due.
            let mut ticker = interval(self.engine.config().tick_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let crashed = loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown.recv() => return,
                }
                match self.engine.tick_round(round.id, Utc::now()) {
                    Ok(outcome) if outcome.crash_due => break true,
                    Ok(_) => {}
                    Err(err) => {
                        warn!(round_id = %round.id, "tick failed: {err}");
                        break false;
                    }
                }
            };

            if crashed {
                if let Err(err) = self.engine.crash_round(round.id, Utc::now()) {
                    error!(round_id = %round.id, "failed to crash round: {err}");
                }
            }

            // Cool-down before the next round opens.
            tokio::select! {
                _ = sleep(self.engine.config().cooldown) => {}
                _ = shutdown.recv() => break,
            }
        }
        info!("round clock stopped");
    }
}
