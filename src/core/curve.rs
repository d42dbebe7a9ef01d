//! Multiplier Growth Curve
//!
//! The shared clock every observer derives the live multiplier from. The
//! curve is a stepwise compound function of elapsed time since `started_at`:
//! once per `tick_ms` of elapsed time the multiplier is multiplied by
//! `per_tick_bps / 10_000`, flooring after each step, saturating at
//! `max_bps`.
//!
//! The parameters are published with every round so any client or verifier
//! can reproduce the exact value at a given elapsed time. Floor-per-step is
//! part of the contract: evaluation order never changes the result.

use serde::{Deserialize, Serialize};

use super::units::{Bps, BPS_ONE};

/// Growth curve parameters.
///
/// Published in the round-opened event; clients may interpolate between
/// steps for display, but settlement uses only the stepwise value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrowthCurve {
    /// Milliseconds per growth step.
    pub tick_ms: u64,
    /// Compound factor per step, in basis points (10_060 = +0.6%/step).
    pub per_tick_bps: u32,
    /// Saturation cap, matching the maximum crash point.
    pub max_bps: Bps,
}

impl Default for GrowthCurve {
    fn default() -> Self {
        Self {
            tick_ms: 100,
            per_tick_bps: 10_060,
            max_bps: 1_000_000, // 100.00x
        }
    }
}

impl GrowthCurve {
    /// Multiplier after `elapsed_ms` of active play.
    ///
    /// Monotonically non-decreasing in elapsed time. The step count is
    /// bounded by the cap, so the loop terminates quickly even for absurd
    /// elapsed values.
    pub fn multiplier_bps(&self, elapsed_ms: u64) -> Bps {
        let steps = elapsed_ms / self.tick_ms.max(1);
        let mut m = BPS_ONE as u64;
        for _ in 0..steps {
            m = m * self.per_tick_bps as u64 / BPS_ONE as u64;
            if m >= self.max_bps as u64 {
                return self.max_bps;
            }
        }
        m as Bps
    }
}
