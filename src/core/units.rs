//! Money and Multiplier Units
//!
//! All settlement math is integer-only. Balances and stakes are `u64` minor
//! units (cents); multipliers are `u32` basis points where 10_000 = 1.00x.
//! Floats are display-only and never feed back into settlement.
//!
//! ## Why basis points?
//!
//! - Two decimal places of multiplier precision (2.34x = 23_400 bps)
//! - Payout math fits in u128 intermediates with exact floor rounding
//! - Identical results on every platform

use std::fmt;

/// Monetary amount in minor units (cents). Never negative by construction.
pub type Amount = u64;

/// Signed profit/loss in minor units. Negative for a lost stake.
pub type Profit = i64;

/// Multiplier in basis points. 10_000 = 1.00x.
pub type Bps = u32;

/// 1.00x in basis points.
pub const BPS_ONE: Bps = 10_000;

/// Multiply a stake by a multiplier, flooring to minor units.
///
/// Uses a u128 intermediate so `stake * bps` cannot overflow.
#[inline]
pub fn gross_payout(stake: Amount, multiplier: Bps) -> Amount {
    let gross = stake as u128 * multiplier as u128 / BPS_ONE as u128;
    gross.min(u64::MAX as u128) as Amount
}

/// Profit portion of a cash-out: `stake * (multiplier - 1.00)`.
#[inline]
pub fn cashout_profit(stake: Amount, multiplier: Bps) -> Amount {
    gross_payout(stake, multiplier).saturating_sub(stake)
}

/// Wrapper for rendering an [`Amount`] as `"12.34"` in logs and messages.
pub struct DisplayAmount(pub Amount);

impl fmt::Display for DisplayAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

/// Wrapper for rendering a [`Bps`] multiplier as `"2.34x"`.
pub struct DisplayBps(pub Bps);

impl fmt::Display for DisplayBps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}x", self.0 / BPS_ONE, (self.0 % BPS_ONE) / 100)
    }
}
