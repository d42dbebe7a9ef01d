//! Player Balances
//!
//! One `Amount` per (user, account kind), all mutations under a single
//! mutex. The debit path is one conditional check-and-subtract inside the
//! lock - the "subtract where balance >= stake" primitive - so a
//! read-then-write split can never lose an update, and the unsigned type
//! makes negative balances unrepresentable.

use std::collections::BTreeMap;
use std::sync::Mutex;

use thiserror::Error;

use crate::core::units::Amount;
use crate::game::bet::{AccountKind, UserId};

/// Balance mutation failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LedgerError {
    /// The conditional debit found less than the requested amount.
    #[error("insufficient balance: have {have}, need {need}")]
    InsufficientBalance {
        /// Balance at the instant of the check.
        have: Amount,
        /// Amount the debit asked for.
        need: Amount,
    },
}

/// All player balances.
#[derive(Default)]
pub struct Ledger {
    accounts: Mutex<BTreeMap<(UserId, AccountKind), Amount>>,
}

impl Ledger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Current balance; zero for accounts never touched.
    pub fn balance(&self, user: UserId, account: AccountKind) -> Amount {
        let accounts = self.accounts.lock().unwrap_or_else(|e| e.into_inner());
        accounts.get(&(user, account)).copied().unwrap_or(0)
    }

    /// Seed an account with a starting balance if it has never existed.
    /// Returns the balance after the call.
    pub fn ensure_seeded(&self, user: UserId, account: AccountKind, start: Amount) -> Amount {
        let mut accounts = self.accounts.lock().unwrap_or_else(|e| e.into_inner());
        *accounts.entry((user, account)).or_insert(start)
    }

    /// Atomically subtract `amount` iff the balance covers it.
    /// Returns the new balance.
    pub fn try_debit(
        &self,
        user: UserId,
        account: AccountKind,
        amount: Amount,
    ) -> Result<Amount, LedgerError> {
        let mut accounts = self.accounts.lock().unwrap_or_else(|e| e.into_inner());
        let balance = accounts.entry((user, account)).or_insert(0);
        if *balance < amount {
            return Err(LedgerError::InsufficientBalance {
                have: *balance,
                need: amount,
            });
        }
        *balance -= amount;
        Ok(*balance)
    }

    /// Add `amount` to the balance. Returns the new balance.
    ///
    /// Saturating: a u64 minor-unit balance overflowing is not a reachable
    /// state with stake caps in place, and truncating money would be worse.
    pub fn credit(&self, user: UserId, account: AccountKind, amount: Amount) -> Amount {
        let mut accounts = self.accounts.lock().unwrap_or_else(|e| e.into_inner());
        let balance = accounts.entry((user, account)).or_insert(0);
        *balance = balance.saturating_add(amount);
        *balance
    }
}
