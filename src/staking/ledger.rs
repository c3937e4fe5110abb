//! External collaborators: the pool's asset ledger and the receipt token.
//!
//! The core reads and moves balances only through these traits; it never
//! stores holder balances itself. The in-memory implementations back the
//! tests and the scenario simulator.

use std::collections::HashMap;

use super::errors::{StakingError, StakingResult};
use super::types::{Amount, Identity};

/// Underlying-asset balance held by the pool.
pub trait PoolLedger {
    /// Current free balance, including liquidity reserved for covered claims.
    fn balance(&self) -> Amount;

    /// Externally held fees/yield that `harvest` would pull in.
    fn pending_harvest(&self) -> Amount;

    /// Pull externally held fees/yield into the pool. Returns the amount pulled.
    fn harvest(&mut self) -> Amount;

    /// Liquidity arrival (deposit, validator exit proceeds, top-up).
    fn credit(&mut self, amount: Amount);

    fn pay_out(&mut self, to: &Identity, amount: Amount) -> StakingResult<()>;
}

/// Receipt-token ledger.
pub trait ReceiptToken {
    fn live_supply(&self) -> Amount;
    fn balance_of(&self, account: &Identity) -> Amount;
    fn mint(&mut self, account: &Identity, amount: Amount);
    fn burn(&mut self, account: &Identity, amount: Amount) -> StakingResult<()>;
}

// =============================================================================
// IN-MEMORY POOL
// =============================================================================

#[derive(Debug, Clone, Default)]
pub struct InMemoryPool {
    balance: Amount,
    /// Yield accrued outside the pool, waiting for `harvest`.
    unharvested: Amount,
    paid_out: HashMap<Identity, Amount>,
}

impl InMemoryPool {
    pub fn new(balance: Amount) -> Self {
        Self {
            balance,
            ..Self::default()
        }
    }

    /// Simulate execution-layer fees landing in an external vault.
    pub fn accrue_external_yield(&mut self, amount: Amount) {
        self.unharvested = self.unharvested.saturating_add(amount);
    }

    /// Total paid to `account` over the pool's lifetime.
    pub fn paid_to(&self, account: &Identity) -> Amount {
        self.paid_out.get(account).copied().unwrap_or(0)
    }
}

impl PoolLedger for InMemoryPool {
    fn balance(&self) -> Amount {
        self.balance
    }

    fn pending_harvest(&self) -> Amount {
        self.unharvested
    }

    fn harvest(&mut self) -> Amount {
        let pulled = std::mem::take(&mut self.unharvested);
        self.balance = self.balance.saturating_add(pulled);
        pulled
    }

    fn credit(&mut self, amount: Amount) {
        self.balance = self.balance.saturating_add(amount);
    }

    fn pay_out(&mut self, to: &Identity, amount: Amount) -> StakingResult<()> {
        if amount > self.balance {
            return Err(StakingError::InsufficientPoolBalance {
                balance: self.balance,
                requested: amount,
            });
        }
        self.balance -= amount;
        *self.paid_out.entry(*to).or_insert(0) += amount;
        Ok(())
    }
}

// =============================================================================
// IN-MEMORY RECEIPT TOKEN
// =============================================================================

#[derive(Debug, Clone, Default)]
pub struct InMemoryReceiptToken {
    supply: Amount,
    balances: HashMap<Identity, Amount>,
}

impl InMemoryReceiptToken {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ReceiptToken for InMemoryReceiptToken {
    fn live_supply(&self) -> Amount {
        self.supply
    }

    fn balance_of(&self, account: &Identity) -> Amount {
        self.balances.get(account).copied().unwrap_or(0)
    }

    fn mint(&mut self, account: &Identity, amount: Amount) {
        self.supply = self.supply.saturating_add(amount);
        *self.balances.entry(*account).or_insert(0) += amount;
    }

    fn burn(&mut self, account: &Identity, amount: Amount) -> StakingResult<()> {
        let balance = self.balance_of(account);
        if amount > balance {
            return Err(StakingError::InsufficientReceipts {
                account: *account,
                balance,
                requested: amount,
            });
        }
        let remaining = balance - amount;
        if remaining == 0 {
            self.balances.remove(account);
        } else {
            self.balances.insert(*account, remaining);
        }
        self.supply -= amount;
        Ok(())
    }
}
