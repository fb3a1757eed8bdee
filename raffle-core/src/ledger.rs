use crate::error::{CoreError, Result};
use crate::types::{Address, Amount};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};

/// Host ledger holding account balances.
///
/// `transfer` is all-or-nothing: either both balances change or neither does.
pub trait Ledger: Send + Sync {
    fn balance_of(&self, account: &Address) -> Amount;

    fn transfer(&self, from: &Address, to: &Address, amount: Amount) -> Result<()>;
}

/// Ledger kept in process memory, used for local deployments and tests
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    balances: RwLock<HashMap<Address, Amount>>,
    frozen: RwLock<HashSet<Address>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Credit an account out of thin air (local faucet)
    pub fn mint(&self, to: &Address, amount: Amount) -> Result<()> {
        let mut balances = self.balances.write();
        let balance = balances.entry(to.clone()).or_default();
        *balance = balance
            .checked_add(amount)
            .ok_or_else(|| CoreError::ledger(format!("balance overflow for {}", to)))?;

        tracing::debug!("Minted {} to {}", amount, to);
        Ok(())
    }

    /// Reject every incoming transfer to `account` until unfrozen
    pub fn freeze(&self, account: &Address) {
        self.frozen.write().insert(account.clone());
        tracing::debug!("Account {} frozen", account);
    }

    pub fn unfreeze(&self, account: &Address) {
        self.frozen.write().remove(account);
    }

    pub fn is_frozen(&self, account: &Address) -> bool {
        self.frozen.read().contains(account)
    }
}

impl Ledger for InMemoryLedger {
    fn balance_of(&self, account: &Address) -> Amount {
        self.balances
            .read()
            .get(account)
            .copied()
            .unwrap_or(Amount::ZERO)
    }

    fn transfer(&self, from: &Address, to: &Address, amount: Amount) -> Result<()> {
        if self.is_frozen(to) {
            return Err(CoreError::ledger(format!(
                "account {} rejected the transfer",
                to
            )));
        }

        let mut balances = self.balances.write();
        let available = balances.get(from).copied().unwrap_or(Amount::ZERO);
        let remaining = available
            .checked_sub(amount)
            .ok_or(CoreError::InsufficientFunds {
                need: amount,
                available,
            })?;

        if from == to {
            return Ok(());
        }

        let credited = balances
            .get(to)
            .copied()
            .unwrap_or(Amount::ZERO)
            .checked_add(amount)
            .ok_or_else(|| CoreError::ledger(format!("balance overflow for {}", to)))?;

        balances.insert(from.clone(), remaining);
        balances.insert(to.clone(), credited);

        tracing::debug!("Transferred {} from {} to {}", amount, from, to);
        Ok(())
    }
}
