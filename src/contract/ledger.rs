//! Per-contract balances backing invocation rewards. Transfers are the only
//! mutation the execution core performs here; funding and settlement happen
//! upstream.

use core::sync::atomic::{AtomicI64, Ordering};

use crate::config::CONTRACT_COUNT;

/// Returned by [`ContractLedger::transfer`] when the debit cannot be made.
pub const TRANSFER_REFUSED: i64 = -1;

pub struct ContractLedger {
    balances: Box<[AtomicI64]>,
}

impl ContractLedger {
    pub fn new() -> Self {
        let mut balances = Vec::with_capacity(CONTRACT_COUNT);
        balances.resize_with(CONTRACT_COUNT, || AtomicI64::new(0));
        Self {
            balances: balances.into_boxed_slice(),
        }
    }

    #[inline]
    pub fn balance(&self, contract_index: usize) -> i64 {
        self.balances
            .get(contract_index)
            .map(|balance| balance.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Credit a contract account (boot funding, block rewards).
    pub fn deposit(&self, contract_index: usize, amount: i64) -> bool {
        if amount < 0 {
            return false;
        }
        match self.balances.get(contract_index) {
            Some(balance) => {
                balance.fetch_add(amount, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    /// Move `amount` between contract accounts. Returns the source balance
    /// left after the debit, or [`TRANSFER_REFUSED`] when the amount is
    /// negative, an index is out of range, or funds are insufficient.
    pub fn transfer(&self, from: usize, to: usize, amount: i64) -> i64 {
        if amount < 0 || from >= self.balances.len() || to >= self.balances.len() {
            return TRANSFER_REFUSED;
        }
        if amount == 0 || from == to {
            return self.balances[from].load(Ordering::Relaxed);
        }

        let source = &self.balances[from];
        let mut current = source.load(Ordering::Relaxed);
        loop {
            if current < amount {
                return TRANSFER_REFUSED;
            }
            match source.compare_exchange_weak(
                current,
                current - amount,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(observed) => current = observed,
            }
        }
        self.balances[to].fetch_add(amount, Ordering::Relaxed);
        current - amount
    }
}

impl Default for ContractLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_moves_funds() {
        let ledger = ContractLedger::new();
        ledger.deposit(1, 100);
        assert_eq!(ledger.transfer(1, 2, 40), 60);
        assert_eq!(ledger.balance(1), 60);
        assert_eq!(ledger.balance(2), 40);
    }

    #[test]
    fn test_insufficient_funds_refused() {
        let ledger = ContractLedger::new();
        ledger.deposit(1, 10);
        assert_eq!(ledger.transfer(1, 2, 11), TRANSFER_REFUSED);
        assert_eq!(ledger.balance(1), 10);
        assert_eq!(ledger.balance(2), 0);
    }

    #[test]
    fn test_invalid_arguments_refused() {
        let ledger = ContractLedger::new();
        assert_eq!(ledger.transfer(0, 1, -5), TRANSFER_REFUSED);
        assert_eq!(ledger.transfer(CONTRACT_COUNT, 1, 5), TRANSFER_REFUSED);
        assert!(!ledger.deposit(0, -1));
    }

    #[test]
    fn test_zero_and_self_transfer_keep_balance() {
        let ledger = ContractLedger::new();
        ledger.deposit(3, 25);
        assert_eq!(ledger.transfer(3, 3, 10), 25);
        assert_eq!(ledger.transfer(3, 4, 0), 25);
        assert_eq!(ledger.balance(3), 25);
    }
}
