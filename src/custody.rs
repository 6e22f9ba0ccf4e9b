// 9.2 custody.rs: the deposit ledger seen from the settlement core. real token movement
// lives in the bank module; this trait is the seam and InMemoryDeposits backs tests and the sim.

use crate::types::{Quote, SubaccountId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Balance of one (subaccount, denom). Holds lower `available_balance` only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deposit {
    pub available_balance: Quote,
    pub total_balance: Quote,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CustodyError {
    #[error("insufficient deposit for {subaccount_id} in {denom}: required {required}, available {available}")]
    InsufficientDeposit {
        subaccount_id: SubaccountId,
        denom: String,
        required: Quote,
        available: Quote,
    },
}

pub trait DepositKeeper {
    fn deposit(&self, subaccount_id: SubaccountId, denom: &str) -> Deposit;

    fn spendable_funds(&self, subaccount_id: SubaccountId, denom: &str) -> Quote {
        self.deposit(subaccount_id, denom).available_balance
    }

    /// Locks `amount` of available balance.
    fn reserve_margin(&mut self, subaccount_id: SubaccountId, denom: &str, amount: Quote) -> Result<(), CustodyError>;

    /// Unlocks a previous reservation.
    fn release_margin(&mut self, subaccount_id: SubaccountId, denom: &str, amount: Quote);

    /// Moves reserved funds out of the subaccount into a market's margin pool.
    fn charge_reserved(&mut self, subaccount_id: SubaccountId, denom: &str, amount: Quote);

    /// Pays funds into the subaccount. `to_total` also raises total balance.
    fn credit_payout(&mut self, subaccount_id: SubaccountId, denom: &str, amount: Quote, to_total: bool);
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryDeposits {
    balances: BTreeMap<(SubaccountId, String), Deposit>,
}

impl InMemoryDeposits {
    pub fn new() -> Self {
        Self::default()
    }

    /// Funds a subaccount from outside, e.g. a bank transfer.
    pub fn fund(&mut self, subaccount_id: SubaccountId, denom: &str, amount: Quote) {
        self.credit_payout(subaccount_id, denom, amount, true);
    }

    fn entry(&mut self, subaccount_id: SubaccountId, denom: &str) -> &mut Deposit {
        self.balances.entry((subaccount_id, denom.to_string())).or_default()
    }
}

impl DepositKeeper for InMemoryDeposits {
    fn deposit(&self, subaccount_id: SubaccountId, denom: &str) -> Deposit {
        self.balances
            .get(&(subaccount_id, denom.to_string()))
            .copied()
            .unwrap_or_default()
    }

    fn reserve_margin(&mut self, subaccount_id: SubaccountId, denom: &str, amount: Quote) -> Result<(), CustodyError> {
        let deposit = self.entry(subaccount_id, denom);
        if deposit.available_balance < amount {
            return Err(CustodyError::InsufficientDeposit {
                subaccount_id,
                denom: denom.to_string(),
                required: amount,
                available: deposit.available_balance,
            });
        }
        deposit.available_balance = deposit.available_balance.sub(amount);
        Ok(())
    }

    fn release_margin(&mut self, subaccount_id: SubaccountId, denom: &str, amount: Quote) {
        let deposit = self.entry(subaccount_id, denom);
        deposit.available_balance = deposit.available_balance.add(amount);
    }

    fn charge_reserved(&mut self, subaccount_id: SubaccountId, denom: &str, amount: Quote) {
        let deposit = self.entry(subaccount_id, denom);
        deposit.total_balance = deposit.total_balance.sub(amount);
    }

    fn credit_payout(&mut self, subaccount_id: SubaccountId, denom: &str, amount: Quote, to_total: bool) {
        let deposit = self.entry(subaccount_id, denom);
        deposit.available_balance = deposit.available_balance.add(amount);
        if to_total {
            deposit.total_balance = deposit.total_balance.add(amount);
        }
    }
}
