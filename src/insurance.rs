// 6.0: per-market insurance funds. settlement draws shortfalls from here before any haircut
// and sends surplus back. the store is a trait so the engine never owns fund balances.

use crate::types::{MarketId, Quote};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InsuranceError {
    #[error("no insurance fund for {0}")]
    FundNotFound(MarketId),

    #[error("insufficient insurance funds for {market_id}: requested {requested}, balance {balance}")]
    InsufficientFunds {
        market_id: MarketId,
        requested: Quote,
        balance: Quote,
    },
}

pub trait InsuranceFundStore {
    /// `None` when the market has no fund.
    fn balance(&self, market_id: MarketId) -> Option<Quote>;

    fn debit(&mut self, market_id: MarketId, amount: Quote) -> Result<(), InsuranceError>;

    fn credit(&mut self, market_id: MarketId, amount: Quote) -> Result<(), InsuranceError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsuranceFund {
    pub balance: Quote,
    pub total_deposits: Quote,
    pub total_payouts: Quote,
}

impl InsuranceFund {
    pub fn new(initial_balance: Quote) -> Self {
        Self {
            balance: initial_balance,
            total_deposits: initial_balance,
            total_payouts: Quote::zero(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryInsurance {
    funds: BTreeMap<MarketId, InsuranceFund>,
}

impl InMemoryInsurance {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_fund(&mut self, market_id: MarketId, initial_balance: Quote) {
        self.funds.insert(market_id, InsuranceFund::new(initial_balance));
    }

    pub fn fund(&self, market_id: MarketId) -> Option<&InsuranceFund> {
        self.funds.get(&market_id)
    }
}

impl InsuranceFundStore for InMemoryInsurance {
    fn balance(&self, market_id: MarketId) -> Option<Quote> {
        self.funds.get(&market_id).map(|f| f.balance)
    }

    fn debit(&mut self, market_id: MarketId, amount: Quote) -> Result<(), InsuranceError> {
        let fund = self
            .funds
            .get_mut(&market_id)
            .ok_or(InsuranceError::FundNotFound(market_id))?;
        if fund.balance < amount {
            return Err(InsuranceError::InsufficientFunds {
                market_id,
                requested: amount,
                balance: fund.balance,
            });
        }
        fund.balance = fund.balance.sub(amount);
        fund.total_payouts = fund.total_payouts.add(amount);
        Ok(())
    }

    fn credit(&mut self, market_id: MarketId, amount: Quote) -> Result<(), InsuranceError> {
        let fund = self
            .funds
            .get_mut(&market_id)
            .ok_or(InsuranceError::FundNotFound(market_id))?;
        fund.balance = fund.balance.add(amount);
        fund.total_deposits = fund.total_deposits.add(amount);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn debit_and_credit() {
        let mut store = InMemoryInsurance::new();
        store.create_fund(MarketId(1), Quote::new(dec!(300000)));

        store.debit(MarketId(1), Quote::new(dec!(200000))).unwrap();
        assert_eq!(store.balance(MarketId(1)).unwrap().value(), dec!(100000));

        store.credit(MarketId(1), Quote::new(dec!(5))).unwrap();
        let fund = store.fund(MarketId(1)).unwrap();
        assert_eq!(fund.balance.value(), dec!(100005));
        assert_eq!(fund.total_payouts.value(), dec!(200000));
    }

    #[test]
    fn overdraw_rejected() {
        let mut store = InMemoryInsurance::new();
        store.create_fund(MarketId(1), Quote::new(dec!(10)));
        let err = store.debit(MarketId(1), Quote::new(dec!(11)));
        assert!(matches!(err, Err(InsuranceError::InsufficientFunds { .. })));
        assert_eq!(store.balance(MarketId(1)).unwrap().value(), dec!(10));
    }

    #[test]
    fn missing_fund() {
        let mut store = InMemoryInsurance::new();
        assert!(store.balance(MarketId(9)).is_none());
        assert_eq!(store.credit(MarketId(9), Quote::zero()), Err(InsuranceError::FundNotFound(MarketId(9))));
    }
}
