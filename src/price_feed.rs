// Price Feed Integration
//
// The settlement core only needs the latest mark price for an oracle key. Where the
// price comes from (oracle module, relayers, a fixed table in tests) is behind this trait.

use rust_decimal::Decimal;
use std::collections::BTreeMap;

pub trait OraclePriceFeed {
    /// Latest price for `oracle`, or `None` when no feed has reported.
    fn price(&self, oracle: &str) -> Option<Decimal>;
}

/// Fixed price table. Prices change only when set explicitly.
#[derive(Debug, Clone, Default)]
pub struct StaticOracle {
    prices: BTreeMap<String, Decimal>,
}

impl StaticOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_price(&mut self, oracle: &str, price: Decimal) {
        self.prices.insert(oracle.to_string(), price);
    }

    pub fn clear_price(&mut self, oracle: &str) {
        self.prices.remove(oracle);
    }
}

impl OraclePriceFeed for StaticOracle {
    fn price(&self, oracle: &str) -> Option<Decimal> {
        self.prices.get(oracle).copied().filter(|p| *p > Decimal::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn set_and_clear() {
        let mut oracle = StaticOracle::new();
        assert_eq!(oracle.price("eth"), None);

        oracle.set_price("eth", dec!(2000));
        assert_eq!(oracle.price("eth"), Some(dec!(2000)));

        oracle.clear_price("eth");
        assert_eq!(oracle.price("eth"), None);
    }

    #[test]
    fn non_positive_is_unavailable() {
        let mut oracle = StaticOracle::new();
        oracle.set_price("broken", dec!(0));
        assert_eq!(oracle.price("broken"), None);
    }
}
