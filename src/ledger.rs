// 4.3: position ledger. one BTreeMap keyed by (market, subaccount) so every walk over a
// market's positions happens in the same order on every node.

use crate::position::{Position, PositionKey};
use crate::types::{MarketId, Quote, SubaccountId};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default)]
pub struct PositionLedger {
    positions: BTreeMap<PositionKey, Position>,
}

impl PositionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, market_id: MarketId, subaccount_id: SubaccountId) -> Option<&Position> {
        self.positions.get(&PositionKey::new(market_id, subaccount_id))
    }

    /// Stores the result of a fill. `None` deletes the position.
    pub fn commit(&mut self, key: PositionKey, position: Option<Position>) {
        match position {
            Some(p) if p.quantity > rust_decimal::Decimal::ZERO => {
                debug_assert_eq!(p.key(), key);
                self.positions.insert(key, p);
            }
            _ => {
                self.positions.remove(&key);
            }
        }
    }

    pub fn by_market(&self, market_id: MarketId) -> impl Iterator<Item = &Position> {
        let start = PositionKey::new(market_id, SubaccountId(u64::MIN));
        let end = PositionKey::new(market_id, SubaccountId(u64::MAX));
        self.positions.range(start..=end).map(|(_, p)| p)
    }

    /// Drops every position of a market, returning them in key order.
    pub fn remove_market(&mut self, market_id: MarketId) -> Vec<Position> {
        let keys: Vec<PositionKey> = self.by_market(market_id).map(Position::key).collect();
        keys.iter()
            .filter_map(|k| self.positions.remove(k))
            .collect()
    }

    pub fn total_margin(&self, market_id: MarketId) -> Quote {
        self.by_market(market_id).map(|p| p.margin).sum()
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}
