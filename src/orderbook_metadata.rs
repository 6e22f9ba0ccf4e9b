// 3.0: per (market, subaccount, side) tallies of resting orders. the reduce-only walk reads
// aggregate_reduce_only_quantity from here instead of rescanning the book.

use crate::order::{Order, OrderBook};
use crate::types::{MarketId, Side, SubaccountId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubaccountOrderbookMetadata {
    pub reduce_only_limit_order_count: u32,
    pub aggregate_reduce_only_quantity: Decimal,
    pub vanilla_limit_order_count: u32,
    pub aggregate_vanilla_quantity: Decimal,
}

impl SubaccountOrderbookMetadata {
    pub fn is_empty(&self) -> bool {
        self.reduce_only_limit_order_count == 0 && self.vanilla_limit_order_count == 0
    }

    fn add(&mut self, reduce_only: bool, quantity: Decimal) {
        if reduce_only {
            self.reduce_only_limit_order_count += 1;
            self.aggregate_reduce_only_quantity += quantity;
        } else {
            self.vanilla_limit_order_count += 1;
            self.aggregate_vanilla_quantity += quantity;
        }
    }

    fn remove(&mut self, reduce_only: bool, quantity: Decimal) {
        if reduce_only {
            self.reduce_only_limit_order_count = self.reduce_only_limit_order_count.saturating_sub(1);
            self.aggregate_reduce_only_quantity = (self.aggregate_reduce_only_quantity - quantity).max(Decimal::ZERO);
        } else {
            self.vanilla_limit_order_count = self.vanilla_limit_order_count.saturating_sub(1);
            self.aggregate_vanilla_quantity = (self.aggregate_vanilla_quantity - quantity).max(Decimal::ZERO);
        }
    }

    fn shrink(&mut self, reduce_only: bool, quantity: Decimal) {
        if reduce_only {
            self.aggregate_reduce_only_quantity = (self.aggregate_reduce_only_quantity - quantity).max(Decimal::ZERO);
        } else {
            self.aggregate_vanilla_quantity = (self.aggregate_vanilla_quantity - quantity).max(Decimal::ZERO);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MetadataKey {
    pub market_id: MarketId,
    pub subaccount_id: SubaccountId,
    pub side: Side,
}

impl MetadataKey {
    pub fn new(market_id: MarketId, subaccount_id: SubaccountId, side: Side) -> Self {
        Self {
            market_id,
            subaccount_id,
            side,
        }
    }

    fn of(order: &Order) -> Self {
        Self::new(order.market_id, order.subaccount_id, order.side)
    }
}

/// Lazily created entries, dropped again once both counts reach zero.
#[derive(Debug, Clone, Default)]
pub struct OrderbookMetadataStore {
    entries: BTreeMap<MetadataKey, SubaccountOrderbookMetadata>,
}

impl OrderbookMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: MetadataKey) -> Option<&SubaccountOrderbookMetadata> {
        self.entries.get(&key)
    }

    /// Reads through to an empty tally when nothing rests.
    pub fn get_or_default(&self, key: MetadataKey) -> SubaccountOrderbookMetadata {
        self.entries.get(&key).cloned().unwrap_or_default()
    }

    pub fn record_added(&mut self, order: &Order) {
        self.entries
            .entry(MetadataKey::of(order))
            .or_default()
            .add(order.is_reduce_only(), order.fillable);
    }

    /// `order.fillable` must still be the amount that was resting.
    pub fn record_removed(&mut self, order: &Order) {
        let key = MetadataKey::of(order);
        if let Some(meta) = self.entries.get_mut(&key) {
            meta.remove(order.is_reduce_only(), order.fillable);
            if meta.is_empty() {
                self.entries.remove(&key);
            }
        }
    }

    /// Partial fill or reduce-only resize that leaves the order resting.
    pub fn record_shrunk(&mut self, order: &Order, quantity: Decimal) {
        if let Some(meta) = self.entries.get_mut(&MetadataKey::of(order)) {
            meta.shrink(order.is_reduce_only(), quantity);
        }
    }

    pub fn remove_market(&mut self, market_id: MarketId) {
        self.entries.retain(|k, _| k.market_id != market_id);
    }

    pub fn entries(&self) -> impl Iterator<Item = (&MetadataKey, &SubaccountOrderbookMetadata)> {
        self.entries.iter()
    }

    /// Rebuilds the tallies of one book from scratch.
    pub fn recompute(book: &OrderBook) -> BTreeMap<MetadataKey, SubaccountOrderbookMetadata> {
        let mut fresh: BTreeMap<MetadataKey, SubaccountOrderbookMetadata> = BTreeMap::new();
        for order in book.orders() {
            fresh
                .entry(MetadataKey::of(order))
                .or_default()
                .add(order.is_reduce_only(), order.fillable);
        }
        fresh
    }

    pub fn market_entries(&self, market_id: MarketId) -> BTreeMap<MetadataKey, SubaccountOrderbookMetadata> {
        self.entries
            .iter()
            .filter(|(k, _)| k.market_id == market_id)
            .map(|(k, v)| (*k, v.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{OrderHash, Price, Quote};
    use rust_decimal_macros::dec;

    fn order(hash: u64, qty: Decimal, margin: Decimal) -> Order {
        Order {
            hash: OrderHash(hash),
            market_id: MarketId(1),
            subaccount_id: SubaccountId(1),
            side: Side::Short,
            price: Price::new_unchecked(dec!(10)),
            quantity: qty,
            fillable: qty,
            margin: Quote::new(margin),
            fee_rate: Decimal::ZERO,
            client_order_id: None,
            sequence: hash,
        }
    }

    #[test]
    fn lazily_created_and_deleted() {
        let mut store = OrderbookMetadataStore::new();
        let key = MetadataKey::new(MarketId(1), SubaccountId(1), Side::Short);
        assert!(store.get(key).is_none());

        let ro = order(1, dec!(2), dec!(0));
        let vanilla = order(2, dec!(3), dec!(5));
        store.record_added(&ro);
        store.record_added(&vanilla);

        let meta = store.get(key).unwrap();
        assert_eq!(meta.reduce_only_limit_order_count, 1);
        assert_eq!(meta.aggregate_reduce_only_quantity, dec!(2));
        assert_eq!(meta.vanilla_limit_order_count, 1);
        assert_eq!(meta.aggregate_vanilla_quantity, dec!(3));

        store.record_removed(&ro);
        store.record_removed(&vanilla);
        assert!(store.get(key).is_none());
    }

    #[test]
    fn shrink_keeps_count() {
        let mut store = OrderbookMetadataStore::new();
        let ro = order(1, dec!(2), dec!(0));
        store.record_added(&ro);
        store.record_shrunk(&ro, dec!(0.5));

        let meta = store.get_or_default(MetadataKey::of(&ro));
        assert_eq!(meta.reduce_only_limit_order_count, 1);
        assert_eq!(meta.aggregate_reduce_only_quantity, dec!(1.5));
    }
}
