//! Resting derivative orders and the per-market book that holds them.
//!
//! Matching happens elsewhere. This book only keeps resting limit orders in
//! price-then-arrival order so margin holds and reduce-only bookkeeping can
//! walk them deterministically.

use crate::types::{quo_truncate, truncate, MarketId, OrderHash, Price, Quote, Side, SubaccountId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    /// Rests on the book until filled or cancelled.
    Limit,
    /// Crosses immediately. At most one per (market, subaccount) per block.
    Market,
}

/// An order as handed over by message handling, before admission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub market_id: MarketId,
    pub subaccount_id: SubaccountId,
    pub side: Side,
    pub order_type: OrderType,
    pub price: Decimal,
    pub quantity: Decimal,
    /// zero margin marks a reduce-only order
    pub margin: Quote,
    pub client_order_id: Option<String>,
}

impl OrderRequest {
    pub fn limit(
        market_id: MarketId,
        subaccount_id: SubaccountId,
        side: Side,
        price: Decimal,
        quantity: Decimal,
        margin: Decimal,
    ) -> Self {
        Self {
            market_id,
            subaccount_id,
            side,
            order_type: OrderType::Limit,
            price,
            quantity,
            margin: Quote::new(margin),
            client_order_id: None,
        }
    }

    pub fn reduce_only(
        market_id: MarketId,
        subaccount_id: SubaccountId,
        side: Side,
        price: Decimal,
        quantity: Decimal,
    ) -> Self {
        Self::limit(market_id, subaccount_id, side, price, quantity, Decimal::ZERO)
    }

    pub fn market(mut self) -> Self {
        self.order_type = OrderType::Market;
        self
    }

    pub fn with_client_id(mut self, cid: impl Into<String>) -> Self {
        self.client_order_id = Some(cid.into());
        self
    }

    pub fn is_reduce_only(&self) -> bool {
        self.margin.is_zero()
    }
}

/// A resting limit order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub hash: OrderHash,
    pub market_id: MarketId,
    pub subaccount_id: SubaccountId,
    pub side: Side,
    pub price: Price,
    pub quantity: Decimal,
    pub fillable: Decimal,
    pub margin: Quote,
    pub fee_rate: Decimal,
    pub client_order_id: Option<String>,
    /// arrival order within the book, earlier is lower
    pub sequence: u64,
}

impl Order {
    pub fn is_reduce_only(&self) -> bool {
        self.margin.is_zero()
    }

    pub fn is_filled(&self) -> bool {
        self.fillable <= Decimal::ZERO
    }

    /// Deposit still reserved for the unfilled part: margin share plus maker fee.
    /// Reduce-only orders reserve nothing.
    pub fn remaining_hold(&self) -> Quote {
        if self.fillable <= Decimal::ZERO || self.is_reduce_only() {
            return Quote::zero();
        }
        let margin_share = quo_truncate(self.margin.value() * self.fillable, self.quantity);
        let fee = truncate(self.fillable * self.price.value() * self.fee_rate);
        Quote::new(margin_share + fee)
    }

    /// Consumes `quantity` from the fillable amount, returning the hold it frees.
    pub fn fill(&mut self, quantity: Decimal) -> Quote {
        debug_assert!(quantity <= self.fillable, "cannot fill more than fillable");
        let before = self.remaining_hold();
        self.fillable = (self.fillable - quantity).max(Decimal::ZERO);
        before.sub(self.remaining_hold())
    }

    // price strictly better than `price` from this order's side
    pub fn is_better_than(&self, price: Price) -> bool {
        match self.side {
            Side::Long => self.price > price,
            Side::Short => self.price < price,
        }
    }
}

/// Priority key. Price first, then arrival.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct OrderKey {
    price: Price,
    sequence: u64,
}

#[derive(Debug, Clone)]
pub struct OrderBook {
    pub market_id: MarketId,
    /// ascending by price, best bid is the last entry
    bids: BTreeMap<OrderKey, Order>,
    /// ascending by price, best ask is the first entry
    asks: BTreeMap<OrderKey, Order>,
    index: BTreeMap<OrderHash, (Side, OrderKey)>,
    client_ids: BTreeMap<(SubaccountId, String), OrderHash>,
}

impl OrderBook {
    pub fn new(market_id: MarketId) -> Self {
        Self {
            market_id,
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            index: BTreeMap::new(),
            client_ids: BTreeMap::new(),
        }
    }

    fn side_map(&self, side: Side) -> &BTreeMap<OrderKey, Order> {
        match side {
            Side::Long => &self.bids,
            Side::Short => &self.asks,
        }
    }

    fn side_map_mut(&mut self, side: Side) -> &mut BTreeMap<OrderKey, Order> {
        match side {
            Side::Long => &mut self.bids,
            Side::Short => &mut self.asks,
        }
    }

    pub fn insert(&mut self, order: Order) {
        let key = OrderKey {
            price: order.price,
            sequence: order.sequence,
        };
        let side = order.side;
        self.index.insert(order.hash, (side, key));
        if let Some(cid) = &order.client_order_id {
            self.client_ids.insert((order.subaccount_id, cid.clone()), order.hash);
        }
        self.side_map_mut(side).insert(key, order);
    }

    pub fn remove(&mut self, hash: OrderHash) -> Option<Order> {
        let (side, key) = self.index.remove(&hash)?;
        let order = self.side_map_mut(side).remove(&key)?;
        if let Some(cid) = &order.client_order_id {
            self.client_ids.remove(&(order.subaccount_id, cid.clone()));
        }
        Some(order)
    }

    pub fn get(&self, hash: OrderHash) -> Option<&Order> {
        let (side, key) = self.index.get(&hash)?;
        self.side_map(*side).get(key)
    }

    pub fn get_mut(&mut self, hash: OrderHash) -> Option<&mut Order> {
        let (side, key) = *self.index.get(&hash)?;
        self.side_map_mut(side).get_mut(&key)
    }

    pub fn hash_by_client_id(&self, subaccount_id: SubaccountId, cid: &str) -> Option<OrderHash> {
        self.client_ids.get(&(subaccount_id, cid.to_string())).copied()
    }

    /// A subaccount's resting orders on one side, best price first, then arrival.
    pub fn subaccount_orders(&self, subaccount_id: SubaccountId, side: Side) -> Vec<&Order> {
        let mine = self
            .side_map(side)
            .values()
            .filter(|o| o.subaccount_id == subaccount_id);
        match side {
            Side::Long => {
                let mut bids: Vec<&Order> = mine.collect();
                bids.sort_by(|a, b| b.price.cmp(&a.price).then(a.sequence.cmp(&b.sequence)));
                bids
            }
            Side::Short => mine.collect(),
        }
    }

    pub fn side_count(&self, subaccount_id: SubaccountId, side: Side) -> usize {
        self.side_map(side)
            .values()
            .filter(|o| o.subaccount_id == subaccount_id)
            .count()
    }

    pub fn orders(&self) -> impl Iterator<Item = &Order> {
        self.bids.values().chain(self.asks.values())
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}
