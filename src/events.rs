// 11.0: every externally visible state change produces an event carrying the full updated
// entity, so indexers never have to read engine state. consumers match on EventPayload.

use crate::funding::{PerpetualMarketFunding, PerpetualMarketInfo};
use crate::market::{Market, MarketStatus, SettlementPrice};
use crate::order::Order;
use crate::position::Position;
use crate::settlement::SettlementOrigin;
use crate::types::{MarketId, Quote, SubaccountId, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(pub u64);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub block_time: Timestamp,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(id: EventId, block_time: Timestamp, payload: EventPayload) -> Self {
        Self {
            id,
            block_time,
            payload,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    // positions
    BatchDerivativePosition(BatchDerivativePositionEvent),

    // orders
    NewDerivativeOrder(NewDerivativeOrderEvent),
    CancelDerivativeOrder(CancelDerivativeOrderEvent),

    // funding
    PerpetualMarketFundingUpdate(PerpetualMarketFundingUpdateEvent),
    PerpetualMarketUpdate(PerpetualMarketUpdateEvent),

    // lifecycle
    MarketStatusUpdate(MarketStatusUpdateEvent),
    MarketSettled(MarketSettledEvent),
}

impl EventPayload {
    /// Stable name downstream indexers subscribe to.
    pub fn kind(&self) -> &'static str {
        match self {
            EventPayload::BatchDerivativePosition(_) => "EventBatchDerivativePosition",
            EventPayload::NewDerivativeOrder(_) => "EventNewDerivativeOrder",
            EventPayload::CancelDerivativeOrder(_) => "EventCancelDerivativeOrder",
            EventPayload::PerpetualMarketFundingUpdate(_) => "EventPerpetualMarketFundingUpdate",
            EventPayload::PerpetualMarketUpdate(_) => "EventPerpetualMarketUpdate",
            EventPayload::MarketStatusUpdate(_) => "EventMarketStatusUpdate",
            EventPayload::MarketSettled(_) => "EventMarketSettled",
        }
    }

    pub fn market_id(&self) -> MarketId {
        match self {
            EventPayload::BatchDerivativePosition(e) => e.market_id,
            EventPayload::NewDerivativeOrder(e) => e.order.market_id,
            EventPayload::CancelDerivativeOrder(e) => e.order.market_id,
            EventPayload::PerpetualMarketFundingUpdate(e) => e.market_id,
            EventPayload::PerpetualMarketUpdate(e) => e.market.id,
            EventPayload::MarketStatusUpdate(e) => e.market_id,
            EventPayload::MarketSettled(e) => e.market_id,
        }
    }
}

/// Post-trade state of one subaccount. `position` is `None` once closed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubaccountPosition {
    pub subaccount_id: SubaccountId,
    pub position: Option<Position>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchDerivativePositionEvent {
    pub market_id: MarketId,
    pub positions: Vec<SubaccountPosition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewDerivativeOrderEvent {
    pub order: Order,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CancelReason {
    UserRequested,
    ReduceOnlyExcess,
    MarketExpired,
    MarketDemolished,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelDerivativeOrderEvent {
    pub order: Order,
    pub reason: CancelReason,
    pub refunded: Quote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerpetualMarketFundingUpdateEvent {
    pub market_id: MarketId,
    pub funding: PerpetualMarketFunding,
    pub is_hourly_funding: bool,
    /// set on hourly updates only
    pub hourly_funding_rate: Option<Decimal>,
    pub mark_price: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerpetualMarketUpdateEvent {
    pub market: Market,
    pub info: PerpetualMarketInfo,
    pub funding: PerpetualMarketFunding,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketStatusUpdateEvent {
    pub market_id: MarketId,
    pub from: MarketStatus,
    pub to: MarketStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSettledEvent {
    pub market_id: MarketId,
    pub settlement_price: SettlementPrice,
    pub origin: SettlementOrigin,
    pub positions_closed: usize,
    pub required_payout: Quote,
    pub total_paid: Quote,
    pub insurance_draw: Quote,
    pub haircut: Decimal,
    pub surplus_to_insurance: Quote,
    pub surplus_to_auction: Quote,
}

pub trait EventEmitter {
    fn emit(&mut self, event: Event);
}

#[derive(Debug, Default)]
pub struct EventCollector {
    events: Vec<Event>,
    next_id: u64,
}

impl EventCollector {
    pub fn new() -> Self {
        Self {
            events: Vec::new(),
            next_id: 1,
        }
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn of_kind<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = &'a Event> + 'a {
        self.events.iter().filter(move |e| e.payload.kind() == kind)
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    /// Keeps only the newest `max` events.
    pub fn retain_last(&mut self, max: usize) {
        if self.events.len() > max {
            let drain_count = self.events.len() - max;
            self.events.drain(0..drain_count);
        }
    }

    pub fn next_id(&mut self) -> EventId {
        let id = EventId(self.next_id);
        self.next_id += 1;
        id
    }
}

impl EventEmitter for EventCollector {
    fn emit(&mut self, event: Event) {
        self.events.push(event);
    }
}
