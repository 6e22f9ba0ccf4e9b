// 8.0 engine/core.rs: main engine. holds markets, books, positions and funding state,
// plus handles to the deposit, insurance and oracle collaborators.

use super::config::EngineConfig;
use super::results::{BlockResult, ExchangeError};
use crate::config::ExchangeParams;
use crate::custody::{Deposit, DepositKeeper, InMemoryDeposits};
use crate::events::{Event, EventCollector, EventEmitter, EventPayload};
use crate::funding::{PerpetualMarketFunding, PerpetualMarketInfo};
use crate::insurance::{InMemoryInsurance, InsuranceFundStore};
use crate::ledger::PositionLedger;
use crate::market::Market;
use crate::order::{Order, OrderBook};
use crate::orderbook_metadata::{MetadataKey, OrderbookMetadataStore, SubaccountOrderbookMetadata};
use crate::position::Position;
use crate::price_feed::{OraclePriceFeed, StaticOracle};
use crate::types::{MarketId, OrderHash, Quote, Side, SubaccountId, Timestamp};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet};

/** 8.1: main engine struct. all state lives here, keyed in BTreeMaps so iteration order is fixed */
#[derive(Debug)]
pub struct Engine<D = InMemoryDeposits, I = InMemoryInsurance, O = StaticOracle> {
    pub(super) config: EngineConfig,
    pub(super) params: ExchangeParams,
    pub(super) deposits: D,
    pub(super) insurance: I,
    pub(super) oracle: O,
    pub(super) markets: BTreeMap<MarketId, Market>,
    pub(super) perpetual_info: BTreeMap<MarketId, PerpetualMarketInfo>,
    pub(super) funding: BTreeMap<MarketId, PerpetualMarketFunding>,
    pub(super) books: BTreeMap<MarketId, OrderBook>,
    pub(super) ledger: PositionLedger,
    pub(super) metadata: OrderbookMetadataStore,
    pub(super) margin_pools: BTreeMap<MarketId, Quote>,
    pub(super) market_orders_this_block: BTreeSet<(MarketId, SubaccountId)>,
    pub(super) events: EventCollector,
    pub(super) next_order_sequence: u64,
    pub(super) block_time: Timestamp,
    pub(super) block_height: u64,
}

impl Engine {
    /// Engine with in-memory collaborators and default parameters.
    pub fn new() -> Self {
        Self::assemble(
            EngineConfig::default(),
            ExchangeParams::default(),
            InMemoryDeposits::new(),
            InMemoryInsurance::new(),
            StaticOracle::new(),
        )
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: DepositKeeper, I: InsuranceFundStore, O: OraclePriceFeed> Engine<D, I, O> {
    pub fn with_collaborators(
        config: EngineConfig,
        params: ExchangeParams,
        deposits: D,
        insurance: I,
        oracle: O,
    ) -> Result<Self, ExchangeError> {
        params.validate()?;
        Ok(Self::assemble(config, params, deposits, insurance, oracle))
    }

    fn assemble(config: EngineConfig, params: ExchangeParams, deposits: D, insurance: I, oracle: O) -> Self {
        Self {
            config,
            params,
            deposits,
            insurance,
            oracle,
            markets: BTreeMap::new(),
            perpetual_info: BTreeMap::new(),
            funding: BTreeMap::new(),
            books: BTreeMap::new(),
            ledger: PositionLedger::new(),
            metadata: OrderbookMetadataStore::new(),
            margin_pools: BTreeMap::new(),
            market_orders_this_block: BTreeSet::new(),
            events: EventCollector::new(),
            next_order_sequence: 1,
            block_time: Timestamp::default(),
            block_height: 0,
        }
    }

    // 8.2: block lifecycle

    /// Moves the clock without running the begin-block engines.
    pub fn set_block_time(&mut self, time: Timestamp) {
        self.block_time = time;
    }

    pub fn block_time(&self) -> Timestamp {
        self.block_time
    }

    pub fn block_height(&self) -> u64 {
        self.block_height
    }

    /// Starts a block: hourly funding first, then expiry and scheduled settlement.
    pub fn begin_block(&mut self, time: Timestamp) -> BlockResult {
        self.block_time = time;
        self.block_height += 1;

        let fundings = self.process_hourly_fundings();
        let (expired, settlements) = self.process_market_lifecycle();

        tracing::debug!(
            height = self.block_height,
            time = %time,
            fundings = fundings.len(),
            expired = expired.len(),
            settlements = settlements.len(),
            "begin block"
        );

        BlockResult {
            fundings,
            expired,
            settlements,
        }
    }

    pub fn end_block(&mut self) {
        self.market_orders_this_block.clear();
    }

    // 8.3: collaborators

    pub fn params(&self) -> &ExchangeParams {
        &self.params
    }

    pub fn deposits(&self) -> &D {
        &self.deposits
    }

    pub fn deposits_mut(&mut self) -> &mut D {
        &mut self.deposits
    }

    pub fn insurance(&self) -> &I {
        &self.insurance
    }

    pub fn insurance_mut(&mut self) -> &mut I {
        &mut self.insurance
    }

    pub fn oracle(&self) -> &O {
        &self.oracle
    }

    pub fn oracle_mut(&mut self) -> &mut O {
        &mut self.oracle
    }

    // 8.4: queries

    pub fn market(&self, market_id: MarketId) -> Option<&Market> {
        self.markets.get(&market_id)
    }

    pub fn position(&self, market_id: MarketId, subaccount_id: SubaccountId) -> Option<&Position> {
        self.ledger.get(market_id, subaccount_id)
    }

    pub fn positions_by_market(&self, market_id: MarketId) -> Vec<&Position> {
        self.ledger.by_market(market_id).collect()
    }

    pub fn subaccount_orderbook_metadata(
        &self,
        market_id: MarketId,
        subaccount_id: SubaccountId,
        side: Side,
    ) -> SubaccountOrderbookMetadata {
        self.metadata
            .get_or_default(MetadataKey::new(market_id, subaccount_id, side))
    }

    pub fn perpetual_market_funding(&self, market_id: MarketId) -> Option<&PerpetualMarketFunding> {
        self.funding.get(&market_id)
    }

    pub fn perpetual_market_info(&self, market_id: MarketId) -> Option<&PerpetualMarketInfo> {
        self.perpetual_info.get(&market_id)
    }

    pub fn order(&self, market_id: MarketId, hash: OrderHash) -> Option<&Order> {
        self.books.get(&market_id)?.get(hash)
    }

    /// One subaccount's resting orders on a side, best price first.
    pub fn resting_orders(&self, market_id: MarketId, subaccount_id: SubaccountId, side: Side) -> Vec<&Order> {
        self.books
            .get(&market_id)
            .map(|b| b.subaccount_orders(subaccount_id, side))
            .unwrap_or_default()
    }

    pub fn deposit(&self, subaccount_id: SubaccountId, denom: &str) -> Deposit {
        self.deposits.deposit(subaccount_id, denom)
    }

    pub fn insurance_balance(&self, market_id: MarketId) -> Option<Quote> {
        self.insurance.balance(market_id)
    }

    pub fn market_margin_pool(&self, market_id: MarketId) -> Quote {
        self.margin_pools.get(&market_id).copied().unwrap_or_default()
    }

    pub fn events(&self) -> &[Event] {
        self.events.events()
    }

    pub fn events_of_kind<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = &'a Event> + 'a {
        self.events.of_kind(kind)
    }

    pub fn clear_events(&mut self) {
        self.events.clear();
    }

    /// Recomputes every metadata tally from the books and checks that resting
    /// reduce-only quantity never exceeds the position it would close.
    pub fn is_metadata_invariant_valid(&self) -> bool {
        for (market_id, book) in &self.books {
            let fresh = OrderbookMetadataStore::recompute(book);
            if fresh != self.metadata.market_entries(*market_id) {
                return false;
            }

            for (key, meta) in &fresh {
                if meta.aggregate_reduce_only_quantity.is_zero() {
                    continue;
                }
                let Some(position) = self.ledger.get(key.market_id, key.subaccount_id) else {
                    return false;
                };
                if position.side == key.side || meta.aggregate_reduce_only_quantity > position.quantity {
                    return false;
                }
            }
        }
        true
    }

    // 8.5: internals shared by the other engine files

    /// Market that accepts orders and trades.
    pub(super) fn active_market(&self, market_id: MarketId) -> Result<&Market, ExchangeError> {
        let market = self
            .markets
            .get(&market_id)
            .ok_or_else(|| ExchangeError::market_not_found(market_id, None))?;
        if !market.is_active() {
            return Err(ExchangeError::market_not_found(market_id, Some(market.kind)));
        }
        Ok(market)
    }

    pub(super) fn cumulative_funding(&self, market_id: MarketId) -> Decimal {
        self.funding
            .get(&market_id)
            .map(|f| f.cumulative_funding)
            .unwrap_or(Decimal::ZERO)
    }

    /// Copy of a position with funding accrued since its last touch applied.
    pub(super) fn position_with_funding(&self, market_id: MarketId, subaccount_id: SubaccountId) -> Option<Position> {
        let mut position = self.ledger.get(market_id, subaccount_id)?.clone();
        if self.funding.contains_key(&market_id) {
            position.apply_funding(self.cumulative_funding(market_id));
        }
        Some(position)
    }

    pub(super) fn next_sequence(&mut self) -> u64 {
        let seq = self.next_order_sequence;
        self.next_order_sequence += 1;
        seq
    }

    pub(super) fn adjust_margin_pool(&mut self, market_id: MarketId, delta: Decimal) {
        let pool = self.margin_pools.entry(market_id).or_default();
        *pool = Quote::new(pool.value() + delta);
    }

    pub(super) fn emit_event(&mut self, payload: EventPayload) {
        let event = Event::new(self.events.next_id(), self.block_time, payload);
        tracing::trace!(id = event.id.0, kind = event.payload.kind(), "event");

        self.events.emit(event);
        self.events.retain_last(self.config.max_events);
    }

    /// State that should be impossible under validated input. Diverging silently
    /// would split nodes, so processing stops here.
    pub(super) fn halt(&self, what: &str) -> ! {
        tracing::error!(height = self.block_height, time = %self.block_time, "{}", what);
        panic!("settlement core invariant violated: {what}");
    }
}
