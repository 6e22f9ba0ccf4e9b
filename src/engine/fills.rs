//! Applying matched trades to positions, deposits and the market margin pool.

use super::core::Engine;
use super::results::{ExchangeError, TradeResult};
use crate::custody::DepositKeeper;
use crate::events::{
    BatchDerivativePositionEvent, EventPayload, PerpetualMarketFundingUpdateEvent, SubaccountPosition,
};
use crate::insurance::InsuranceFundStore;
use crate::position::{apply_fill, FillArgs, FillOutcome, PositionKey};
use crate::price_feed::OraclePriceFeed;
use crate::types::{MarketId, OrderHash, Quote, Side, SubaccountId};
use rust_decimal::Decimal;

/// One executed trade as handed over by the matching engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trade {
    pub market_id: MarketId,
    pub buyer: SubaccountId,
    pub seller: SubaccountId,
    pub quantity: Decimal,
    pub price: Decimal,
    pub buyer_margin: Quote,
    pub seller_margin: Quote,
    /// resting orders the trade consumed, if any
    pub buy_order: Option<OrderHash>,
    pub sell_order: Option<OrderHash>,
}

impl Trade {
    pub fn new(
        market_id: MarketId,
        buyer: SubaccountId,
        seller: SubaccountId,
        quantity: Decimal,
        price: Decimal,
        buyer_margin: Decimal,
        seller_margin: Decimal,
    ) -> Self {
        Self {
            market_id,
            buyer,
            seller,
            quantity,
            price,
            buyer_margin: Quote::new(buyer_margin),
            seller_margin: Quote::new(seller_margin),
            buy_order: None,
            sell_order: None,
        }
    }

    pub fn with_orders(mut self, buy_order: Option<OrderHash>, sell_order: Option<OrderHash>) -> Self {
        self.buy_order = buy_order;
        self.sell_order = sell_order;
        self
    }
}

// one side of a validated trade, ready to commit
struct Leg {
    subaccount_id: SubaccountId,
    margin: Quote,
    order: Option<OrderHash>,
    outcome: FillOutcome,
}

impl<D: DepositKeeper, I: InsuranceFundStore, O: OraclePriceFeed> Engine<D, I, O> {
    /// Applies both sides of a trade, or neither.
    ///
    /// Every check runs before the first mutation. The fill margin moves from the
    /// subaccount into the market pool and the payout of any reduction comes back
    /// out of it. Perpetual trades also feed the funding premium accumulator.
    pub fn apply_trade(&mut self, trade: Trade) -> Result<TradeResult, ExchangeError> {
        let market_id = trade.market_id;
        if trade.buyer == trade.seller {
            return Err(ExchangeError::InvalidPositionArgs {
                reason: format!("{} cannot trade with itself", trade.buyer),
            });
        }
        if trade.quantity <= Decimal::ZERO
            || trade.price <= Decimal::ZERO
            || trade.buyer_margin.is_negative()
            || trade.seller_margin.is_negative()
        {
            return Err(ExchangeError::InvalidPositionArgs {
                reason: format!("quantity {}, price {}", trade.quantity, trade.price),
            });
        }

        let market = self.active_market(market_id)?;
        market.validate_price(trade.price)?;
        let denom = market.quote_denom.clone();
        let oracle = market.oracle.clone();
        let is_perpetual = market.is_perpetual();
        let cumulative_funding = self.cumulative_funding(market_id);

        let sides = [
            (Side::Long, trade.buyer, trade.buyer_margin, trade.buy_order),
            (Side::Short, trade.seller, trade.seller_margin, trade.sell_order),
        ];
        let mut legs = Vec::with_capacity(2);
        for (side, subaccount_id, margin, order) in sides {
            let freed = match order {
                Some(hash) => self.check_order_fill(market_id, subaccount_id, side, hash, trade.quantity)?,
                None => Quote::zero(),
            };
            let spendable = self.deposits.spendable_funds(subaccount_id, &denom).add(freed);
            if spendable < margin {
                return Err(ExchangeError::InsufficientDeposit {
                    subaccount_id,
                    required: margin,
                    available: spendable,
                });
            }

            let existing = self.position_with_funding(market_id, subaccount_id);
            let outcome = apply_fill(
                PositionKey::new(market_id, subaccount_id),
                existing.as_ref(),
                FillArgs {
                    quantity: trade.quantity,
                    price: trade.price,
                    margin,
                    side,
                    cumulative_funding,
                },
            )?;
            legs.push(Leg {
                subaccount_id,
                margin,
                order,
                outcome,
            });
        }

        // checks passed, commit
        for leg in &legs {
            self.commit_leg(market_id, &denom, trade.quantity, leg);
        }

        if is_perpetual {
            self.accumulate_trade_premium(market_id, &oracle, trade.price);
        }

        let mut cancelled = self.revalidate_reduce_only(market_id, trade.buyer);
        cancelled.extend(self.revalidate_reduce_only(market_id, trade.seller));

        let positions: Vec<SubaccountPosition> = [trade.buyer, trade.seller]
            .into_iter()
            .map(|subaccount_id| SubaccountPosition {
                subaccount_id,
                position: self.ledger.get(market_id, subaccount_id).cloned(),
            })
            .collect();
        self.emit_event(EventPayload::BatchDerivativePosition(BatchDerivativePositionEvent {
            market_id,
            positions,
        }));

        let mut legs = legs.into_iter();
        let (Some(buyer), Some(seller)) = (legs.next(), legs.next()) else {
            self.halt("trade lost a leg between validation and commit");
        };

        tracing::debug!(
            market = %market_id,
            buyer = %trade.buyer,
            seller = %trade.seller,
            quantity = %trade.quantity,
            price = %trade.price,
            buyer_fill = ?buyer.outcome.kind,
            seller_fill = ?seller.outcome.kind,
            "trade applied"
        );

        Ok(TradeResult {
            buyer: buyer.outcome,
            seller: seller.outcome,
            cancelled,
        })
    }

    // resting order must belong to the leg and still hold the quantity. returns the hold the fill frees
    fn check_order_fill(
        &self,
        market_id: MarketId,
        subaccount_id: SubaccountId,
        side: Side,
        hash: OrderHash,
        quantity: Decimal,
    ) -> Result<Quote, ExchangeError> {
        let order = self
            .books
            .get(&market_id)
            .and_then(|book| book.get(hash))
            .filter(|o| o.subaccount_id == subaccount_id && o.side == side)
            .ok_or(ExchangeError::OrderDoesntExist(market_id))?;
        if order.fillable < quantity {
            return Err(ExchangeError::InvalidPositionArgs {
                reason: format!("fill {} exceeds fillable {}", quantity, order.fillable),
            });
        }
        let mut probe = order.clone();
        Ok(probe.fill(quantity))
    }

    fn commit_leg(&mut self, market_id: MarketId, denom: &str, quantity: Decimal, leg: &Leg) {
        let subaccount_id = leg.subaccount_id;

        if let Some(hash) = leg.order {
            self.consume_order(market_id, denom, hash, quantity);
        }

        if leg.margin.is_positive() {
            if let Err(err) = self.deposits.reserve_margin(subaccount_id, denom, leg.margin) {
                self.halt(&format!("fill margin vanished after validation: {err}"));
            }
            self.deposits.charge_reserved(subaccount_id, denom, leg.margin);
            self.adjust_margin_pool(market_id, leg.margin.value());
        }

        let payout = leg.outcome.payout;
        if payout.is_positive() {
            self.deposits.credit_payout(subaccount_id, denom, payout, true);
            self.adjust_margin_pool(market_id, -payout.value());
        }

        self.ledger.commit(
            PositionKey::new(market_id, subaccount_id),
            leg.outcome.new_position.clone(),
        );
    }

    fn consume_order(&mut self, market_id: MarketId, denom: &str, hash: OrderHash, quantity: Decimal) {
        let Some(book) = self.books.get_mut(&market_id) else {
            return;
        };
        let Some(order) = book.get_mut(hash) else {
            return;
        };

        let freed = order.fill(quantity);
        let snapshot = order.clone();
        if snapshot.is_filled() {
            book.remove(hash);
        }

        self.metadata.record_shrunk(&snapshot, quantity);
        if snapshot.is_filled() {
            self.metadata.record_removed(&snapshot);
        }
        if freed.is_positive() {
            self.deposits.release_margin(snapshot.subaccount_id, denom, freed);
        }
    }

    fn accumulate_trade_premium(&mut self, market_id: MarketId, oracle: &str, price: Decimal) {
        let Some(mark) = self.oracle.price(oracle) else {
            tracing::warn!(market = %market_id, oracle, "no mark price, trade premium not accumulated");
            return;
        };
        let now = self.block_time;
        let Some(funding) = self.funding.get_mut(&market_id) else {
            return;
        };
        funding.accumulate_trade(price, mark, now);
        let funding = funding.clone();

        self.emit_event(EventPayload::PerpetualMarketFundingUpdate(PerpetualMarketFundingUpdateEvent {
            market_id,
            funding,
            is_hourly_funding: false,
            hourly_funding_rate: None,
            mark_price: None,
        }));
    }
}
