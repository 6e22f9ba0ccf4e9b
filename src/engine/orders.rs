//! Order admission, cancellation and reduce-only enforcement.

use super::core::Engine;
use super::results::{ExchangeError, OrderResult};
use crate::custody::DepositKeeper;
use crate::events::{CancelDerivativeOrderEvent, CancelReason, EventPayload, NewDerivativeOrderEvent};
use crate::insurance::InsuranceFundStore;
use crate::order::{Order, OrderRequest, OrderType};
use crate::orderbook_metadata::MetadataKey;
use crate::price_feed::OraclePriceFeed;
use crate::reduce_only::{admissible_quantity, excess_reduce_only, quantity_ranked_ahead};
use crate::types::{truncate, MarketId, OrderHash, Price, Quote, Side, SubaccountId};
use rust_decimal::Decimal;

impl<D: DepositKeeper, I: InsuranceFundStore, O: OraclePriceFeed> Engine<D, I, O> {
    /// Routes a request by its order type.
    pub fn place_order(&mut self, request: OrderRequest) -> Result<OrderResult, ExchangeError> {
        match request.order_type {
            OrderType::Limit => self.place_limit_order(request),
            OrderType::Market => self.place_market_order(request),
        }
    }

    /// Admits a resting limit order.
    ///
    /// Vanilla orders reserve `margin + quantity * price * maker fee` from the
    /// subaccount's available balance. Reduce-only orders reserve nothing and are
    /// resized to what the opposite position has left once the subaccount's orders
    /// at the same or a better price have filled. Worse-priced reduce-only orders
    /// are cancelled afterwards to make room. An order resized to zero is dropped
    /// without error or events and `hash` is `None`.
    pub fn place_limit_order(&mut self, request: OrderRequest) -> Result<OrderResult, ExchangeError> {
        let market_id = request.market_id;
        let subaccount_id = request.subaccount_id;
        let side = request.side;

        let market = self.active_market(market_id)?;
        market.validate_price(request.price)?;
        market.validate_quantity(request.quantity)?;
        if request.margin.is_negative() {
            return Err(ExchangeError::InvalidPositionArgs {
                reason: format!("negative order margin {}", request.margin),
            });
        }
        let denom = market.quote_denom.clone();
        let fee_rate = market.maker_fee_rate;
        let required = market.required_order_margin(side, request.price, request.quantity);

        let book = self
            .books
            .get(&market_id)
            .ok_or_else(|| ExchangeError::market_not_found(market_id, None))?;
        if let Some(cid) = &request.client_order_id {
            if book.hash_by_client_id(subaccount_id, cid).is_some() {
                return Err(ExchangeError::ClientOrderIdAlreadyExists(cid.clone()));
            }
        }
        let max = self.params.max_derivative_order_side_count;
        if book.side_count(subaccount_id, side) >= max {
            return Err(ExchangeError::ExceedsOrderSideCount { side, max });
        }
        let price = Price::new_unchecked(request.price);
        let ranked_ahead = quantity_ranked_ahead(&book.subaccount_orders(subaccount_id, side), price);

        let quantity = if request.is_reduce_only() {
            let position = self.position_with_funding(market_id, subaccount_id);
            let admitted = admissible_quantity(position.as_ref(), side, request.price, request.quantity, ranked_ahead)
                .map_err(|e| ExchangeError::from_reduce_only(e, market_id, subaccount_id))?;

            if admitted <= Decimal::ZERO {
                tracing::debug!(market = %market_id, subaccount = %subaccount_id, ?side, "reduce-only order resized to zero");
                return Ok(OrderResult {
                    hash: None,
                    admitted_quantity: Decimal::ZERO,
                    cancelled: Vec::new(),
                });
            }
            admitted
        } else {
            if request.margin < required {
                return Err(ExchangeError::InsufficientOrderMargin {
                    required,
                    provided: request.margin,
                });
            }
            let fee = truncate(request.quantity * request.price * fee_rate);
            self.deposits
                .reserve_margin(subaccount_id, &denom, request.margin.add(Quote::new(fee)))?;
            request.quantity
        };

        let sequence = self.next_sequence();
        let order = Order {
            hash: OrderHash(sequence),
            market_id,
            subaccount_id,
            side,
            price,
            quantity,
            fillable: quantity,
            margin: request.margin,
            fee_rate,
            client_order_id: request.client_order_id,
            sequence,
        };
        let hash = order.hash;

        tracing::debug!(
            market = %market_id,
            subaccount = %subaccount_id,
            ?side,
            price = %order.price,
            %quantity,
            reduce_only = order.is_reduce_only(),
            "limit order admitted"
        );

        self.metadata.record_added(&order);
        if let Some(book) = self.books.get_mut(&market_id) {
            book.insert(order.clone());
        }
        self.emit_event(EventPayload::NewDerivativeOrder(NewDerivativeOrderEvent { order }));

        let cancelled = self.enforce_reduce_only(market_id, subaccount_id, side);

        Ok(OrderResult {
            hash: Some(hash),
            admitted_quantity: quantity,
            cancelled,
        })
    }

    /// Admits an order that crosses immediately. Nothing rests and nothing is
    /// reserved: the margin arrives with the fill.
    pub fn place_market_order(&mut self, request: OrderRequest) -> Result<OrderResult, ExchangeError> {
        let market_id = request.market_id;
        let subaccount_id = request.subaccount_id;

        let market = self.active_market(market_id)?;
        market.validate_price(request.price)?;
        market.validate_quantity(request.quantity)?;
        if request.margin.is_negative() {
            return Err(ExchangeError::InvalidPositionArgs {
                reason: format!("negative order margin {}", request.margin),
            });
        }
        let required = market.required_order_margin(request.side, request.price, request.quantity);

        if self.market_orders_this_block.contains(&(market_id, subaccount_id)) {
            return Err(ExchangeError::MarketOrderAlreadyExists {
                market_id,
                subaccount_id,
            });
        }

        let quantity = if request.is_reduce_only() {
            let position = self.position_with_funding(market_id, subaccount_id);
            admissible_quantity(position.as_ref(), request.side, request.price, request.quantity, Decimal::ZERO)
                .map_err(|e| ExchangeError::from_reduce_only(e, market_id, subaccount_id))?
        } else {
            if request.margin < required {
                return Err(ExchangeError::InsufficientOrderMargin {
                    required,
                    provided: request.margin,
                });
            }
            request.quantity
        };

        self.market_orders_this_block.insert((market_id, subaccount_id));
        let hash = OrderHash(self.next_sequence());

        tracing::debug!(market = %market_id, subaccount = %subaccount_id, side = ?request.side, %quantity, "market order admitted");

        Ok(OrderResult {
            hash: Some(hash),
            admitted_quantity: quantity,
            cancelled: Vec::new(),
        })
    }

    pub fn cancel_order(
        &mut self,
        market_id: MarketId,
        subaccount_id: SubaccountId,
        hash: OrderHash,
    ) -> Result<Quote, ExchangeError> {
        let book = self
            .books
            .get(&market_id)
            .ok_or_else(|| ExchangeError::market_not_found(market_id, None))?;
        match book.get(hash) {
            Some(order) if order.subaccount_id == subaccount_id => {}
            _ => return Err(ExchangeError::OrderDoesntExist(market_id)),
        }

        self.remove_resting_order(market_id, hash, CancelReason::UserRequested)
            .ok_or(ExchangeError::OrderDoesntExist(market_id))
    }

    pub fn cancel_order_by_client_id(
        &mut self,
        market_id: MarketId,
        subaccount_id: SubaccountId,
        client_order_id: &str,
    ) -> Result<Quote, ExchangeError> {
        let hash = self
            .books
            .get(&market_id)
            .ok_or_else(|| ExchangeError::market_not_found(market_id, None))?
            .hash_by_client_id(subaccount_id, client_order_id)
            .ok_or(ExchangeError::OrderDoesntExist(market_id))?;
        self.cancel_order(market_id, subaccount_id, hash)
    }

    /// Pulls an order off the book, refunds its remaining hold to available
    /// balance and returns the refund.
    pub(super) fn remove_resting_order(
        &mut self,
        market_id: MarketId,
        hash: OrderHash,
        reason: CancelReason,
    ) -> Option<Quote> {
        let denom = self.markets.get(&market_id)?.quote_denom.clone();
        let order = self.books.get_mut(&market_id)?.remove(hash)?;
        self.metadata.record_removed(&order);

        let refunded = order.remaining_hold();
        if refunded.is_positive() {
            self.deposits.release_margin(order.subaccount_id, &denom, refunded);
        }

        tracing::debug!(market = %market_id, subaccount = %order.subaccount_id, ?reason, %refunded, "order cancelled");
        self.emit_event(EventPayload::CancelDerivativeOrder(CancelDerivativeOrderEvent {
            order,
            reason,
            refunded,
        }));
        Some(refunded)
    }

    /// Cancels every resting order of a market, returning how many went.
    pub(super) fn cancel_all_orders(&mut self, market_id: MarketId, reason: CancelReason) -> usize {
        let hashes: Vec<OrderHash> = match self.books.get(&market_id) {
            Some(book) => book.orders().map(|o| o.hash).collect(),
            None => return 0,
        };
        hashes
            .into_iter()
            .filter_map(|hash| self.remove_resting_order(market_id, hash, reason))
            .count()
    }

    /// Cancels the reduce-only orders on `side` that the position can no longer absorb.
    pub(super) fn enforce_reduce_only(
        &mut self,
        market_id: MarketId,
        subaccount_id: SubaccountId,
        side: Side,
    ) -> Vec<OrderHash> {
        let meta = self
            .metadata
            .get_or_default(MetadataKey::new(market_id, subaccount_id, side));
        if meta.reduce_only_limit_order_count == 0 {
            return Vec::new();
        }

        let position = self.ledger.get(market_id, subaccount_id);
        let excess = match self.books.get(&market_id) {
            Some(book) => excess_reduce_only(position, side, &book.subaccount_orders(subaccount_id, side)),
            None => return Vec::new(),
        };

        for hash in &excess {
            self.remove_resting_order(market_id, *hash, CancelReason::ReduceOnlyExcess);
        }
        if !excess.is_empty() {
            tracing::info!(
                market = %market_id,
                subaccount = %subaccount_id,
                ?side,
                cancelled = excess.len(),
                "reduce-only orders exceeded position"
            );
        }
        excess
    }

    pub(super) fn revalidate_reduce_only(&mut self, market_id: MarketId, subaccount_id: SubaccountId) -> Vec<OrderHash> {
        let mut cancelled = self.enforce_reduce_only(market_id, subaccount_id, Side::Long);
        cancelled.extend(self.enforce_reduce_only(market_id, subaccount_id, Side::Short));
        cancelled
    }
}
