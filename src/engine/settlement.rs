//! Expiry and settlement of markets.
//!
//! Expiry refunds resting orders and keeps positions. Settlement closes every
//! position at the settlement price, covers a shortfall from the insurance fund
//! and then by haircut, and routes any surplus to the fund or the auction
//! subaccount. Both run inside begin block on schedule; settlement can also be
//! forced by admin or governance.

use super::core::Engine;
use super::results::{ExchangeError, SettlementResult};
use crate::custody::DepositKeeper;
use crate::events::{
    BatchDerivativePositionEvent, CancelReason, EventPayload, MarketSettledEvent, MarketStatusUpdateEvent,
    SubaccountPosition,
};
use crate::insurance::InsuranceFundStore;
use crate::market::{MarketStatus, SettlementPrice};
use crate::price_feed::OraclePriceFeed;
use crate::settlement::{plan_settlement, NotionalBasis, SettlementInputs, SettlementOrigin};
use crate::types::MarketId;
use rust_decimal::Decimal;

impl<D: DepositKeeper, I: InsuranceFundStore, O: OraclePriceFeed> Engine<D, I, O> {
    /// Settles a market now. `price` of `-1` refunds margins; `None` asks the oracle
    /// and refunds when it has nothing.
    pub fn force_settle_market(
        &mut self,
        market_id: MarketId,
        price: Option<Decimal>,
        origin: SettlementOrigin,
    ) -> Result<SettlementResult, ExchangeError> {
        let market = self
            .markets
            .get(&market_id)
            .ok_or_else(|| ExchangeError::market_not_found(market_id, None))?;
        if market.status == MarketStatus::Demolished {
            return Err(ExchangeError::InvalidMarketStatus {
                market_id,
                status: market.status,
            });
        }

        let price = match price {
            Some(raw) => SettlementPrice::from_raw(raw),
            None => self.oracle_settlement_price(market_id),
        };
        self.settle_market(market_id, price, origin)
    }

    /// Time-driven transitions for expiring markets, in market id order.
    pub(super) fn process_market_lifecycle(&mut self) -> (Vec<MarketId>, Vec<SettlementResult>) {
        let now = self.block_time;
        let candidates: Vec<MarketId> = self
            .markets
            .values()
            .filter(|m| !m.is_perpetual() && m.status != MarketStatus::Demolished)
            .map(|m| m.id)
            .collect();

        let mut expired = Vec::new();
        let mut settlements = Vec::new();
        for market_id in candidates {
            let Some(market) = self.markets.get(&market_id) else {
                continue;
            };
            let tradeable = matches!(market.status, MarketStatus::Active | MarketStatus::Paused);
            let expiring = tradeable && market.expiration_timestamp.is_some_and(|t| now >= t);
            let settling = market.settlement_timestamp.is_some_and(|t| now >= t);

            if expiring {
                self.expire_market(market_id);
                expired.push(market_id);
            }
            if settling {
                let price = self.oracle_settlement_price(market_id);
                match self.settle_market(market_id, price, SettlementOrigin::Scheduled) {
                    Ok(result) => settlements.push(result),
                    Err(err) => self.halt(&format!("scheduled settlement of {market_id} failed: {err}")),
                }
            }
        }
        (expired, settlements)
    }

    fn expire_market(&mut self, market_id: MarketId) {
        let cancelled = self.cancel_all_orders(market_id, CancelReason::MarketExpired);
        let Some(market) = self.markets.get_mut(&market_id) else {
            return;
        };
        let from = market.status;
        market.status = MarketStatus::Expired;

        tracing::info!(market = %market_id, cancelled, "market expired");
        self.emit_event(EventPayload::MarketStatusUpdate(MarketStatusUpdateEvent {
            market_id,
            from,
            to: MarketStatus::Expired,
        }));
    }

    fn oracle_settlement_price(&self, market_id: MarketId) -> SettlementPrice {
        let price = self
            .markets
            .get(&market_id)
            .and_then(|m| self.oracle.price(&m.oracle));
        match price {
            Some(p) => SettlementPrice::Price(p),
            None => {
                tracing::warn!(market = %market_id, "no oracle price at settlement, refunding margins");
                SettlementPrice::Refund
            }
        }
    }

    fn settle_market(
        &mut self,
        market_id: MarketId,
        price: SettlementPrice,
        origin: SettlementOrigin,
    ) -> Result<SettlementResult, ExchangeError> {
        let market = self
            .markets
            .get(&market_id)
            .ok_or_else(|| ExchangeError::market_not_found(market_id, None))?
            .clone();
        if market.status == MarketStatus::Demolished {
            return Err(ExchangeError::InvalidMarketStatus {
                market_id,
                status: market.status,
            });
        }
        let denom = market.quote_denom.as_str();

        // 1. resting orders go first, holds back to available balance
        let cancelled_orders = self.cancel_all_orders(market_id, CancelReason::MarketDemolished);
        self.metadata.remove_market(market_id);

        // 2. every position leaves the ledger with funding brought current
        let mut positions = self.ledger.remove_market(market_id);
        if market.is_perpetual() {
            let cumulative = self.cumulative_funding(market_id);
            for position in positions.iter_mut() {
                position.apply_funding(cumulative);
            }
        }

        // 3. payouts, insurance draw, haircut, surplus
        let scaled_price = match price {
            SettlementPrice::Price(p) => SettlementPrice::Price(market.scaled_settlement_price(p)),
            SettlementPrice::Refund => SettlementPrice::Refund,
        };
        let basis = if market.is_binary_options() {
            NotionalBasis::BinaryOptions { scale: market.scale() }
        } else {
            NotionalBasis::Derivative
        };
        let plan = plan_settlement(SettlementInputs {
            positions: &positions,
            price: scaled_price,
            basis,
            available_margin: self.market_margin_pool(market_id),
            insurance_balance: self.insurance.balance(market_id),
        });

        // 4. move funds
        if plan.insurance_draw.is_positive() {
            if let Err(err) = self.insurance.debit(market_id, plan.insurance_draw) {
                self.halt(&format!("insurance draw for {market_id} failed: {err}"));
            }
        }
        for payout in plan.payouts.iter().filter(|p| p.payout.is_positive()) {
            self.deposits
                .credit_payout(payout.subaccount_id, denom, payout.payout, true);
        }
        if plan.surplus_to_insurance.is_positive() {
            if let Err(err) = self.insurance.credit(market_id, plan.surplus_to_insurance) {
                self.halt(&format!("insurance credit for {market_id} failed: {err}"));
            }
        }
        if plan.surplus_to_auction.is_positive() {
            self.deposits
                .credit_payout(self.params.auction_subaccount_id, denom, plan.surplus_to_auction, true);
        }

        let total_paid = plan.total_paid();
        if total_paid > plan.available_margin.add(plan.insurance_draw) {
            self.halt(&format!(
                "settlement of {market_id} pays {total_paid} from {} margin and {} insurance",
                plan.available_margin, plan.insurance_draw
            ));
        }
        self.margin_pools.insert(market_id, plan.residual);

        // 5. terminal status
        let from = market.status;
        if let Some(stored) = self.markets.get_mut(&market_id) {
            stored.status = MarketStatus::Demolished;
            stored.settlement_price = Some(price);
        }

        tracing::info!(
            market = %market_id,
            ?origin,
            ?price,
            positions = positions.len(),
            cancelled_orders,
            required = %plan.required_payout,
            paid = %total_paid,
            insurance_draw = %plan.insurance_draw,
            haircut = %plan.haircut,
            "market settled"
        );

        self.emit_event(EventPayload::MarketStatusUpdate(MarketStatusUpdateEvent {
            market_id,
            from,
            to: MarketStatus::Demolished,
        }));
        self.emit_event(EventPayload::MarketSettled(MarketSettledEvent {
            market_id,
            settlement_price: price,
            origin,
            positions_closed: positions.len(),
            required_payout: plan.required_payout,
            total_paid,
            insurance_draw: plan.insurance_draw,
            haircut: plan.haircut,
            surplus_to_insurance: plan.surplus_to_insurance,
            surplus_to_auction: plan.surplus_to_auction,
        }));
        if !positions.is_empty() {
            self.emit_event(EventPayload::BatchDerivativePosition(BatchDerivativePositionEvent {
                market_id,
                positions: positions
                    .iter()
                    .map(|p| SubaccountPosition {
                        subaccount_id: p.subaccount_id,
                        position: None,
                    })
                    .collect(),
            }));
        }

        Ok(SettlementResult {
            market_id,
            settlement_price: price,
            cancelled_orders,
            plan,
        })
    }
}
