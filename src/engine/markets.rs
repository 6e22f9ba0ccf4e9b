//! Market launches and admin status changes.

use super::core::Engine;
use super::results::ExchangeError;
use crate::custody::DepositKeeper;
use crate::events::{EventPayload, MarketStatusUpdateEvent, PerpetualMarketUpdateEvent};
use crate::funding::{PerpetualMarketFunding, PerpetualMarketInfo};
use crate::insurance::InsuranceFundStore;
use crate::market::{MarginRatios, Market, MarketError, MarketKind, MarketLaunch, MarketStatus};
use crate::order::OrderBook;
use crate::price_feed::OraclePriceFeed;
use crate::types::{MarketId, Quote, Timestamp};
use rust_decimal::Decimal;

/// Per-market funding settings. `None` falls back to the module parameters.
#[derive(Debug, Clone, Copy, Default)]
pub struct FundingOverrides {
    pub hourly_funding_rate_cap: Option<Decimal>,
    pub hourly_interest_rate: Option<Decimal>,
    pub funding_interval: Option<i64>,
}

impl<D: DepositKeeper, I: InsuranceFundStore, O: OraclePriceFeed> Engine<D, I, O> {
    pub fn launch_perpetual_market(
        &mut self,
        launch: MarketLaunch,
        ratios: MarginRatios,
        overrides: FundingOverrides,
    ) -> Result<MarketId, ExchangeError> {
        self.check_launch(&launch)?;
        ratios.validate()?;

        let interval = overrides
            .funding_interval
            .unwrap_or(self.params.default_funding_interval);
        let cap = overrides
            .hourly_funding_rate_cap
            .unwrap_or(self.params.default_hourly_funding_rate_cap);
        let interest = overrides
            .hourly_interest_rate
            .unwrap_or(self.params.default_hourly_interest_rate);
        if interval <= 0 || cap <= Decimal::ZERO || interest < Decimal::ZERO {
            return Err(ExchangeError::InvalidPositionArgs {
                reason: format!("funding settings out of range: interval {interval}, cap {cap}, interest {interest}"),
            });
        }

        let market_id = launch.id;
        let market = Market::new(launch, MarketKind::Perpetual, Some(ratios));
        let info = PerpetualMarketInfo::new(market_id, cap, interest, interval, self.block_time);
        let funding = PerpetualMarketFunding::new(self.block_time);

        tracing::info!(
            market = %market_id,
            ticker = %market.ticker,
            next_funding = %info.next_funding_timestamp,
            "perpetual market launched"
        );

        self.register_market(market.clone());
        self.perpetual_info.insert(market_id, info.clone());
        self.funding.insert(market_id, funding.clone());

        self.emit_event(EventPayload::PerpetualMarketUpdate(PerpetualMarketUpdateEvent {
            market,
            info,
            funding,
        }));

        Ok(market_id)
    }

    pub fn launch_expiry_futures_market(
        &mut self,
        launch: MarketLaunch,
        ratios: MarginRatios,
        expiration: Timestamp,
        settlement: Timestamp,
    ) -> Result<MarketId, ExchangeError> {
        self.check_launch(&launch)?;
        ratios.validate()?;
        self.check_schedule(expiration, settlement)?;

        let market_id = launch.id;
        let mut market = Market::new(launch, MarketKind::ExpiryFutures, Some(ratios));
        market.expiration_timestamp = Some(expiration);
        market.settlement_timestamp = Some(settlement);

        tracing::info!(market = %market_id, ticker = %market.ticker, %expiration, %settlement, "expiry futures market launched");
        self.register_market(market);
        Ok(market_id)
    }

    pub fn launch_binary_options_market(
        &mut self,
        launch: MarketLaunch,
        expiration: Timestamp,
        settlement: Timestamp,
    ) -> Result<MarketId, ExchangeError> {
        self.check_launch(&launch)?;
        self.check_schedule(expiration, settlement)?;

        let market_id = launch.id;
        let mut market = Market::new(launch, MarketKind::BinaryOptions, None);
        market.expiration_timestamp = Some(expiration);
        market.settlement_timestamp = Some(settlement);

        tracing::info!(market = %market_id, ticker = %market.ticker, scale = %market.scale(), "binary options market launched");
        self.register_market(market);
        Ok(market_id)
    }

    /// Admin pause and resume. Expiry and demolition only happen through the lifecycle.
    pub fn set_market_status(&mut self, market_id: MarketId, status: MarketStatus) -> Result<(), ExchangeError> {
        let market = self
            .markets
            .get_mut(&market_id)
            .ok_or_else(|| ExchangeError::market_not_found(market_id, None))?;

        let from = market.status;
        match (from, status) {
            (MarketStatus::Active, MarketStatus::Paused) | (MarketStatus::Paused, MarketStatus::Active) => {}
            _ => {
                return Err(ExchangeError::InvalidMarketStatus {
                    market_id,
                    status: from,
                })
            }
        }
        market.status = status;

        tracing::info!(market = %market_id, ?from, to = ?status, "market status changed");
        self.emit_event(EventPayload::MarketStatusUpdate(MarketStatusUpdateEvent {
            market_id,
            from,
            to: status,
        }));
        Ok(())
    }

    fn check_launch(&self, launch: &MarketLaunch) -> Result<(), ExchangeError> {
        if self.markets.contains_key(&launch.id) {
            return Err(ExchangeError::MarketAlreadyExists(launch.id));
        }
        if launch.min_price_tick_size <= Decimal::ZERO {
            return Err(MarketError::InvalidPrice(launch.min_price_tick_size).into());
        }
        if launch.min_quantity_tick_size <= Decimal::ZERO {
            return Err(MarketError::InvalidQuantity(launch.min_quantity_tick_size).into());
        }
        Ok(())
    }

    fn check_schedule(&self, expiration: Timestamp, settlement: Timestamp) -> Result<(), ExchangeError> {
        if expiration >= settlement || expiration <= self.block_time {
            return Err(MarketError::InvalidTimestamps {
                expiration,
                settlement,
            }
            .into());
        }
        Ok(())
    }

    fn register_market(&mut self, market: Market) {
        let market_id = market.id;
        self.books.insert(market_id, OrderBook::new(market_id));
        self.margin_pools.insert(market_id, Quote::zero());
        self.markets.insert(market_id, market);
    }
}
