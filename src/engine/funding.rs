//! Hourly funding for perpetual markets.

use super::core::Engine;
use super::results::FundingResult;
use crate::custody::DepositKeeper;
use crate::events::{EventPayload, PerpetualMarketFundingUpdateEvent};
use crate::funding::apply_hourly_funding;
use crate::insurance::InsuranceFundStore;
use crate::market::MarketStatus;
use crate::price_feed::OraclePriceFeed;
use crate::types::MarketId;

impl<D: DepositKeeper, I: InsuranceFundStore, O: OraclePriceFeed> Engine<D, I, O> {
    /// Runs every funding boundary that has elapsed, in market id order.
    ///
    /// A market without a mark price keeps its boundary and is retried next block.
    pub(super) fn process_hourly_fundings(&mut self) -> Vec<FundingResult> {
        let now = self.block_time;
        let due: Vec<MarketId> = self
            .perpetual_info
            .iter()
            .filter(|(id, info)| {
                info.is_funding_due(now)
                    && self
                        .markets
                        .get(id)
                        .is_some_and(|m| m.status != MarketStatus::Demolished)
            })
            .map(|(id, _)| *id)
            .collect();

        due.into_iter()
            .filter_map(|market_id| self.settle_hourly_funding(market_id))
            .collect()
    }

    fn settle_hourly_funding(&mut self, market_id: MarketId) -> Option<FundingResult> {
        let now = self.block_time;
        let oracle = &self.markets.get(&market_id)?.oracle;
        let Some(mark_price) = self.oracle.price(oracle) else {
            tracing::warn!(market = %market_id, %oracle, "no mark price, hourly funding skipped");
            return None;
        };

        let funding = self.funding.get_mut(&market_id)?;
        let info = self.perpetual_info.get_mut(&market_id)?;
        let hourly = apply_hourly_funding(funding, info, mark_price, now);
        let funding = funding.clone();

        tracing::info!(
            market = %market_id,
            rate = %hourly.hourly_funding_rate,
            %mark_price,
            cumulative = %funding.cumulative_funding,
            next = %info.next_funding_timestamp,
            "hourly funding applied"
        );

        let result = FundingResult {
            market_id,
            hourly_funding_rate: hourly.hourly_funding_rate,
            cumulative_funding: funding.cumulative_funding,
            mark_price,
        };

        self.emit_event(EventPayload::PerpetualMarketFundingUpdate(PerpetualMarketFundingUpdateEvent {
            market_id,
            funding,
            is_hourly_funding: true,
            hourly_funding_rate: Some(hourly.hourly_funding_rate),
            mark_price: Some(mark_price),
        }));

        Some(result)
    }
}
