// 5.0: perpetual funding. trades accumulate a time-weighted premium of trade price over
// mark, and once per funding interval that premium turns into an hourly rate.
// 5.0 has the per-market structs, 5.1 the accumulation, 5.2 the hourly update.

use crate::types::{quo_truncate, truncate, MarketId, Timestamp};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

pub const HOURS_PER_DAY: Decimal = dec!(24);

/// Funding parameters of one perpetual market.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerpetualMarketInfo {
    pub market_id: MarketId,
    pub hourly_funding_rate_cap: Decimal,
    pub hourly_interest_rate: Decimal,
    pub next_funding_timestamp: Timestamp,
    /// seconds
    pub funding_interval: i64,
}

impl PerpetualMarketInfo {
    pub fn new(
        market_id: MarketId,
        hourly_funding_rate_cap: Decimal,
        hourly_interest_rate: Decimal,
        funding_interval: i64,
        launched_at: Timestamp,
    ) -> Self {
        Self {
            market_id,
            hourly_funding_rate_cap,
            hourly_interest_rate,
            next_funding_timestamp: first_funding_timestamp(launched_at, funding_interval),
            funding_interval,
        }
    }

    pub fn is_funding_due(&self, now: Timestamp) -> bool {
        now >= self.next_funding_timestamp
    }
}

// first interval boundary strictly after launch
pub fn first_funding_timestamp(launched_at: Timestamp, funding_interval: i64) -> Timestamp {
    let secs = launched_at.as_secs();
    Timestamp::from_secs((secs / funding_interval + 1) * funding_interval)
}

/// Running funding accumulators of one perpetual market.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerpetualMarketFunding {
    pub cumulative_funding: Decimal,
    pub cumulative_price: Decimal,
    pub last_timestamp: Timestamp,
}

impl PerpetualMarketFunding {
    pub fn new(launched_at: Timestamp) -> Self {
        Self {
            cumulative_funding: Decimal::ZERO,
            cumulative_price: Decimal::ZERO,
            last_timestamp: launched_at,
        }
    }

    // 5.1: premium of one trade weighted by the seconds since the previous accumulation point
    pub fn accumulate_trade(&mut self, trade_price: Decimal, mark_price: Decimal, now: Timestamp) {
        let elapsed = now.secs_since(self.last_timestamp).max(0);
        if mark_price > Decimal::ZERO {
            let premium = quo_truncate(trade_price - mark_price, mark_price);
            self.cumulative_price = truncate(self.cumulative_price + premium * Decimal::from(elapsed));
        }
        self.last_timestamp = now;
    }
}

/// Result of one hourly funding step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HourlyFunding {
    pub hourly_funding_rate: Decimal,
    /// amount added to cumulative funding: rate times mark price
    pub funding_delta: Decimal,
    pub mark_price: Decimal,
}

// 5.2: clamp(cumulative premium / (interval * 24) + interest, -cap, cap)
pub fn hourly_funding_rate(funding: &PerpetualMarketFunding, info: &PerpetualMarketInfo) -> Decimal {
    let divisor = Decimal::from(info.funding_interval) * HOURS_PER_DAY;
    let raw = quo_truncate(funding.cumulative_price, divisor) + info.hourly_interest_rate;
    let cap = info.hourly_funding_rate_cap;
    raw.max(-cap).min(cap)
}

/// Runs one funding boundary: folds the premium into cumulative funding, resets the
/// premium accumulator and moves the boundary forward by one interval.
pub fn apply_hourly_funding(
    funding: &mut PerpetualMarketFunding,
    info: &mut PerpetualMarketInfo,
    mark_price: Decimal,
    now: Timestamp,
) -> HourlyFunding {
    let rate = hourly_funding_rate(funding, info);
    let delta = truncate(rate * mark_price);

    funding.cumulative_funding += delta;
    funding.cumulative_price = Decimal::ZERO;
    funding.last_timestamp = now;
    info.next_funding_timestamp = info.next_funding_timestamp.plus_secs(info.funding_interval);

    HourlyFunding {
        hourly_funding_rate: rate,
        funding_delta: delta,
        mark_price,
    }
}
