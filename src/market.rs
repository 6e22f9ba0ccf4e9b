//! Market definitions and lifecycle status.
//!
//! A market is a perpetual, an expiry future or a binary option. All three share
//! tick sizes, fee rates and an oracle reference; derivatives also carry margin
//! ratios. Binary options quote prices in units scaled by `10^oracle_scale_factor`.

use crate::types::{MarketId, Quote, Side, Timestamp};
use rust_decimal::{Decimal, MathematicalOps};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Market status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketStatus {
    /// Orders accepted, trades applied
    Active,
    /// Halted by an admin, may resume
    Paused,
    /// Past expiration. No orders, positions kept until settlement
    Expired,
    /// Settled and closed for good
    Demolished,
}

impl Default for MarketStatus {
    fn default() -> Self {
        Self::Active
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketKind {
    Perpetual,
    ExpiryFutures,
    BinaryOptions,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarginRatios {
    pub initial_margin_ratio: Decimal,
    pub maintenance_margin_ratio: Decimal,
}

impl MarginRatios {
    pub fn validate(&self) -> Result<(), MarketError> {
        let valid = self.maintenance_margin_ratio > Decimal::ZERO
            && self.initial_margin_ratio > self.maintenance_margin_ratio
            && self.initial_margin_ratio <= Decimal::ONE;
        if valid {
            Ok(())
        } else {
            Err(MarketError::InvalidMarginRatios {
                initial: self.initial_margin_ratio,
                maintenance: self.maintenance_margin_ratio,
            })
        }
    }
}

impl Default for MarginRatios {
    fn default() -> Self {
        Self {
            initial_margin_ratio: dec!(0.05),
            maintenance_margin_ratio: dec!(0.02),
        }
    }
}

/// Price a market settles at. `-1` on the wire means refund everyone their margin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SettlementPrice {
    Price(Decimal),
    Refund,
}

impl SettlementPrice {
    pub const REFUND_SENTINEL: Decimal = dec!(-1);

    pub fn from_raw(raw: Decimal) -> Self {
        if raw == Self::REFUND_SENTINEL {
            SettlementPrice::Refund
        } else {
            SettlementPrice::Price(raw)
        }
    }
}

/// Fields shared by every market launch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketLaunch {
    pub id: MarketId,
    pub ticker: String,
    pub quote_denom: String,
    /// key the oracle price feed is queried with
    pub oracle: String,
    pub oracle_scale_factor: u32,
    pub maker_fee_rate: Decimal,
    pub taker_fee_rate: Decimal,
    pub min_price_tick_size: Decimal,
    pub min_quantity_tick_size: Decimal,
}

impl MarketLaunch {
    pub fn new(id: MarketId, ticker: &str, quote_denom: &str, oracle: &str) -> Self {
        Self {
            id,
            ticker: ticker.to_string(),
            quote_denom: quote_denom.to_string(),
            oracle: oracle.to_string(),
            oracle_scale_factor: 0,
            maker_fee_rate: dec!(0.001),
            taker_fee_rate: dec!(0.002),
            min_price_tick_size: dec!(0.0001),
            min_quantity_tick_size: dec!(0.0001),
        }
    }

    pub fn with_fees(mut self, maker: Decimal, taker: Decimal) -> Self {
        self.maker_fee_rate = maker;
        self.taker_fee_rate = taker;
        self
    }

    pub fn with_ticks(mut self, price_tick: Decimal, quantity_tick: Decimal) -> Self {
        self.min_price_tick_size = price_tick;
        self.min_quantity_tick_size = quantity_tick;
        self
    }

    pub fn with_scale_factor(mut self, scale: u32) -> Self {
        self.oracle_scale_factor = scale;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Market {
    pub id: MarketId,
    pub ticker: String,
    pub quote_denom: String,
    pub oracle: String,
    pub oracle_scale_factor: u32,
    pub kind: MarketKind,
    /// `None` for binary options
    pub margin_ratios: Option<MarginRatios>,
    pub maker_fee_rate: Decimal,
    pub taker_fee_rate: Decimal,
    pub min_price_tick_size: Decimal,
    pub min_quantity_tick_size: Decimal,
    pub status: MarketStatus,
    pub expiration_timestamp: Option<Timestamp>,
    pub settlement_timestamp: Option<Timestamp>,
    pub settlement_price: Option<SettlementPrice>,
}

impl Market {
    pub fn new(launch: MarketLaunch, kind: MarketKind, margin_ratios: Option<MarginRatios>) -> Self {
        Self {
            id: launch.id,
            ticker: launch.ticker,
            quote_denom: launch.quote_denom,
            oracle: launch.oracle,
            oracle_scale_factor: launch.oracle_scale_factor,
            kind,
            margin_ratios,
            maker_fee_rate: launch.maker_fee_rate,
            taker_fee_rate: launch.taker_fee_rate,
            min_price_tick_size: launch.min_price_tick_size,
            min_quantity_tick_size: launch.min_quantity_tick_size,
            status: MarketStatus::Active,
            expiration_timestamp: None,
            settlement_timestamp: None,
            settlement_price: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == MarketStatus::Active
    }

    pub fn is_perpetual(&self) -> bool {
        self.kind == MarketKind::Perpetual
    }

    pub fn is_binary_options(&self) -> bool {
        self.kind == MarketKind::BinaryOptions
    }

    /// `10^oracle_scale_factor`. binary option prices run from 0 to this.
    pub fn scale(&self) -> Decimal {
        Decimal::TEN.powu(self.oracle_scale_factor as u64)
    }

    pub fn scaled(&self, value: Decimal) -> Decimal {
        value * self.scale()
    }

    pub fn validate_price(&self, price: Decimal) -> Result<(), MarketError> {
        if price <= Decimal::ZERO {
            return Err(MarketError::InvalidPrice(price));
        }
        if self.is_binary_options() && price >= self.scale() {
            return Err(MarketError::InvalidPrice(price));
        }
        if !self.min_price_tick_size.is_zero() && !(price % self.min_price_tick_size).is_zero() {
            return Err(MarketError::InvalidPriceTick {
                price,
                tick: self.min_price_tick_size,
            });
        }
        Ok(())
    }

    pub fn validate_quantity(&self, quantity: Decimal) -> Result<(), MarketError> {
        if quantity <= Decimal::ZERO {
            return Err(MarketError::InvalidQuantity(quantity));
        }
        if !self.min_quantity_tick_size.is_zero() && !(quantity % self.min_quantity_tick_size).is_zero() {
            return Err(MarketError::InvalidQuantityTick {
                quantity,
                tick: self.min_quantity_tick_size,
            });
        }
        Ok(())
    }

    /// Minimum margin a vanilla order must lock.
    pub fn required_order_margin(&self, side: Side, price: Decimal, quantity: Decimal) -> Quote {
        match (self.kind, self.margin_ratios) {
            (MarketKind::BinaryOptions, _) => {
                let per_unit = if side.is_buy() { price } else { self.scale() - price };
                Quote::new(per_unit * quantity)
            }
            (_, Some(ratios)) => Quote::new(quantity * price * ratios.initial_margin_ratio),
            (_, None) => Quote::zero(),
        }
    }

    /// Binary settlement prices are given in `[0, 1]`; clamp then scale.
    pub fn scaled_settlement_price(&self, price: Decimal) -> Decimal {
        if self.is_binary_options() {
            self.scaled(price.max(Decimal::ZERO).min(Decimal::ONE))
        } else {
            price
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MarketError {
    #[error("Invalid price: {0}")]
    InvalidPrice(Decimal),

    #[error("Invalid quantity: {0}")]
    InvalidQuantity(Decimal),

    #[error("Price {price} not aligned to tick {tick}")]
    InvalidPriceTick { price: Decimal, tick: Decimal },

    #[error("Quantity {quantity} not aligned to tick {tick}")]
    InvalidQuantityTick { quantity: Decimal, tick: Decimal },

    #[error("Margin ratios invalid: initial {initial}, maintenance {maintenance}")]
    InvalidMarginRatios { initial: Decimal, maintenance: Decimal },

    #[error("Expiration {expiration} must precede settlement {settlement}")]
    InvalidTimestamps {
        expiration: Timestamp,
        settlement: Timestamp,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binary() -> Market {
        let launch = MarketLaunch::new(MarketId(2), "WIN/USDT", "usdt", "outcome").with_scale_factor(6);
        Market::new(launch, MarketKind::BinaryOptions, None)
    }

    #[test]
    fn refund_sentinel() {
        assert_eq!(SettlementPrice::from_raw(dec!(-1)), SettlementPrice::Refund);
        assert_eq!(SettlementPrice::from_raw(dec!(0.4)), SettlementPrice::Price(dec!(0.4)));
    }

    #[test]
    fn binary_prices_are_scaled() {
        let market = binary();
        assert_eq!(market.scale(), dec!(1000000));
        assert_eq!(market.scaled_settlement_price(dec!(0.5)), dec!(500000));
        assert_eq!(market.scaled_settlement_price(dec!(1.7)), dec!(1000000));
        assert_eq!(market.scaled_settlement_price(dec!(-0.2)), dec!(0));
    }

    #[test]
    fn binary_order_margin_by_side() {
        let market = binary();
        let buy = market.required_order_margin(Side::Long, dec!(200000), dec!(2));
        let sell = market.required_order_margin(Side::Short, dec!(200000), dec!(2));
        assert_eq!(buy.value(), dec!(400000));
        assert_eq!(sell.value(), dec!(1600000));
    }

    #[test]
    fn derivative_order_margin_uses_initial_ratio() {
        let launch = MarketLaunch::new(MarketId(1), "ETH/USDT PERP", "usdt", "eth");
        let market = Market::new(launch, MarketKind::Perpetual, Some(MarginRatios::default()));
        let required = market.required_order_margin(Side::Long, dec!(2000), dec!(3));
        assert_eq!(required.value(), dec!(300));
    }

    #[test]
    fn tick_validation() {
        let launch = MarketLaunch::new(MarketId(1), "ETH/USDT PERP", "usdt", "eth").with_ticks(dec!(0.5), dec!(0.1));
        let market = Market::new(launch, MarketKind::Perpetual, Some(MarginRatios::default()));
        assert!(market.validate_price(dec!(100.5)).is_ok());
        assert!(matches!(market.validate_price(dec!(100.2)), Err(MarketError::InvalidPriceTick { .. })));
        assert!(matches!(market.validate_quantity(dec!(0.15)), Err(MarketError::InvalidQuantityTick { .. })));
        assert!(matches!(market.validate_quantity(dec!(0)), Err(MarketError::InvalidQuantity(_))));
    }

    #[test]
    fn binary_price_must_stay_below_scale() {
        let market = binary();
        assert!(market.validate_price(dec!(999999)).is_ok());
        assert!(market.validate_price(dec!(1000000)).is_err());
    }

    #[test]
    fn margin_ratio_ordering() {
        assert!(MarginRatios::default().validate().is_ok());
        let inverted = MarginRatios {
            initial_margin_ratio: dec!(0.01),
            maintenance_margin_ratio: dec!(0.02),
        };
        assert!(matches!(inverted.validate(), Err(MarketError::InvalidMarginRatios { .. })));
    }
}
