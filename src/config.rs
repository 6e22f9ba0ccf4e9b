// 7.0 config.rs: module parameters. funding defaults new perpetuals fall back to,
// the resting order cap and the subaccount that collects settlement surplus.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::SubaccountId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeParams {
    // Seconds between funding boundaries
    pub default_funding_interval: i64,
    // Absolute bound on the hourly funding rate
    pub default_hourly_funding_rate_cap: Decimal,
    // Added to every hourly rate before clamping
    pub default_hourly_interest_rate: Decimal,
    // Resting limit orders one subaccount may keep per market side
    pub max_derivative_order_side_count: usize,
    // Receives settlement surplus for markets without an insurance fund
    pub auction_subaccount_id: SubaccountId,
}

impl Default for ExchangeParams {
    fn default() -> Self {
        Self {
            default_funding_interval: 3600,
            default_hourly_funding_rate_cap: dec!(0.000625),
            default_hourly_interest_rate: dec!(0.00000416666),
            max_derivative_order_side_count: 20,
            auction_subaccount_id: SubaccountId(0),
        }
    }
}

impl ExchangeParams {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_funding_interval <= 0 {
            return Err(ConfigError::InvalidFunding {
                reason: "funding interval must be positive".to_string(),
            });
        }

        if self.default_hourly_funding_rate_cap <= Decimal::ZERO {
            return Err(ConfigError::InvalidFunding {
                reason: "hourly funding rate cap must be positive".to_string(),
            });
        }

        if self.default_hourly_interest_rate < Decimal::ZERO {
            return Err(ConfigError::InvalidFunding {
                reason: "hourly interest rate cannot be negative".to_string(),
            });
        }

        if self.max_derivative_order_side_count == 0 {
            return Err(ConfigError::InvalidOrderLimits {
                reason: "side count must allow at least one order".to_string(),
            });
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid funding params: {reason}")]
    InvalidFunding { reason: String },

    #[error("invalid order limits: {reason}")]
    InvalidOrderLimits { reason: String },
}
