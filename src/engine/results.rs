// 8.0.2: result types and errors for engine operations.

use crate::config::ConfigError;
use crate::custody::CustodyError;
use crate::insurance::InsuranceError;
use crate::market::{MarketError, MarketKind, MarketStatus, SettlementPrice};
use crate::position::{FillOutcome, PositionError};
use crate::reduce_only::ReduceOnlyError;
use crate::settlement::SettlementPlan;
use crate::types::{MarketId, OrderHash, Quote, Side, SubaccountId};
use rust_decimal::Decimal;

#[derive(Debug, Clone)]
pub struct OrderResult {
    /// `None` when a reduce-only order resized to nothing and was not admitted
    pub hash: Option<OrderHash>,
    pub admitted_quantity: Decimal,
    /// reduce-only orders cancelled by the admission, possibly including this one
    pub cancelled: Vec<OrderHash>,
}

#[derive(Debug, Clone)]
pub struct TradeResult {
    pub buyer: FillOutcome,
    pub seller: FillOutcome,
    pub cancelled: Vec<OrderHash>,
}

#[derive(Debug, Clone)]
pub struct FundingResult {
    pub market_id: MarketId,
    pub hourly_funding_rate: Decimal,
    pub cumulative_funding: Decimal,
    pub mark_price: Decimal,
}

#[derive(Debug, Clone)]
pub struct SettlementResult {
    pub market_id: MarketId,
    pub settlement_price: SettlementPrice,
    pub cancelled_orders: usize,
    pub plan: SettlementPlan,
}

/// Everything begin block did, in execution order.
#[derive(Debug, Clone, Default)]
pub struct BlockResult {
    pub fundings: Vec<FundingResult>,
    pub expired: Vec<MarketId>,
    pub settlements: Vec<SettlementResult>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExchangeError {
    #[error("Invalid position args: {reason}")]
    InvalidPositionArgs { reason: String },

    #[error("Reduce-only {order_side:?} order conflicts with {position_side:?} position")]
    InvalidReduceOnlyPositionDirection { order_side: Side, position_side: Side },

    #[error("Price {price} surpasses bankruptcy price")]
    PriceSurpassesBankruptcyPrice { price: Decimal },

    #[error("Position not found for {subaccount_id} in {market_id}")]
    PositionNotFound {
        market_id: MarketId,
        subaccount_id: SubaccountId,
    },

    #[error("Derivative market {0:?} not found")]
    DerivativeMarketNotFound(MarketId),

    #[error("Binary options market {0:?} not found")]
    BinaryOptionsMarketNotFound(MarketId),

    #[error("Order doesn't exist in {0:?}")]
    OrderDoesntExist(MarketId),

    #[error("Exceeds {max} resting {side:?} orders")]
    ExceedsOrderSideCount { side: Side, max: usize },

    #[error("Market order already exists for {subaccount_id} in {market_id}")]
    MarketOrderAlreadyExists {
        market_id: MarketId,
        subaccount_id: SubaccountId,
    },

    #[error("Client order id {0} already exists")]
    ClientOrderIdAlreadyExists(String),

    #[error("Insufficient deposit for {subaccount_id}: required {required}, available {available}")]
    InsufficientDeposit {
        subaccount_id: SubaccountId,
        required: Quote,
        available: Quote,
    },

    #[error("Insufficient insurance funds in {market_id:?}: requested {requested}, balance {balance}")]
    InsufficientFunds {
        market_id: MarketId,
        requested: Quote,
        balance: Quote,
    },

    #[error("Insufficient order margin: required {required}, provided {provided}")]
    InsufficientOrderMargin { required: Quote, provided: Quote },

    #[error("Market {market_id:?} has invalid status {status:?}")]
    InvalidMarketStatus {
        market_id: MarketId,
        status: MarketStatus,
    },

    #[error("Market {0:?} already exists")]
    MarketAlreadyExists(MarketId),

    #[error("Market error: {0}")]
    Market(#[from] MarketError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl ExchangeError {
    /// An id the engine never launched has no kind and is reported as a derivative market.
    pub(super) fn market_not_found(market_id: MarketId, kind: Option<MarketKind>) -> Self {
        match kind {
            Some(MarketKind::BinaryOptions) => ExchangeError::BinaryOptionsMarketNotFound(market_id),
            _ => ExchangeError::DerivativeMarketNotFound(market_id),
        }
    }

    pub(super) fn from_reduce_only(err: ReduceOnlyError, market_id: MarketId, subaccount_id: SubaccountId) -> Self {
        match err {
            ReduceOnlyError::PositionNotFound => ExchangeError::PositionNotFound {
                market_id,
                subaccount_id,
            },
            ReduceOnlyError::InvalidDirection {
                order_side,
                position_side,
            } => ExchangeError::InvalidReduceOnlyPositionDirection {
                order_side,
                position_side,
            },
            ReduceOnlyError::PriceSurpassesBankruptcyPrice { price, .. } => {
                ExchangeError::PriceSurpassesBankruptcyPrice { price }
            }
        }
    }
}

impl From<PositionError> for ExchangeError {
    fn from(err: PositionError) -> Self {
        match err {
            PositionError::InvalidArgs { .. } => ExchangeError::InvalidPositionArgs {
                reason: err.to_string(),
            },
            PositionError::Bankrupt { price, .. } => ExchangeError::PriceSurpassesBankruptcyPrice { price },
        }
    }
}

impl From<CustodyError> for ExchangeError {
    fn from(err: CustodyError) -> Self {
        match err {
            CustodyError::InsufficientDeposit {
                subaccount_id,
                required,
                available,
                ..
            } => ExchangeError::InsufficientDeposit {
                subaccount_id,
                required,
                available,
            },
        }
    }
}

impl From<InsuranceError> for ExchangeError {
    fn from(err: InsuranceError) -> Self {
        match err {
            InsuranceError::FundNotFound(market_id) => ExchangeError::InsufficientFunds {
                market_id,
                requested: Quote::zero(),
                balance: Quote::zero(),
            },
            InsuranceError::InsufficientFunds {
                market_id,
                requested,
                balance,
            } => ExchangeError::InsufficientFunds {
                market_id,
                requested,
                balance,
            },
        }
    }
}
