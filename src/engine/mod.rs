// 8.0: settlement engine. applies trades to positions, keeps reduce-only orders consistent,
// runs hourly funding and settles expiring markets.
// deterministic and event-driven; deposits, insurance and prices come in through traits.

mod config;
mod core;
mod fills;
mod funding;
mod markets;
mod orders;
mod results;
mod settlement;

pub use config::EngineConfig;
pub use core::Engine;
pub use fills::Trade;
pub use markets::FundingOverrides;
pub use results::{BlockResult, ExchangeError, FundingResult, OrderResult, SettlementResult, TradeResult};
