// settlement-core: settlement and risk core of a derivatives exchange.
// turns matched trades into position changes, keeps resting reduce-only orders
// within the positions they close, accrues perpetual funding and settles markets.
// all computation is deterministic fixed-point with no external I/O.
//
// file map (search X.0 for structs, X.1+ for logic):
//   1.x  types.rs: primitives: MarketId, SubaccountId, Side, Price, Quote, Timestamp
//   2.x  order.rs: resting orders and the per-market book
//   3.0  orderbook_metadata.rs: per (market, subaccount, side) order tallies
//   3.1  reduce_only.rs: reduce-only admission and excess cancellation
//   4.x  position.rs: position struct, apply_fill open/increase/decrease/close/flip
//   4.3  ledger.rs: positions keyed by (market, subaccount)
//   5.x  funding.rs: trade premium accumulation, hourly funding rate
//   6.0  insurance.rs: per-market insurance fund store
//   7.x  config.rs: module parameters
//   8.x  engine/: core engine: markets, orders, fills, funding, settlement
//   9.0  price_feed.rs: oracle price lookup
//   9.1  settlement.rs: payout, insurance draw and haircut planning
//   9.2  custody.rs: deposit reservations and payouts
//   11.x events.rs: state transition events for indexers
//   12.x market.rs: market definitions + lifecycle status

// core modules
pub mod engine;
pub mod events;
pub mod funding;
pub mod ledger;
pub mod market;
pub mod order;
pub mod orderbook_metadata;
pub mod position;
pub mod reduce_only;
pub mod settlement;
pub mod types;

// collaborator seams
pub mod config;
pub mod custody;
pub mod insurance;
pub mod price_feed;

// re exports for convenience
pub use engine::*;
pub use events::*;
pub use funding::*;
pub use ledger::*;
pub use market::*;
pub use order::*;
pub use orderbook_metadata::*;
pub use position::*;
pub use settlement::*;
pub use types::*;
pub use config::{ConfigError, ExchangeParams};
pub use custody::{CustodyError, Deposit, DepositKeeper, InMemoryDeposits};
pub use insurance::{InMemoryInsurance, InsuranceError, InsuranceFund, InsuranceFundStore};
pub use price_feed::{OraclePriceFeed, StaticOracle};
pub use reduce_only::{admissible_quantity, excess_reduce_only, quantity_ranked_ahead, ReduceOnlyError};
