//! Settlement core simulation.
//!
//! Walks the engine through trade application, reduce-only enforcement, hourly
//! funding and market settlement with in-memory deposits, insurance and oracle.
//! Set `RUST_LOG=debug` to see the engine's own logs.

use rust_decimal_macros::dec;
use settlement_core::*;
use tracing_subscriber::EnvFilter;

const T0: i64 = 1_700_000_000;

fn main() -> Result<(), ExchangeError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("Derivatives Settlement Core Simulation\n");

    scenario_1_trade_lifecycle()?;
    scenario_2_reduce_only_displacement()?;
    scenario_3_hourly_funding()?;
    scenario_4_binary_options_settlement()?;
    scenario_5_scheduled_refund()?;

    println!("\nAll simulations completed successfully.");
    Ok(())
}

fn perp_engine() -> Result<Engine, ExchangeError> {
    let mut engine = Engine::new();
    engine.set_block_time(Timestamp::from_secs(T0));
    engine.oracle_mut().set_price("eth", dec!(2000));
    engine.launch_perpetual_market(
        MarketLaunch::new(MarketId(1), "ETH/USDT PERP", "usdt", "eth"),
        MarginRatios::default(),
        FundingOverrides::default(),
    )?;
    for sub in 1..=4 {
        engine
            .deposits_mut()
            .fund(SubaccountId(sub), "usdt", Quote::new(dec!(100000)));
    }
    Ok(engine)
}

fn print_position(engine: &Engine, market: MarketId, sub: SubaccountId) {
    match engine.position(market, sub) {
        Some(p) => println!(
            "    {}: {:?} {} @ {} margin {}",
            sub, p.side, p.quantity, p.entry_price, p.margin
        ),
        None => println!("    {}: flat", sub),
    }
}

/// Open, decrease and flip through applied trades.
fn scenario_1_trade_lifecycle() -> Result<(), ExchangeError> {
    println!("Scenario 1: Trade Lifecycle\n");

    let mut engine = perp_engine()?;
    let market = MarketId(1);
    let (alice, bob) = (SubaccountId(1), SubaccountId(2));

    let bid = engine.place_limit_order(OrderRequest::limit(market, alice, Side::Long, dec!(2000), dec!(2), dec!(400)))?;
    println!("  Alice rests BUY 2 @ 2000 with 400 margin");
    println!("    available: {}", engine.deposit(alice, "usdt").available_balance);

    engine.apply_trade(Trade::new(market, alice, bob, dec!(2), dec!(2000), dec!(400), dec!(400)).with_orders(bid.hash, None))?;
    println!("  Bob sells into it");
    print_position(&engine, market, alice);
    print_position(&engine, market, bob);

    let out = engine.apply_trade(Trade::new(market, SubaccountId(3), alice, dec!(1), dec!(2100), dec!(200), dec!(0)))?;
    println!("  Alice sells 1 @ 2100: {:?}, pnl {}, payout {}", out.seller.kind, out.seller.realized_pnl, out.seller.payout);

    let out = engine.apply_trade(Trade::new(market, bob, SubaccountId(4), dec!(3), dec!(1900), dec!(300), dec!(300)))?;
    println!("  Bob buys 3 @ 1900: {:?}", out.buyer.kind);
    print_position(&engine, market, bob);
    println!("  Margin pool: {}\n", engine.market_margin_pool(market));
    Ok(())
}

/// A better-priced vanilla order pushes reduce-only orders past the position.
fn scenario_2_reduce_only_displacement() -> Result<(), ExchangeError> {
    println!("Scenario 2: Reduce-Only Displacement\n");

    let mut engine = perp_engine()?;
    let market = MarketId(1);
    let (alice, bob) = (SubaccountId(1), SubaccountId(2));

    engine.apply_trade(Trade::new(market, alice, bob, dec!(2), dec!(2000), dec!(400), dec!(400)))?;
    println!("  Alice is long 2");

    engine.place_limit_order(OrderRequest::reduce_only(market, alice, Side::Short, dec!(2100), dec!(1)))?;
    engine.place_limit_order(OrderRequest::reduce_only(market, alice, Side::Short, dec!(2200), dec!(1)))?;
    let meta = engine.subaccount_orderbook_metadata(market, alice, Side::Short);
    println!("  Two reduce-only sells rest, aggregate {}", meta.aggregate_reduce_only_quantity);

    let result = engine.place_limit_order(OrderRequest::limit(market, alice, Side::Short, dec!(2050), dec!(1), dec!(200)))?;
    println!("  Vanilla SELL 1 @ 2050 cancels {} reduce-only order(s)", result.cancelled.len());
    let meta = engine.subaccount_orderbook_metadata(market, alice, Side::Short);
    println!("  Aggregate now {}, invariant holds: {}\n", meta.aggregate_reduce_only_quantity, engine.is_metadata_invariant_valid());
    Ok(())
}

/// Trade premium turns into an hourly rate at the funding boundary.
fn scenario_3_hourly_funding() -> Result<(), ExchangeError> {
    println!("Scenario 3: Hourly Funding\n");

    let mut engine = perp_engine()?;
    let market = MarketId(1);
    let (alice, bob) = (SubaccountId(1), SubaccountId(2));

    engine.apply_trade(Trade::new(market, alice, bob, dec!(1), dec!(2000), dec!(500), dec!(500)))?;

    let boundary = engine
        .perpetual_market_info(market)
        .map(|i| i.next_funding_timestamp)
        .unwrap_or_default();
    engine.set_block_time(boundary);
    engine.apply_trade(Trade::new(market, alice, bob, dec!(1), dec!(2010), dec!(500), dec!(500)))?;

    let block = engine.begin_block(boundary);
    engine.end_block();
    for funding in &block.fundings {
        println!(
            "  {}: rate {}, cumulative funding {}",
            funding.market_id, funding.hourly_funding_rate, funding.cumulative_funding
        );
    }

    engine.apply_trade(Trade::new(market, SubaccountId(3), alice, dec!(1), dec!(2000), dec!(200), dec!(0)))?;
    println!("  After Alice's next fill, funding is settled into her margin");
    print_position(&engine, market, alice);
    println!();
    Ok(())
}

/// Underfunded binary options market draws insurance, then haircuts.
fn scenario_4_binary_options_settlement() -> Result<(), ExchangeError> {
    println!("Scenario 4: Binary Options Settlement\n");

    let mut engine = Engine::new();
    engine.set_block_time(Timestamp::from_secs(T0));
    let market = engine.launch_binary_options_market(
        MarketLaunch::new(MarketId(7), "RAIN/USDT", "usdt", "rain").with_scale_factor(6),
        Timestamp::from_secs(T0 + 3600),
        Timestamp::from_secs(T0 + 7200),
    )?;
    engine.insurance_mut().create_fund(market, Quote::new(dec!(100000)));

    let (buyer, seller) = (SubaccountId(1), SubaccountId(2));
    for sub in [buyer, seller] {
        engine.deposits_mut().fund(sub, "usdt", Quote::new(dec!(5000000)));
    }
    engine.apply_trade(Trade::new(market, buyer, seller, dec!(2), dec!(200000), dec!(400000), dec!(1400000)))?;
    println!("  Buyer 2 @ 0.2 with 400000, seller with 1400000 (200000 short of full cover)");

    let result = engine.force_settle_market(market, Some(dec!(1)), SettlementOrigin::Admin)?;
    println!(
        "  Settled at 1: required {}, insurance draw {}, haircut {}",
        result.plan.required_payout, result.plan.insurance_draw, result.plan.haircut
    );
    for payout in &result.plan.payouts {
        println!("    {} ({:?}): {}", payout.subaccount_id, payout.side, payout.payout);
    }
    println!("  Insurance left: {:?}\n", engine.insurance_balance(market));
    Ok(())
}

/// Expiry futures reach settlement with no oracle price and refund margins.
fn scenario_5_scheduled_refund() -> Result<(), ExchangeError> {
    println!("Scenario 5: Scheduled Settlement Without Oracle\n");

    let mut engine = Engine::new();
    engine.set_block_time(Timestamp::from_secs(T0));
    let market = engine.launch_expiry_futures_market(
        MarketLaunch::new(MarketId(9), "BTC/USDT 24Q4", "usdt", "btc"),
        MarginRatios::default(),
        Timestamp::from_secs(T0 + 3600),
        Timestamp::from_secs(T0 + 7200),
    )?;
    let (alice, bob) = (SubaccountId(1), SubaccountId(2));
    for sub in [alice, bob] {
        engine.deposits_mut().fund(sub, "usdt", Quote::new(dec!(10000)));
    }
    engine.apply_trade(Trade::new(market, alice, bob, dec!(1), dec!(40000), dec!(2000), dec!(2000)))?;
    engine.place_limit_order(OrderRequest::limit(market, alice, Side::Long, dec!(39000), dec!(1), dec!(1950)))?;

    let block = engine.begin_block(Timestamp::from_secs(T0 + 3600));
    println!("  Expired: {:?}, alice available {}", block.expired, engine.deposit(alice, "usdt").available_balance);

    let block = engine.begin_block(Timestamp::from_secs(T0 + 7200));
    for settlement in &block.settlements {
        println!("  {} settled with {:?}, paid {}", settlement.market_id, settlement.settlement_price, settlement.plan.total_paid());
    }
    for sub in [alice, bob] {
        let d = engine.deposit(sub, "usdt");
        println!("    {}: available {}, total {}", sub, d.available_balance, d.total_balance);
    }
    Ok(())
}
