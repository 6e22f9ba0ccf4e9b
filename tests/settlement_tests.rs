//! Market expiry and settlement through the engine.
//!
//! Covers payouts at the price bounds, insurance draw before haircut, surplus
//! routing, order refunds and the terminal status.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use settlement_core::*;

const T0: i64 = 1_700_000_000;
const BINARY: MarketId = MarketId(7);
const PERP: MarketId = MarketId(1);
const BUYER: SubaccountId = SubaccountId(1);
const SELLER: SubaccountId = SubaccountId(2);
const THIRD: SubaccountId = SubaccountId(3);

fn binary_engine() -> Engine {
    let mut engine = Engine::new();
    engine.set_block_time(Timestamp::from_secs(T0));
    engine
        .launch_binary_options_market(
            MarketLaunch::new(BINARY, "RAIN/USDT", "usdt", "rain").with_scale_factor(6),
            Timestamp::from_secs(T0 + 3600),
            Timestamp::from_secs(T0 + 7200),
        )
        .unwrap();
    for sub in [BUYER, SELLER, THIRD] {
        engine.deposits_mut().fund(sub, "usdt", Quote::new(dec!(5000000)));
    }
    engine
}

fn perp_engine() -> Engine {
    let mut engine = Engine::new();
    engine.set_block_time(Timestamp::from_secs(T0));
    engine.oracle_mut().set_price("eth", dec!(2000));
    engine
        .launch_perpetual_market(
            MarketLaunch::new(PERP, "ETH/USDT PERP", "usdt", "eth"),
            MarginRatios::default(),
            FundingOverrides::default(),
        )
        .unwrap();
    for sub in [BUYER, SELLER, THIRD] {
        engine.deposits_mut().fund(sub, "usdt", Quote::new(dec!(10000)));
    }
    engine
}

fn total(engine: &Engine, sub: SubaccountId) -> Decimal {
    engine.deposit(sub, "usdt").total_balance.value()
}

fn available(engine: &Engine, sub: SubaccountId) -> Decimal {
    engine.deposit(sub, "usdt").available_balance.value()
}

// buyer 2 @ 0.2 fully covered by both sides: 400000 + 1600000 in the pool
fn fully_collateralised_pair(engine: &mut Engine) {
    engine
        .apply_trade(Trade::new(BINARY, BUYER, SELLER, dec!(2), dec!(200000), dec!(400000), dec!(1600000)))
        .unwrap();
}

#[test]
fn price_zero_pays_seller_both_margins() {
    let mut engine = binary_engine();
    fully_collateralised_pair(&mut engine);
    assert_eq!(engine.market_margin_pool(BINARY).value(), dec!(2000000));

    let result = engine.force_settle_market(BINARY, Some(dec!(0)), SettlementOrigin::Admin).unwrap();

    assert_eq!(result.plan.total_paid().value(), dec!(2000000));
    assert_eq!(total(&engine, BUYER), dec!(4600000));
    assert_eq!(total(&engine, SELLER), dec!(5400000));
    assert!(engine.positions_by_market(BINARY).is_empty());
    assert!(engine.market_margin_pool(BINARY).is_zero());
}

#[test]
fn price_one_pays_buyer_both_margins() {
    let mut engine = binary_engine();
    fully_collateralised_pair(&mut engine);

    engine.force_settle_market(BINARY, Some(dec!(1)), SettlementOrigin::Governance).unwrap();

    assert_eq!(total(&engine, BUYER), dec!(6600000));
    assert_eq!(total(&engine, SELLER), dec!(3400000));
}

#[test]
fn interior_price_interpolates() {
    let mut engine = binary_engine();
    fully_collateralised_pair(&mut engine);

    let result = engine.force_settle_market(BINARY, Some(dec!(0.5)), SettlementOrigin::Admin).unwrap();
    let paid: Vec<Decimal> = result.plan.payouts.iter().map(|p| p.payout.value()).collect();

    // 0.375 of the seller's 1600000 moves to the buyer
    assert_eq!(paid, vec![dec!(1000000), dec!(1000000)]);
}

#[test]
fn settlement_price_clamped_to_unit_range() {
    let mut engine = binary_engine();
    fully_collateralised_pair(&mut engine);

    let result = engine.force_settle_market(BINARY, Some(dec!(3)), SettlementOrigin::Admin).unwrap();
    assert_eq!(result.settlement_price, SettlementPrice::Price(dec!(3)));
    assert_eq!(total(&engine, BUYER), dec!(6600000));
}

// seller under-covers by 200000, so settling at 1 leaves the buyer short
fn underfunded_pair(engine: &mut Engine) {
    engine
        .apply_trade(Trade::new(BINARY, BUYER, SELLER, dec!(2), dec!(200000), dec!(400000), dec!(1400000)))
        .unwrap();
}

#[test]
fn shortfall_without_insurance_is_haircut() {
    let mut engine = binary_engine();
    underfunded_pair(&mut engine);

    let result = engine.force_settle_market(BINARY, Some(dec!(1)), SettlementOrigin::Admin).unwrap();

    // 200000 missing over 2000000 scaled exposure
    assert_eq!(result.plan.haircut, dec!(0.1));
    assert_eq!(result.plan.required_payout.value(), dec!(2000000));
    assert_eq!(result.plan.payouts[0].payout.value(), dec!(1800000));
    assert!(result.plan.insurance_draw.is_zero());
    assert_eq!(total(&engine, BUYER), dec!(4600000) + dec!(1800000));
}

#[test]
fn insurance_absorbs_shortfall_before_haircut() {
    let mut engine = binary_engine();
    engine.insurance_mut().create_fund(BINARY, Quote::new(dec!(300000)));
    underfunded_pair(&mut engine);

    let result = engine.force_settle_market(BINARY, Some(dec!(1)), SettlementOrigin::Admin).unwrap();

    assert!(result.plan.haircut.is_zero());
    assert_eq!(result.plan.insurance_draw.value(), dec!(200000));
    assert_eq!(engine.insurance_balance(BINARY), Some(Quote::new(dec!(100000))));
    assert_eq!(total(&engine, BUYER), dec!(4600000) + dec!(2000000));
}

#[test]
fn exhausted_insurance_then_haircut() {
    let mut engine = binary_engine();
    engine.insurance_mut().create_fund(BINARY, Quote::new(dec!(100000)));
    underfunded_pair(&mut engine);

    let result = engine.force_settle_market(BINARY, Some(dec!(1)), SettlementOrigin::Admin).unwrap();

    assert_eq!(result.plan.insurance_draw.value(), dec!(100000));
    assert_eq!(result.plan.haircut, dec!(0.05));
    assert_eq!(result.plan.payouts[0].payout.value(), dec!(1900000));
    assert_eq!(engine.insurance_balance(BINARY), Some(Quote::zero()));
}

#[test]
fn resting_orders_refunded_to_available_only() {
    let mut engine = binary_engine();
    fully_collateralised_pair(&mut engine);
    engine
        .place_limit_order(OrderRequest::limit(BINARY, THIRD, Side::Long, dec!(300000), dec!(1), dec!(300000)))
        .unwrap();
    // 300000 margin + 300 maker fee
    assert_eq!(available(&engine, THIRD), dec!(4699700));
    assert_eq!(total(&engine, THIRD), dec!(5000000));

    let result = engine.force_settle_market(BINARY, Some(dec!(0)), SettlementOrigin::Admin).unwrap();

    assert_eq!(result.cancelled_orders, 1);
    assert_eq!(available(&engine, THIRD), dec!(5000000));
    assert_eq!(total(&engine, THIRD), dec!(5000000));
    let cancels: Vec<&Event> = engine.events_of_kind("EventCancelDerivativeOrder").collect();
    assert_eq!(cancels.len(), 1);
    match &cancels[0].payload {
        EventPayload::CancelDerivativeOrder(e) => {
            assert_eq!(e.reason, CancelReason::MarketDemolished);
            assert_eq!(e.refunded.value(), dec!(300300));
        }
        other => panic!("unexpected payload {:?}", other),
    }
    assert!(engine.is_metadata_invariant_valid());
}

#[test]
fn settling_twice_fails_without_side_effects() {
    let mut engine = binary_engine();
    fully_collateralised_pair(&mut engine);
    engine.force_settle_market(BINARY, Some(dec!(0)), SettlementOrigin::Admin).unwrap();

    let events = engine.events().len();
    let seller = engine.deposit(SELLER, "usdt");

    let err = engine.force_settle_market(BINARY, Some(dec!(1)), SettlementOrigin::Governance);
    assert_eq!(
        err.unwrap_err(),
        ExchangeError::InvalidMarketStatus {
            market_id: BINARY,
            status: MarketStatus::Demolished,
        }
    );
    assert_eq!(engine.events().len(), events);
    assert_eq!(engine.deposit(SELLER, "usdt"), seller);
    assert_eq!(engine.market(BINARY).unwrap().settlement_price, Some(SettlementPrice::Price(dec!(0))));
}

#[test]
fn demolished_markets_reject_orders() {
    let mut engine = binary_engine();
    engine.force_settle_market(BINARY, Some(dec!(-1)), SettlementOrigin::Admin).unwrap();
    let err = engine
        .place_limit_order(OrderRequest::limit(BINARY, BUYER, Side::Long, dec!(100000), dec!(1), dec!(100000)))
        .unwrap_err();
    assert_eq!(err, ExchangeError::BinaryOptionsMarketNotFound(BINARY));

    let mut engine = perp_engine();
    engine.force_settle_market(PERP, None, SettlementOrigin::Governance).unwrap();
    let err = engine
        .place_limit_order(OrderRequest::limit(PERP, BUYER, Side::Long, dec!(2000), dec!(1), dec!(200)))
        .unwrap_err();
    assert_eq!(err, ExchangeError::DerivativeMarketNotFound(PERP));
}

// buyer opens long 1 @ 2000 against the seller, then sells out to a third subaccount at 1900
fn perp_with_realised_loss(engine: &mut Engine) {
    engine
        .apply_trade(Trade::new(PERP, BUYER, SELLER, dec!(1), dec!(2000), dec!(200), dec!(200)))
        .unwrap();
    engine
        .apply_trade(Trade::new(PERP, THIRD, BUYER, dec!(1), dec!(1900), dec!(300), dec!(0)))
        .unwrap();
}

#[test]
fn refund_surplus_goes_to_auction_subaccount() {
    let mut engine = perp_engine();
    perp_with_realised_loss(&mut engine);
    // 200 + 200 + 300 in, 100 paid back to the buyer
    assert_eq!(engine.market_margin_pool(PERP).value(), dec!(600));

    let result = engine.force_settle_market(PERP, Some(dec!(-1)), SettlementOrigin::Governance).unwrap();

    assert_eq!(result.settlement_price, SettlementPrice::Refund);
    assert_eq!(result.plan.required_payout.value(), dec!(500));
    assert_eq!(result.plan.surplus_to_auction.value(), dec!(100));
    let auction = engine.params().auction_subaccount_id;
    assert_eq!(total(&engine, auction), dec!(100));
    assert_eq!(available(&engine, auction), dec!(100));
    assert!(engine.market_margin_pool(PERP).is_zero());
}

#[test]
fn refund_surplus_goes_to_insurance_when_fund_exists() {
    let mut engine = perp_engine();
    engine.insurance_mut().create_fund(PERP, Quote::new(dec!(1000)));
    perp_with_realised_loss(&mut engine);

    let result = engine.force_settle_market(PERP, Some(dec!(-1)), SettlementOrigin::Admin).unwrap();

    assert_eq!(result.plan.surplus_to_insurance.value(), dec!(100));
    assert!(result.plan.surplus_to_auction.is_zero());
    assert_eq!(engine.insurance_balance(PERP), Some(Quote::new(dec!(1100))));
}

#[test]
fn insurance_pays_whole_units_of_fractional_shortfall() {
    let mut engine = perp_engine();
    engine.insurance_mut().create_fund(PERP, Quote::new(dec!(1000)));
    perp_with_realised_loss(&mut engine);

    // third long @ 1900 claims 700.5 against 600 in the pool
    let result = engine.force_settle_market(PERP, Some(dec!(2300.5)), SettlementOrigin::Admin).unwrap();

    assert_eq!(result.plan.required_payout.value(), dec!(700.5));
    assert_eq!(result.plan.insurance_draw.value(), dec!(100));
    assert_eq!(engine.insurance_balance(PERP), Some(Quote::new(dec!(900))));
    assert!(result.plan.haircut.is_sign_positive() && !result.plan.haircut.is_zero());
    assert!(result.plan.total_paid().value() <= dec!(700));
    assert!(!engine.market_margin_pool(PERP).is_negative());
}

#[test]
fn unknown_market_reported_as_derivative() {
    let mut engine = perp_engine();
    let err = engine
        .force_settle_market(MarketId(99), None, SettlementOrigin::Governance)
        .unwrap_err();
    assert_eq!(err, ExchangeError::DerivativeMarketNotFound(MarketId(99)));
}

#[test]
fn forced_settlement_without_price_uses_oracle() {
    let mut engine = perp_engine();
    perp_with_realised_loss(&mut engine);
    engine.oracle_mut().set_price("eth", dec!(2100));

    let result = engine.force_settle_market(PERP, None, SettlementOrigin::Admin).unwrap();

    assert_eq!(result.settlement_price, SettlementPrice::Price(dec!(2100)));
    // seller short @ 2000 with 200 loses 100, third long @ 1900 with 300 gains 200
    let paid: Vec<Decimal> = result.plan.payouts.iter().map(|p| p.payout.value()).collect();
    assert_eq!(paid, vec![dec!(100), dec!(500)]);
    assert!(result.plan.surplus_to_auction.is_zero());
}

#[test]
fn scheduled_lifecycle_expires_then_refunds_without_oracle() {
    let mut engine = Engine::new();
    engine.set_block_time(Timestamp::from_secs(T0));
    let market = engine
        .launch_expiry_futures_market(
            MarketLaunch::new(MarketId(9), "BTC/USDT 24Q4", "usdt", "btc"),
            MarginRatios::default(),
            Timestamp::from_secs(T0 + 3600),
            Timestamp::from_secs(T0 + 7200),
        )
        .unwrap();
    for sub in [BUYER, SELLER] {
        engine.deposits_mut().fund(sub, "usdt", Quote::new(dec!(10000)));
    }
    engine
        .apply_trade(Trade::new(market, BUYER, SELLER, dec!(1), dec!(40000), dec!(2000), dec!(2000)))
        .unwrap();
    engine
        .place_limit_order(OrderRequest::limit(market, BUYER, Side::Long, dec!(39000), dec!(1), dec!(1950)))
        .unwrap();

    let block = engine.begin_block(Timestamp::from_secs(T0 + 3599));
    assert!(block.expired.is_empty());

    let block = engine.begin_block(Timestamp::from_secs(T0 + 3600));
    assert_eq!(block.expired, vec![market]);
    assert_eq!(engine.market(market).unwrap().status, MarketStatus::Expired);
    assert_eq!(available(&engine, BUYER), dec!(8000));
    assert_eq!(engine.positions_by_market(market).len(), 2);
    let err = engine
        .place_limit_order(OrderRequest::limit(market, BUYER, Side::Long, dec!(39000), dec!(1), dec!(1950)))
        .unwrap_err();
    assert_eq!(err, ExchangeError::DerivativeMarketNotFound(market));

    let block = engine.begin_block(Timestamp::from_secs(T0 + 7200));
    assert_eq!(block.settlements.len(), 1);
    assert_eq!(block.settlements[0].settlement_price, SettlementPrice::Refund);
    assert_eq!(engine.market(market).unwrap().status, MarketStatus::Demolished);
    for sub in [BUYER, SELLER] {
        assert_eq!(total(&engine, sub), dec!(10000));
        assert_eq!(available(&engine, sub), dec!(10000));
    }

    let block = engine.begin_block(Timestamp::from_secs(T0 + 10800));
    assert!(block.settlements.is_empty());
}

#[test]
fn settlement_emits_status_and_summary_events() {
    let mut engine = binary_engine();
    fully_collateralised_pair(&mut engine);
    engine.clear_events();

    engine.force_settle_market(BINARY, Some(dec!(1)), SettlementOrigin::Governance).unwrap();

    let kinds: Vec<&str> = engine.events().iter().map(|e| e.payload.kind()).collect();
    assert_eq!(
        kinds,
        vec!["EventMarketStatusUpdate", "EventMarketSettled", "EventBatchDerivativePosition"]
    );
    match &engine.events()[1].payload {
        EventPayload::MarketSettled(e) => {
            assert_eq!(e.origin, SettlementOrigin::Governance);
            assert_eq!(e.positions_closed, 2);
            assert_eq!(e.total_paid.value(), dec!(2000000));
        }
        other => panic!("unexpected payload {:?}", other),
    }
}

#[test]
fn paused_market_rejects_trades_until_resumed() {
    let mut engine = perp_engine();
    engine.set_market_status(PERP, MarketStatus::Paused).unwrap();

    let trade = Trade::new(PERP, BUYER, SELLER, dec!(1), dec!(2000), dec!(200), dec!(200));
    assert_eq!(
        engine.apply_trade(trade.clone()).unwrap_err(),
        ExchangeError::DerivativeMarketNotFound(PERP)
    );
    assert!(matches!(
        engine.set_market_status(PERP, MarketStatus::Demolished),
        Err(ExchangeError::InvalidMarketStatus { .. })
    ));

    engine.set_market_status(PERP, MarketStatus::Active).unwrap();
    engine.apply_trade(trade).unwrap();
}
