//! Settlement planning for a market being demolished.
//!
//! Pure computation: given every open position, the settlement price and what the
//! market's margin pool and insurance fund hold, work out each payout, how much to
//! draw from insurance, the haircut that covers any remaining shortfall, and where
//! a surplus goes. The engine executes the plan against its collaborators.

use crate::market::SettlementPrice;
use crate::position::Position;
use crate::types::{quo_truncate, truncate, Quote, Side, SubaccountId, PRECISION};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Who moved the market to settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SettlementOrigin {
    Admin,
    Governance,
    /// reached `settlement_timestamp` during begin block
    Scheduled,
}

/// How the exposure a haircut is spread over is measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotionalBasis {
    /// Every contract is worth `scale` at expiry; each side holds half of it.
    BinaryOptions { scale: Decimal },
    /// Quantity times settlement price, or entry price when refunding.
    Derivative,
}

#[derive(Debug, Clone, Copy)]
pub struct SettlementInputs<'a> {
    pub positions: &'a [Position],
    /// already scaled for binary options
    pub price: SettlementPrice,
    pub basis: NotionalBasis,
    pub available_margin: Quote,
    pub insurance_balance: Option<Quote>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionPayout {
    pub subaccount_id: SubaccountId,
    pub side: Side,
    pub quantity: Decimal,
    pub margin: Quote,
    pub payout: Quote,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementPlan {
    pub payouts: Vec<PositionPayout>,
    /// sum of payouts before any haircut
    pub required_payout: Quote,
    pub available_margin: Quote,
    pub insurance_draw: Quote,
    /// fraction removed from every payout, zero when fully covered
    pub haircut: Decimal,
    pub surplus_to_insurance: Quote,
    pub surplus_to_auction: Quote,
    /// dust left in the market pool after truncation
    pub residual: Quote,
}

impl SettlementPlan {
    pub fn total_paid(&self) -> Quote {
        self.payouts.iter().map(|p| p.payout).sum()
    }
}

pub fn position_payout(position: &Position, price: SettlementPrice) -> Quote {
    match price {
        SettlementPrice::Refund => position.margin.max_zero(),
        SettlementPrice::Price(p) => position.payout_at(p).max_zero(),
    }
}

fn notional_at_risk(positions: &[Position], price: SettlementPrice, basis: NotionalBasis) -> Decimal {
    let total: Decimal = match basis {
        NotionalBasis::BinaryOptions { scale } => positions.iter().map(|p| p.quantity).sum::<Decimal>() * scale,
        NotionalBasis::Derivative => positions
            .iter()
            .map(|p| {
                let reference = match price {
                    SettlementPrice::Price(px) => px,
                    SettlementPrice::Refund => p.entry_price.value(),
                };
                p.quantity * reference
            })
            .sum(),
    };
    quo_truncate(total, Decimal::TWO)
}

pub fn plan_settlement(inputs: SettlementInputs<'_>) -> SettlementPlan {
    let mut payouts: Vec<PositionPayout> = inputs
        .positions
        .iter()
        .map(|p| PositionPayout {
            subaccount_id: p.subaccount_id,
            side: p.side,
            quantity: p.quantity,
            margin: p.margin,
            payout: position_payout(p, inputs.price),
        })
        .collect();

    let required: Quote = payouts.iter().map(|p| p.payout).sum();
    let available = inputs.available_margin;

    let mut plan = SettlementPlan {
        payouts: Vec::new(),
        required_payout: required,
        available_margin: available,
        insurance_draw: Quote::zero(),
        haircut: Decimal::ZERO,
        surplus_to_insurance: Quote::zero(),
        surplus_to_auction: Quote::zero(),
        residual: Quote::zero(),
    };

    if required > available {
        let mut shortfall = required.sub(available);
        if let Some(balance) = inputs.insurance_balance {
            // the fund pays whole units, the fraction falls to the haircut
            let draw = Quote::new(shortfall.value().trunc()).min(balance.max_zero());
            plan.insurance_draw = draw;
            shortfall = shortfall.sub(draw);
        }

        if shortfall.is_positive() {
            let notional = notional_at_risk(inputs.positions, inputs.price, inputs.basis);
            let by_notional = if notional > Decimal::ZERO {
                quo_truncate(shortfall.value(), notional)
            } else {
                Decimal::ONE
            };
            // rounded up so the haircut removes at least the shortfall
            let by_claims = (shortfall.value() / required.value())
                .round_dp_with_strategy(PRECISION, RoundingStrategy::AwayFromZero);
            let haircut = by_notional.max(by_claims).min(Decimal::ONE);

            plan.haircut = haircut;
            for p in payouts.iter_mut() {
                p.payout = Quote::new(truncate(p.payout.value() * (Decimal::ONE - haircut)));
            }
        }

        plan.payouts = payouts;
        plan.residual = available.add(plan.insurance_draw).sub(plan.total_paid());
        return plan;
    }

    let surplus = available.sub(required);
    if surplus.is_positive() {
        if inputs.insurance_balance.is_some() {
            let whole = Quote::new(surplus.value().trunc());
            plan.surplus_to_insurance = whole;
            plan.residual = surplus.sub(whole);
        } else {
            plan.surplus_to_auction = surplus;
        }
    }
    plan.payouts = payouts;
    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MarketId, Price};
    use rust_decimal_macros::dec;

    const SCALE: Decimal = dec!(1000000);

    fn position(sub: u64, side: Side, qty: Decimal, entry: Decimal, margin: Decimal) -> Position {
        Position {
            market_id: MarketId(1),
            subaccount_id: SubaccountId(sub),
            side,
            quantity: qty,
            entry_price: Price::new_unchecked(entry),
            margin: Quote::new(margin),
            cumulative_funding_entry: Decimal::ZERO,
        }
    }

    // buyer long 2 @ 0.2, seller short 2 @ 0.2, both fully collateralised
    fn pair() -> Vec<Position> {
        vec![
            position(1, Side::Long, dec!(2), dec!(200000), dec!(400000)),
            position(2, Side::Short, dec!(2), dec!(200000), dec!(1600000)),
        ]
    }

    fn settle(positions: &[Position], price: SettlementPrice, available: Decimal, insurance: Option<Decimal>) -> SettlementPlan {
        plan_settlement(SettlementInputs {
            positions,
            price,
            basis: NotionalBasis::BinaryOptions { scale: SCALE },
            available_margin: Quote::new(available),
            insurance_balance: insurance.map(Quote::new),
        })
    }

    fn paid(plan: &SettlementPlan) -> Vec<Decimal> {
        plan.payouts.iter().map(|p| p.payout.value()).collect()
    }

    #[test]
    fn price_zero_pays_seller_everything() {
        let plan = settle(&pair(), SettlementPrice::Price(dec!(0)), dec!(2000000), None);
        assert_eq!(paid(&plan), vec![dec!(0), dec!(2000000)]);
        assert!(plan.surplus_to_auction.is_zero());
    }

    #[test]
    fn price_one_pays_buyer_everything() {
        let plan = settle(&pair(), SettlementPrice::Price(SCALE), dec!(2000000), None);
        assert_eq!(paid(&plan), vec![dec!(2000000), dec!(0)]);
    }

    #[test]
    fn interior_price_above_entry() {
        // fraction (0.5 - 0.2) / 0.8 = 0.375 of the seller's margin moves to the buyer
        let plan = settle(&pair(), SettlementPrice::Price(dec!(500000)), dec!(2000000), None);
        let seller_margin = dec!(1600000);
        assert_eq!(
            paid(&plan),
            vec![dec!(400000) + seller_margin * dec!(0.375), seller_margin * dec!(0.625)]
        );
    }

    #[test]
    fn interior_price_below_entry() {
        // fraction (0.2 - 0.1) / 0.2 = 0.5 of the buyer's margin moves to the seller
        let plan = settle(&pair(), SettlementPrice::Price(dec!(100000)), dec!(2000000), None);
        let buyer_margin = dec!(400000);
        assert_eq!(
            paid(&plan),
            vec![buyer_margin * dec!(0.5), dec!(1600000) + buyer_margin * dec!(0.5)]
        );
    }

    fn underfunded() -> Vec<Position> {
        // pool holds 2.0 but positions claim 2.2 on refund
        vec![
            position(2, Side::Short, dec!(2), dec!(200000), dec!(1600000)),
            position(3, Side::Long, dec!(2), dec!(300000), dec!(600000)),
        ]
    }

    #[test]
    fn refund_shortfall_is_haircut() {
        let plan = settle(&underfunded(), SettlementPrice::Refund, dec!(2000000), None);
        assert_eq!(plan.haircut, dec!(0.1));
        assert_eq!(paid(&plan), vec![dec!(1440000), dec!(540000)]);
        assert!(plan.total_paid() <= plan.available_margin);
        assert_eq!(plan.residual.value(), dec!(20000));
    }

    #[test]
    fn insurance_absorbs_shortfall() {
        let plan = settle(&underfunded(), SettlementPrice::Refund, dec!(2000000), Some(dec!(300000)));
        assert_eq!(plan.insurance_draw.value(), dec!(200000));
        assert!(plan.haircut.is_zero());
        assert_eq!(paid(&plan), vec![dec!(1600000), dec!(600000)]);
        assert!(plan.residual.is_zero());
    }

    #[test]
    fn partial_insurance_then_haircut() {
        let plan = settle(&underfunded(), SettlementPrice::Refund, dec!(2000000), Some(dec!(100000)));
        assert_eq!(plan.insurance_draw.value(), dec!(100000));
        assert_eq!(plan.haircut, dec!(0.05));
        assert_eq!(paid(&plan), vec![dec!(1520000), dec!(570000)]);
    }

    #[test]
    fn insurance_draws_whole_units_only() {
        let plan = settle(&underfunded(), SettlementPrice::Refund, dec!(1999999.5), Some(dec!(300000)));
        assert_eq!(plan.insurance_draw.value(), dec!(200000));
        // 0.5 left over 2000000 notional
        assert_eq!(plan.haircut, dec!(0.00000025));
        assert_eq!(paid(&plan), vec![dec!(1599999.6), dec!(599999.85)]);
        assert_eq!(plan.residual.value(), dec!(0.05));
    }

    #[test]
    fn surplus_goes_to_auction_without_fund() {
        let positions = vec![
            position(2, Side::Short, dec!(2), dec!(200000), dec!(1600000)),
            position(3, Side::Long, dec!(2), dec!(100000), dec!(200000)),
        ];
        let plan = settle(&positions, SettlementPrice::Refund, dec!(2000000), None);
        assert_eq!(plan.surplus_to_auction.value(), dec!(200000));
        assert!(plan.surplus_to_insurance.is_zero());

        let with_fund = settle(&positions, SettlementPrice::Refund, dec!(2000000.5), Some(dec!(0)));
        assert_eq!(with_fund.surplus_to_insurance.value(), dec!(200000));
        assert_eq!(with_fund.residual.value(), dec!(0.5));
    }

    #[test]
    fn derivative_refund_notional_uses_entry() {
        let positions = vec![
            position(1, Side::Long, dec!(1), dec!(2000), dec!(100)),
            position(2, Side::Short, dec!(1), dec!(2000), dec!(100)),
        ];
        let plan = plan_settlement(SettlementInputs {
            positions: &positions,
            price: SettlementPrice::Refund,
            basis: NotionalBasis::Derivative,
            available_margin: Quote::new(dec!(180)),
            insurance_balance: None,
        });
        // notional 2000 gives 0.01, claims give 0.1, the larger wins
        assert_eq!(plan.haircut, dec!(0.1));
        assert_eq!(plan.total_paid().value(), dec!(180));
    }
}
