// 4.0: per (market, subaccount) position and the fill application algorithm.
// 4.1 apply_fill covers open / increase / decrease / close / flip. 4.2 funding and bankruptcy helpers.

use crate::types::{quo_truncate, truncate, MarketId, Price, Quote, Side, SubaccountId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PositionKey {
    pub market_id: MarketId,
    pub subaccount_id: SubaccountId,
}

impl PositionKey {
    pub fn new(market_id: MarketId, subaccount_id: SubaccountId) -> Self {
        Self {
            market_id,
            subaccount_id,
        }
    }
}

/// An open position. A position with zero quantity is never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub market_id: MarketId,
    pub subaccount_id: SubaccountId,
    pub side: Side,
    pub quantity: Decimal,
    pub entry_price: Price,
    pub margin: Quote,
    /// market cumulative funding at the last time funding was applied
    pub cumulative_funding_entry: Decimal,
}

impl Position {
    pub fn key(&self) -> PositionKey {
        PositionKey::new(self.market_id, self.subaccount_id)
    }

    pub fn is_long(&self) -> bool {
        self.side == Side::Long
    }

    pub fn unrealized_pnl(&self, price: Decimal) -> Quote {
        Quote::new(truncate(
            self.quantity * (price - self.entry_price.value()) * self.side.sign(),
        ))
    }

    // what the holder walks away with if closed at `price`. can be negative
    pub fn payout_at(&self, price: Decimal) -> Quote {
        self.margin.add(self.unrealized_pnl(price))
    }

    // 4.2: price at which margin + pnl hits zero
    pub fn bankruptcy_price(&self) -> Decimal {
        let per_unit = quo_truncate(self.margin.value(), self.quantity);
        match self.side {
            Side::Long => self.entry_price.value() - per_unit,
            Side::Short => self.entry_price.value() + per_unit,
        }
    }

    /// Settles funding accrued since the last snapshot into margin.
    /// Longs pay positive funding, shorts receive it. Returns the amount paid.
    pub fn apply_funding(&mut self, cumulative_funding: Decimal) -> Quote {
        let delta = cumulative_funding - self.cumulative_funding_entry;
        self.cumulative_funding_entry = cumulative_funding;
        if delta.is_zero() {
            return Quote::zero();
        }

        let paid = Quote::new(truncate(self.quantity * delta * self.side.sign()));
        self.margin = self.margin.sub(paid);
        paid
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PositionError {
    #[error("invalid position args: quantity {quantity}, price {price}, margin {margin}")]
    InvalidArgs {
        quantity: Decimal,
        price: Decimal,
        margin: Decimal,
    },

    #[error("fill at {price} surpasses bankruptcy price, payout {payout}")]
    Bankrupt { price: Decimal, payout: Quote },
}

/// One side of an executed trade as seen by a single subaccount.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FillArgs {
    pub quantity: Decimal,
    pub price: Decimal,
    pub margin: Quote,
    pub side: Side,
    /// market cumulative funding at fill time, zero for non-perpetual markets
    pub cumulative_funding: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FillKind {
    Open,
    Increase,
    Decrease,
    Close,
    Flip,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FillOutcome {
    pub new_position: Option<Position>,
    pub kind: FillKind,
    pub realized_pnl: Quote,
    /// margin freed by the fill, before pnl
    pub margin_released: Quote,
    /// margin that stays locked in the resulting position, before loss absorption
    pub margin_retained: Quote,
    /// amount returned to the subaccount: released margin plus pnl, never negative
    pub payout: Quote,
}

// 4.1: the core algorithm. `existing` must already have funding applied.
pub fn apply_fill(
    key: PositionKey,
    existing: Option<&Position>,
    args: FillArgs,
) -> Result<FillOutcome, PositionError> {
    if args.quantity <= Decimal::ZERO || args.price <= Decimal::ZERO || args.margin.is_negative() {
        return Err(PositionError::InvalidArgs {
            quantity: args.quantity,
            price: args.price,
            margin: args.margin.value(),
        });
    }
    let fill_price = Price::new_unchecked(args.price);

    // funding already took the whole margin
    if let Some(p) = existing.filter(|p| p.margin.is_negative()) {
        return Err(PositionError::Bankrupt {
            price: args.price,
            payout: p.margin,
        });
    }

    let Some(position) = existing.filter(|p| p.quantity > Decimal::ZERO) else {
        let opened = Position {
            market_id: key.market_id,
            subaccount_id: key.subaccount_id,
            side: args.side,
            quantity: args.quantity,
            entry_price: fill_price,
            margin: args.margin,
            cumulative_funding_entry: args.cumulative_funding,
        };
        return Ok(FillOutcome {
            new_position: Some(opened),
            kind: FillKind::Open,
            realized_pnl: Quote::zero(),
            margin_released: Quote::zero(),
            margin_retained: args.margin,
            payout: Quote::zero(),
        });
    };

    if position.side == args.side {
        return Ok(increase(position, args));
    }

    let q = position.quantity;
    let f = args.quantity;

    if f < q {
        let retained = Quote::new(quo_truncate(position.margin.value() * (q - f), q));
        let released = position.margin.sub(retained).add(args.margin);
        let pnl = realized_pnl(position, f, args.price);
        let gross = released.add(pnl);

        // a losing partial close eats into what stays locked
        let margin_after = if gross.is_negative() {
            retained.add(gross)
        } else {
            retained
        };
        if margin_after.is_negative() {
            return Err(PositionError::Bankrupt {
                price: args.price,
                payout: gross,
            });
        }

        let mut reduced = position.clone();
        reduced.quantity = q - f;
        reduced.margin = margin_after;
        reduced.cumulative_funding_entry = args.cumulative_funding;

        return Ok(FillOutcome {
            new_position: Some(reduced),
            kind: FillKind::Decrease,
            realized_pnl: pnl,
            margin_released: released,
            margin_retained: retained,
            payout: gross.max_zero(),
        });
    }

    let pnl = realized_pnl(position, q, args.price);

    if f == q {
        let released = position.margin.add(args.margin);
        let payout = released.add(pnl);
        if payout.is_negative() {
            return Err(PositionError::Bankrupt {
                price: args.price,
                payout,
            });
        }
        return Ok(FillOutcome {
            new_position: None,
            kind: FillKind::Close,
            realized_pnl: pnl,
            margin_released: released,
            margin_retained: Quote::zero(),
            payout,
        });
    }

    // flip: close q, open f - q the other way with its share of the fill margin
    let new_quantity = f - q;
    let new_margin = Quote::new(quo_truncate(args.margin.value() * new_quantity, f));
    let released = position.margin.add(args.margin).sub(new_margin);
    let payout = released.add(pnl);
    if payout.is_negative() {
        return Err(PositionError::Bankrupt {
            price: args.price,
            payout,
        });
    }

    let flipped = Position {
        market_id: key.market_id,
        subaccount_id: key.subaccount_id,
        side: args.side,
        quantity: new_quantity,
        entry_price: fill_price,
        margin: new_margin,
        cumulative_funding_entry: args.cumulative_funding,
    };

    Ok(FillOutcome {
        new_position: Some(flipped),
        kind: FillKind::Flip,
        realized_pnl: pnl,
        margin_released: released,
        margin_retained: new_margin,
        payout,
    })
}

fn increase(position: &Position, args: FillArgs) -> FillOutcome {
    let quantity = position.quantity + args.quantity;
    let weighted = position.quantity * position.entry_price.value() + args.quantity * args.price;
    let entry = quo_truncate(weighted, quantity);

    let mut grown = position.clone();
    grown.quantity = quantity;
    // truncation can only push the average down, never to zero for positive prices
    grown.entry_price = Price::new(entry).unwrap_or(position.entry_price);
    grown.margin = position.margin.add(args.margin);
    grown.cumulative_funding_entry = args.cumulative_funding;

    FillOutcome {
        margin_retained: grown.margin,
        new_position: Some(grown),
        kind: FillKind::Increase,
        realized_pnl: Quote::zero(),
        margin_released: Quote::zero(),
        payout: Quote::zero(),
    }
}

fn realized_pnl(position: &Position, closed: Decimal, price: Decimal) -> Quote {
    Quote::new(truncate(
        closed * (price - position.entry_price.value()) * position.side.sign(),
    ))
}
