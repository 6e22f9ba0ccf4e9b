// 3.1: reduce-only bookkeeping. a reduce-only order can only shrink the position on the
// other side of it, and the resting reduce-only quantity may never exceed what is left
// to close once better-priced vanilla orders have filled.

use crate::order::Order;
use crate::position::Position;
use crate::types::{OrderHash, Price, Side};
use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReduceOnlyError {
    #[error("no position to reduce")]
    PositionNotFound,

    #[error("reduce-only {order_side:?} order cannot reduce a {position_side:?} position")]
    InvalidDirection { order_side: Side, position_side: Side },

    #[error("reduce-only price {price} is past the bankruptcy price {bankruptcy_price}")]
    PriceSurpassesBankruptcyPrice {
        price: Decimal,
        bankruptcy_price: Decimal,
    },
}

/// Checks a new reduce-only order against the position it would close and returns the
/// quantity it may rest with. `ranked_ahead` is the resting quantity on the order's side
/// that fills first. Zero means nothing is left to close.
pub fn admissible_quantity(
    position: Option<&Position>,
    order_side: Side,
    price: Decimal,
    quantity: Decimal,
    ranked_ahead: Decimal,
) -> Result<Decimal, ReduceOnlyError> {
    let position = position.ok_or(ReduceOnlyError::PositionNotFound)?;
    if position.side == order_side {
        return Err(ReduceOnlyError::InvalidDirection {
            order_side,
            position_side: position.side,
        });
    }

    let bankruptcy_price = position.bankruptcy_price();
    let surpasses = match position.side {
        // selling a long below bankruptcy pays out less than nothing
        Side::Long => price < bankruptcy_price,
        Side::Short => price > bankruptcy_price,
    };
    if surpasses {
        return Err(ReduceOnlyError::PriceSurpassesBankruptcyPrice {
            price,
            bankruptcy_price,
        });
    }

    let room = (position.quantity - ranked_ahead).max(Decimal::ZERO);
    Ok(quantity.min(room))
}

/// Resting quantity, reduce-only and vanilla alike, priced at `price` or better.
/// Worse-priced reduce-only orders do not count: they give way to a better one.
pub fn quantity_ranked_ahead(orders: &[&Order], price: Price) -> Decimal {
    orders
        .iter()
        .filter(|o| o.price == price || o.is_better_than(price))
        .map(|o| o.fillable)
        .sum()
}

/// Returns the reduce-only orders to cancel on `side`, in cancellation order.
///
/// `orders` are one subaccount's resting orders on `side`, best price first and
/// earlier arrival first within a price. Walking from the back visits the worst
/// price first and, within a price, the latest arrival first.
pub fn excess_reduce_only(position: Option<&Position>, side: Side, orders: &[&Order]) -> Vec<OrderHash> {
    let closable = match position {
        Some(p) if p.side != side => p.quantity,
        // nothing on this side can reduce anything
        _ => {
            return orders
                .iter()
                .filter(|o| o.is_reduce_only())
                .map(|o| o.hash)
                .collect();
        }
    };

    let mut aggregate: Decimal = orders
        .iter()
        .filter(|o| o.is_reduce_only())
        .map(|o| o.fillable)
        .sum();

    let mut cancelled = Vec::new();
    for order in orders.iter().rev().filter(|o| o.is_reduce_only()) {
        let vanilla_ahead: Decimal = orders
            .iter()
            .filter(|v| !v.is_reduce_only() && !order.is_better_than(v.price))
            .map(|v| v.fillable)
            .sum();

        if aggregate + vanilla_ahead <= closable {
            break;
        }
        aggregate -= order.fillable;
        cancelled.push(order.hash);
    }
    cancelled
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MarketId, Quote, SubaccountId};
    use rust_decimal_macros::dec;

    fn short_position(quantity: Decimal) -> Position {
        Position {
            market_id: MarketId(1),
            subaccount_id: SubaccountId(1),
            side: Side::Short,
            quantity,
            entry_price: Price::new_unchecked(dec!(100)),
            margin: Quote::new(dec!(50) * quantity),
            cumulative_funding_entry: Decimal::ZERO,
        }
    }

    fn buy(hash: u64, price: Decimal, qty: Decimal, margin: Decimal) -> Order {
        Order {
            hash: OrderHash(hash),
            market_id: MarketId(1),
            subaccount_id: SubaccountId(1),
            side: Side::Long,
            price: Price::new_unchecked(price),
            quantity: qty,
            fillable: qty,
            margin: Quote::new(margin),
            fee_rate: Decimal::ZERO,
            client_order_id: None,
            sequence: hash,
        }
    }

    fn best_first(orders: &[Order]) -> Vec<&Order> {
        let mut refs: Vec<&Order> = orders.iter().collect();
        refs.sort_by(|a, b| b.price.cmp(&a.price).then(a.sequence.cmp(&b.sequence)));
        refs
    }

    #[test]
    fn admission_needs_opposite_position() {
        let missing = admissible_quantity(None, Side::Long, dec!(100), dec!(1), dec!(0));
        assert_eq!(missing, Err(ReduceOnlyError::PositionNotFound));

        let pos = short_position(dec!(2));
        let same = admissible_quantity(Some(&pos), Side::Short, dec!(100), dec!(1), dec!(0));
        assert!(matches!(same, Err(ReduceOnlyError::InvalidDirection { .. })));
    }

    #[test]
    fn admission_resizes_to_room() {
        let pos = short_position(dec!(3));
        let qty = admissible_quantity(Some(&pos), Side::Long, dec!(100), dec!(5), dec!(1)).unwrap();
        assert_eq!(qty, dec!(2));

        let none_left = admissible_quantity(Some(&pos), Side::Long, dec!(100), dec!(5), dec!(3)).unwrap();
        assert_eq!(none_left, dec!(0));
    }

    #[test]
    fn admission_rejects_past_bankruptcy() {
        // short at 100 with 50 margin per unit goes bust at 150
        let pos = short_position(dec!(1));
        let err = admissible_quantity(Some(&pos), Side::Long, dec!(151), dec!(1), dec!(0));
        assert!(matches!(err, Err(ReduceOnlyError::PriceSurpassesBankruptcyPrice { .. })));
        assert!(admissible_quantity(Some(&pos), Side::Long, dec!(150), dec!(1), dec!(0)).is_ok());
    }

    #[test]
    fn ranked_ahead_counts_equal_and_better_prices() {
        let orders = vec![
            buy(1, dec!(101), dec!(1), dec!(0)),
            buy(2, dec!(100), dec!(2), dec!(10)),
            buy(3, dec!(99), dec!(4), dec!(0)),
        ];
        let refs = best_first(&orders);
        assert_eq!(quantity_ranked_ahead(&refs, Price::new_unchecked(dec!(100))), dec!(3));
        assert_eq!(quantity_ranked_ahead(&refs, Price::new_unchecked(dec!(102))), dec!(0));
        assert_eq!(quantity_ranked_ahead(&refs, Price::new_unchecked(dec!(98))), dec!(7));
    }

    #[test]
    fn vanilla_displaces_worst_reduce_only_first() {
        let pos = short_position(dec!(3));
        let orders = vec![
            buy(1, dec!(99), dec!(1), dec!(0)),
            buy(2, dec!(97), dec!(1), dec!(0)),
            buy(3, dec!(98), dec!(1), dec!(0)),
            buy(4, dec!(99), dec!(1), dec!(10)),
        ];
        let cancelled = excess_reduce_only(Some(&pos), Side::Long, &best_first(&orders));
        // vanilla at 99 ranks ahead of all three, only the 97 goes
        assert_eq!(cancelled, vec![OrderHash(2)]);
    }

    #[test]
    fn equal_price_ties_cancel_latest_first() {
        let pos = short_position(dec!(2));
        let orders = vec![
            buy(1, dec!(98), dec!(1), dec!(0)),
            buy(2, dec!(98), dec!(1), dec!(0)),
            buy(3, dec!(98), dec!(1), dec!(10)),
        ];
        let cancelled = excess_reduce_only(Some(&pos), Side::Long, &best_first(&orders));
        assert_eq!(cancelled, vec![OrderHash(2)]);
    }

    #[test]
    fn better_priced_vanilla_displaces_every_reduce_only() {
        let pos = short_position(dec!(2));
        let orders = vec![
            buy(1, dec!(105), dec!(2), dec!(10)),
            buy(2, dec!(100), dec!(1), dec!(0)),
            buy(3, dec!(101), dec!(1), dec!(0)),
        ];
        let cancelled = excess_reduce_only(Some(&pos), Side::Long, &best_first(&orders));
        assert_eq!(cancelled, vec![OrderHash(2), OrderHash(3)]);
    }

    #[test]
    fn missing_or_same_side_position_cancels_all() {
        let orders = vec![buy(1, dec!(99), dec!(1), dec!(0)), buy(2, dec!(98), dec!(1), dec!(5))];
        let none = excess_reduce_only(None, Side::Long, &best_first(&orders));
        assert_eq!(none, vec![OrderHash(1)]);

        let mut long = short_position(dec!(5));
        long.side = Side::Long;
        let flipped = excess_reduce_only(Some(&long), Side::Long, &best_first(&orders));
        assert_eq!(flipped, vec![OrderHash(1)]);
    }
}
