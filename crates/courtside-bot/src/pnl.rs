//! P&L arithmetic for binary contracts.
//!
//! A contract pays 100 cents on its outcome and zero otherwise, so a
//! held side is always valued against its own exit price: the bid on
//! the side held for marks and closes, the fixed payout at settlement.
//! All functions are pure and decimal-exact.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use courtside_common::Side;

const PAYOUT: Decimal = dec!(100);

/// Unrealized P&L for an open position marked at `mark_price` (the bid
/// on the held side), in cents.
pub fn unrealized(avg_price: Decimal, mark_price: Decimal, quantity: u32) -> Decimal {
    (mark_price - avg_price) * Decimal::from(quantity)
}

/// Realized P&L for closing `quantity` contracts at `exit_price`.
///
/// Exit prices are quoted on the held side, so the formula is the same
/// for YES and NO positions.
pub fn realized(avg_price: Decimal, exit_price: Decimal, quantity: u32) -> Decimal {
    (exit_price - avg_price) * Decimal::from(quantity)
}

/// Settlement P&L: payout 100 when the held side matches the outcome,
/// zero otherwise, minus cost basis.
pub fn settlement(avg_price: Decimal, side: Side, outcome: Side, quantity: u32) -> Decimal {
    let payout_per_contract = if side == outcome { PAYOUT } else { Decimal::ZERO };
    (payout_per_contract - avg_price) * Decimal::from(quantity)
}

/// Weighted-average entry after adding `add_qty` at `fill_price` to an
/// existing position.
pub fn blended_avg(
    old_qty: u32,
    old_avg: Decimal,
    add_qty: u32,
    fill_price: Decimal,
) -> Decimal {
    let new_qty = Decimal::from(old_qty) + Decimal::from(add_qty);
    if new_qty.is_zero() {
        return Decimal::ZERO;
    }
    (Decimal::from(old_qty) * old_avg + Decimal::from(add_qty) * fill_price) / new_qty
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unrealized_gain_and_loss() {
        assert_eq!(unrealized(dec!(45), dec!(52), 10), dec!(70));
        assert_eq!(unrealized(dec!(45), dec!(40), 10), dec!(-50));
        assert_eq!(unrealized(dec!(45), dec!(45), 10), dec!(0));
    }

    #[test]
    fn test_realized_close() {
        assert_eq!(realized(dec!(44), dec!(50), 10), dec!(60));
        assert_eq!(realized(dec!(44), dec!(40), 10), dec!(-40));
    }

    #[test]
    fn test_settlement_winning_yes() {
        // 10 YES at 45c settling YES pays +550c.
        assert_eq!(settlement(dec!(45), Side::Yes, Side::Yes, 10), dec!(550));
    }

    #[test]
    fn test_settlement_losing_yes() {
        assert_eq!(settlement(dec!(45), Side::Yes, Side::No, 10), dec!(-450));
    }

    #[test]
    fn test_settlement_no_side() {
        assert_eq!(settlement(dec!(58), Side::No, Side::No, 4), dec!(168));
        assert_eq!(settlement(dec!(58), Side::No, Side::Yes, 4), dec!(-232));
    }

    #[test]
    fn test_blended_avg() {
        // 10 @ 40 plus 10 @ 50 blends to 45.
        assert_eq!(blended_avg(10, dec!(40), 10, dec!(50)), dec!(45));
        // Uneven sizes weight toward the larger lot.
        assert_eq!(blended_avg(30, dec!(40), 10, dec!(60)), dec!(45));
    }

    #[test]
    fn test_blended_avg_from_flat() {
        assert_eq!(blended_avg(0, dec!(0), 10, dec!(44)), dec!(44));
    }
}
