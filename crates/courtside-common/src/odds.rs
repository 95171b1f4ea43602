//! Odds math shared by the aggregator and every strategy.
//!
//! Handles conversion between American odds, implied probabilities, and
//! contract prices in cents, plus consensus aggregation, expected value
//! and Kelly sizing. Everything is `Decimal`; conversions round
//! half-to-even.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use thiserror::Error;
use tracing::warn;

use crate::types::Side;

const HUNDRED: Decimal = dec!(100);
const HALF: Decimal = dec!(0.5);

/// Errors from odds conversions on out-of-domain inputs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OddsError {
    #[error("probability must be strictly between 0 and 1, got {0}")]
    ProbabilityOutOfRange(Decimal),
    #[error("price must be on [0, 100] cents, got {0}")]
    PriceOutOfRange(Decimal),
}

/// Convert American odds to implied probability on [0, 1].
///
/// Negative odds are favorites: p = |o| / (|o| + 100).
/// Positive odds are underdogs: p = 100 / (o + 100).
/// Zero is treated as even money.
pub fn american_to_probability(american: i32) -> Decimal {
    if american == 0 {
        return HALF;
    }
    let odds = Decimal::from(american);
    if american < 0 {
        let abs = odds.abs();
        abs / (abs + HUNDRED)
    } else {
        HUNDRED / (odds + HUNDRED)
    }
}

/// Convert an implied probability back to canonical American odds.
///
/// Canonical form: probability above 1/2 maps to negative odds, 1/2 and
/// below to positive odds, exactly 1/2 to +100 (so -100 canonicalizes
/// to +100). Rounds half-to-even at the integer step.
pub fn probability_to_american(prob: Decimal) -> Result<i32, OddsError> {
    if prob <= Decimal::ZERO || prob >= Decimal::ONE {
        return Err(OddsError::ProbabilityOutOfRange(prob));
    }
    if prob == HALF {
        return Ok(100);
    }

    let odds = if prob > HALF {
        -HUNDRED * prob / (Decimal::ONE - prob)
    } else {
        HUNDRED * (Decimal::ONE - prob) / prob
    };

    let rounded = odds.round_dp_with_strategy(0, RoundingStrategy::MidpointNearestEven);
    // Magnitudes stay well inside i32 for any probability the feeds produce.
    Ok(rounded.to_i32().unwrap_or(if prob > HALF { i32::MIN } else { i32::MAX }))
}

/// Convert a contract price in cents to an implied probability.
///
/// Out-of-range prices are clamped with a warning rather than rejected;
/// the exchange occasionally reports transient 0/100 quotes.
pub fn price_to_probability(price_cents: Decimal) -> Decimal {
    let clamped = if price_cents < Decimal::ZERO || price_cents > HUNDRED {
        warn!(price = %price_cents, "contract price out of range, clamping");
        price_cents.clamp(Decimal::ZERO, HUNDRED)
    } else {
        price_cents
    };
    clamped / HUNDRED
}

/// Convert a probability to a contract price in cents, two decimal places.
pub fn probability_to_price(prob: Decimal) -> Decimal {
    let clamped = if prob < Decimal::ZERO || prob > Decimal::ONE {
        warn!(prob = %prob, "probability out of range, clamping");
        prob.clamp(Decimal::ZERO, Decimal::ONE)
    } else {
        prob
    };
    (clamped * HUNDRED).round_dp_with_strategy(2, RoundingStrategy::MidpointNearestEven)
}

/// How to aggregate per-vendor probabilities into a consensus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConsensusMethod {
    /// Median of the per-vendor probabilities (robust to one bad line).
    #[default]
    Median,
    Mean,
    /// Weighted by distance from 1/2: sharper lines get more weight.
    Weighted,
}

/// Aggregate American odds from several vendors into one probability.
///
/// Returns `None` on an empty slice.
pub fn consensus_probability(odds: &[i32], method: ConsensusMethod) -> Option<Decimal> {
    if odds.is_empty() {
        return None;
    }
    let mut probs: Vec<Decimal> = odds.iter().map(|o| american_to_probability(*o)).collect();

    match method {
        ConsensusMethod::Mean => {
            let total: Decimal = probs.iter().copied().sum();
            Some(total / Decimal::from(probs.len()))
        }
        ConsensusMethod::Median => {
            probs.sort();
            let n = probs.len();
            let mid = n / 2;
            if n % 2 == 0 {
                Some((probs[mid - 1] + probs[mid]) / dec!(2))
            } else {
                Some(probs[mid])
            }
        }
        ConsensusMethod::Weighted => {
            let mut weighted_sum = Decimal::ZERO;
            let mut total_weight = Decimal::ZERO;
            for p in &probs {
                let weight = Decimal::ONE + (*p - HALF).abs();
                weighted_sum += *p * weight;
                total_weight += weight;
            }
            Some(weighted_sum / total_weight)
        }
    }
}

/// Expected value of buying one contract, as a fraction of its cost.
///
/// For the YES side at `price_cents` with true probability `p`:
/// EV = (p - price/100) / (price/100). The NO side is symmetric with
/// probability 1 - p against the NO price. The denominator is floored
/// at 1 cent so a 0-cent quote cannot divide by zero.
pub fn expected_value(price_cents: Decimal, true_probability: Decimal, side: Side) -> Decimal {
    let win_prob = match side {
        Side::Yes => true_probability,
        Side::No => Decimal::ONE - true_probability,
    };
    let cost = price_cents.max(Decimal::ONE) / HUNDRED;
    ((win_prob - price_cents / HUNDRED) / cost).round_dp(4)
}

/// Fraction of bankroll to commit under the Kelly criterion.
///
/// Kelly f = (p·b - q) / b where b is payout/cost. Returns zero when the
/// edge is negative or the price sits on a boundary, and applies
/// `fractional` (quarter-Kelly by default upstream) before capping at 1.
pub fn kelly_fraction(
    price_cents: Decimal,
    true_probability: Decimal,
    side: Side,
    fractional: Decimal,
) -> Decimal {
    if price_cents <= Decimal::ZERO || price_cents >= HUNDRED {
        return Decimal::ZERO;
    }
    if true_probability <= Decimal::ZERO || true_probability >= Decimal::ONE {
        return Decimal::ZERO;
    }

    let (p, cost, payout) = match side {
        Side::Yes => (true_probability, price_cents, HUNDRED - price_cents),
        Side::No => (
            Decimal::ONE - true_probability,
            HUNDRED - price_cents,
            price_cents,
        ),
    };

    if payout <= Decimal::ZERO || cost <= Decimal::ZERO {
        return Decimal::ZERO;
    }

    let q = Decimal::ONE - p;
    let b = payout / cost;
    let kelly = (p * b - q) / b;
    if kelly <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    (kelly * fractional).min(Decimal::ONE).round_dp(4)
}

/// Edge in percentage points: implied probability advantage of the side.
pub fn edge_percent(price_cents: Decimal, true_probability: Decimal, side: Side) -> Decimal {
    let implied = price_to_probability(price_cents);
    let edge = match side {
        Side::Yes => true_probability - implied,
        Side::No => (Decimal::ONE - true_probability) - (Decimal::ONE - implied),
    };
    (edge * HUNDRED).round_dp(2)
}

/// Remove the vig from a two-way moneyline, returning true probabilities
/// for (home, away) that sum to one.
pub fn remove_vig(home_odds: i32, away_odds: i32) -> (Decimal, Decimal) {
    let home = american_to_probability(home_odds);
    let away = american_to_probability(away_odds);
    let total = home + away;
    if total == Decimal::ZERO {
        return (HALF, HALF);
    }
    ((home / total).round_dp(4), (away / total).round_dp(4))
}
