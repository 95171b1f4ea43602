//! Per-ticker orderbook reconciliation.
//!
//! The exchange sends a full snapshot on (re)subscribe followed by
//! monotonically sequenced deltas with absolute level sizes (size zero
//! removes the level). The book is two bid ladders — YES bids and NO
//! bids — with the asks derived from the opposite ladder, so
//! `yes_ask + no_bid = 100` holds by construction. A sequence gap or a
//! crossed book invalidates the ticker until the next snapshot.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use thiserror::Error;

use courtside_common::Side;

const HUNDRED: Decimal = dec!(100);

/// Protocol failures detected while applying book updates.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BookError {
    #[error("sequence gap: expected {expected}, got {got}")]
    SequenceGap { expected: u64, got: u64 },
    #[error("delta arrived before any snapshot")]
    NoSnapshot,
    #[error("crossed book: yes_bid {yes_bid} + no_bid {no_bid} > 100")]
    Crossed { yes_bid: Decimal, no_bid: Decimal },
}

/// Consolidated top-of-book view handed to the aggregator.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BookTop {
    pub yes_bid: Option<Decimal>,
    pub yes_bid_size: Option<Decimal>,
    pub yes_ask: Option<Decimal>,
    pub yes_ask_size: Option<Decimal>,
    pub no_bid: Option<Decimal>,
    pub no_bid_size: Option<Decimal>,
    pub no_ask: Option<Decimal>,
    pub no_ask_size: Option<Decimal>,
    pub last_update: Option<DateTime<Utc>>,
    /// Set while the stream is disconnected or the ticker awaits resync.
    pub stale: bool,
}

impl BookTop {
    /// Mid price of the YES contract in cents.
    ///
    /// Both sides present: their average. One side: that side. Neither:
    /// undefined.
    pub fn mid(&self) -> Option<Decimal> {
        match (self.yes_bid, self.yes_ask) {
            (Some(bid), Some(ask)) => Some((bid + ask) / dec!(2)),
            (Some(bid), None) => Some(bid),
            (None, Some(ask)) => Some(ask),
            (None, None) => None,
        }
    }

    /// YES bid/ask spread in cents; requires both sides.
    pub fn spread(&self) -> Option<Decimal> {
        match (self.yes_bid, self.yes_ask) {
            (Some(bid), Some(ask)) => Some(ask - bid),
            _ => None,
        }
    }

    /// Taker price for buying the given side.
    pub fn ask_for(&self, side: Side) -> Option<Decimal> {
        match side {
            Side::Yes => self.yes_ask,
            // Fall back to the complement of the YES bid when the NO ask
            // is not directly quoted.
            Side::No => self.no_ask.or_else(|| self.yes_bid.map(|b| HUNDRED - b)),
        }
    }

    /// Best exit (bid) price for the given held side.
    pub fn bid_for(&self, side: Side) -> Option<Decimal> {
        match side {
            Side::Yes => self.yes_bid,
            Side::No => self.no_bid.or_else(|| self.yes_ask.map(|a| HUNDRED - a)),
        }
    }
}

/// Reconciled book state for one market ticker.
#[derive(Debug, Clone, Default)]
pub struct BookState {
    /// YES bid ladder: price in cents -> size.
    yes_bids: BTreeMap<Decimal, Decimal>,
    /// NO bid ladder: price in cents -> size.
    no_bids: BTreeMap<Decimal, Decimal>,
    seq: Option<u64>,
    last_update: Option<DateTime<Utc>>,
    stale: bool,
}

impl BookState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a snapshot has been applied and not invalidated since.
    pub fn is_synced(&self) -> bool {
        self.seq.is_some()
    }

    pub fn mark_stale(&mut self) {
        self.stale = true;
    }

    /// Drop all levels and await a fresh snapshot.
    pub fn invalidate(&mut self) {
        self.yes_bids.clear();
        self.no_bids.clear();
        self.seq = None;
        self.stale = true;
    }

    /// Replace the book from a full snapshot.
    pub fn apply_snapshot(
        &mut self,
        yes_levels: &[(Decimal, Decimal)],
        no_levels: &[(Decimal, Decimal)],
        seq: u64,
        ts: DateTime<Utc>,
    ) {
        self.yes_bids.clear();
        self.no_bids.clear();
        for (price, size) in yes_levels {
            if *size > Decimal::ZERO {
                self.yes_bids.insert(*price, *size);
            }
        }
        for (price, size) in no_levels {
            if *size > Decimal::ZERO {
                self.no_bids.insert(*price, *size);
            }
        }
        self.seq = Some(seq);
        self.last_update = Some(ts);
        self.stale = false;
    }

    /// Apply a sequenced delta with an absolute level size.
    ///
    /// On a sequence gap or a crossed book the state is invalidated and
    /// the error returned so the caller can request a resync.
    pub fn apply_delta(
        &mut self,
        side: Side,
        price: Decimal,
        size: Decimal,
        seq: u64,
        ts: DateTime<Utc>,
    ) -> Result<(), BookError> {
        let Some(last) = self.seq else {
            return Err(BookError::NoSnapshot);
        };
        let expected = last + 1;
        if seq != expected {
            self.invalidate();
            return Err(BookError::SequenceGap { expected, got: seq });
        }

        let ladder = match side {
            Side::Yes => &mut self.yes_bids,
            Side::No => &mut self.no_bids,
        };
        if size <= Decimal::ZERO {
            ladder.remove(&price);
        } else {
            ladder.insert(price, size);
        }
        self.seq = Some(seq);
        self.last_update = Some(ts);

        // A crossed book (yes_ask < yes_bid) means the two ladders
        // overlap past 100.
        if let (Some((yes_bid, _)), Some((no_bid, _))) = (
            self.yes_bids.last_key_value(),
            self.no_bids.last_key_value(),
        ) {
            if *yes_bid + *no_bid > HUNDRED {
                let (yb, nb) = (*yes_bid, *no_bid);
                self.invalidate();
                return Err(BookError::Crossed {
                    yes_bid: yb,
                    no_bid: nb,
                });
            }
        }

        Ok(())
    }

    /// Consolidated top of book.
    pub fn top(&self) -> BookTop {
        let yes_best = self.yes_bids.last_key_value().map(|(p, s)| (*p, *s));
        let no_best = self.no_bids.last_key_value().map(|(p, s)| (*p, *s));

        BookTop {
            yes_bid: yes_best.map(|(p, _)| p),
            yes_bid_size: yes_best.map(|(_, s)| s),
            yes_ask: no_best.map(|(p, _)| HUNDRED - p),
            yes_ask_size: no_best.map(|(_, s)| s),
            no_bid: no_best.map(|(p, _)| p),
            no_bid_size: no_best.map(|(_, s)| s),
            no_ask: yes_best.map(|(p, _)| HUNDRED - p),
            no_ask_size: yes_best.map(|(_, s)| s),
            last_update: self.last_update,
            stale: self.stale,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-06T19:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_snapshot_and_top() {
        let mut book = BookState::new();
        book.apply_snapshot(
            &[(dec!(42), dec!(100)), (dec!(41), dec!(50))],
            &[(dec!(56), dec!(200))],
            10,
            ts(),
        );

        let top = book.top();
        assert_eq!(top.yes_bid, Some(dec!(42)));
        assert_eq!(top.yes_bid_size, Some(dec!(100)));
        assert_eq!(top.no_bid, Some(dec!(56)));
        // Derived asks: yes_ask = 100 - no_bid.
        assert_eq!(top.yes_ask, Some(dec!(44)));
        assert_eq!(top.no_ask, Some(dec!(58)));
        assert!(!top.stale);
        // The binary-pair invariant holds by construction.
        assert_eq!(top.yes_ask.unwrap() + top.no_bid.unwrap(), dec!(100));
    }

    #[test]
    fn test_mid_both_sides() {
        let mut book = BookState::new();
        book.apply_snapshot(&[(dec!(42), dec!(10))], &[(dec!(56), dec!(10))], 1, ts());
        assert_eq!(book.top().mid(), Some(dec!(43)));
        assert_eq!(book.top().spread(), Some(dec!(2)));
    }

    #[test]
    fn test_mid_one_side_only() {
        let mut book = BookState::new();
        book.apply_snapshot(&[(dec!(42), dec!(10))], &[], 1, ts());
        let top = book.top();
        assert_eq!(top.yes_ask, None);
        assert_eq!(top.mid(), Some(dec!(42)));
        assert_eq!(top.spread(), None);
    }

    #[test]
    fn test_delta_updates_level() {
        let mut book = BookState::new();
        book.apply_snapshot(&[(dec!(42), dec!(100))], &[(dec!(56), dec!(10))], 1, ts());

        book.apply_delta(Side::Yes, dec!(43), dec!(25), 2, ts()).unwrap();
        assert_eq!(book.top().yes_bid, Some(dec!(43)));

        // Size zero removes the level.
        book.apply_delta(Side::Yes, dec!(43), dec!(0), 3, ts()).unwrap();
        assert_eq!(book.top().yes_bid, Some(dec!(42)));
    }

    #[test]
    fn test_sequence_gap_invalidates() {
        let mut book = BookState::new();
        book.apply_snapshot(&[(dec!(42), dec!(100))], &[], 1, ts());

        let err = book.apply_delta(Side::Yes, dec!(43), dec!(25), 5, ts());
        assert_eq!(err, Err(BookError::SequenceGap { expected: 2, got: 5 }));
        assert!(!book.is_synced());
        assert!(book.top().stale);
        assert_eq!(book.top().yes_bid, None);
    }

    #[test]
    fn test_delta_before_snapshot() {
        let mut book = BookState::new();
        let err = book.apply_delta(Side::Yes, dec!(43), dec!(25), 1, ts());
        assert_eq!(err, Err(BookError::NoSnapshot));
    }

    #[test]
    fn test_crossed_book_invalidates() {
        let mut book = BookState::new();
        book.apply_snapshot(&[(dec!(42), dec!(100))], &[(dec!(56), dec!(10))], 1, ts());

        // Pushing the NO bid to 60 makes yes_ask (40) < yes_bid (42).
        let err = book.apply_delta(Side::No, dec!(60), dec!(10), 2, ts());
        assert!(matches!(err, Err(BookError::Crossed { .. })));
        assert!(!book.is_synced());
    }

    #[test]
    fn test_resync_after_gap() {
        let mut book = BookState::new();
        book.apply_snapshot(&[(dec!(42), dec!(100))], &[], 1, ts());
        let _ = book.apply_delta(Side::Yes, dec!(43), dec!(25), 9, ts());

        // Fresh snapshot restores sync at its own sequence.
        book.apply_snapshot(&[(dec!(45), dec!(10))], &[], 20, ts());
        assert!(book.is_synced());
        book.apply_delta(Side::Yes, dec!(46), dec!(5), 21, ts()).unwrap();
        assert_eq!(book.top().yes_bid, Some(dec!(46)));
    }

    #[test]
    fn test_ask_for_falls_back_to_complement() {
        let top = BookTop {
            yes_bid: Some(dec!(42)),
            no_ask: None,
            ..Default::default()
        };
        assert_eq!(top.ask_for(Side::No), Some(dec!(58)));
    }
}
