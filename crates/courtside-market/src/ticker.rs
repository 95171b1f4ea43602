//! Event and market ticker grammar.
//!
//! Event tickers look like `KXNBAGAME-26JAN06DALSAC`: a two-digit year,
//! three-letter month, two-digit day, then the away and home team
//! abbreviations. Market tickers append a suffix: `-Y`/`-N` for the
//! moneyline sides, `-SPREAD-{TEAM}{value}`, or `-TOTAL-{O|U}{value}`.
//! Input is case-insensitive and normalized to upper.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use thiserror::Error;

use courtside_common::{MarketKind, Side};

/// Event ticker prefix for NBA game markets.
pub const EVENT_PREFIX: &str = "KXNBAGAME-";

/// Errors from ticker parsing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TickerError {
    #[error("ticker too short or malformed: {0}")]
    BadFormat(String),
    #[error("invalid date segment in ticker: {0}")]
    BadDate(String),
    #[error("unrecognized market suffix: {0}")]
    BadSuffix(String),
}

/// Parsed event ticker: game date plus team abbreviations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventTickerInfo {
    /// Normalized (uppercase) event ticker.
    pub ticker: String,
    pub date: NaiveDate,
    pub away_abbr: String,
    pub home_abbr: String,
}

/// Parsed market ticker: the owning event plus the market identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketTickerInfo {
    pub event: EventTickerInfo,
    pub kind: MarketKind,
    /// Listed side for moneyline markets.
    pub side: Option<Side>,
    /// Team the spread applies to.
    pub team: Option<String>,
    /// Strike for spread/total markets.
    pub strike: Option<Decimal>,
}

/// Parse an event ticker such as `KXNBAGAME-26JAN06DALSAC`.
///
/// A bare `26JAN06DALSAC` remainder (without the prefix) is accepted
/// too; casing is normalized.
pub fn parse_event_ticker(ticker: &str) -> Result<EventTickerInfo, TickerError> {
    let upper = ticker.trim().to_uppercase();
    let body = upper.strip_prefix(EVENT_PREFIX).unwrap_or(&upper);

    // YYmmmDD is 7 chars, then two 3-letter team codes.
    if !body.is_ascii() || body.len() < 13 {
        return Err(TickerError::BadFormat(ticker.to_string()));
    }
    let (date_part, teams) = body.split_at(7);
    let date = parse_compact_date(date_part)
        .ok_or_else(|| TickerError::BadDate(date_part.to_string()))?;

    let away = &teams[..3];
    let home = &teams[3..6];
    if !away.chars().all(|c| c.is_ascii_alphabetic())
        || !home.chars().all(|c| c.is_ascii_alphabetic())
    {
        return Err(TickerError::BadFormat(ticker.to_string()));
    }

    Ok(EventTickerInfo {
        ticker: format!("{}{}", EVENT_PREFIX, &body[..13]),
        date,
        away_abbr: normalize_team_abbreviation(away),
        home_abbr: normalize_team_abbreviation(home),
    })
}

/// Parse a full market ticker into its event and market identity.
pub fn parse_market_ticker(ticker: &str) -> Result<MarketTickerInfo, TickerError> {
    let upper = ticker.trim().to_uppercase();
    let body = upper.strip_prefix(EVENT_PREFIX).unwrap_or(&upper);
    if !body.is_ascii() || body.len() < 13 {
        return Err(TickerError::BadFormat(ticker.to_string()));
    }

    let event = parse_event_ticker(&body[..13])?;
    let suffix = body[13..].trim_start_matches('-');

    if suffix.is_empty() {
        return Err(TickerError::BadSuffix(ticker.to_string()));
    }

    // Moneyline sides: -Y / -N, with a tolerated -{TEAM} variant some
    // listings use instead.
    if suffix == "Y" {
        return Ok(MarketTickerInfo {
            kind: MarketKind::MoneylineHome,
            side: Some(Side::Yes),
            team: Some(event.home_abbr.clone()),
            strike: None,
            event,
        });
    }
    if suffix == "N" {
        return Ok(MarketTickerInfo {
            kind: MarketKind::MoneylineAway,
            side: Some(Side::No),
            team: Some(event.away_abbr.clone()),
            strike: None,
            event,
        });
    }
    if suffix.len() == 3 && suffix.chars().all(|c| c.is_ascii_alphabetic()) {
        let team = normalize_team_abbreviation(suffix);
        let kind = if team == event.home_abbr {
            MarketKind::MoneylineHome
        } else {
            MarketKind::MoneylineAway
        };
        return Ok(MarketTickerInfo {
            kind,
            side: Some(Side::Yes),
            team: Some(team),
            strike: None,
            event,
        });
    }

    if let Some(rest) = suffix.strip_prefix("SPREAD-") {
        let (team, value) = split_team_and_value(rest)
            .ok_or_else(|| TickerError::BadSuffix(ticker.to_string()))?;
        return Ok(MarketTickerInfo {
            kind: MarketKind::Spread,
            side: None,
            team: Some(normalize_team_abbreviation(&team)),
            strike: Some(value),
            event,
        });
    }

    if let Some(rest) = suffix.strip_prefix("TOTAL-") {
        let over = match rest.chars().next() {
            Some('O') => true,
            Some('U') => false,
            _ => return Err(TickerError::BadSuffix(ticker.to_string())),
        };
        let value: Decimal = rest[1..]
            .parse()
            .map_err(|_| TickerError::BadSuffix(ticker.to_string()))?;
        return Ok(MarketTickerInfo {
            kind: MarketKind::Total,
            // YES on a total market is the over.
            side: Some(if over { Side::Yes } else { Side::No }),
            team: None,
            strike: Some(value),
            event,
        });
    }

    Err(TickerError::BadSuffix(ticker.to_string()))
}

/// Parse a compact `YYmmmDD` date (two-digit year is 20YY).
fn parse_compact_date(s: &str) -> Option<NaiveDate> {
    if s.len() != 7 {
        return None;
    }
    let year: i32 = 2000 + s[..2].parse::<i32>().ok()?;
    let month = match &s[2..5] {
        "JAN" => 1,
        "FEB" => 2,
        "MAR" => 3,
        "APR" => 4,
        "MAY" => 5,
        "JUN" => 6,
        "JUL" => 7,
        "AUG" => 8,
        "SEP" => 9,
        "OCT" => 10,
        "NOV" => 11,
        "DEC" => 12,
        _ => return None,
    };
    let day: u32 = s[5..7].parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Split a `{TEAM}{value}` tail like `SAC7` or `DAL7.5`.
fn split_team_and_value(s: &str) -> Option<(String, Decimal)> {
    let split_at = s.find(|c: char| c.is_ascii_digit())?;
    if split_at == 0 {
        return None;
    }
    let team = &s[..split_at];
    if !team.chars().all(|c| c.is_ascii_alphabetic()) {
        return None;
    }
    let value: Decimal = s[split_at..].parse().ok()?;
    Some((team.to_string(), value))
}

/// Normalize a team abbreviation to its standard form.
///
/// A few codes appear in event tickers under legacy spellings.
pub fn normalize_team_abbreviation(abbr: &str) -> String {
    let upper = abbr.to_uppercase();
    match upper.as_str() {
        "GSC" => "GSW".to_string(),
        "PHO" => "PHX".to_string(),
        "NOR" => "NOP".to_string(),
        _ => upper,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_event_ticker() {
        let info = parse_event_ticker("KXNBAGAME-26JAN06DALSAC").unwrap();
        assert_eq!(info.date, NaiveDate::from_ymd_opt(2026, 1, 6).unwrap());
        assert_eq!(info.away_abbr, "DAL");
        assert_eq!(info.home_abbr, "SAC");
        assert_eq!(info.ticker, "KXNBAGAME-26JAN06DALSAC");
    }

    #[test]
    fn test_parse_event_ticker_case_insensitive() {
        let info = parse_event_ticker("kxnbagame-26jan06dalsac").unwrap();
        assert_eq!(info.home_abbr, "SAC");
        assert_eq!(info.ticker, "KXNBAGAME-26JAN06DALSAC");
    }

    #[test]
    fn test_parse_event_ticker_without_prefix() {
        let info = parse_event_ticker("15DEC25LALGSC").unwrap();
        assert_eq!(info.date, NaiveDate::from_ymd_opt(2025, 12, 15).unwrap());
        assert_eq!(info.away_abbr, "LAL");
        // GSC is the legacy Golden State code.
        assert_eq!(info.home_abbr, "GSW");
    }

    #[test]
    fn test_parse_event_ticker_rejects_garbage() {
        assert!(parse_event_ticker("KXNBAGAME-XXX").is_err());
        assert!(parse_event_ticker("KXNBAGAME-26ZZZ06DALSAC").is_err());
        assert!(parse_event_ticker("KXNBAGAME-26JAN99DALSAC").is_err());
    }

    #[test]
    fn test_parse_moneyline_sides() {
        let yes = parse_market_ticker("KXNBAGAME-26JAN06DALSAC-Y").unwrap();
        assert_eq!(yes.kind, MarketKind::MoneylineHome);
        assert_eq!(yes.side, Some(Side::Yes));
        assert_eq!(yes.team.as_deref(), Some("SAC"));

        let no = parse_market_ticker("KXNBAGAME-26JAN06DALSAC-N").unwrap();
        assert_eq!(no.kind, MarketKind::MoneylineAway);
        assert_eq!(no.team.as_deref(), Some("DAL"));
    }

    #[test]
    fn test_parse_moneyline_team_variant() {
        let home = parse_market_ticker("KXNBAGAME-26JAN06DALSAC-SAC").unwrap();
        assert_eq!(home.kind, MarketKind::MoneylineHome);
        let away = parse_market_ticker("KXNBAGAME-26JAN06DALSAC-DAL").unwrap();
        assert_eq!(away.kind, MarketKind::MoneylineAway);
    }

    #[test]
    fn test_parse_spread() {
        let info = parse_market_ticker("KXNBAGAME-26JAN06DALSAC-SPREAD-SAC7").unwrap();
        assert_eq!(info.kind, MarketKind::Spread);
        assert_eq!(info.team.as_deref(), Some("SAC"));
        assert_eq!(info.strike, Some(dec!(7)));

        let half = parse_market_ticker("kxnbagame-26jan06dalsac-spread-dal7.5").unwrap();
        assert_eq!(half.strike, Some(dec!(7.5)));
        assert_eq!(half.team.as_deref(), Some("DAL"));
    }

    #[test]
    fn test_parse_total() {
        let over = parse_market_ticker("KXNBAGAME-26JAN06DALSAC-TOTAL-O240.5").unwrap();
        assert_eq!(over.kind, MarketKind::Total);
        assert_eq!(over.side, Some(Side::Yes));
        assert_eq!(over.strike, Some(dec!(240.5)));

        let under = parse_market_ticker("KXNBAGAME-26JAN06DALSAC-TOTAL-U240.5").unwrap();
        assert_eq!(under.side, Some(Side::No));
    }

    #[test]
    fn test_parse_market_rejects_bad_suffix() {
        assert!(parse_market_ticker("KXNBAGAME-26JAN06DALSAC-SPREAD-7").is_err());
        assert!(parse_market_ticker("KXNBAGAME-26JAN06DALSAC-TOTAL-X240").is_err());
        assert!(parse_market_ticker("KXNBAGAME-26JAN06DALSAC-").is_err());
    }

    #[test]
    fn test_normalize_team_abbreviation() {
        assert_eq!(normalize_team_abbreviation("gsc"), "GSW");
        assert_eq!(normalize_team_abbreviation("PHO"), "PHX");
        assert_eq!(normalize_team_abbreviation("LAL"), "LAL");
    }
}
