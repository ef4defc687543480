//! Market reference data and raw time-series rows.
//!
//! Everything here is keyed `(code, date)` or `(code, period)` and is
//! immutable between trading days. Monetary fields are integer KRW.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Market / status enums
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Market {
    Kospi,
    Kosdaq,
}

impl Market {
    pub fn as_str(&self) -> &'static str {
        match self {
            Market::Kospi => "KOSPI",
            Market::Kosdaq => "KOSDAQ",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "KOSPI" => Some(Market::Kospi),
            "KOSDAQ" => Some(Market::Kosdaq),
            _ => None,
        }
    }
}

/// Listing status. Anything but `Active` is excluded from the universe.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StockStatus {
    Active,
    Suspended,
    Admin,
    Spac,
}

impl StockStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StockStatus::Active => "ACTIVE",
            StockStatus::Suspended => "SUSPENDED",
            StockStatus::Admin => "ADMIN",
            StockStatus::Spac => "SPAC",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ACTIVE" => Some(StockStatus::Active),
            "SUSPENDED" => Some(StockStatus::Suspended),
            "ADMIN" => Some(StockStatus::Admin),
            "SPAC" => Some(StockStatus::Spac),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Stock
// ---------------------------------------------------------------------------

/// One listed equity. `code` is the stable string key (6-digit KRX code).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Stock {
    pub code: String,
    pub name: String,
    pub market: Market,
    pub sector: String,
    pub listing_date: NaiveDate,
    pub status: StockStatus,
}

impl Stock {
    pub fn is_tradable(&self) -> bool {
        self.status == StockStatus::Active
    }

    /// Calendar days listed as of `date` (0 when `date` precedes listing).
    pub fn listed_days(&self, date: NaiveDate) -> i64 {
        (date - self.listing_date).num_days().max(0)
    }
}

// ---------------------------------------------------------------------------
// PriceBar
// ---------------------------------------------------------------------------

/// Daily OHLCV bar, unique per `(code, date)`. Prices are integer KRW.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    pub code: String,
    pub date: NaiveDate,
    pub open: i64,
    pub high: i64,
    pub low: i64,
    pub close: i64,
    pub volume: i64,
    /// Traded value in KRW, when the source provides it.
    pub value: Option<i64>,
}

/// Invariant breach on a single bar.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BarInvariantError {
    /// `low ≤ open,close ≤ high` does not hold.
    RangeViolation { code: String, date: NaiveDate },
    /// Negative volume.
    NegativeVolume { code: String, date: NaiveDate },
}

impl std::fmt::Display for BarInvariantError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BarInvariantError::RangeViolation { code, date } => {
                write!(f, "bar range violation: {code} @ {date}")
            }
            BarInvariantError::NegativeVolume { code, date } => {
                write!(f, "negative volume: {code} @ {date}")
            }
        }
    }
}

impl std::error::Error for BarInvariantError {}

impl PriceBar {
    /// Check `low ≤ open,close ≤ high` and `volume ≥ 0`.
    pub fn validate(&self) -> Result<(), BarInvariantError> {
        let in_range =
            self.low <= self.open && self.low <= self.close && self.open <= self.high && self.close <= self.high;
        if !in_range {
            return Err(BarInvariantError::RangeViolation {
                code: self.code.clone(),
                date: self.date,
            });
        }
        if self.volume < 0 {
            return Err(BarInvariantError::NegativeVolume {
                code: self.code.clone(),
                date: self.date,
            });
        }
        Ok(())
    }

    /// Close-to-close return against `prev`, or None when prev close is 0.
    pub fn return_from(&self, prev: &PriceBar) -> Option<f64> {
        if prev.close == 0 {
            return None;
        }
        Some((self.close - prev.close) as f64 / prev.close as f64)
    }
}

// ---------------------------------------------------------------------------
// InvestorFlow
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvestorClass {
    Foreign,
    Institution,
    Individual,
}

impl InvestorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvestorClass::Foreign => "foreign",
            InvestorClass::Institution => "institution",
            InvestorClass::Individual => "individual",
        }
    }
}

/// Signed net flow per investor class, unique per `(code, date)`.
///
/// Unit consistency is an external contract; rows before the historical
/// units-change cutoff are removed by the cleanup command, not validated here.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InvestorFlow {
    pub code: String,
    pub date: NaiveDate,
    pub foreign_net_qty: i64,
    pub foreign_net_value: i64,
    pub institution_net_qty: i64,
    pub institution_net_value: i64,
    pub individual_net_qty: i64,
    pub individual_net_value: i64,
}

impl InvestorFlow {
    pub fn net_value(&self, class: InvestorClass) -> i64 {
        match class {
            InvestorClass::Foreign => self.foreign_net_value,
            InvestorClass::Institution => self.institution_net_value,
            InvestorClass::Individual => self.individual_net_value,
        }
    }
}

// ---------------------------------------------------------------------------
// Fundamentals
// ---------------------------------------------------------------------------

/// Per-period fundamentals, unique per `(code, period)`. Every field may be
/// absent; consumers must tolerate `None` rather than defaulting to 0.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Fundamentals {
    pub code: String,
    /// Reporting period tag, e.g. "2025Q4".
    pub period: String,
    pub per: Option<f64>,
    pub pbr: Option<f64>,
    pub roe: Option<f64>,
    pub debt_ratio: Option<f64>,
    pub revenue: Option<i64>,
    pub operating_profit: Option<i64>,
    pub updated_at: Option<NaiveDateTime>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(open: i64, high: i64, low: i64, close: i64, volume: i64) -> PriceBar {
        PriceBar {
            code: "005930".into(),
            date: NaiveDate::from_ymd_opt(2025, 7, 1).unwrap(),
            open,
            high,
            low,
            close,
            volume,
            value: None,
        }
    }

    #[test]
    fn valid_bar_passes() {
        assert!(bar(100, 110, 95, 105, 1_000).validate().is_ok());
    }

    #[test]
    fn close_above_high_rejected() {
        let err = bar(100, 110, 95, 111, 1_000).validate().unwrap_err();
        assert!(matches!(err, BarInvariantError::RangeViolation { .. }));
    }

    #[test]
    fn open_below_low_rejected() {
        let err = bar(94, 110, 95, 105, 1_000).validate().unwrap_err();
        assert!(matches!(err, BarInvariantError::RangeViolation { .. }));
    }

    #[test]
    fn negative_volume_rejected() {
        let err = bar(100, 110, 95, 105, -1).validate().unwrap_err();
        assert!(matches!(err, BarInvariantError::NegativeVolume { .. }));
    }

    #[test]
    fn return_from_prev_close() {
        let prev = bar(100, 110, 95, 100, 1_000);
        let cur = bar(100, 110, 95, 103, 1_000);
        let r = cur.return_from(&prev).unwrap();
        assert!((r - 0.03).abs() < 1e-12);
    }

    #[test]
    fn return_from_zero_close_is_none() {
        let mut prev = bar(100, 110, 95, 100, 1_000);
        prev.close = 0;
        prev.low = 0;
        let cur = bar(100, 110, 95, 103, 1_000);
        assert!(cur.return_from(&prev).is_none());
    }

    #[test]
    fn market_round_trip() {
        for m in [Market::Kospi, Market::Kosdaq] {
            assert_eq!(Market::parse(m.as_str()), Some(m));
        }
        assert_eq!(Market::parse("NASDAQ"), None);
    }

    #[test]
    fn listed_days_clamps_at_zero() {
        let s = Stock {
            code: "005930".into(),
            name: "Samsung Electronics".into(),
            market: Market::Kospi,
            sector: "IT".into(),
            listing_date: NaiveDate::from_ymd_opt(2025, 7, 1).unwrap(),
            status: StockStatus::Active,
        };
        assert_eq!(s.listed_days(NaiveDate::from_ymd_opt(2025, 6, 1).unwrap()), 0);
        assert_eq!(s.listed_days(NaiveDate::from_ymd_opt(2025, 7, 31).unwrap()), 30);
    }
}
