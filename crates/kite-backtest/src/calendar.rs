//! KRX trading-day calendar.
//!
//! Weekday filter in the exchange timezone. Exchange holidays come from
//! the data itself: a run on a holiday finds no bars and fails its quality
//! gate, which the driver records and skips past, so the calendar stays a
//! pure date computation.

use chrono::{Datelike, NaiveDate, Weekday};

/// Trading days in [from, to], ascending. Weekends excluded.
pub fn trading_days(from: NaiveDate, to: NaiveDate) -> Vec<NaiveDate> {
    let mut days = Vec::new();
    let mut day = from;
    while day <= to {
        if !matches!(day.weekday(), Weekday::Sat | Weekday::Sun) {
            days.push(day);
        }
        day = match day.succ_opt() {
            Some(next) => next,
            None => break,
        };
    }
    days
}
