//! Forward-performance backfill.
//!
//! Given an event's base close and its forward daily bars, compute the
//! realized follow-through. The contract wants exactly five forward bars;
//! an event too close to the present is skipped (None), not an error —
//! the fill-forward job will pick it up on a later day.

use kite_domain::{ForecastEvent, ForwardPerformance, PriceBar};

/// Forward bars required before an event can be tracked.
pub const FORWARD_BARS: usize = 5;

/// Compute forward performance from the first five bars after the event.
///
/// `forward` must hold the bars strictly after the event date, ascending;
/// extra bars beyond the fifth are ignored. Returns None when fewer than
/// five exist or the base close is unusable.
pub fn track_forward(
    event: &ForecastEvent,
    base_close: i64,
    forward: &[PriceBar],
) -> Option<ForwardPerformance> {
    if forward.len() < FORWARD_BARS || base_close <= 0 {
        return None;
    }
    let bars = &forward[..FORWARD_BARS];
    let base = base_close as f64;

    let ret = |close: i64| (close - base_close) as f64 / base;

    let max_runup_5d = bars
        .iter()
        .map(|b| (b.high as f64 - base) / base)
        .fold(f64::MIN, f64::max);
    let max_drawdown_5d = bars
        .iter()
        .map(|b| (b.low as f64 - base) / base)
        .fold(f64::MAX, f64::min);

    Some(ForwardPerformance {
        event_key: event.event_key(),
        fwd_ret_1d: ret(bars[0].close),
        fwd_ret_2d: ret(bars[1].close),
        fwd_ret_3d: ret(bars[2].close),
        fwd_ret_5d: ret(bars[4].close),
        max_runup_5d,
        max_drawdown_5d,
        gap_hold_3d: bars[2].close >= base_close,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use kite_domain::{CapBucket, EventType};

    fn event() -> ForecastEvent {
        ForecastEvent {
            code: "035420".into(),
            event_date: NaiveDate::from_ymd_opt(2025, 7, 1).unwrap(),
            event_type: EventType::E1Surge,
            day_return: 0.05,
            close_to_high: 0.9,
            gap_ratio: 0.0,
            volume_z: None,
            sector: "IT".into(),
            cap_bucket: CapBucket::Large,
        }
    }

    fn bar(i: u64, high: i64, low: i64, close: i64) -> PriceBar {
        PriceBar {
            code: "035420".into(),
            date: NaiveDate::from_ymd_opt(2025, 7, 1).unwrap() + chrono::Days::new(i),
            open: close,
            high,
            low,
            close,
            volume: 100_000,
            value: None,
        }
    }

    #[test]
    fn five_bars_produce_full_row() {
        // Base 10_000; closes 10_100, 10_200, 10_050, 9_900, 10_400.
        let forward = vec![
            bar(1, 10_300, 10_000, 10_100),
            bar(2, 10_250, 10_050, 10_200),
            bar(3, 10_210, 9_950, 10_050),
            bar(4, 10_000, 9_700, 9_900),
            bar(5, 10_500, 9_950, 10_400),
        ];
        let fp = track_forward(&event(), 10_000, &forward).unwrap();
        assert!((fp.fwd_ret_1d - 0.01).abs() < 1e-12);
        assert!((fp.fwd_ret_2d - 0.02).abs() < 1e-12);
        assert!((fp.fwd_ret_3d - 0.005).abs() < 1e-12);
        assert!((fp.fwd_ret_5d - 0.04).abs() < 1e-12);
        // Runup peaks at day-5 high 10_500; drawdown bottoms at day-4 low 9_700.
        assert!((fp.max_runup_5d - 0.05).abs() < 1e-12);
        assert!((fp.max_drawdown_5d - (-0.03)).abs() < 1e-12);
        assert!(fp.gap_hold_3d, "day-3 close 10_050 holds the base");
    }

    #[test]
    fn four_bars_skip_quietly() {
        let forward = vec![
            bar(1, 10_300, 10_000, 10_100),
            bar(2, 10_250, 10_050, 10_200),
            bar(3, 10_210, 9_950, 10_050),
            bar(4, 10_000, 9_700, 9_900),
        ];
        assert!(track_forward(&event(), 10_000, &forward).is_none());
    }

    #[test]
    fn extra_bars_beyond_fifth_are_ignored() {
        let mut forward: Vec<PriceBar> = (1..=5)
            .map(|i| bar(i, 10_100, 9_900, 10_000))
            .collect();
        forward.push(bar(6, 99_000, 99_000, 99_000));
        let fp = track_forward(&event(), 10_000, &forward).unwrap();
        assert!(fp.max_runup_5d < 0.02, "sixth bar must not leak in");
    }

    #[test]
    fn gap_hold_false_when_day3_breaks_base() {
        let forward = vec![
            bar(1, 10_300, 10_000, 10_100),
            bar(2, 10_250, 10_050, 10_200),
            bar(3, 10_210, 9_500, 9_800),
            bar(4, 10_000, 9_700, 9_900),
            bar(5, 10_500, 9_950, 10_400),
        ];
        let fp = track_forward(&event(), 10_000, &forward).unwrap();
        assert!(!fp.gap_hold_3d);
    }

    #[test]
    fn bad_base_close_is_none() {
        let forward: Vec<PriceBar> = (1..=5).map(|i| bar(i, 10_100, 9_900, 10_000)).collect();
        assert!(track_forward(&event(), 0, &forward).is_none());
    }
}
