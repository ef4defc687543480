//! Event detection over a day's bar.
//!
//! - E1_SURGE:     day_return ≥ threshold AND close_to_high ≥ threshold
//! - E2_GAP_SURGE: E1 AND gap_ratio ≥ threshold
//!
//! E2 does not replace E1 — the two event types carry separate statistics,
//! so a gap-surge day emits both rows (they share the (code, date) but not
//! the type, which is part of the unique key).

use kite_config::ForecastConfig;
use kite_domain::{CapBucket, EventType, ForecastEvent, PriceBar};

/// Volume history length needed for the z-score attachment.
pub const VOLUME_Z_WINDOW: usize = 20;

#[derive(Clone, Debug)]
pub struct DetectInput<'a> {
    pub bar: &'a PriceBar,
    pub prev: &'a PriceBar,
    /// Trailing volumes *excluding* today, newest last. The z-score is
    /// attached only when at least [`VOLUME_Z_WINDOW`] observations exist.
    pub volume_history: &'a [i64],
    pub sector: &'a str,
    pub cap_bucket: CapBucket,
}

/// Detect events for one (code, date). Returns zero, one, or two events.
pub fn detect(input: &DetectInput<'_>, cfg: &ForecastConfig) -> Vec<ForecastEvent> {
    let Some(day_return) = input.bar.return_from(input.prev) else {
        return Vec::new();
    };
    if input.prev.close <= 0 {
        return Vec::new();
    }

    let gap_ratio = (input.bar.open - input.prev.close) as f64 / input.prev.close as f64;
    let close_to_high = close_to_high(input.bar);
    let volume_z = volume_z_score(input.bar.volume, input.volume_history);

    let is_e1 = day_return >= cfg.e1_min_day_return && close_to_high >= cfg.e1_min_close_to_high;
    if !is_e1 {
        return Vec::new();
    }

    let make = |event_type: EventType| ForecastEvent {
        code: input.bar.code.clone(),
        event_date: input.bar.date,
        event_type,
        day_return,
        close_to_high,
        gap_ratio,
        volume_z,
        sector: input.sector.to_string(),
        cap_bucket: input.cap_bucket,
    };

    let mut events = vec![make(EventType::E1Surge)];
    if gap_ratio >= cfg.e2_min_gap_ratio {
        events.push(make(EventType::E2GapSurge));
    }
    events
}

/// Where the close sits in the day's range: 1.0 at the high, 0.0 at the
/// low. A rangeless bar counts as closing at the high.
fn close_to_high(bar: &PriceBar) -> f64 {
    let range = bar.high - bar.low;
    if range <= 0 {
        return 1.0;
    }
    (bar.close - bar.low) as f64 / range as f64
}

fn volume_z_score(volume: i64, history: &[i64]) -> Option<f64> {
    if history.len() < VOLUME_Z_WINDOW {
        return None;
    }
    let tail = &history[history.len() - VOLUME_Z_WINDOW..];
    let n = tail.len() as f64;
    let mean = tail.iter().map(|v| *v as f64).sum::<f64>() / n;
    let var = tail
        .iter()
        .map(|v| (*v as f64 - mean).powi(2))
        .sum::<f64>()
        / (n - 1.0);
    let std = var.sqrt();
    if std <= 0.0 {
        return None;
    }
    Some((volume as f64 - mean) / std)
}
