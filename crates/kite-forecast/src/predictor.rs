//! Prediction with 4-level fallback and Bayesian shrinkage.
//!
//! Fallback: SYMBOL → SECTOR → BUCKET → MARKET; the first level with
//! `sample_count ≥ min_samples` wins. MARKET is terminal — when it exists
//! it is used even under-sampled (a market row always yields *some*
//! prediction; the confidence says how much to trust it).
//!
//! Shrinkage pulls the winning level's mean toward the market mean:
//! `shrunk = n/(n+K) · level + K/(n+K) · market`, K = 10 by default.
//! Confidence = min(1, n / 30).

use std::collections::BTreeMap;

use kite_config::ForecastConfig;
use kite_domain::{EventType, ForecastEvent, ForecastStats, Prediction, StatsLevel};

use crate::aggregator::stats_key;

/// Stats lookup keyed by (level, key, event_type), as loaded by the repo.
pub type StatsMap = BTreeMap<(StatsLevel, String, EventType), ForecastStats>;

/// Predict expected follow-through for one event.
///
/// Returns None only when no fallback level (market included) has a stats
/// row for the event type.
pub fn predict(event: &ForecastEvent, stats: &StatsMap, cfg: &ForecastConfig) -> Option<Prediction> {
    let market = stats.get(&(
        StatsLevel::Market,
        "ALL".to_string(),
        event.event_type,
    ));

    let mut chosen: Option<&ForecastStats> = None;
    for level in StatsLevel::FALLBACK {
        let key = (level, stats_key(event, level), event.event_type);
        if let Some(row) = stats.get(&key) {
            if row.sample_count >= cfg.min_samples || level == StatsLevel::Market {
                chosen = Some(row);
                break;
            }
        }
    }
    let level_stats = chosen?;

    // Without a market row, shrinkage has no prior; shrink toward the
    // chosen level itself (identity).
    let market_stats = market.unwrap_or(level_stats);

    let n = level_stats.sample_count as f64;
    let k = cfg.shrinkage_k;
    let shrink = |level_mean: f64, market_mean: f64| {
        n / (n + k) * level_mean + k / (n + k) * market_mean
    };

    Some(Prediction {
        event_key: event.event_key(),
        model_version: cfg.model_version.clone(),
        expected_ret_1d: shrink(level_stats.avg_ret_1d, market_stats.avg_ret_1d),
        expected_ret_5d: shrink(level_stats.avg_ret_5d, market_stats.avg_ret_5d),
        confidence: (n / cfg.confidence_norm).min(1.0),
        p10_mdd: level_stats.p10_mdd,
        expected_runup_5d: level_stats.avg_runup_5d,
        fallback_level: level_stats.level,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use kite_domain::CapBucket;

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

    fn stats_row(level: StatsLevel, key: &str, n: u64, avg_1d: f64, avg_5d: f64) -> ForecastStats {
        ForecastStats {
            level,
            key: key.into(),
            event_type: EventType::E1Surge,
            sample_count: n,
            avg_ret_1d: avg_1d,
            avg_ret_5d: avg_5d,
            win_rate_1d: 0.6,
            win_rate_5d: 0.55,
            avg_runup_5d: 0.06,
            p10_mdd: -0.08,
        }
    }

    fn insert(map: &mut StatsMap, row: ForecastStats) {
        map.insert((row.level, row.key.clone(), row.event_type), row);
    }

    fn cfg() -> ForecastConfig {
        ForecastConfig::default()
    }

    #[test]
    fn fallback_skips_thin_levels() {
        // 0 symbol events, 3 sector, 50 bucket, 500 market → bucket wins.
        let mut stats = StatsMap::new();
        insert(&mut stats, stats_row(StatsLevel::Sector, "IT", 3, 0.05, 0.09));
        insert(&mut stats, stats_row(StatsLevel::Bucket, "large", 50, 0.02, 0.05));
        insert(&mut stats, stats_row(StatsLevel::Market, "ALL", 500, 0.01, 0.02));

        let p = predict(&event(), &stats, &cfg()).unwrap();
        assert_eq!(p.fallback_level, StatsLevel::Bucket);
        // Shrinkage with n=50, K=10: 50/60·0.02 + 10/60·0.01.
        let expected = 50.0 / 60.0 * 0.02 + 10.0 / 60.0 * 0.01;
        assert!((p.expected_ret_1d - expected).abs() < 1e-12);
        // Confidence = min(1, 50/30) = 1.
        assert!((p.confidence - 1.0).abs() < 1e-12);
    }

    #[test]
    fn symbol_level_wins_when_sampled() {
        let mut stats = StatsMap::new();
        insert(&mut stats, stats_row(StatsLevel::Symbol, "035420", 12, 0.03, 0.06));
        insert(&mut stats, stats_row(StatsLevel::Market, "ALL", 500, 0.01, 0.02));

        let p = predict(&event(), &stats, &cfg()).unwrap();
        assert_eq!(p.fallback_level, StatsLevel::Symbol);
        assert!((p.confidence - 0.4).abs() < 1e-12, "12/30");
    }

    #[test]
    fn market_row_always_yields_a_prediction() {
        // Even an under-sampled market row predicts; nothing else exists.
        let mut stats = StatsMap::new();
        insert(&mut stats, stats_row(StatsLevel::Market, "ALL", 3, 0.01, 0.02));

        let p = predict(&event(), &stats, &cfg()).unwrap();
        assert_eq!(p.fallback_level, StatsLevel::Market);
        // Shrinking market toward market is the identity.
        assert!((p.expected_ret_1d - 0.01).abs() < 1e-12);
        assert!(p.confidence < 0.2);
    }

    #[test]
    fn no_stats_at_all_is_none() {
        assert!(predict(&event(), &StatsMap::new(), &cfg()).is_none());
    }

    #[test]
    fn e2_stats_do_not_answer_e1_events() {
        let mut stats = StatsMap::new();
        let mut row = stats_row(StatsLevel::Market, "ALL", 100, 0.01, 0.02);
        row.event_type = EventType::E2GapSurge;
        insert(&mut stats, row);
        assert!(predict(&event(), &stats, &cfg()).is_none());
    }

    #[test]
    fn runup_and_mdd_come_from_chosen_level() {
        let mut stats = StatsMap::new();
        let mut bucket = stats_row(StatsLevel::Bucket, "large", 50, 0.02, 0.05);
        bucket.avg_runup_5d = 0.11;
        bucket.p10_mdd = -0.12;
        insert(&mut stats, bucket);
        insert(&mut stats, stats_row(StatsLevel::Market, "ALL", 500, 0.01, 0.02));

        let p = predict(&event(), &stats, &cfg()).unwrap();
        assert!((p.expected_runup_5d - 0.11).abs() < 1e-12);
        assert!((p.p10_mdd - (-0.12)).abs() < 1e-12);
    }
}
