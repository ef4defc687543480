//! Hierarchical statistical aggregation.
//!
//! Groups tracked events by (level key, event_type) for each of the four
//! levels and computes the per-group statistics. The output overwrites the
//! previous stats row for each unique (level, key, event_type) — upsert
//! semantics are handled by the repository.

use std::collections::BTreeMap;

use kite_domain::{EventType, ForecastEvent, ForecastStats, ForwardPerformance, StatsLevel};

/// The grouping key an event carries at a given level.
pub fn stats_key(event: &ForecastEvent, level: StatsLevel) -> String {
    match level {
        StatsLevel::Symbol => event.code.clone(),
        StatsLevel::Sector => event.sector.clone(),
        StatsLevel::Bucket => event.cap_bucket.as_str().to_string(),
        StatsLevel::Market => "ALL".to_string(),
    }
}

/// Aggregate tracked events into stats rows for every level.
///
/// Rows are ordered (level, key, event_type) for deterministic writes.
pub fn aggregate(tracked: &[(ForecastEvent, ForwardPerformance)]) -> Vec<ForecastStats> {
    let mut groups: BTreeMap<(StatsLevel, String, EventType), Vec<&ForwardPerformance>> =
        BTreeMap::new();

    for (event, perf) in tracked {
        for level in StatsLevel::FALLBACK {
            groups
                .entry((level, stats_key(event, level), event.event_type))
                .or_default()
                .push(perf);
        }
    }

    groups
        .into_iter()
        .map(|((level, key, event_type), rows)| summarize(level, key, event_type, &rows))
        .collect()
}

fn summarize(
    level: StatsLevel,
    key: String,
    event_type: EventType,
    rows: &[&ForwardPerformance],
) -> ForecastStats {
    let n = rows.len() as f64;
    let avg = |f: fn(&ForwardPerformance) -> f64| rows.iter().map(|r| f(r)).sum::<f64>() / n;
    let win_rate =
        |f: fn(&ForwardPerformance) -> f64| rows.iter().filter(|r| f(r) > 0.0).count() as f64 / n;

    let mut mdds: Vec<f64> = rows.iter().map(|r| r.max_drawdown_5d).collect();
    mdds.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let p10_idx = ((mdds.len() - 1) as f64 * 0.10).floor() as usize;

    ForecastStats {
        level,
        key,
        event_type,
        sample_count: rows.len() as u64,
        avg_ret_1d: avg(|r| r.fwd_ret_1d),
        avg_ret_5d: avg(|r| r.fwd_ret_5d),
        win_rate_1d: win_rate(|r| r.fwd_ret_1d),
        win_rate_5d: win_rate(|r| r.fwd_ret_5d),
        avg_runup_5d: avg(|r| r.max_runup_5d),
        p10_mdd: mdds[p10_idx],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use kite_domain::CapBucket;

    fn event(code: &str, sector: &str, bucket: CapBucket, event_type: EventType) -> ForecastEvent {
        ForecastEvent {
            code: code.into(),
            event_date: NaiveDate::from_ymd_opt(2025, 7, 1).unwrap(),
            event_type,
            day_return: 0.05,
            close_to_high: 0.9,
            gap_ratio: 0.0,
            volume_z: None,
            sector: sector.into(),
            cap_bucket: bucket,
        }
    }

    fn perf(ret_1d: f64, ret_5d: f64, mdd: f64) -> ForwardPerformance {
        ForwardPerformance {
            event_key: "k".into(),
            fwd_ret_1d: ret_1d,
            fwd_ret_2d: ret_1d,
            fwd_ret_3d: ret_1d,
            fwd_ret_5d: ret_5d,
            max_runup_5d: ret_5d.max(0.0) + 0.01,
            max_drawdown_5d: mdd,
            gap_hold_3d: ret_1d > 0.0,
        }
    }

    #[test]
    fn every_level_gets_a_row() {
        let tracked = vec![(
            event("035420", "IT", CapBucket::Large, EventType::E1Surge),
            perf(0.01, 0.03, -0.02),
        )];
        let stats = aggregate(&tracked);
        assert_eq!(stats.len(), 4, "one event → one row per level");
        let levels: Vec<StatsLevel> = stats.iter().map(|s| s.level).collect();
        assert_eq!(levels, StatsLevel::FALLBACK.to_vec());
        assert_eq!(stats[0].key, "035420");
        assert_eq!(stats[1].key, "IT");
        assert_eq!(stats[2].key, "large");
        assert_eq!(stats[3].key, "ALL");
    }

    #[test]
    fn event_types_do_not_mix() {
        let tracked = vec![
            (
                event("035420", "IT", CapBucket::Large, EventType::E1Surge),
                perf(0.01, 0.03, -0.02),
            ),
            (
                event("035420", "IT", CapBucket::Large, EventType::E2GapSurge),
                perf(0.02, 0.05, -0.01),
            ),
        ];
        let stats = aggregate(&tracked);
        let symbol_rows: Vec<&ForecastStats> = stats
            .iter()
            .filter(|s| s.level == StatsLevel::Symbol)
            .collect();
        assert_eq!(symbol_rows.len(), 2);
        assert!(symbol_rows.iter().all(|s| s.sample_count == 1));
    }

    #[test]
    fn averages_and_win_rates() {
        let e = |code: &str| event(code, "IT", CapBucket::Mid, EventType::E1Surge);
        let tracked = vec![
            (e("A"), perf(0.02, 0.04, -0.01)),
            (e("B"), perf(-0.01, 0.02, -0.05)),
            (e("C"), perf(0.03, -0.02, -0.03)),
        ];
        let stats = aggregate(&tracked);
        let sector = stats
            .iter()
            .find(|s| s.level == StatsLevel::Sector && s.key == "IT")
            .unwrap();
        assert_eq!(sector.sample_count, 3);
        assert!((sector.avg_ret_1d - (0.02 - 0.01 + 0.03) / 3.0).abs() < 1e-12);
        assert!((sector.win_rate_1d - 2.0 / 3.0).abs() < 1e-12);
        assert!((sector.win_rate_5d - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn p10_mdd_is_the_deep_tail() {
        let e = |code: &str| event(code, "IT", CapBucket::Mid, EventType::E1Surge);
        // MDDs: -0.10 is the worst of ten; p10 index = floor(9 · 0.10) = 0.
        let tracked: Vec<(ForecastEvent, ForwardPerformance)> = (0..10)
            .map(|i| {
                (
                    e(&format!("{:06}", i)),
                    perf(0.01, 0.02, -0.01 * (i + 1) as f64),
                )
            })
            .collect();
        let stats = aggregate(&tracked);
        let market = stats.iter().find(|s| s.level == StatsLevel::Market).unwrap();
        assert!((market.p10_mdd - (-0.10)).abs() < 1e-12);
    }

    #[test]
    fn empty_input_is_empty_output() {
        assert!(aggregate(&[]).is_empty());
    }
}
