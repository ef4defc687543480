//! Ranker: stable ordering of signal sets into ranks 1..N.
//!
//! The composite itself is computed in kite-signals (`compose`), with the
//! config-driven weights normalized to sum 1; this module only orders.
//! Ordering contract: total_score descending, ties broken by code ascending
//! so a re-run over the same inputs is byte-identical.

use chrono::NaiveDate;
use kite_domain::{RankedStock, SignalSet};

/// Order the given signal sets and assign ranks starting at 1.
///
/// Inputs may arrive in any order; the output is deterministic.
pub fn rank(date: NaiveDate, signal_sets: Vec<SignalSet>) -> Vec<RankedStock> {
    let mut sets = signal_sets;
    sets.sort_by(|a, b| {
        b.total
            .partial_cmp(&a.total)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.code.cmp(&b.code))
    });

    sets.into_iter()
        .enumerate()
        .map(|(i, detail)| RankedStock {
            date,
            code: detail.code.clone(),
            rank: (i + 1) as u32,
            total_score: detail.total,
            detail,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(code: &str, total: f64) -> SignalSet {
        SignalSet {
            date: "2025-07-01".parse().unwrap(),
            code: code.into(),
            momentum: Some(total),
            technical: None,
            value: None,
            quality: None,
            flow: None,
            event: None,
            total,
            weakly_observed: true,
        }
    }

    #[test]
    fn orders_by_total_descending() {
        let ranked = rank(
            "2025-07-01".parse().unwrap(),
            vec![set("000100", 0.1), set("000200", 0.9), set("000300", 0.5)],
        );
        let codes: Vec<&str> = ranked.iter().map(|r| r.code.as_str()).collect();
        assert_eq!(codes, vec!["000200", "000300", "000100"]);
        let ranks: Vec<u32> = ranked.iter().map(|r| r.rank).collect();
        assert_eq!(ranks, vec![1, 2, 3]);
    }

    #[test]
    fn ties_break_by_code_ascending() {
        let ranked = rank(
            "2025-07-01".parse().unwrap(),
            vec![set("000300", 0.5), set("000100", 0.5), set("000200", 0.5)],
        );
        let codes: Vec<&str> = ranked.iter().map(|r| r.code.as_str()).collect();
        assert_eq!(codes, vec!["000100", "000200", "000300"]);
    }

    #[test]
    fn ranks_are_a_permutation_of_1_to_n() {
        let sets: Vec<SignalSet> = (0..30)
            .map(|i| set(&format!("{:06}", i), (i % 7) as f64 / 7.0))
            .collect();
        let ranked = rank("2025-07-01".parse().unwrap(), sets);
        let mut ranks: Vec<u32> = ranked.iter().map(|r| r.rank).collect();
        ranks.sort_unstable();
        assert_eq!(ranks, (1..=30).collect::<Vec<u32>>());
    }

    #[test]
    fn empty_input_is_empty_output() {
        assert!(rank("2025-07-01".parse().unwrap(), vec![]).is_empty());
    }

    #[test]
    fn input_order_does_not_matter() {
        let a = rank(
            "2025-07-01".parse().unwrap(),
            vec![set("000100", 0.1), set("000200", 0.9)],
        );
        let b = rank(
            "2025-07-01".parse().unwrap(),
            vec![set("000200", 0.9), set("000100", 0.1)],
        );
        assert_eq!(a, b);
    }
}
