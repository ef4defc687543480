//! Prediction validation: error metrics and calibration bins.
//!
//! The caller joins predictions with realized forward performance (by event
//! key and model version — the same event can carry rows for competing
//! model versions, which is how A/B comparisons run) and hands the paired
//! (predicted, actual) series here.

use serde::Serialize;

/// One calibration bucket: rows sorted by prediction, split into K equal
/// bins, each summarized.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CalibrationBin {
    pub count: usize,
    pub avg_predicted: f64,
    pub avg_actual: f64,
    pub hit_rate: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ValidationReport {
    pub count: usize,
    pub mae: f64,
    pub rmse: f64,
    /// Fraction of rows where sign(actual) == sign(predicted).
    pub hit_rate: f64,
    /// Mean of (predicted − actual); positive means over-forecasting.
    pub mean_error: f64,
    pub bins: Vec<CalibrationBin>,
}

impl ValidationReport {
    /// Compute the report over (predicted, actual) pairs.
    ///
    /// Returns None for an empty join — there is nothing to validate and a
    /// zero-filled report would read as a (false) perfect score.
    pub fn compute(pairs: &[(f64, f64)], bin_count: usize) -> Option<Self> {
        if pairs.is_empty() {
            return None;
        }
        let n = pairs.len() as f64;

        let mae = pairs.iter().map(|(p, a)| (p - a).abs()).sum::<f64>() / n;
        let rmse = (pairs.iter().map(|(p, a)| (p - a).powi(2)).sum::<f64>() / n).sqrt();
        let hits = pairs
            .iter()
            .filter(|(p, a)| sign(*p) == sign(*a))
            .count();
        let mean_error = pairs.iter().map(|(p, a)| p - a).sum::<f64>() / n;

        Some(Self {
            count: pairs.len(),
            mae,
            rmse,
            hit_rate: hits as f64 / n,
            mean_error,
            bins: calibration_bins(pairs, bin_count),
        })
    }
}

fn sign(x: f64) -> i8 {
    if x > 0.0 {
        1
    } else if x < 0.0 {
        -1
    } else {
        0
    }
}

/// Sort by prediction ascending and split into `bin_count` near-equal bins.
fn calibration_bins(pairs: &[(f64, f64)], bin_count: usize) -> Vec<CalibrationBin> {
    if bin_count == 0 || pairs.is_empty() {
        return Vec::new();
    }
    let mut sorted = pairs.to_vec();
    sorted.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

    let bins = bin_count.min(sorted.len());
    let base = sorted.len() / bins;
    let extra = sorted.len() % bins;

    let mut out = Vec::with_capacity(bins);
    let mut start = 0;
    for i in 0..bins {
        let len = base + usize::from(i < extra);
        let chunk = &sorted[start..start + len];
        start += len;

        let cn = chunk.len() as f64;
        out.push(CalibrationBin {
            count: chunk.len(),
            avg_predicted: chunk.iter().map(|(p, _)| p).sum::<f64>() / cn,
            avg_actual: chunk.iter().map(|(_, a)| a).sum::<f64>() / cn,
            hit_rate: chunk
                .iter()
                .filter(|(p, a)| sign(*p) == sign(*a))
                .count() as f64
                / cn,
        });
    }
    out
}
