//! Historical VaR and CVaR over a return series.
//!
//! Both are reported as positive loss fractions: VaR 0.032 means "3.2%
//! loss at the confidence level". VaR is monotone in confidence:
//! VaR_99 ≥ VaR_95 for the same distribution.

/// c-confidence historical VaR.
///
/// Sort returns ascending; `VaR_c = −returns[floor((1−c)·n)]`.
/// Returns `None` for an empty series or a confidence outside (0, 1).
pub fn historical_var(returns: &[f64], confidence: f64) -> Option<f64> {
    let idx = tail_index(returns.len(), confidence)?;
    let mut sorted = returns.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    Some(-sorted[idx])
}

/// c-confidence CVaR (expected shortfall): mean of the tail through the VaR
/// index, sign-flipped. Always ≥ the matching VaR.
pub fn historical_cvar(returns: &[f64], confidence: f64) -> Option<f64> {
    let idx = tail_index(returns.len(), confidence)?;
    let mut sorted = returns.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let tail = &sorted[..=idx];
    Some(-(tail.iter().sum::<f64>() / tail.len() as f64))
}

fn tail_index(n: usize, confidence: f64) -> Option<usize> {
    if n == 0 || !(0.0 < confidence && confidence < 1.0) {
        return None;
    }
    // floor((1−c)·n), clamped into range for tiny samples.
    Some((((1.0 - confidence) * n as f64).floor() as usize).min(n - 1))
}
