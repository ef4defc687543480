//! Shared indicator math over daily bars.
//!
//! All functions take slices ordered ascending by date and return `None`
//! when the window is insufficient. No allocation beyond what the math
//! needs; callers own windowing.

use kite_domain::PriceBar;

/// Simple moving average of closes over the trailing `window` bars.
pub fn sma(bars: &[PriceBar], window: usize) -> Option<f64> {
    if window == 0 || bars.len() < window {
        return None;
    }
    let tail = &bars[bars.len() - window..];
    Some(tail.iter().map(|b| b.close as f64).sum::<f64>() / window as f64)
}

/// Sample standard deviation of close-to-close returns over the trailing
/// `window` returns (needs `window + 1` bars).
pub fn stdev(bars: &[PriceBar], window: usize) -> Option<f64> {
    if window < 2 || bars.len() < window + 1 {
        return None;
    }
    let tail = &bars[bars.len() - (window + 1)..];
    let mut rets = Vec::with_capacity(window);
    for pair in tail.windows(2) {
        rets.push(pair[1].return_from(&pair[0])?);
    }
    let mean = rets.iter().sum::<f64>() / rets.len() as f64;
    let var = rets.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (rets.len() - 1) as f64;
    Some(var.sqrt())
}

/// Wilder RSI over the trailing `window` deltas (needs `window + 1` bars).
pub fn rsi(bars: &[PriceBar], window: usize) -> Option<f64> {
    if window == 0 || bars.len() < window + 1 {
        return None;
    }
    let tail = &bars[bars.len() - (window + 1)..];
    let mut gain = 0.0;
    let mut loss = 0.0;
    for pair in tail.windows(2) {
        let delta = (pair[1].close - pair[0].close) as f64;
        if delta >= 0.0 {
            gain += delta;
        } else {
            loss -= delta;
        }
    }
    if gain + loss == 0.0 {
        // Flat window: neither side dominates.
        return Some(50.0);
    }
    Some(100.0 * gain / (gain + loss))
}

/// Average true range over the trailing `window` bars, as a fraction of the
/// last close (needs `window + 1` bars for the first previous-close).
pub fn atr_percent(bars: &[PriceBar], window: usize) -> Option<f64> {
    if window == 0 || bars.len() < window + 1 {
        return None;
    }
    let tail = &bars[bars.len() - (window + 1)..];
    let mut tr_sum = 0.0;
    for pair in tail.windows(2) {
        let prev_close = pair[0].close as f64;
        let high = pair[1].high as f64;
        let low = pair[1].low as f64;
        let tr = (high - low)
            .max((high - prev_close).abs())
            .max((low - prev_close).abs());
        tr_sum += tr;
    }
    let last_close = tail.last().map(|b| b.close as f64)?;
    if last_close <= 0.0 {
        return None;
    }
    Some(tr_sum / window as f64 / last_close)
}

/// Fraction of `universe` values strictly below `value` — the
/// cross-sectional percentile rank in [0, 1]. None for an empty universe.
pub fn percentile_rank(value: f64, universe: &[f64]) -> Option<f64> {
    if universe.is_empty() {
        return None;
    }
    let below = universe.iter().filter(|v| **v < value).count();
    Some(below as f64 / universe.len() as f64)
}
