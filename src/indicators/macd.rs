// =============================================================================
// MACD — Moving Average Convergence Divergence
// =============================================================================
//
// macd_line   = EMA(closes, fast) - EMA(closes, slow)
// signal_line = EMA(macd_line, signal_period)
// histogram   = macd_line - signal_line
//
// Default periods: fast=12, slow=26, signal=9.
// =============================================================================

use crate::indicators::ema::calculate_ema;

/// Compute `(macd_line, signal_line, histogram)` series using the classic
/// 12/26/9 periods. All three series are aligned to the same length and
/// indexed from the point the slowest input (the signal EMA) becomes
/// available; empty when there isn't enough data.
pub fn calculate_macd(closes: &[f64]) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
    calculate_macd_with_periods(closes, 12, 26, 9)
}

pub fn calculate_macd_with_periods(
    closes: &[f64],
    fast: usize,
    slow: usize,
    signal_period: usize,
) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
    if fast == 0 || slow == 0 || signal_period == 0 || fast >= slow {
        return (Vec::new(), Vec::new(), Vec::new());
    }

    let ema_fast = calculate_ema(closes, fast);
    let ema_slow = calculate_ema(closes, slow);
    if ema_fast.is_empty() || ema_slow.is_empty() {
        return (Vec::new(), Vec::new(), Vec::new());
    }

    // ema_fast starts at index fast-1, ema_slow starts at index slow-1 of the
    // original series. Align both to the slow series' start.
    let offset = slow - fast;
    if ema_fast.len() <= offset {
        return (Vec::new(), Vec::new(), Vec::new());
    }
    let aligned_fast = &ema_fast[offset..];
    let len = aligned_fast.len().min(ema_slow.len());

    let macd_line: Vec<f64> = (0..len)
        .map(|i| aligned_fast[i] - ema_slow[i])
        .collect();

    let signal_line = calculate_ema(&macd_line, signal_period);
    if signal_line.is_empty() {
        return (macd_line, Vec::new(), Vec::new());
    }

    let sig_offset = macd_line.len() - signal_line.len();
    let histogram: Vec<f64> = signal_line
        .iter()
        .enumerate()
        .map(|(i, s)| macd_line[i + sig_offset] - s)
        .collect();

    (macd_line, signal_line, histogram)
}

/// Latest `(macd, signal, histogram)` triple, if computable.
pub fn current_macd(closes: &[f64]) -> Option<(f64, f64, f64)> {
    let (macd, signal, hist) = calculate_macd(closes);
    Some((*macd.last()?, *signal.last()?, *hist.last()?))
}
