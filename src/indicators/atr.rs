// =============================================================================
// Average True Range (ATR) — Wilder's Smoothing Method
// =============================================================================
//
// ATR measures market volatility by decomposing the entire range of a bar.
//
// True Range (TR) for each bar:
//   TR = max(H - L, |H - prevClose|, |L - prevClose|)
//
// ATR is then the smoothed average of TR using Wilder's method:
//   ATR_0   = SMA of first `period` TR values
//   ATR_t   = (ATR_{t-1} * (period - 1) + TR_t) / period
//
// Default period: 14
// =============================================================================

use crate::types::Kline;

/// Compute the full ATR series for `klines` using Wilder's smoothing.
///
/// The returned vector has one value per kline starting at index `period`
/// (the first `period` true-range values seed the average). Empty when
/// `period == 0` or there is insufficient data.
pub fn calculate_atr_series(klines: &[Kline], period: usize) -> Vec<f64> {
    if period == 0 || klines.len() < period + 1 {
        return Vec::new();
    }

    let tr_values: Vec<f64> = (1..klines.len())
        .map(|i| {
            let high = klines[i].high;
            let low = klines[i].low;
            let prev_close = klines[i - 1].close;
            let hl = high - low;
            let hc = (high - prev_close).abs();
            let lc = (low - prev_close).abs();
            hl.max(hc).max(lc)
        })
        .collect();

    if tr_values.len() < period {
        return Vec::new();
    }

    let period_f = period as f64;
    let seed: f64 = tr_values[..period].iter().sum::<f64>() / period_f;
    if !seed.is_finite() {
        return Vec::new();
    }

    let mut result = Vec::with_capacity(tr_values.len() - period + 1);
    result.push(seed);

    let mut atr = seed;
    for &tr in &tr_values[period..] {
        atr = (atr * (period_f - 1.0) + tr) / period_f;
        if !atr.is_finite() {
            break;
        }
        result.push(atr);
    }

    result
}

/// Compute the most recent ATR value from a kline slice.
pub fn calculate_atr(klines: &[Kline], period: usize) -> Option<f64> {
    calculate_atr_series(klines, period).last().copied()
}

/// ATR expressed as a percentage of the current (last) close.
pub fn calculate_atr_pct(klines: &[Kline], period: usize) -> Option<f64> {
    let atr = calculate_atr(klines, period)?;
    let last_close = klines.last()?.close;
    if last_close == 0.0 {
        return None;
    }
    Some((atr / last_close) * 100.0)
}

/// Convenience: ATR with the standard 14-period default.
pub fn calculate(klines: &[Kline]) -> Option<f64> {
    calculate_atr(klines, 14)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kline(open: f64, high: f64, low: f64, close: f64) -> Kline {
        Kline {
            open_time_ms: 0,
            close_time_ms: 1,
            open,
            high,
            low,
            close,
            volume: 100.0,
        }
    }

    #[test]
    fn atr_period_zero() {
        let klines = vec![kline(100.0, 105.0, 95.0, 102.0); 20];
        assert!(calculate_atr(&klines, 0).is_none());
    }

    #[test]
    fn atr_insufficient_data() {
        let klines = vec![kline(100.0, 105.0, 95.0, 102.0); 10];
        assert!(calculate_atr(&klines, 14).is_none());
    }

    #[test]
    fn atr_exact_minimum_data() {
        let klines = vec![
            kline(100.0, 102.0, 98.0, 101.0),
            kline(101.0, 104.0, 99.0, 103.0),
            kline(103.0, 106.0, 100.0, 105.0),
            kline(105.0, 108.0, 102.0, 107.0),
        ];
        let atr = calculate_atr(&klines, 3);
        assert!(atr.is_some());
        let val = atr.unwrap();
        assert!(val > 0.0 && val.is_finite());
    }

    #[test]
    fn atr_constant_range() {
        let mut klines = Vec::new();
        for i in 0..30 {
            let base = 100.0 + i as f64 * 0.1;
            klines.push(kline(base, base + 5.0, base - 5.0, base));
        }
        let atr = calculate_atr(&klines, 14).unwrap();
        assert!((atr - 10.0).abs() < 1.0, "expected ATR near 10.0, got {atr}");
    }

    #[test]
    fn atr_true_range_uses_prev_close() {
        let klines = vec![
            kline(100.0, 105.0, 95.0, 95.0),
            kline(110.0, 115.0, 108.0, 112.0),
            kline(112.0, 118.0, 110.0, 115.0),
            kline(115.0, 120.0, 113.0, 118.0),
        ];
        let atr = calculate_atr(&klines, 3).unwrap();
        assert!(atr > 7.0, "ATR should reflect the gap, got {atr}");
    }

    #[test]
    fn atr_pct_positive() {
        let klines: Vec<Kline> = (0..30)
            .map(|i| {
                let base = 100.0 + i as f64;
                kline(base, base + 3.0, base - 3.0, base + 1.0)
            })
            .collect();
        let atr_pct = calculate_atr_pct(&klines, 14);
        assert!(atr_pct.is_some());
        assert!(atr_pct.unwrap() > 0.0);
    }

    #[test]
    fn atr_series_length() {
        let klines: Vec<Kline> = (0..30)
            .map(|i| {
                let base = 100.0 + i as f64;
                kline(base, base + 3.0, base - 3.0, base + 1.0)
            })
            .collect();
        let series = calculate_atr_series(&klines, 14);
        // 29 TR values, 14-period seed => 29 - 14 + 1 = 16
        assert_eq!(series.len(), 16);
    }

    #[test]
    fn atr_nan_returns_none() {
        let klines = vec![
            kline(100.0, 105.0, 95.0, 100.0),
            kline(100.0, f64::NAN, 95.0, 100.0),
            kline(100.0, 105.0, 95.0, 100.0),
            kline(100.0, 105.0, 95.0, 100.0),
        ];
        assert!(calculate_atr(&klines, 3).is_none());
    }
}
