// =============================================================================
// Candlestick Pattern Detection
// =============================================================================
//
// Recognizes classic single/two/three-bar reversal and continuation patterns
// over the tail of a kline series. Each detected pattern carries a bullish
// bias (`Some(true)` bullish, `Some(false)` bearish, `None` neutral/context-
// dependent) and a confidence in [0, 1].
//
// Thresholds (design constants, kept explicit so tests can target them):
//   DOJI_BODY_PCT          = 0.05   body <= 5% of the bar's range => doji
//   HAMMER_SHADOW_RATIO     = 2.0   lower shadow > 2x body => hammer family
//   MARUBOZU_SHADOW_PCT     = 0.05  shadows <= 5% of range => marubozu
//   ENGULF_MIN_BODY_RATIO   = 1.0   engulfing body must fully contain prior
// =============================================================================

use crate::types::Kline;

const DOJI_BODY_PCT: f64 = 0.05;
const HAMMER_SHADOW_RATIO: f64 = 2.0;
const MARUBOZU_SHADOW_PCT: f64 = 0.05;
const SPINNING_TOP_BODY_PCT: f64 = 0.30;

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PatternMatch {
    pub pattern_name: String,
    pub bullish: Option<bool>,
    pub confidence: f64,
}

struct Bar {
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    body: f64,
    range: f64,
    upper_shadow: f64,
    lower_shadow: f64,
    is_bullish: bool,
}

impl Bar {
    fn from(k: &Kline) -> Self {
        let body = (k.close - k.open).abs();
        let range = (k.high - k.low).max(f64::EPSILON);
        let upper_shadow = k.high - k.open.max(k.close);
        let lower_shadow = k.open.min(k.close) - k.low;
        Self {
            open: k.open,
            high: k.high,
            low: k.low,
            close: k.close,
            body,
            range,
            upper_shadow,
            lower_shadow,
            is_bullish: k.close >= k.open,
        }
    }

    fn body_pct(&self) -> f64 {
        self.body / self.range
    }
}

/// Detect candlestick patterns over the last three bars of `klines`.
///
/// Returns an empty vec when fewer than 3 klines are supplied. The
/// preceding-trend check for hammer/hanging-man and star patterns looks back
/// up to 5 bars before the pattern window.
pub fn detect_candlestick_patterns(klines: &[Kline]) -> Vec<PatternMatch> {
    if klines.len() < 3 {
        return Vec::new();
    }

    let n = klines.len();
    let cur = Bar::from(&klines[n - 1]);
    let prev = Bar::from(&klines[n - 2]);
    let prev2 = Bar::from(&klines[n - 3]);

    let lookback_start = n.saturating_sub(1 + 5);
    let preceding_trend = trend_direction(&klines[lookback_start..n - 1]);

    let mut out = Vec::new();

    detect_single_bar(&cur, preceding_trend, &mut out);
    detect_two_bar(&prev, &cur, &mut out);
    detect_three_bar(&prev2, &prev, &cur, preceding_trend, &mut out);

    out
}

/// `Some(true)` uptrend, `Some(false)` downtrend, `None` no clear trend —
/// simple sign of the net close-to-close move over the window.
fn trend_direction(klines: &[Kline]) -> Option<bool> {
    if klines.len() < 2 {
        return None;
    }
    let first = klines.first()?.close;
    let last = klines.last()?.close;
    if first == 0.0 {
        return None;
    }
    let change = (last - first) / first;
    if change > 0.01 {
        Some(true)
    } else if change < -0.01 {
        Some(false)
    } else {
        None
    }
}

fn detect_single_bar(cur: &Bar, preceding_trend: Option<bool>, out: &mut Vec<PatternMatch>) {
    let body_pct = cur.body_pct();

    // Doji family.
    if body_pct <= DOJI_BODY_PCT {
        let upper_pct = cur.upper_shadow / cur.range;
        let lower_pct = cur.lower_shadow / cur.range;
        if lower_pct > 0.6 && upper_pct < 0.15 {
            out.push(PatternMatch {
                pattern_name: "dragonfly_doji".into(),
                bullish: Some(true),
                confidence: 0.6,
            });
        } else if upper_pct > 0.6 && lower_pct < 0.15 {
            out.push(PatternMatch {
                pattern_name: "gravestone_doji".into(),
                bullish: Some(false),
                confidence: 0.6,
            });
        } else {
            out.push(PatternMatch {
                pattern_name: "doji".into(),
                bullish: None,
                confidence: 0.4,
            });
        }
        return;
    }

    // Marubozu: negligible shadows on both sides.
    if cur.upper_shadow / cur.range <= MARUBOZU_SHADOW_PCT
        && cur.lower_shadow / cur.range <= MARUBOZU_SHADOW_PCT
    {
        out.push(PatternMatch {
            pattern_name: "marubozu".into(),
            bullish: Some(cur.is_bullish),
            confidence: 0.7,
        });
        return;
    }

    // Hammer family: long lower shadow, small upper shadow.
    if cur.lower_shadow > HAMMER_SHADOW_RATIO * cur.body && cur.upper_shadow < cur.body {
        match preceding_trend {
            Some(false) => out.push(PatternMatch {
                pattern_name: "hammer".into(),
                bullish: Some(true),
                confidence: 0.65,
            }),
            Some(true) => out.push(PatternMatch {
                pattern_name: "hanging_man".into(),
                bullish: Some(false),
                confidence: 0.55,
            }),
            None => {}
        }
        return;
    }

    // Inverted hammer / shooting star: long upper shadow, small lower shadow.
    if cur.upper_shadow > HAMMER_SHADOW_RATIO * cur.body && cur.lower_shadow < cur.body {
        match preceding_trend {
            Some(false) => out.push(PatternMatch {
                pattern_name: "inverted_hammer".into(),
                bullish: Some(true),
                confidence: 0.55,
            }),
            Some(true) => out.push(PatternMatch {
                pattern_name: "shooting_star".into(),
                bullish: Some(false),
                confidence: 0.65,
            }),
            None => {}
        }
        return;
    }

    // Spinning top: small body, both shadows present and roughly balanced.
    if body_pct <= SPINNING_TOP_BODY_PCT
        && cur.upper_shadow > cur.body
        && cur.lower_shadow > cur.body
    {
        out.push(PatternMatch {
            pattern_name: "spinning_top".into(),
            bullish: None,
            confidence: 0.35,
        });
    }
}

fn detect_two_bar(prev: &Bar, cur: &Bar, out: &mut Vec<PatternMatch>) {
    // Bullish engulfing: prior bearish body fully engulfed by a bullish body.
    if !prev.is_bullish
        && cur.is_bullish
        && cur.open <= prev.close
        && cur.close >= prev.open
        && cur.body > prev.body
    {
        out.push(PatternMatch {
            pattern_name: "bullish_engulfing".into(),
            bullish: Some(true),
            confidence: 0.7,
        });
    }

    // Bearish engulfing.
    if prev.is_bullish
        && !cur.is_bullish
        && cur.open >= prev.close
        && cur.close <= prev.open
        && cur.body > prev.body
    {
        out.push(PatternMatch {
            pattern_name: "bearish_engulfing".into(),
            bullish: Some(false),
            confidence: 0.7,
        });
    }

    // Bullish harami: prior large bearish body, current small body inside it.
    if !prev.is_bullish
        && cur.body < prev.body
        && cur.open.max(cur.close) <= prev.open
        && cur.open.min(cur.close) >= prev.close
    {
        out.push(PatternMatch {
            pattern_name: "bullish_harami".into(),
            bullish: Some(true),
            confidence: 0.5,
        });
    }

    // Bearish harami: prior large bullish body, current small body inside it.
    if prev.is_bullish
        && cur.body < prev.body
        && cur.open.max(cur.close) <= prev.close
        && cur.open.min(cur.close) >= prev.open
    {
        out.push(PatternMatch {
            pattern_name: "bearish_harami".into(),
            bullish: Some(false),
            confidence: 0.5,
        });
    }

    // Tweezer bottom: matching lows, opposite bodies.
    if (prev.low - cur.low).abs() / prev.range.max(cur.range) < 0.02
        && !prev.is_bullish
        && cur.is_bullish
    {
        out.push(PatternMatch {
            pattern_name: "tweezer_bottom".into(),
            bullish: Some(true),
            confidence: 0.45,
        });
    }

    // Tweezer top: matching highs, opposite bodies.
    if (prev.high - cur.high).abs() / prev.range.max(cur.range) < 0.02
        && prev.is_bullish
        && !cur.is_bullish
    {
        out.push(PatternMatch {
            pattern_name: "tweezer_top".into(),
            bullish: Some(false),
            confidence: 0.45,
        });
    }
}

fn detect_three_bar(
    first: &Bar,
    mid: &Bar,
    last: &Bar,
    preceding_trend: Option<bool>,
    out: &mut Vec<PatternMatch>,
) {
    // Morning star: bearish, small-body gap down, bullish closing into first.
    if !first.is_bullish
        && mid.body_pct() < 0.3
        && last.is_bullish
        && last.close > (first.open + first.close) / 2.0
    {
        out.push(PatternMatch {
            pattern_name: "morning_star".into(),
            bullish: Some(true),
            confidence: 0.6,
        });
    }

    // Evening star: bullish, small-body gap up, bearish closing into first.
    if first.is_bullish
        && mid.body_pct() < 0.3
        && !last.is_bullish
        && last.close < (first.open + first.close) / 2.0
    {
        out.push(PatternMatch {
            pattern_name: "evening_star".into(),
            bullish: Some(false),
            confidence: 0.6,
        });
    }

    // Three white soldiers: three consecutive bullish bars, each closing higher.
    if first.is_bullish
        && mid.is_bullish
        && last.is_bullish
        && mid.close > first.close
        && last.close > mid.close
        && mid.body_pct() > 0.4
        && last.body_pct() > 0.4
    {
        out.push(PatternMatch {
            pattern_name: "three_white_soldiers".into(),
            bullish: Some(true),
            confidence: 0.65,
        });
    }

    // Three black crows: mirror of the above.
    if !first.is_bullish
        && !mid.is_bullish
        && !last.is_bullish
        && mid.close < first.close
        && last.close < mid.close
        && mid.body_pct() > 0.4
        && last.body_pct() > 0.4
    {
        out.push(PatternMatch {
            pattern_name: "three_black_crows".into(),
            bullish: Some(false),
            confidence: 0.65,
        });
    }

    // Abandoned baby bullish: downtrend, doji gapped below both neighbors,
    // bullish bar gaps back above the doji.
    if preceding_trend == Some(false)
        && mid.body_pct() <= DOJI_BODY_PCT
        && mid.high < first.low
        && last.is_bullish
        && last.low > mid.high
    {
        out.push(PatternMatch {
            pattern_name: "abandoned_baby_bullish".into(),
            bullish: Some(true),
            confidence: 0.55,
        });
    }

    // Abandoned baby bearish: mirror.
    if preceding_trend == Some(true)
        && mid.body_pct() <= DOJI_BODY_PCT
        && mid.low > first.high
        && !last.is_bullish
        && last.high < mid.low
    {
        out.push(PatternMatch {
            pattern_name: "abandoned_baby_bearish".into(),
            bullish: Some(false),
            confidence: 0.55,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn k(open: f64, high: f64, low: f64, close: f64) -> Kline {
        Kline {
            open_time_ms: 0,
            close_time_ms: 1,
            open,
            high,
            low,
            close,
            volume: 1.0,
        }
    }

    #[test]
    fn too_short_returns_empty() {
        let klines = vec![k(1.0, 2.0, 0.5, 1.5); 2];
        assert!(detect_candlestick_patterns(&klines).is_empty());
    }

    #[test]
    fn detects_doji() {
        let mut klines: Vec<Kline> = (0..5).map(|i| k(100.0 + i as f64, 101.0 + i as f64, 99.0 + i as f64, 100.2 + i as f64)).collect();
        // Last bar: open ~= close, wide range => doji.
        let last_idx = klines.len() - 1;
        klines[last_idx] = k(110.0, 112.0, 108.0, 110.05);
        let patterns = detect_candlestick_patterns(&klines);
        assert!(patterns.iter().any(|p| p.pattern_name.contains("doji")));
    }

    #[test]
    fn detects_bullish_engulfing() {
        let mut klines: Vec<Kline> = (0..5)
            .map(|i| k(110.0 - i as f64, 111.0 - i as f64, 104.0 - i as f64, 105.0 - i as f64))
            .collect();
        let n = klines.len();
        klines[n - 2] = k(100.0, 101.0, 95.0, 96.0); // bearish
        klines[n - 1] = k(95.5, 103.0, 95.0, 102.0); // bullish, engulfs
        let patterns = detect_candlestick_patterns(&klines);
        assert!(patterns.iter().any(|p| p.pattern_name == "bullish_engulfing"));
    }

    #[test]
    fn detects_marubozu() {
        let mut klines = vec![k(100.0, 101.0, 99.0, 100.5); 5];
        let n = klines.len();
        klines[n - 1] = k(100.0, 110.0, 100.0, 110.0);
        let patterns = detect_candlestick_patterns(&klines);
        assert!(patterns.iter().any(|p| p.pattern_name == "marubozu"));
    }

    #[test]
    fn detects_hammer_after_downtrend() {
        let mut klines: Vec<Kline> = (0..6)
            .map(|i| {
                let base = 120.0 - i as f64 * 3.0;
                k(base, base + 1.0, base - 1.0, base - 0.5)
            })
            .collect();
        let n = klines.len();
        // Hammer: small body near top, long lower shadow.
        klines[n - 1] = k(100.0, 101.0, 90.0, 100.5);
        let patterns = detect_candlestick_patterns(&klines);
        assert!(patterns.iter().any(|p| p.pattern_name == "hammer"));
    }
}
