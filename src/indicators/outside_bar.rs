// =============================================================================
// Outside Bar Detector — contrarian reversal signal
// =============================================================================
//
// An outside bar's range fully engulfs the preceding bar's range (higher high
// AND lower low). The body-ratio gate (body / prior body >= 2.0) filters out
// weak, indecisive engulfments. Direction is contrarian: a close below the
// prior low signals long, a close above the prior high signals short.
// =============================================================================

use crate::types::Kline;

const BODY_RATIO_GATE: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum OutsideBarDirection {
    Long,
    Short,
    Wait,
}

#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct OutsideBarSignal {
    pub direction: OutsideBarDirection,
    pub body_ratio: f64,
    pub confidence: f64,
    pub strength: f64,
}

/// Detect an outside bar over the last two klines.
///
/// Returns `None` when fewer than 2 klines are available or the current bar
/// does not engulf the previous bar's range.
pub fn detect_outside_bar(klines: &[Kline]) -> Option<OutsideBarSignal> {
    if klines.len() < 2 {
        return None;
    }
    let n = klines.len();
    let prev = &klines[n - 2];
    let cur = &klines[n - 1];

    if !(cur.high > prev.high && cur.low < prev.low) {
        return None;
    }

    let prev_body = (prev.close - prev.open).abs().max(f64::EPSILON);
    let cur_body = (cur.close - cur.open).abs();
    let body_ratio = cur_body / prev_body;

    if body_ratio < BODY_RATIO_GATE {
        return None;
    }

    let direction = if cur.close < prev.low {
        OutsideBarDirection::Long
    } else if cur.close > prev.high {
        OutsideBarDirection::Short
    } else {
        OutsideBarDirection::Wait
    };

    let range = (cur.high - cur.low).max(f64::EPSILON);
    let strength = (cur.high - prev.high).max(prev.low - cur.low) / range;
    let confidence = (body_ratio / (body_ratio + BODY_RATIO_GATE)).min(0.95);

    Some(OutsideBarSignal {
        direction,
        body_ratio,
        confidence,
        strength,
    })
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
    fn too_short_returns_none() {
        let klines = vec![k(1.0, 2.0, 0.5, 1.5)];
        assert!(detect_outside_bar(&klines).is_none());
    }

    #[test]
    fn non_engulfing_returns_none() {
        let klines = vec![k(100.0, 105.0, 95.0, 102.0), k(101.0, 104.0, 98.0, 100.0)];
        assert!(detect_outside_bar(&klines).is_none());
    }

    #[test]
    fn engulfing_but_small_body_fails_gate() {
        let klines = vec![
            k(100.0, 105.0, 95.0, 104.0), // prev body = 4
            k(100.0, 110.0, 90.0, 100.5), // cur body = 0.5 -> ratio < 2
        ];
        assert!(detect_outside_bar(&klines).is_none());
    }

    #[test]
    fn contrarian_long_on_close_below_prior_low() {
        let klines = vec![
            k(100.0, 103.0, 98.0, 101.0),  // prev body = 1
            k(102.0, 110.0, 90.0, 91.0),   // cur body = 11, closes below prev low
        ];
        let sig = detect_outside_bar(&klines).unwrap();
        assert_eq!(sig.direction, OutsideBarDirection::Long);
        assert!(sig.body_ratio >= BODY_RATIO_GATE);
    }

    #[test]
    fn contrarian_short_on_close_above_prior_high() {
        let klines = vec![
            k(100.0, 103.0, 98.0, 99.0),   // prev body = 1
            k(98.0, 112.0, 90.0, 111.0),   // cur body = 13, closes above prev high
        ];
        let sig = detect_outside_bar(&klines).unwrap();
        assert_eq!(sig.direction, OutsideBarDirection::Short);
    }
}
