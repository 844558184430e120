// =============================================================================
// Performance Analyzer (C7)
// =============================================================================
//
// Rolling stats over closed trades recovered from the decision log: win
// rate, profit factor, and a rolling Sharpe ratio. Only the Sharpe ratio is
// surfaced at prompt-build time; the rest are exposed for API consumers.
// =============================================================================

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::types::{CycleRecord, DecisionAction};

/// Default rolling window (in closed trades) for the Sharpe computation.
pub const SHARPE_WINDOW: usize = 20;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PerformanceStats {
    pub total_trades: usize,
    pub win_rate: f64,
    pub avg_win: f64,
    pub avg_loss: f64,
    pub profit_factor: f64,
    pub sharpe_ratio: f64,
}

/// One matched open/close pair, FIFO by symbol.
struct ClosedTrade {
    pnl: f64,
}

/// Compute [`PerformanceStats`] from the full history of cycle records for
/// one trader, newest-last. Matches `open_*`/`close_*` action outcomes by
/// symbol on a FIFO basis; unmatched closes or opens (e.g. history truncated
/// mid-position) are simply not counted.
pub fn analyze(records: &[CycleRecord]) -> PerformanceStats {
    let closed = match_closed_trades(records);
    if closed.is_empty() {
        return PerformanceStats::default();
    }

    let wins: Vec<f64> = closed.iter().filter(|t| t.pnl > 0.0).map(|t| t.pnl).collect();
    let losses: Vec<f64> = closed.iter().filter(|t| t.pnl < 0.0).map(|t| t.pnl.abs()).collect();

    let total_trades = closed.len();
    let win_rate = wins.len() as f64 / total_trades as f64;
    let avg_win = if wins.is_empty() { 0.0 } else { wins.iter().sum::<f64>() / wins.len() as f64 };
    let avg_loss = if losses.is_empty() { 0.0 } else { losses.iter().sum::<f64>() / losses.len() as f64 };

    let gross_profit: f64 = wins.iter().sum();
    let gross_loss: f64 = losses.iter().sum();
    let profit_factor = if gross_loss > 0.0 {
        gross_profit / gross_loss
    } else if gross_profit > 0.0 {
        f64::INFINITY
    } else {
        0.0
    };

    let window_start = closed.len().saturating_sub(SHARPE_WINDOW);
    let sharpe_ratio = sharpe(&closed[window_start..]);

    PerformanceStats {
        total_trades,
        win_rate,
        avg_win,
        avg_loss,
        profit_factor,
        sharpe_ratio,
    }
}

fn sharpe(window: &[ClosedTrade]) -> f64 {
    if window.len() < 2 {
        return 0.0;
    }
    let returns: Vec<f64> = window.iter().map(|t| t.pnl).collect();
    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / returns.len() as f64;
    let stddev = variance.sqrt();
    if stddev == 0.0 {
        return 0.0;
    }
    mean / stddev
}

/// Pair each `close_long`/`close_short` outcome with the most recent
/// still-open `open_long`/`open_short` for the same symbol (FIFO). PnL for
/// a closed trade is approximated from the post-cycle account snapshot
/// delta is not available per-trade, so realized PnL is read from the
/// `detail` field the executor records for successful closes (see
/// `executor::record_close_pnl`); outcomes without a parsable PnL are
/// skipped rather than guessed at.
fn match_closed_trades(records: &[CycleRecord]) -> Vec<ClosedTrade> {
    let mut open_count: HashMap<String, u32> = HashMap::new();
    let mut closed = Vec::new();

    for record in records {
        for outcome in &record.per_action_outcomes {
            if !outcome.success {
                continue;
            }
            match outcome.action {
                DecisionAction::OpenLong | DecisionAction::OpenShort => {
                    *open_count.entry(outcome.symbol.clone()).or_insert(0) += 1;
                }
                DecisionAction::CloseLong | DecisionAction::CloseShort => {
                    let count = open_count.entry(outcome.symbol.clone()).or_insert(0);
                    if *count > 0 {
                        *count -= 1;
                        if let Some(pnl) = parse_realized_pnl(&outcome.detail) {
                            closed.push(ClosedTrade { pnl });
                        }
                    }
                }
                _ => {}
            }
        }
    }

    closed
}

/// The executor encodes realized PnL in a close outcome's detail string as
/// `realized_pnl=<f64>`. Absence (e.g. a soft-error close) yields `None`.
fn parse_realized_pnl(detail: &str) -> Option<f64> {
    detail
        .split_whitespace()
        .find_map(|tok| tok.strip_prefix("realized_pnl="))
        .and_then(|s| s.parse::<f64>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AccountInfo, ActionOutcome};

    fn record_with_outcomes(outcomes: Vec<ActionOutcome>) -> CycleRecord {
        CycleRecord {
            cycle_number: 0,
            trader_id: "t1".into(),
            timestamp: chrono::Utc::now(),
            success: true,
            input_prompt: String::new(),
            cot_trace: String::new(),
            decisions_json: String::new(),
            per_action_outcomes: outcomes,
            account_state_snapshot: None::<AccountInfo>,
            error_message: None,
        }
    }

    #[test]
    fn empty_history_yields_default_stats() {
        let stats = analyze(&[]);
        assert_eq!(stats.total_trades, 0);
        assert_eq!(stats.sharpe_ratio, 0.0);
    }

    #[test]
    fn matches_open_close_pair_and_computes_profit_factor() {
        let records = vec![
            record_with_outcomes(vec![ActionOutcome {
                symbol: "BTCUSDT".into(),
                action: DecisionAction::OpenLong,
                success: true,
                detail: "opened".into(),
            }]),
            record_with_outcomes(vec![ActionOutcome {
                symbol: "BTCUSDT".into(),
                action: DecisionAction::CloseLong,
                success: true,
                detail: "realized_pnl=150.0".into(),
            }]),
        ];
        let stats = analyze(&records);
        assert_eq!(stats.total_trades, 1);
        assert_eq!(stats.win_rate, 1.0);
        assert!(stats.profit_factor.is_infinite());
    }

    #[test]
    fn unmatched_close_is_not_counted() {
        let records = vec![record_with_outcomes(vec![ActionOutcome {
            symbol: "BTCUSDT".into(),
            action: DecisionAction::CloseLong,
            success: true,
            detail: "realized_pnl=50.0".into(),
        }])];
        let stats = analyze(&records);
        assert_eq!(stats.total_trades, 0);
    }

    #[test]
    fn sharpe_zero_when_no_variance() {
        let window = vec![ClosedTrade { pnl: 10.0 }, ClosedTrade { pnl: 10.0 }];
        assert_eq!(sharpe(&window), 0.0);
    }
}
