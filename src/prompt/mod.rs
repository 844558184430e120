// =============================================================================
// Prompt Builder (C3)
// =============================================================================
//
// Turns a cycle's context into a deterministic `(system, user)` message
// pair. User-prompt ordering (fixed, per spec): header, BTC summary (if
// present), account summary, each open position with its full snapshot and
// indicator analysis, each remaining candidate, the Sharpe-ratio line, the
// format reminder.
// =============================================================================

pub mod templates;

use std::collections::HashMap;

use crate::account::performance::PerformanceStats;
use crate::indicators::{outside_bar, patterns};
use crate::types::{AccountInfo, CandidateCoin, LeverageCaps, MarketSnapshot, PositionInfo, PositionSizeBounds};

pub use templates::{BuiltinTemplate, PromptTemplateRegistry, SystemPromptTemplate};

/// Everything the builder needs to assemble one cycle's prompt pair.
pub struct PromptContext {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub cycle_number: u64,
    pub runtime_minutes: i64,
    pub account: AccountInfo,
    pub positions: Vec<PositionInfo>,
    pub candidates: Vec<CandidateCoin>,
    pub snapshots: HashMap<String, MarketSnapshot>,
    pub performance: Option<PerformanceStats>,
    pub leverage_caps: LeverageCaps,
    pub position_size_bounds: PositionSizeBounds,
}

/// Build the `(system, user)` pair. `template_name` overrides the built-in
/// system prompt via `registry`; a lookup miss falls back to the built-in.
pub fn build(
    ctx: &PromptContext,
    registry: &PromptTemplateRegistry,
    template_name: Option<&str>,
) -> (String, String) {
    let system = registry.resolve(template_name).render(ctx);
    let user = build_user_prompt(ctx);
    (system, user)
}

fn build_user_prompt(ctx: &PromptContext) -> String {
    let mut out = String::new();

    out.push_str(&format!(
        "=== Cycle {} | {} | runtime {}m ===\n\n",
        ctx.cycle_number,
        ctx.timestamp.to_rfc3339(),
        ctx.runtime_minutes
    ));

    if let Some(btc) = ctx.snapshots.get("BTCUSDT") {
        out.push_str("-- BTC summary --\n");
        out.push_str(&format_snapshot_summary(btc));
        out.push('\n');
    }

    out.push_str("-- Account --\n");
    out.push_str(&format!(
        "equity={:.2} available={:.2} pnl={:.2} ({:.2}%) margin_used_pct={:.2}% positions={}\n\n",
        ctx.account.total_equity,
        ctx.account.available_balance,
        ctx.account.total_pnl,
        ctx.account.total_pnl_pct,
        ctx.account.margin_used_pct,
        ctx.account.position_count,
    ));

    let position_symbols: std::collections::HashSet<&str> =
        ctx.positions.iter().map(|p| p.symbol.as_str()).collect();

    if !ctx.positions.is_empty() {
        out.push_str("-- Open positions --\n");
        for pos in &ctx.positions {
            out.push_str(&format!(
                "{} side={} entry={:.4} mark={:.4} qty={:.6} leverage={}x pnl={:.2} ({:.2}%) liq={:.4}\n",
                pos.symbol,
                pos.side,
                pos.entry_price,
                pos.mark_price,
                pos.quantity,
                pos.leverage,
                pos.unrealized_pnl,
                pos.unrealized_pnl_pct,
                pos.liquidation_price,
            ));
            if let Some(snapshot) = ctx.snapshots.get(&pos.symbol) {
                out.push_str(&format_snapshot_full(snapshot));
            }
            out.push('\n');
        }
    }

    let remaining: Vec<&CandidateCoin> = ctx
        .candidates
        .iter()
        .filter(|c| !position_symbols.contains(c.symbol.as_str()))
        .collect();

    if !remaining.is_empty() {
        out.push_str("-- Candidates --\n");
        for candidate in remaining {
            let sources: Vec<String> = candidate.sources.iter().map(|s| format!("{s:?}")).collect();
            out.push_str(&format!("{} sources={}\n", candidate.symbol, sources.join(",")));
            if let Some(snapshot) = ctx.snapshots.get(&candidate.symbol) {
                out.push_str(&format_snapshot_full(snapshot));
            }
            out.push('\n');
        }
    }

    if let Some(perf) = ctx.performance {
        out.push_str(&format!("-- Performance --\nsharpe_ratio={:.3}\n\n", perf.sharpe_ratio));
    }

    out.push_str(
        "Respond with your reasoning, then a trailing JSON array of decision \
         objects (symbol, action, leverage, position_size_usd, stop_loss, \
         take_profit, confidence, risk_usd, reasoning). Use `hold` or `wait` \
         when no trade clears the hard constraints.",
    );

    out
}

fn format_snapshot_summary(snapshot: &MarketSnapshot) -> String {
    format!(
        "price={:.4} ema20={} rsi14={} change_1h={}% change_4h={}%\n",
        snapshot.current_price,
        fmt_opt(snapshot.scalars.ema20),
        fmt_opt(snapshot.scalars.rsi14),
        fmt_opt(snapshot.scalars.price_change_1h),
        fmt_opt(snapshot.scalars.price_change_4h),
    )
}

fn format_snapshot_full(snapshot: &MarketSnapshot) -> String {
    let mut s = format_snapshot_summary(snapshot);
    s.push_str(&format!(
        "  macd={} signal={} hist={} atr14={} rsi7={}\n",
        fmt_opt(snapshot.scalars.macd),
        fmt_opt(snapshot.scalars.macd_signal),
        fmt_opt(snapshot.scalars.macd_histogram),
        fmt_opt(snapshot.scalars.atr14),
        fmt_opt(snapshot.scalars.rsi7),
    ));
    if let Some(oi) = snapshot.open_interest {
        s.push_str(&format!("  oi_latest={:.0} oi_avg={:.0}\n", oi.latest, oi.average));
    }
    if let Some(funding) = snapshot.funding_rate {
        s.push_str(&format!("  funding_rate={funding:.6}\n"));
    }

    let patterns = patterns::detect_candlestick_patterns(&snapshot.intraday_series);
    if !patterns.is_empty() {
        let names: Vec<String> = patterns
            .iter()
            .map(|p| format!("{}({:.2})", p.pattern_name, p.confidence))
            .collect();
        s.push_str(&format!("  patterns: {}\n", names.join(", ")));
    }
    if let Some(outside) = outside_bar::detect_outside_bar(&snapshot.intraday_series) {
        s.push_str(&format!(
            "  outside_bar: direction={:?} body_ratio={:.2} confidence={:.2}\n",
            outside.direction, outside.body_ratio, outside.confidence
        ));
    }

    s
}

fn fmt_opt(v: Option<f64>) -> String {
    v.map(|x| format!("{x:.4}")).unwrap_or_else(|| "n/a".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{CandidateSource, DerivedScalars};

    fn ctx_with(positions: Vec<PositionInfo>, candidates: Vec<CandidateCoin>) -> PromptContext {
        PromptContext {
            timestamp: chrono::Utc::now(),
            cycle_number: 7,
            runtime_minutes: 42,
            account: AccountInfo {
                total_equity: 10_000.0,
                available_balance: 8_000.0,
                total_pnl: 500.0,
                total_pnl_pct: 5.0,
                margin_used: 2_000.0,
                margin_used_pct: 20.0,
                position_count: positions.len(),
            },
            positions,
            candidates,
            snapshots: HashMap::new(),
            performance: None,
            leverage_caps: LeverageCaps { btc_eth: 10, altcoin: 5 },
            position_size_bounds: PositionSizeBounds {
                min_usd: 10.0,
                max_usd: 1000.0,
                max_margin_usage_pct: 90.0,
                max_position_size_mult: 1.5,
                safety_buffer_pct: 0.0,
                check_available_before_open: false,
            },
        }
    }

    #[test]
    fn deterministic_ordering_header_account_positions_candidates() {
        let ctx = ctx_with(vec![], vec![CandidateCoin::new("SOLUSDT", CandidateSource::Ai500)]);
        let registry = PromptTemplateRegistry::new();
        let (_, user) = build(&ctx, &registry, None);
        let account_idx = user.find("-- Account --").unwrap();
        let candidates_idx = user.find("-- Candidates --").unwrap();
        assert!(account_idx < candidates_idx);
        assert!(user.starts_with("=== Cycle 7"));
    }

    #[test]
    fn candidate_already_a_position_is_not_duplicated() {
        let pos = PositionInfo {
            symbol: "SOLUSDT".to_string(),
            side: crate::types::PositionSide::Long,
            entry_price: 100.0,
            mark_price: 101.0,
            quantity: 1.0,
            leverage: 3,
            unrealized_pnl: 1.0,
            unrealized_pnl_pct: 1.0,
            liquidation_price: 50.0,
            margin_used: 33.0,
            update_time_ms: 0,
        };
        let ctx = ctx_with(vec![pos], vec![CandidateCoin::new("SOLUSDT", CandidateSource::Ai500)]);
        let registry = PromptTemplateRegistry::new();
        let (_, user) = build(&ctx, &registry, None);
        assert!(!user.contains("-- Candidates --"));
    }

    #[test]
    fn missing_template_name_falls_back_without_panicking() {
        let ctx = ctx_with(vec![], vec![]);
        let registry = PromptTemplateRegistry::new();
        let (system, _) = build(&ctx, &registry, Some("does-not-exist"));
        assert!(system.contains("10000.00"));
    }

    #[test]
    fn snapshot_scalars_render_as_na_when_absent() {
        let mut ctx = ctx_with(vec![], vec![]);
        ctx.snapshots.insert(
            "BTCUSDT".to_string(),
            MarketSnapshot {
                symbol: "BTCUSDT".to_string(),
                current_price: 50_000.0,
                intraday_series: vec![],
                long_term_series: vec![],
                scalars: DerivedScalars::default(),
                open_interest: None,
                funding_rate: None,
            },
        );
        let registry = PromptTemplateRegistry::new();
        let (_, user) = build(&ctx, &registry, None);
        assert!(user.contains("n/a"));
    }
}
