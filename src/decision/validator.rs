// =============================================================================
// Decision Validator (C5, validation half)
// =============================================================================
//
// Normalizes and validates one `Decision` against the agent's configured
// constraints. Any validation failure downgrades that single decision to a
// synthetic `wait` carrying a diagnostic — other decisions in the batch are
// unaffected (testable property: validator soundness).
//
// Entry-price approximation: RR and bracket-direction checks always use the
// committed formula — 20% into the stop_loss -> take_profit range, on the
// side closer to the stop-loss — never the symbol's live price. The system
// prompt commits the model to this exact formula (spec §3/§9), so the
// validator must not silently substitute a more "accurate" live price: doing
// so would accept or reject decisions the model was never told the rule for.
// =============================================================================

use crate::account::projector::leverage_cap;
use crate::types::{is_major_symbol, Decision, DecisionAction, LeverageCaps, PositionSizeBounds};

/// Minimum reward/risk ratio for an opening decision to survive validation.
pub const RR_MIN: f64 = 3.0;
/// Committed entry-price fraction into the SL->TP range, on the near-SL side.
pub const ENTRY_FRACTION: f64 = 0.2;
/// Tolerance applied to the fallback position-size cap to absorb float slack.
const SIZE_TOLERANCE: f64 = 0.01;
/// BTC/ETH fallback-cap multiplier is this many times the configured
/// altcoin multiplier (design ratio 10x : 1.5x).
const MAJOR_SIZE_MULT_RATIO: f64 = 10.0 / 1.5;

#[derive(Debug, Clone, Copy)]
pub struct ValidationContext {
    pub leverage_caps: LeverageCaps,
    pub position_size_bounds: PositionSizeBounds,
    pub account_equity: f64,
}

/// Validate (and normalize) one decision.
pub fn validate(decision: Decision, ctx: &ValidationContext) -> Decision {
    match decision.action {
        DecisionAction::Hold | DecisionAction::Wait => decision,
        // Soft errors (no matching position) are an execution-time concern,
        // not a validation-time one.
        DecisionAction::CloseLong | DecisionAction::CloseShort => decision,
        DecisionAction::OpenLong | DecisionAction::OpenShort => {
            let mut decision = decision;
            match validate_opening(&mut decision, ctx) {
                Ok(()) => decision,
                Err(reason) => Decision::wait(decision.symbol, reason),
            }
        }
    }
}

fn validate_opening(decision: &mut Decision, ctx: &ValidationContext) -> Result<(), String> {
    let leverage = decision.leverage.ok_or_else(|| "missing leverage".to_string())?;
    let cap = leverage_cap(&decision.symbol, ctx.leverage_caps);
    if leverage < 1 || leverage > cap {
        return Err(format!(
            "leverage {leverage} outside allowed [1, {cap}] for {}",
            decision.symbol
        ));
    }

    let mut size = decision
        .position_size_usd
        .ok_or_else(|| "missing position_size_usd".to_string())?;
    if size <= 0.0 {
        return Err("position_size_usd must be > 0".to_string());
    }

    let bounds = ctx.position_size_bounds;
    if bounds.min_usd > 0.0 || bounds.max_usd > 0.0 {
        if bounds.max_usd > 0.0 && size > bounds.max_usd {
            size = bounds.max_usd;
            decision.reasoning = format!(
                "{} [clamped position_size_usd to max_usd={}]",
                decision.reasoning, bounds.max_usd
            );
        }
        if bounds.min_usd > 0.0 && size < bounds.min_usd {
            return Err(format!(
                "position_size_usd {size} below configured min_usd {}",
                bounds.min_usd
            ));
        }
    } else {
        let mult = if is_major_symbol(&decision.symbol) {
            bounds.max_position_size_mult * MAJOR_SIZE_MULT_RATIO
        } else {
            bounds.max_position_size_mult
        };
        let fallback_cap = ctx.account_equity * mult;
        if size > fallback_cap * (1.0 + SIZE_TOLERANCE) {
            return Err(format!(
                "position_size_usd {size} exceeds fallback cap {fallback_cap:.2} ({mult}x equity)"
            ));
        }
    }
    decision.position_size_usd = Some(size);

    let sl = decision.stop_loss.ok_or_else(|| "missing stop_loss".to_string())?;
    let tp = decision.take_profit.ok_or_else(|| "missing take_profit".to_string())?;
    if sl <= 0.0 || tp <= 0.0 {
        return Err("stop_loss and take_profit must both be > 0".to_string());
    }

    let entry = entry_approx(decision.action, sl, tp);

    match decision.action {
        DecisionAction::OpenLong if !(sl < entry && entry < tp) => {
            return Err(format!(
                "open_long requires stop_loss < entry < take_profit (sl={sl}, entry~={entry:.4}, tp={tp})"
            ));
        }
        DecisionAction::OpenShort if !(tp < entry && entry < sl) => {
            return Err(format!(
                "open_short requires take_profit < entry < stop_loss (sl={sl}, entry~={entry:.4}, tp={tp})"
            ));
        }
        _ => {}
    }

    let (risk, reward) = match decision.action {
        DecisionAction::OpenLong => (entry - sl, tp - entry),
        DecisionAction::OpenShort => (sl - entry, entry - tp),
        _ => unreachable!("non-opening actions return earlier"),
    };
    if risk <= 0.0 {
        return Err("non-positive risk distance at the approximated entry".to_string());
    }

    let rr = reward / risk;
    if rr < RR_MIN {
        return Err(format!("reward/risk {rr:.2} below minimum {RR_MIN}"));
    }

    Ok(())
}

/// The committed entry-price approximation: `ENTRY_FRACTION` of the way from
/// `stop_loss` into `take_profit`, on the side closer to the stop-loss. Never
/// substitute the symbol's live price here — the system prompt commits the
/// model to this exact formula.
fn entry_approx(action: DecisionAction, stop_loss: f64, take_profit: f64) -> f64 {
    match action {
        DecisionAction::OpenLong => stop_loss + ENTRY_FRACTION * (take_profit - stop_loss),
        DecisionAction::OpenShort => stop_loss - ENTRY_FRACTION * (stop_loss - take_profit),
        _ => stop_loss,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DecisionAction;

    fn ctx() -> ValidationContext {
        ValidationContext {
            leverage_caps: LeverageCaps { btc_eth: 10, altcoin: 5 },
            position_size_bounds: PositionSizeBounds {
                min_usd: 10.0,
                max_usd: 1000.0,
                max_margin_usage_pct: 90.0,
                max_position_size_mult: 1.5,
                safety_buffer_pct: 0.0,
                check_available_before_open: false,
            },
            account_equity: 10_000.0,
        }
    }

    fn open_long(symbol: &str, sl: f64, tp: f64) -> Decision {
        Decision {
            symbol: symbol.to_string(),
            action: DecisionAction::OpenLong,
            leverage: Some(5),
            position_size_usd: Some(100.0),
            stop_loss: Some(sl),
            take_profit: Some(tp),
            confidence: Some(80.0),
            risk_usd: None,
            reasoning: String::new(),
        }
    }

    #[test]
    fn rr_boundary_accepts_at_4x_with_known_entry() {
        // Boundary scenario 1, first case: entry ~100180, RR = 4.0 -> accept.
        let d = open_long("BTCUSDT", 100_000.0, 100_900.0);
        let out = validate(d, &ctx());
        assert_eq!(out.action, DecisionAction::OpenLong);
    }

    #[test]
    fn rr_boundary_rejects_below_three_with_known_entry() {
        // Boundary scenario 1, second case: same entry, RR ~2.33 -> reject.
        let d = open_long("BTCUSDT", 100_000.0, 100_600.0);
        let out = validate(d, &ctx());
        assert_eq!(out.action, DecisionAction::Wait);
    }

    #[test]
    fn short_direction_accept_and_reject() {
        let good = Decision {
            symbol: "ETHUSDT".to_string(),
            action: DecisionAction::OpenShort,
            leverage: Some(5),
            position_size_usd: Some(100.0),
            stop_loss: Some(3928.18),
            take_profit: Some(3772.58),
            confidence: Some(70.0),
            risk_usd: None,
            reasoning: String::new(),
        };
        let out = validate(good, &ctx());
        assert_eq!(out.action, DecisionAction::OpenShort);

        let inverted = Decision {
            symbol: "ETHUSDT".to_string(),
            action: DecisionAction::OpenShort,
            leverage: Some(5),
            position_size_usd: Some(100.0),
            stop_loss: Some(3772.58),
            take_profit: Some(3928.18),
            confidence: Some(70.0),
            risk_usd: None,
            reasoning: String::new(),
        };
        let out = validate(inverted, &ctx());
        assert_eq!(out.action, DecisionAction::Wait);
    }

    #[test]
    fn leverage_cap_enforced_for_altcoins() {
        let mut d = open_long("SOLUSDT", 100.0, 130.0);
        d.leverage = Some(25);
        let out = validate(d.clone(), &ctx());
        assert_eq!(out.action, DecisionAction::Wait);

        let mut ok = d;
        ok.leverage = Some(5);
        let out = validate(ok, &ctx());
        assert_eq!(out.action, DecisionAction::OpenLong);
    }

    #[test]
    fn position_size_clamped_to_max_usd() {
        let mut cx = ctx();
        cx.position_size_bounds.max_usd = 150.0;
        let mut d = open_long("BTCUSDT", 100_000.0, 100_900.0);
        d.position_size_usd = Some(500.0);
        let out = validate(d, &cx);
        assert_eq!(out.position_size_usd, Some(150.0));
        assert!(out.reasoning.contains("clamped"));
    }

    #[test]
    fn fallback_cap_uses_major_multiplier_ratio() {
        let mut cx = ctx();
        cx.position_size_bounds.min_usd = 0.0;
        cx.position_size_bounds.max_usd = 0.0;
        // equity 10_000 * (1.5 * 10/1.5) = 100_000 cap for BTC/ETH.
        let mut d = open_long("BTCUSDT", 100_000.0, 100_900.0);
        d.position_size_usd = Some(99_000.0);
        let out = validate(d, &cx);
        assert_eq!(out.action, DecisionAction::OpenLong);
    }

    #[test]
    fn closing_decisions_pass_through_untouched() {
        let d = Decision {
            symbol: "BTCUSDT".to_string(),
            action: DecisionAction::CloseLong,
            leverage: None,
            position_size_usd: None,
            stop_loss: None,
            take_profit: None,
            confidence: None,
            risk_usd: None,
            reasoning: "take profit".to_string(),
        };
        let out = validate(d, &ctx());
        assert_eq!(out.action, DecisionAction::CloseLong);
    }
}
