// =============================================================================
// Order Executor (C9)
// =============================================================================
//
// Translates a validated `Decision` into calls against an `ExchangeAdapter`,
// producing one `ActionOutcome` per decision: a risk pre-check-then-submit
// pipeline that returns a structured result rather than propagating an error
// for an ordinary rejection — a failed leg becomes a `success=false` outcome,
// not a bailed cycle, so the walk continues regardless.
//
// spec §4.9 step 4 describes the entry as an IOC limit order bounded 1% away
// from `current_price` on the aggressive side. The `ExchangeAdapter` contract
// (§6.1) takes only `(symbol, base_qty, leverage)` for `open_long`/
// `open_short` — no price parameter — so that bound is the concrete adapter's
// responsibility to apply when it builds the venue order from the quantity
// this executor hands it, the same way quantity/price tick-size quantization
// is the adapter's job via `format_quantity`/`format_price`.
// =============================================================================

use tracing::{info, warn};

use crate::account::projector::{matches_close_side, AccountProjector};
use crate::exchange::ExchangeAdapter;
use crate::types::{AccountInfo, ActionOutcome, Decision, DecisionAction, PositionInfo, PositionSide, PositionSizeBounds};

/// Execute `decision` against `adapter`, returning the outcome for each
/// action it implies. `hold`/`wait` are no-ops and yield no outcome.
pub async fn execute(
    decision: &Decision,
    adapter: &dyn ExchangeAdapter,
    projector: &AccountProjector,
    bounds: PositionSizeBounds,
) -> Option<ActionOutcome> {
    match decision.action {
        DecisionAction::Hold | DecisionAction::Wait => None,
        DecisionAction::OpenLong | DecisionAction::OpenShort => {
            Some(execute_open(decision, adapter, projector, bounds).await)
        }
        DecisionAction::CloseLong | DecisionAction::CloseShort => {
            Some(execute_close(decision, adapter, projector).await)
        }
    }
}

async fn execute_open(
    decision: &Decision,
    adapter: &dyn ExchangeAdapter,
    projector: &AccountProjector,
    bounds: PositionSizeBounds,
) -> ActionOutcome {
    let symbol = &decision.symbol;
    let fail = |detail: String| ActionOutcome {
        symbol: symbol.clone(),
        action: decision.action,
        success: false,
        detail,
    };

    let (Some(size_usd), Some(leverage)) = (decision.position_size_usd, decision.leverage) else {
        return fail("missing position_size_usd or leverage on a validated open decision".to_string());
    };

    if let Err(e) = adapter.cancel_all_orders(symbol).await {
        warn!(symbol, error = %e, "cancel_all_orders failed before open (best-effort)");
    }

    if let Err(e) = adapter.set_leverage(symbol, leverage).await {
        return fail(format!("set_leverage failed: {e}"));
    }

    let current_price = match adapter.get_market_price(symbol).await {
        Ok(p) if p > 0.0 => p,
        Ok(_) => return fail("market price is non-positive".to_string()),
        Err(e) => return fail(format!("get_market_price failed: {e}")),
    };

    let mut base_qty = size_usd / current_price;
    if bounds.safety_buffer_pct > 0.0 {
        base_qty *= 1.0 - bounds.safety_buffer_pct / 100.0;
    }

    if bounds.check_available_before_open {
        let expected_margin = base_qty * current_price / leverage.max(1) as f64;
        match projector.get().await {
            Ok((account, _)) if expected_margin > account.available_balance => {
                return fail(format!(
                    "expected margin {expected_margin:.2} exceeds available balance {:.2}",
                    account.available_balance
                ));
            }
            Err(e) => return fail(format!("balance check failed: {e}")),
            Ok(_) => {}
        }
    }

    let quantized = adapter.format_quantity(symbol, base_qty);
    let Ok(qty) = quantized.parse::<f64>() else {
        return fail(format!("adapter returned unparseable quantity: {quantized}"));
    };

    let entry_result = match decision.action {
        DecisionAction::OpenLong => adapter.open_long(symbol, qty, leverage).await,
        DecisionAction::OpenShort => adapter.open_short(symbol, qty, leverage).await,
        _ => unreachable!("execute_open only called for opening actions"),
    };

    let receipt = match entry_result {
        Ok(r) => r,
        Err(e) => return fail(format!("entry order failed: {e}")),
    };
    projector.invalidate();
    info!(symbol, qty, leverage, order_id = %receipt.order_id, "entry order submitted");

    let mut detail = receipt.detail;
    if let (Some(sl), Some(tp)) = (decision.stop_loss, decision.take_profit) {
        let side = if decision.action == DecisionAction::OpenLong {
            PositionSide::Long
        } else {
            PositionSide::Short
        };
        match adapter.set_stop_loss(symbol, side, qty, sl).await {
            Ok(_) => {}
            Err(e) => {
                warn!(symbol, error = %e, "stop-loss bracket failed, entry stands");
                detail.push_str(&format!(" [stop_loss bracket failed: {e}]"));
            }
        }
        match adapter.set_take_profit(symbol, side, qty, tp).await {
            Ok(_) => {}
            Err(e) => {
                warn!(symbol, error = %e, "take-profit bracket failed, entry stands");
                detail.push_str(&format!(" [take_profit bracket failed: {e}]"));
            }
        }
    }

    ActionOutcome {
        symbol: symbol.clone(),
        action: decision.action,
        success: true,
        detail,
    }
}

async fn execute_close(decision: &Decision, adapter: &dyn ExchangeAdapter, projector: &AccountProjector) -> ActionOutcome {
    let symbol = &decision.symbol;
    let fail = |detail: String| ActionOutcome {
        symbol: symbol.clone(),
        action: decision.action,
        success: false,
        detail,
    };

    let (account, positions) = match projector.get().await {
        Ok(v) => v,
        Err(e) => return fail(format!("failed to read positions before close: {e}")),
    };
    let _ = account;

    let Some(position) = positions.iter().find(|p: &&PositionInfo| &p.symbol == symbol) else {
        // Close on a symbol with no matching position is a soft error, not
        // a cycle failure.
        return fail(format!("no open position for {symbol}"));
    };
    if !matches_close_side(position.side, decision.action) {
        return fail(format!(
            "{:?} does not close a {} position",
            decision.action, position.side
        ));
    }

    let result = match decision.action {
        DecisionAction::CloseLong => adapter.close_long(symbol, None).await,
        DecisionAction::CloseShort => adapter.close_short(symbol, None).await,
        _ => unreachable!("execute_close only called for closing actions"),
    };

    match result {
        Ok(receipt) => {
            projector.invalidate();
            let realized_pnl = position.unrealized_pnl;
            info!(symbol, order_id = %receipt.order_id, realized_pnl, "position closed");
            ActionOutcome {
                symbol: symbol.clone(),
                action: decision.action,
                success: true,
                detail: format!("{} realized_pnl={realized_pnl}", receipt.detail),
            }
        }
        Err(e) => fail(format!("close order failed: {e}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::mock::MockExchangeAdapter;
    use crate::exchange::RawPosition;
    use std::sync::Arc;

    fn bounds() -> PositionSizeBounds {
        PositionSizeBounds {
            min_usd: 10.0,
            max_usd: 1000.0,
            max_margin_usage_pct: 90.0,
            max_position_size_mult: 1.5,
            safety_buffer_pct: 0.0,
            check_available_before_open: false,
        }
    }

    fn open_long_decision(symbol: &str) -> Decision {
        Decision {
            symbol: symbol.to_string(),
            action: DecisionAction::OpenLong,
            leverage: Some(5),
            position_size_usd: Some(500.0),
            stop_loss: Some(90.0),
            take_profit: Some(130.0),
            confidence: Some(80.0),
            risk_usd: None,
            reasoning: String::new(),
        }
    }

    #[tokio::test]
    async fn open_long_submits_entry_and_brackets() {
        let adapter = MockExchangeAdapter::new("mock", 10_000.0);
        adapter.set_price("SOLUSDT", 100.0);
        let adapter = Arc::new(adapter);
        let projector = AccountProjector::new(adapter.clone(), 10_000.0);

        let decision = open_long_decision("SOLUSDT");
        let outcome = execute(&decision, adapter.as_ref(), &projector, bounds()).await.unwrap();
        assert!(outcome.success);
        assert_eq!(adapter.get_positions().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn open_fails_when_market_price_call_fails() {
        let adapter = MockExchangeAdapter::new("mock", 10_000.0);
        adapter.inject_failure("get_market_price");
        let adapter = Arc::new(adapter);
        let projector = AccountProjector::new(adapter.clone(), 10_000.0);

        let decision = open_long_decision("SOLUSDT");
        let outcome = execute(&decision, adapter.as_ref(), &projector, bounds()).await.unwrap();
        assert!(!outcome.success);
    }

    #[tokio::test]
    async fn close_without_position_is_soft_error() {
        let adapter = Arc::new(MockExchangeAdapter::new("mock", 10_000.0));
        let projector = AccountProjector::new(adapter.clone(), 10_000.0);

        let decision = Decision {
            symbol: "SOLUSDT".to_string(),
            action: DecisionAction::CloseLong,
            leverage: None,
            position_size_usd: None,
            stop_loss: None,
            take_profit: None,
            confidence: None,
            risk_usd: None,
            reasoning: String::new(),
        };
        let outcome = execute(&decision, adapter.as_ref(), &projector, bounds()).await.unwrap();
        assert!(!outcome.success);
        assert!(outcome.detail.contains("no open position"));
    }

    #[tokio::test]
    async fn close_encodes_realized_pnl_in_detail() {
        let adapter = MockExchangeAdapter::new("mock", 10_000.0);
        adapter.set_price("SOLUSDT", 120.0);
        adapter.seed_position(RawPosition {
            symbol: "SOLUSDT".to_string(),
            side: PositionSide::Long,
            entry_price: 100.0,
            mark_price: 120.0,
            quantity: 1.0,
            leverage: 5,
            unrealized_pnl: 20.0,
            liquidation_price: 50.0,
            margin_used: 20.0,
            update_time_ms: 0,
        });
        let adapter = Arc::new(adapter);
        let projector = AccountProjector::new(adapter.clone(), 10_000.0);

        let decision = Decision {
            symbol: "SOLUSDT".to_string(),
            action: DecisionAction::CloseLong,
            leverage: None,
            position_size_usd: None,
            stop_loss: None,
            take_profit: None,
            confidence: None,
            risk_usd: None,
            reasoning: String::new(),
        };
        let outcome = execute(&decision, adapter.as_ref(), &projector, bounds()).await.unwrap();
        assert!(outcome.success);
        assert!(outcome.detail.contains("realized_pnl=20"));
    }

    #[tokio::test]
    async fn hold_and_wait_are_no_ops() {
        let adapter = Arc::new(MockExchangeAdapter::new("mock", 10_000.0));
        let projector = AccountProjector::new(adapter.clone(), 10_000.0);
        let decision = Decision::wait("SOLUSDT", "nothing to do");
        assert!(execute(&decision, adapter.as_ref(), &projector, bounds()).await.is_none());
    }
}
