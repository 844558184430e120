// =============================================================================
// Mock Exchange Adapter — deterministic test double
// =============================================================================
//
// In-memory positions/balance, configurable per-call failure injection, and
// round-to-cent quantization. Mirrors `MockMarketDataProvider`'s shape: a
// `RwLock`-guarded map plus builder-style overrides.
// =============================================================================

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::exchange::{ExchangeAdapter, OrderReceipt, RawBalance, RawPosition};
use crate::types::PositionSide;

struct Inner {
    total_equity: f64,
    available_balance: f64,
    positions: HashMap<String, RawPosition>,
    prices: HashMap<String, f64>,
    leverage: HashMap<String, u32>,
}

/// A venue-agnostic test double. Every call is infallible unless the symbol
/// has been added to `failing_calls`.
pub struct MockExchangeAdapter {
    name: String,
    inner: RwLock<Inner>,
    failing_calls: RwLock<HashSet<String>>,
}

impl MockExchangeAdapter {
    pub fn new(name: impl Into<String>, initial_equity: f64) -> Self {
        Self {
            name: name.into(),
            inner: RwLock::new(Inner {
                total_equity: initial_equity,
                available_balance: initial_equity,
                positions: HashMap::new(),
                prices: HashMap::new(),
                leverage: HashMap::new(),
            }),
            failing_calls: RwLock::new(HashSet::new()),
        }
    }

    pub fn set_price(&self, symbol: &str, price: f64) {
        self.inner.write().prices.insert(symbol.to_string(), price);
    }

    pub fn set_equity(&self, total_equity: f64, available_balance: f64) {
        let mut inner = self.inner.write();
        inner.total_equity = total_equity;
        inner.available_balance = available_balance;
    }

    pub fn seed_position(&self, pos: RawPosition) {
        self.inner.write().positions.insert(pos.symbol.clone(), pos);
    }

    /// Cause every future call named `call` (e.g. "open_long") to return an
    /// error, until cleared.
    pub fn inject_failure(&self, call: &str) {
        self.failing_calls.write().insert(call.to_string());
    }

    pub fn clear_failures(&self) {
        self.failing_calls.write().clear();
    }

    fn check_failure(&self, call: &str) -> anyhow::Result<()> {
        if self.failing_calls.read().contains(call) {
            anyhow::bail!("mock adapter: injected failure for {call}");
        }
        Ok(())
    }

    fn price_of(&self, symbol: &str) -> f64 {
        self.inner.read().prices.get(symbol).copied().unwrap_or(100.0)
    }
}

#[async_trait]
impl ExchangeAdapter for MockExchangeAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_balance(&self) -> anyhow::Result<RawBalance> {
        self.check_failure("get_balance")?;
        let inner = self.inner.read();
        let margin_used: f64 = inner.positions.values().map(|p| p.margin_used).sum();
        Ok(RawBalance {
            total_equity: inner.total_equity,
            available_balance: inner.available_balance,
            margin_used,
        })
    }

    async fn get_positions(&self) -> anyhow::Result<Vec<RawPosition>> {
        self.check_failure("get_positions")?;
        Ok(self.inner.read().positions.values().cloned().collect())
    }

    async fn get_market_price(&self, symbol: &str) -> anyhow::Result<f64> {
        self.check_failure("get_market_price")?;
        Ok(self.price_of(symbol))
    }

    fn invalidate_cache(&self) {
        // No cache in the mock — reads always reflect current state.
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> anyhow::Result<()> {
        self.check_failure("set_leverage")?;
        self.inner.write().leverage.insert(symbol.to_string(), leverage);
        Ok(())
    }

    async fn cancel_all_orders(&self, _symbol: &str) -> anyhow::Result<()> {
        self.check_failure("cancel_all_orders")?;
        Ok(())
    }

    async fn open_long(&self, symbol: &str, base_qty: f64, leverage: u32) -> anyhow::Result<OrderReceipt> {
        self.check_failure("open_long")?;
        let price = self.price_of(symbol);
        let margin_used = (base_qty * price) / leverage.max(1) as f64;
        self.inner.write().positions.insert(
            symbol.to_string(),
            RawPosition {
                symbol: symbol.to_string(),
                side: PositionSide::Long,
                entry_price: price,
                mark_price: price,
                quantity: base_qty,
                leverage,
                unrealized_pnl: 0.0,
                liquidation_price: price * 0.5,
                margin_used,
                update_time_ms: 0,
            },
        );
        Ok(OrderReceipt {
            order_id: Uuid::new_v4().to_string(),
            symbol: symbol.to_string(),
            filled: true,
            detail: "mock open_long filled".to_string(),
        })
    }

    async fn open_short(&self, symbol: &str, base_qty: f64, leverage: u32) -> anyhow::Result<OrderReceipt> {
        self.check_failure("open_short")?;
        let price = self.price_of(symbol);
        let margin_used = (base_qty * price) / leverage.max(1) as f64;
        self.inner.write().positions.insert(
            symbol.to_string(),
            RawPosition {
                symbol: symbol.to_string(),
                side: PositionSide::Short,
                entry_price: price,
                mark_price: price,
                quantity: base_qty,
                leverage,
                unrealized_pnl: 0.0,
                liquidation_price: price * 1.5,
                margin_used,
                update_time_ms: 0,
            },
        );
        Ok(OrderReceipt {
            order_id: Uuid::new_v4().to_string(),
            symbol: symbol.to_string(),
            filled: true,
            detail: "mock open_short filled".to_string(),
        })
    }

    async fn close_long(&self, symbol: &str, base_qty: Option<f64>) -> anyhow::Result<OrderReceipt> {
        self.check_failure("close_long")?;
        self.close_any(symbol, base_qty)
    }

    async fn close_short(&self, symbol: &str, base_qty: Option<f64>) -> anyhow::Result<OrderReceipt> {
        self.check_failure("close_short")?;
        self.close_any(symbol, base_qty)
    }

    async fn set_stop_loss(
        &self,
        symbol: &str,
        _side: PositionSide,
        _qty: f64,
        _price: f64,
    ) -> anyhow::Result<OrderReceipt> {
        self.check_failure("set_stop_loss")?;
        Ok(OrderReceipt {
            order_id: Uuid::new_v4().to_string(),
            symbol: symbol.to_string(),
            filled: false,
            detail: "mock stop-loss resting".to_string(),
        })
    }

    async fn set_take_profit(
        &self,
        symbol: &str,
        _side: PositionSide,
        _qty: f64,
        _price: f64,
    ) -> anyhow::Result<OrderReceipt> {
        self.check_failure("set_take_profit")?;
        Ok(OrderReceipt {
            order_id: Uuid::new_v4().to_string(),
            symbol: symbol.to_string(),
            filled: false,
            detail: "mock take-profit resting".to_string(),
        })
    }

    fn format_quantity(&self, _symbol: &str, qty: f64) -> String {
        format!("{:.3}", (qty * 1000.0).round() / 1000.0)
    }

    fn format_price(&self, _symbol: &str, price: f64) -> String {
        format!("{:.2}", (price * 100.0).round() / 100.0)
    }
}

impl MockExchangeAdapter {
    fn close_any(&self, symbol: &str, base_qty: Option<f64>) -> anyhow::Result<OrderReceipt> {
        let mut inner = self.inner.write();
        let Some(existing) = inner.positions.get(symbol).cloned() else {
            anyhow::bail!("no open position for {symbol}");
        };
        let close_qty = base_qty.unwrap_or(existing.quantity).min(existing.quantity);
        if close_qty >= existing.quantity {
            inner.positions.remove(symbol);
        } else if let Some(p) = inner.positions.get_mut(symbol) {
            p.quantity -= close_qty;
        }
        Ok(OrderReceipt {
            order_id: Uuid::new_v4().to_string(),
            symbol: symbol.to_string(),
            filled: true,
            detail: format!("mock close filled qty={close_qty}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_then_close_clears_position() {
        let adapter = MockExchangeAdapter::new("mock", 10_000.0);
        adapter.set_price("BTCUSDT", 50_000.0);
        adapter.open_long("BTCUSDT", 0.1, 5).await.unwrap();
        assert_eq!(adapter.get_positions().await.unwrap().len(), 1);
        adapter.close_long("BTCUSDT", None).await.unwrap();
        assert!(adapter.get_positions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn close_without_position_errors() {
        let adapter = MockExchangeAdapter::new("mock", 10_000.0);
        assert!(adapter.close_long("BTCUSDT", None).await.is_err());
    }

    #[tokio::test]
    async fn injected_failure_surfaces() {
        let adapter = MockExchangeAdapter::new("mock", 10_000.0);
        adapter.inject_failure("open_long");
        assert!(adapter.open_long("BTCUSDT", 0.1, 5).await.is_err());
        adapter.clear_failures();
        assert!(adapter.open_long("BTCUSDT", 0.1, 5).await.is_ok());
    }

    #[test]
    fn quantity_and_price_round() {
        let adapter = MockExchangeAdapter::new("mock", 10_000.0);
        assert_eq!(adapter.format_quantity("BTCUSDT", 0.123456), "0.123");
        assert_eq!(adapter.format_price("BTCUSDT", 100.005), "100.01");
    }
}
