// =============================================================================
// Exchange Adapter contract (C12)
// =============================================================================
//
// Concrete venue dialects (Binance, Gate, ...) are external collaborators;
// this trait is the only thing the rest of the engine depends on. The
// guarantees below are required of every implementor, not just suggested:
//
//   - `format_quantity` / `format_price` round to the venue's lot/tick size.
//   - `open_long` / `open_short` / `close_long` / `close_short` are
//     effectively idempotent when preceded by `cancel_all_orders` on the
//     same symbol within the same cycle.
//   - reduce-only is honored on `close_*` and on stop-loss/take-profit
//     bracket orders.
//   - `get_balance` / `get_positions` may be cached for short intervals but
//     must expose `invalidate_cache`.
// =============================================================================

pub mod mock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::PositionSide;

/// Raw balance as reported by the venue, pre-projection.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RawBalance {
    pub total_equity: f64,
    pub available_balance: f64,
    pub margin_used: f64,
}

/// Raw position as reported by the venue, pre-projection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawPosition {
    pub symbol: String,
    pub side: PositionSide,
    pub entry_price: f64,
    pub mark_price: f64,
    pub quantity: f64,
    pub leverage: u32,
    pub unrealized_pnl: f64,
    pub liquidation_price: f64,
    pub margin_used: f64,
    pub update_time_ms: i64,
}

/// Result of a single order submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderReceipt {
    pub order_id: String,
    pub symbol: String,
    pub filled: bool,
    pub detail: String,
}

/// Abstract operations the agent depends on. Implementations are external
/// collaborators (one per venue); everything upstream of this trait is
/// venue-agnostic.
#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    fn name(&self) -> &str;

    async fn get_balance(&self) -> anyhow::Result<RawBalance>;
    async fn get_positions(&self) -> anyhow::Result<Vec<RawPosition>>;
    async fn get_market_price(&self, symbol: &str) -> anyhow::Result<f64>;

    /// Drop any short-lived cache of balance/positions. Must be called
    /// after every mutating call before the next read in the same cycle.
    fn invalidate_cache(&self);

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> anyhow::Result<()>;
    async fn cancel_all_orders(&self, symbol: &str) -> anyhow::Result<()>;

    async fn open_long(&self, symbol: &str, base_qty: f64, leverage: u32) -> anyhow::Result<OrderReceipt>;
    async fn open_short(&self, symbol: &str, base_qty: f64, leverage: u32) -> anyhow::Result<OrderReceipt>;
    async fn close_long(&self, symbol: &str, base_qty: Option<f64>) -> anyhow::Result<OrderReceipt>;
    async fn close_short(&self, symbol: &str, base_qty: Option<f64>) -> anyhow::Result<OrderReceipt>;

    async fn set_stop_loss(
        &self,
        symbol: &str,
        side: PositionSide,
        qty: f64,
        price: f64,
    ) -> anyhow::Result<OrderReceipt>;
    async fn set_take_profit(
        &self,
        symbol: &str,
        side: PositionSide,
        qty: f64,
        price: f64,
    ) -> anyhow::Result<OrderReceipt>;

    /// Round `qty` to the venue's lot size and render it in the format the
    /// venue's order endpoint expects.
    fn format_quantity(&self, symbol: &str, qty: f64) -> String;
    /// Round `price` to the venue's tick size and render it.
    fn format_price(&self, symbol: &str, price: f64) -> String;
}
