// =============================================================================
// Position/Account Projector (C6)
// =============================================================================
//
// Pulls raw balance and positions from the exchange adapter and maps them
// onto the canonical `AccountInfo`/`PositionInfo` shape. The adapter is the
// source of truth; this projector caches the derived view for a short
// window (<=15s) to damp bursty reads within one cycle, and invalidates
// eagerly after any mutating call so the next read always reflects reality.
// =============================================================================

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use crate::exchange::ExchangeAdapter;
use crate::types::{AccountInfo, PositionInfo, PositionSide};

const CACHE_TTL: Duration = Duration::from_secs(15);

struct Cached {
    account: AccountInfo,
    positions: Vec<PositionInfo>,
    fetched_at: Instant,
}

/// Derives the canonical account + positions view from an `ExchangeAdapter`.
pub struct AccountProjector {
    adapter: Arc<dyn ExchangeAdapter>,
    initial_balance: f64,
    cache: RwLock<Option<Cached>>,
}

impl AccountProjector {
    pub fn new(adapter: Arc<dyn ExchangeAdapter>, initial_balance: f64) -> Self {
        Self {
            adapter,
            initial_balance,
            cache: RwLock::new(None),
        }
    }

    /// Explicitly evict the cache. Must be called by executor code after any
    /// mutating exchange call.
    pub fn invalidate(&self) {
        *self.cache.write() = None;
        self.adapter.invalidate_cache();
    }

    /// Fetch (or reuse a fresh cached) account + position view.
    pub async fn get(&self) -> anyhow::Result<(AccountInfo, Vec<PositionInfo>)> {
        if let Some(cached) = self.cache.read().as_ref() {
            if cached.fetched_at.elapsed() < CACHE_TTL {
                return Ok((cached.account, cached.positions.clone()));
            }
        }

        let raw_balance = self.adapter.get_balance().await?;
        let raw_positions = self.adapter.get_positions().await?;

        let positions: Vec<PositionInfo> = raw_positions
            .into_iter()
            .filter(|p| p.quantity.abs() > 0.0)
            .map(|p| project_position(p))
            .collect();

        let total_pnl = raw_balance.total_equity - self.initial_balance;
        let total_pnl_pct = if self.initial_balance != 0.0 {
            total_pnl / self.initial_balance * 100.0
        } else {
            0.0
        };
        let margin_used_pct = if raw_balance.total_equity != 0.0 {
            raw_balance.margin_used / raw_balance.total_equity * 100.0
        } else {
            0.0
        };

        let account = AccountInfo {
            total_equity: raw_balance.total_equity,
            available_balance: raw_balance.available_balance,
            total_pnl,
            total_pnl_pct,
            margin_used: raw_balance.margin_used,
            margin_used_pct,
            position_count: positions.len(),
        };

        *self.cache.write() = Some(Cached {
            account,
            positions: positions.clone(),
            fetched_at: Instant::now(),
        });

        Ok((account, positions))
    }
}

fn project_position(raw: crate::exchange::RawPosition) -> PositionInfo {
    let unrealized_pnl_pct = if raw.margin_used != 0.0 {
        raw.unrealized_pnl / raw.margin_used * 100.0
    } else {
        0.0
    };
    PositionInfo {
        symbol: raw.symbol,
        side: raw.side,
        entry_price: raw.entry_price,
        mark_price: raw.mark_price,
        quantity: raw.quantity,
        leverage: raw.leverage,
        unrealized_pnl: raw.unrealized_pnl,
        unrealized_pnl_pct,
        liquidation_price: raw.liquidation_price,
        margin_used: raw.margin_used,
        update_time_ms: raw.update_time_ms,
    }
}

/// Leverage cap applicable to a symbol given the configured caps.
pub fn leverage_cap(symbol: &str, caps: crate::types::LeverageCaps) -> u32 {
    if crate::types::is_major_symbol(symbol) {
        caps.btc_eth
    } else {
        caps.altcoin
    }
}

/// Whether `side` would be reversed by `action`, used by the executor to
/// decide if a close is directionally sound. Exposed here since both the
/// projector and executor need the same position-vs-action cross-check.
pub fn matches_close_side(side: PositionSide, action: crate::types::DecisionAction) -> bool {
    use crate::types::DecisionAction::*;
    matches!(
        (side, action),
        (PositionSide::Long, CloseLong) | (PositionSide::Short, CloseShort)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::mock::MockExchangeAdapter;

    #[tokio::test]
    async fn derives_pnl_and_margin_pct() {
        let adapter = Arc::new(MockExchangeAdapter::new("mock", 10_000.0));
        adapter.set_price("BTCUSDT", 50_000.0);
        adapter.set_equity(11_000.0, 9_000.0);
        let projector = AccountProjector::new(adapter, 10_000.0);
        let (account, _) = projector.get().await.unwrap();
        assert!((account.total_pnl - 1_000.0).abs() < 1e-9);
        assert!((account.total_pnl_pct - 10.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn zero_size_positions_filtered() {
        let adapter = Arc::new(MockExchangeAdapter::new("mock", 10_000.0));
        adapter.seed_position(crate::exchange::RawPosition {
            symbol: "BTCUSDT".into(),
            side: PositionSide::Long,
            entry_price: 100.0,
            mark_price: 100.0,
            quantity: 0.0,
            leverage: 1,
            unrealized_pnl: 0.0,
            liquidation_price: 0.0,
            margin_used: 0.0,
            update_time_ms: 0,
        });
        let projector = AccountProjector::new(adapter, 10_000.0);
        let (account, positions) = projector.get().await.unwrap();
        assert_eq!(positions.len(), 0);
        assert_eq!(account.position_count, 0);
    }

    #[tokio::test]
    async fn invalidate_forces_refetch() {
        let adapter = Arc::new(MockExchangeAdapter::new("mock", 10_000.0));
        let projector = AccountProjector::new(adapter.clone(), 10_000.0);
        projector.get().await.unwrap();
        adapter.set_equity(20_000.0, 20_000.0);
        // Cache still warm -> stale value.
        let (stale, _) = projector.get().await.unwrap();
        assert!((stale.total_equity - 10_000.0).abs() < 1e-9);
        projector.invalidate();
        let (fresh, _) = projector.get().await.unwrap();
        assert!((fresh.total_equity - 20_000.0).abs() < 1e-9);
    }

    #[test]
    fn leverage_cap_picks_major_vs_altcoin() {
        let caps = crate::types::LeverageCaps { btc_eth: 10, altcoin: 5 };
        assert_eq!(leverage_cap("BTCUSDT", caps), 10);
        assert_eq!(leverage_cap("SOLUSDT", caps), 5);
    }
}
