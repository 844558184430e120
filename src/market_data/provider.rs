// =============================================================================
// Market Data Provider contract
// =============================================================================
//
// Concrete HTTP dialects (Binance, etc.) are external collaborators; this
// trait is the only thing the rest of the engine depends on. Implementors
// are pull-based — no streaming, no persistent connections.
// =============================================================================

use async_trait::async_trait;

use crate::types::Kline;

/// Open interest as reported by a provider, or `None` when the venue doesn't
/// support it (e.g. spot-only markets) — the assembler treats that as
/// "omit, don't fail", never as an error.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProviderOpenInterest {
    pub latest: f64,
}

/// Abstract market-data source. A process registers one or more providers by
/// name in a [`super::registry::ProviderRegistry`]; the snapshot assembler
/// consults the registered default unless a caller overrides it.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Human-readable provider name, used for registry bookkeeping and logs.
    fn name(&self) -> &str;

    /// Fetch `limit` most-recent klines at `interval` for `symbol`,
    /// oldest-first.
    async fn get_klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: usize,
    ) -> anyhow::Result<Vec<Kline>>;

    /// Current open interest, or `Ok(None)` if unsupported by this venue.
    async fn get_open_interest(&self, symbol: &str) -> anyhow::Result<Option<ProviderOpenInterest>>;

    /// Current funding rate (decimal, e.g. 0.0001 = 0.01%), or `Ok(None)` if
    /// unsupported.
    async fn get_funding_rate(&self, symbol: &str) -> anyhow::Result<Option<f64>>;

    /// Normalize a symbol into this provider's canonical form (e.g. adding a
    /// quote-asset suffix). Default: identity.
    fn normalize_symbol(&self, symbol: &str) -> String {
        symbol.to_string()
    }
}
