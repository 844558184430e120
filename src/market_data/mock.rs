// =============================================================================
// Mock Market Data Provider — deterministic test double
// =============================================================================

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

use crate::market_data::provider::{MarketDataProvider, ProviderOpenInterest};
use crate::types::Kline;

pub struct MockMarketDataProvider {
    name: String,
    base_price: f64,
    drift_pct_per_bar: f64,
    open_interest: Option<f64>,
    funding_rate: Option<f64>,
    overrides: RwLock<HashMap<String, Vec<Kline>>>,
}

impl MockMarketDataProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_price: 100.0,
            drift_pct_per_bar: 0.0,
            open_interest: None,
            funding_rate: None,
            overrides: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_trending_data(name: impl Into<String>, base_price: f64, drift_pct_per_bar: f64) -> Self {
        Self {
            name: name.into(),
            base_price,
            drift_pct_per_bar,
            open_interest: None,
            funding_rate: None,
            overrides: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_open_interest(mut self, latest: f64) -> Self {
        self.open_interest = Some(latest);
        self
    }

    pub fn with_funding_rate(mut self, rate: f64) -> Self {
        self.funding_rate = Some(rate);
        self
    }

    /// Inject a fixed kline series for a symbol, bypassing the generator.
    pub fn set_klines(&self, symbol: &str, klines: Vec<Kline>) {
        self.overrides.write().insert(symbol.to_string(), klines);
    }

    fn generate(&self, limit: usize) -> Vec<Kline> {
        let mut klines = Vec::with_capacity(limit);
        let mut price = self.base_price;
        let bar_ms: i64 = 60_000;
        for i in 0..limit {
            let open = price;
            let drift = price * (self.drift_pct_per_bar / 100.0);
            let close = (open + drift).max(0.01);
            let wobble = open * 0.002;
            let high = open.max(close) + wobble;
            let low = (open.min(close) - wobble).max(0.01);
            klines.push(Kline {
                open_time_ms: i as i64 * bar_ms,
                open,
                high,
                low,
                close,
                volume: 1_000.0,
                close_time_ms: i as i64 * bar_ms + bar_ms - 1,
            });
            price = close;
        }
        klines
    }
}

#[async_trait]
impl MarketDataProvider for MockMarketDataProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_klines(
        &self,
        symbol: &str,
        _interval: &str,
        limit: usize,
    ) -> anyhow::Result<Vec<Kline>> {
        if let Some(fixed) = self.overrides.read().get(symbol) {
            return Ok(fixed.clone());
        }
        Ok(self.generate(limit))
    }

    async fn get_open_interest(
        &self,
        _symbol: &str,
    ) -> anyhow::Result<Option<ProviderOpenInterest>> {
        Ok(self.open_interest.map(|latest| ProviderOpenInterest { latest }))
    }

    async fn get_funding_rate(&self, _symbol: &str) -> anyhow::Result<Option<f64>> {
        Ok(self.funding_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn generates_requested_length() {
        let provider = MockMarketDataProvider::new("m");
        let klines = provider.get_klines("BTCUSDT", "3m", 40).await.unwrap();
        assert_eq!(klines.len(), 40);
    }

    #[tokio::test]
    async fn overrides_take_precedence() {
        let provider = MockMarketDataProvider::new("m");
        let fixed = vec![Kline {
            open_time_ms: 0,
            open: 1.0,
            high: 2.0,
            low: 0.5,
            close: 1.5,
            volume: 1.0,
            close_time_ms: 1,
        }];
        provider.set_klines("BTCUSDT", fixed.clone());
        let got = provider.get_klines("BTCUSDT", "3m", 40).await.unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].close, 1.5);
    }

    #[tokio::test]
    async fn default_has_no_oi_or_funding() {
        let provider = MockMarketDataProvider::new("m");
        assert!(provider.get_open_interest("BTCUSDT").await.unwrap().is_none());
        assert!(provider.get_funding_rate("BTCUSDT").await.unwrap().is_none());
    }
}
