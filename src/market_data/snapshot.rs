// =============================================================================
// Market Snapshot Assembler (C1)
// =============================================================================
//
// Fetches OHLCV + OI/funding from the active provider and packages derived
// indicator scalars. Indicator math lives in `indicators::*`; this module
// only orchestrates fetch + compute + assemble.
// =============================================================================

use anyhow::{Context, Result};

use crate::indicators::{atr, ema, macd, rsi};
use crate::market_data::provider::MarketDataProvider;
use crate::types::{DerivedScalars, MarketSnapshot, OpenInterest};

const INTRADAY_INTERVAL: &str = "3m";
const INTRADAY_BARS: usize = 40;
const LONG_TERM_INTERVAL: &str = "4h";
const LONG_TERM_BARS: usize = 60;

/// Assemble a [`MarketSnapshot`] for `symbol` using `provider`.
///
/// Symbol-level failures bubble up as `Err` — the caller (the agent cycle)
/// treats them as non-fatal and simply omits the symbol.
pub async fn get_snapshot(
    provider: &dyn MarketDataProvider,
    symbol: &str,
) -> Result<MarketSnapshot> {
    let normalized = provider.normalize_symbol(symbol);

    let intraday = provider
        .get_klines(&normalized, INTRADAY_INTERVAL, INTRADAY_BARS)
        .await
        .with_context(|| format!("fetching intraday klines for {symbol}"))?;
    let long_term = provider
        .get_klines(&normalized, LONG_TERM_INTERVAL, LONG_TERM_BARS)
        .await
        .with_context(|| format!("fetching long-term klines for {symbol}"))?;

    let current_price = intraday
        .last()
        .map(|k| k.close)
        .context("no intraday klines returned")?;

    let closes: Vec<f64> = intraday.iter().map(|k| k.close).collect();
    let scalars = compute_scalars(&intraday, &closes);

    let open_interest = provider
        .get_open_interest(&normalized)
        .await
        .unwrap_or(None)
        .map(|oi| OpenInterest::from_latest(oi.latest));

    let funding_rate = provider.get_funding_rate(&normalized).await.unwrap_or(None);

    Ok(MarketSnapshot {
        symbol: symbol.to_string(),
        current_price,
        intraday_series: intraday,
        long_term_series: long_term,
        scalars,
        open_interest,
        funding_rate,
    })
}

fn compute_scalars(klines: &[crate::types::Kline], closes: &[f64]) -> DerivedScalars {
    let ema20 = ema::calculate_ema(closes, 20).last().copied();
    let (macd_line, macd_signal, macd_hist) = macd::calculate_macd(closes);
    let rsi7 = rsi::current_rsi(closes, 7).map(|(v, _)| v);
    let rsi14 = rsi::current_rsi(closes, 14).map(|(v, _)| v);
    let atr14 = atr::calculate_atr(klines, 14);

    let price_change_1h = price_change_over_bars(closes, 20); // 20 * 3m ~= 1h
    let price_change_4h = price_change_over_bars(closes, 40); // full intraday window

    DerivedScalars {
        ema20,
        macd: macd_line.last().copied(),
        macd_signal: macd_signal.last().copied(),
        macd_histogram: macd_hist.last().copied(),
        rsi7,
        rsi14,
        atr14,
        price_change_1h,
        price_change_4h,
    }
}

fn price_change_over_bars(closes: &[f64], bars: usize) -> Option<f64> {
    if closes.len() <= bars {
        return None;
    }
    let past = closes[closes.len() - 1 - bars];
    let current = *closes.last()?;
    if past == 0.0 {
        return None;
    }
    Some((current - past) / past * 100.0)
}
