// =============================================================================
// Arena Configuration — hot-loadable settings with atomic save
// =============================================================================
//
// Central configuration for the whole arena process: per-trader agent
// configs plus the shared defaults each one falls back to, candidate-pool
// wiring, decision-log retention, and the API bind address. Every field
// carries `#[serde(default)]` so an older config file on disk still loads
// after new fields are added, and persistence uses an atomic
// tmp-then-rename write.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::types::{AgentConfig, LeverageCaps, PositionSizeBounds, RiskStops};

fn default_market_data_provider() -> String {
    "binance".to_string()
}

fn default_decision_log_retention_days() -> i64 {
    30
}

fn default_decision_log_cleanup_interval_hours() -> i64 {
    6
}

fn default_api_server_port() -> u16 {
    8080
}

fn default_leverage_caps() -> LeverageCaps {
    LeverageCaps { btc_eth: 10, altcoin: 5 }
}

fn default_position_size_bounds() -> PositionSizeBounds {
    PositionSizeBounds {
        min_usd: 10.0,
        max_usd: 1_000.0,
        max_margin_usage_pct: 90.0,
        max_position_size_mult: 1.5,
        safety_buffer_pct: 0.5,
        check_available_before_open: true,
    }
}

fn default_risk_stops() -> RiskStops {
    RiskStops {
        max_daily_loss_pct: 5.0,
        max_drawdown_pct: 20.0,
        stop_trading_minutes: 60,
    }
}

fn default_candidate_coins() -> Vec<String> {
    vec![
        "BTCUSDT".to_string(),
        "ETHUSDT".to_string(),
        "BNBUSDT".to_string(),
        "SOLUSDT".to_string(),
        "XRPUSDT".to_string(),
    ]
}

fn default_scan_interval_secs() -> u64 {
    300
}

/// External wiring for candidate-pool assembly: which symbols feed the pool
/// and, if `use_default_coins` is false, where to fetch them from instead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidatePoolConfig {
    #[serde(default = "default_true")]
    pub use_default_coins: bool,
    #[serde(default = "default_candidate_coins")]
    pub default_coins: Vec<String>,
    #[serde(default)]
    pub coin_pool_api_url: Option<String>,
    #[serde(default)]
    pub oi_top_api_url: Option<String>,
}

fn default_true() -> bool {
    true
}

impl Default for CandidatePoolConfig {
    fn default() -> Self {
        Self {
            use_default_coins: true,
            default_coins: default_candidate_coins(),
            coin_pool_api_url: None,
            oi_top_api_url: None,
        }
    }
}

/// Top-level arena configuration: one entry per competing trader plus the
/// shared defaults new traders inherit when their own config is silent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArenaConfig {
    /// Per-trader agent configs. Each trader may override leverage/position
    /// size/risk stop defaults individually (see `AgentConfig`).
    #[serde(default)]
    pub traders: Vec<AgentConfig>,

    /// Shared defaults handed to a trader config that omits its own.
    #[serde(default = "default_leverage_caps")]
    pub default_leverage_caps: LeverageCaps,
    #[serde(default = "default_position_size_bounds")]
    pub default_position_size_bounds: PositionSizeBounds,
    #[serde(default = "default_risk_stops")]
    pub default_risk_stops: RiskStops,
    #[serde(default = "default_scan_interval_secs")]
    pub default_scan_interval_secs: u64,

    /// Name of the `MarketDataProvider` registered under `market_data::registry`
    /// to use when a trader doesn't name one of its own.
    #[serde(default = "default_market_data_provider")]
    pub market_data_provider: String,

    #[serde(default = "default_decision_log_retention_days")]
    pub decision_log_retention_days: i64,
    #[serde(default = "default_decision_log_cleanup_interval_hours")]
    pub decision_log_cleanup_interval_hours: i64,

    #[serde(default)]
    pub candidate_pool: CandidatePoolConfig,

    #[serde(default = "default_api_server_port")]
    pub api_server_port: u16,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            traders: Vec::new(),
            default_leverage_caps: default_leverage_caps(),
            default_position_size_bounds: default_position_size_bounds(),
            default_risk_stops: default_risk_stops(),
            default_scan_interval_secs: default_scan_interval_secs(),
            market_data_provider: default_market_data_provider(),
            decision_log_retention_days: default_decision_log_retention_days(),
            decision_log_cleanup_interval_hours: default_decision_log_cleanup_interval_hours(),
            candidate_pool: CandidatePoolConfig::default(),
            api_server_port: default_api_server_port(),
        }
    }
}

impl ArenaConfig {
    /// Load configuration from a JSON file at `path`. Callers should fall
    /// back to [`ArenaConfig::default`] with a warning if this errors.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read arena config from {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse arena config from {}", path.display()))?;
        info!(path = %path.display(), traders = config.traders.len(), "arena config loaded");
        Ok(config)
    }

    /// Load from `path`, falling back to defaults with a warning if the file
    /// is missing or unparsable.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "using default arena config");
                Self::default()
            }
        }
    }

    /// Persist via an atomic write (write to `.tmp`, then rename) so a crash
    /// mid-write never leaves a corrupt config on disk.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = serde_json::to_string_pretty(self).context("serializing arena config")?;

        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("writing tmp config to {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("renaming tmp config into place at {}", path.display()))?;

        info!(path = %path.display(), "arena config saved (atomic)");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = ArenaConfig::default();
        assert!(cfg.traders.is_empty());
        assert_eq!(cfg.default_leverage_caps.btc_eth, 10);
        assert_eq!(cfg.decision_log_retention_days, 30);
        assert_eq!(cfg.api_server_port, 8080);
        assert!(cfg.candidate_pool.use_default_coins);
    }

    #[test]
    fn load_missing_file_errors() {
        let result = ArenaConfig::load("/nonexistent/path/to/arena-config.json");
        assert!(result.is_err());
    }

    #[test]
    fn load_or_default_falls_back_on_missing_file() {
        let cfg = ArenaConfig::load_or_default("/nonexistent/path/to/arena-config.json");
        assert_eq!(cfg.api_server_port, default_api_server_port());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = std::env::temp_dir().join(format!("arena-config-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("arena.json");

        let mut cfg = ArenaConfig::default();
        cfg.api_server_port = 9090;
        cfg.save(&path).unwrap();

        let loaded = ArenaConfig::load(&path).unwrap();
        assert_eq!(loaded.api_server_port, 9090);
        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn missing_fields_in_json_fall_back_to_defaults() {
        let dir = std::env::temp_dir().join(format!("arena-config-partial-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("arena.json");
        std::fs::write(&path, r#"{"traders": []}"#).unwrap();

        let loaded = ArenaConfig::load(&path).unwrap();
        assert_eq!(loaded.decision_log_retention_days, 30);
        assert_eq!(loaded.market_data_provider, "binance");
        std::fs::remove_dir_all(dir).ok();
    }
}
