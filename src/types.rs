// =============================================================================
// Shared data model for the trading competition engine
// =============================================================================
//
// These types are the vocabulary every component speaks: snapshots assembled
// by the market-data pipeline, account/position state projected from the
// exchange, and the decisions a cycle's LLM call produces. A `MarketSnapshot`
// and a `FullDecision` are built once per cycle and discarded — nothing holds
// a reference past the cycle that created it.
// =============================================================================

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A single OHLCV bar. Series are ordered by `open_time_ms` strictly ascending.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Kline {
    pub open_time_ms: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub close_time_ms: i64,
}

impl Kline {
    /// `low <= {open, close} <= high` and `close_time_ms > open_time_ms`.
    pub fn is_well_formed(&self) -> bool {
        self.low <= self.open
            && self.open <= self.high
            && self.low <= self.close
            && self.close <= self.high
            && self.close_time_ms > self.open_time_ms
    }
}

/// Open interest snapshot: the observed value plus a smoothed reference.
///
/// `average` is a known placeholder — `latest * 0.999`, not a computed
/// rolling average (see design notes). Providers that cannot supply OI
/// return `None` upstream, which the assembler treats as "omit, don't fail".
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OpenInterest {
    pub latest: f64,
    pub average: f64,
}

impl OpenInterest {
    pub fn from_latest(latest: f64) -> Self {
        Self {
            latest,
            average: latest * 0.999,
        }
    }
}

/// Derived scalar indicators packaged alongside a snapshot's raw series.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct DerivedScalars {
    pub ema20: Option<f64>,
    pub macd: Option<f64>,
    pub macd_signal: Option<f64>,
    pub macd_histogram: Option<f64>,
    pub rsi7: Option<f64>,
    pub rsi14: Option<f64>,
    pub atr14: Option<f64>,
    pub price_change_1h: Option<f64>,
    pub price_change_4h: Option<f64>,
}

/// Per-symbol market snapshot assembled fresh at the start of a cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub symbol: String,
    pub current_price: f64,
    /// Short-horizon series, e.g. ~3-minute bars, N≈40.
    pub intraday_series: Vec<Kline>,
    /// Long-horizon series, e.g. ~4-hour bars, N≈60.
    pub long_term_series: Vec<Kline>,
    pub scalars: DerivedScalars,
    pub open_interest: Option<OpenInterest>,
    pub funding_rate: Option<f64>,
}

/// Long or short.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionSide {
    Long,
    Short,
}

impl std::fmt::Display for PositionSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Long => write!(f, "long"),
            Self::Short => write!(f, "short"),
        }
    }
}

/// A currently-open position, derived fresh from the exchange each cycle.
/// Never owned locally beyond the projector's short-lived cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionInfo {
    pub symbol: String,
    pub side: PositionSide,
    pub entry_price: f64,
    pub mark_price: f64,
    pub quantity: f64,
    pub leverage: u32,
    pub unrealized_pnl: f64,
    pub unrealized_pnl_pct: f64,
    pub liquidation_price: f64,
    pub margin_used: f64,
    pub update_time_ms: i64,
}

/// Account-level rollup, derived from balance + positions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AccountInfo {
    pub total_equity: f64,
    pub available_balance: f64,
    pub total_pnl: f64,
    pub total_pnl_pct: f64,
    pub margin_used: f64,
    pub margin_used_pct: f64,
    pub position_count: usize,
}

/// Provenance tag for a candidate symbol — which external pool surfaced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateSource {
    Ai500,
    OiTop,
}

/// A symbol the agent may consider, tagged with the pool(s) that surfaced it.
/// Two pools naming the same symbol unify into one entry whose `sources` set
/// carries both tags — presentation of "double signal" is the prompt
/// builder's concern, not a data-model distinction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateCoin {
    pub symbol: String,
    pub sources: BTreeSet<CandidateSource>,
}

impl CandidateCoin {
    pub fn new(symbol: impl Into<String>, source: CandidateSource) -> Self {
        let mut sources = BTreeSet::new();
        sources.insert(source);
        Self {
            symbol: symbol.into(),
            sources,
        }
    }

    pub fn merge(&mut self, other: &CandidateCoin) {
        self.sources.extend(other.sources.iter().copied());
    }
}

/// Action an LLM decision can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionAction {
    OpenLong,
    OpenShort,
    CloseLong,
    CloseShort,
    Hold,
    Wait,
}

impl DecisionAction {
    pub fn is_opening(self) -> bool {
        matches!(self, Self::OpenLong | Self::OpenShort)
    }

    pub fn is_closing(self) -> bool {
        matches!(self, Self::CloseLong | Self::CloseShort)
    }

    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "open_long" => Some(Self::OpenLong),
            "open_short" => Some(Self::OpenShort),
            "close_long" => Some(Self::CloseLong),
            "close_short" => Some(Self::CloseShort),
            "hold" => Some(Self::Hold),
            "wait" => Some(Self::Wait),
            _ => None,
        }
    }
}

impl std::fmt::Display for DecisionAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::OpenLong => "open_long",
            Self::OpenShort => "open_short",
            Self::CloseLong => "close_long",
            Self::CloseShort => "close_short",
            Self::Hold => "hold",
            Self::Wait => "wait",
        };
        write!(f, "{s}")
    }
}

/// One trade decision surviving (or synthesized by) the parser/validator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub symbol: String,
    pub action: DecisionAction,
    #[serde(default)]
    pub leverage: Option<u32>,
    #[serde(default)]
    pub position_size_usd: Option<f64>,
    #[serde(default)]
    pub stop_loss: Option<f64>,
    #[serde(default)]
    pub take_profit: Option<f64>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub risk_usd: Option<f64>,
    #[serde(default)]
    pub reasoning: String,
}

impl Decision {
    /// The universal fallback: a synthetic `wait` carrying a diagnostic
    /// reason. Never an error — callers construct this instead of bailing.
    pub fn wait(symbol: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            action: DecisionAction::Wait,
            leverage: None,
            position_size_usd: None,
            stop_loss: None,
            take_profit: None,
            confidence: None,
            risk_usd: None,
            reasoning: reason.into(),
        }
    }
}

/// One full LLM response, immutable once constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FullDecision {
    pub user_prompt: String,
    pub cot_trace: String,
    pub decisions: Vec<Decision>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Outcome of executing a single decision against the exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub symbol: String,
    pub action: DecisionAction,
    pub success: bool,
    pub detail: String,
}

/// Persisted audit row for one completed (or halted) cycle. Append-only;
/// pruned by age, never edited.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleRecord {
    pub cycle_number: u64,
    pub trader_id: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub success: bool,
    pub input_prompt: String,
    pub cot_trace: String,
    pub decisions_json: String,
    pub per_action_outcomes: Vec<ActionOutcome>,
    pub account_state_snapshot: Option<AccountInfo>,
    pub error_message: Option<String>,
}

/// Leverage caps split by symbol class.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LeverageCaps {
    pub btc_eth: u32,
    pub altcoin: u32,
}

/// Position-size bounds enforced by the validator and executor.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PositionSizeBounds {
    pub min_usd: f64,
    pub max_usd: f64,
    pub max_margin_usage_pct: f64,
    pub max_position_size_mult: f64,
    pub safety_buffer_pct: f64,
    pub check_available_before_open: bool,
}

/// Risk-gate stops.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RiskStops {
    pub max_daily_loss_pct: f64,
    pub max_drawdown_pct: f64,
    pub stop_trading_minutes: i64,
}

/// Immutable per-agent identity and policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub id: String,
    pub display_name: String,
    pub model_provider: String,
    pub exchange_adapter: String,
    pub initial_balance: f64,
    pub scan_interval_secs: u64,
    pub leverage_caps: LeverageCaps,
    pub position_size_bounds: PositionSizeBounds,
    pub risk_stops: RiskStops,
    #[serde(default)]
    pub system_prompt_template: Option<String>,
}

/// Whether the BTC/ETH-vs-altcoin symbol class is used for a given symbol.
pub fn is_major_symbol(symbol: &str) -> bool {
    matches!(symbol, "BTCUSDT" | "ETHUSDT")
}

/// Per-agent lifecycle state, as observed from outside the cycle engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentLifecycle {
    Idle,
    Cycling,
    Stopping,
    Stopped,
}

/// Mutable per-agent runtime state, guarded by the agent's own lock.
/// Never constructed more than once per agent; re-derived fields (equity,
/// positions) are never cached here — only the bookkeeping the cycle engine
/// itself owns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRuntimeState {
    pub cycle_count: u64,
    pub start_time: chrono::DateTime<chrono::Utc>,
    /// High-watermark equity observed so far. Non-decreasing within a run.
    pub peak_equity: f64,
    pub daily_start_equity: f64,
    pub daily_reset_date: chrono::NaiveDate,
    pub trading_halted_until: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub halt_reason: Option<String>,
    pub running: bool,
    #[serde(default)]
    pub lifecycle: AgentLifecycle,
    #[serde(default)]
    pub last_cycle_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl Default for AgentLifecycle {
    fn default() -> Self {
        Self::Idle
    }
}

impl AgentRuntimeState {
    pub fn new(initial_equity: f64, now: chrono::DateTime<chrono::Utc>) -> Self {
        Self {
            cycle_count: 0,
            start_time: now,
            peak_equity: initial_equity,
            daily_start_equity: initial_equity,
            daily_reset_date: now.date_naive(),
            trading_halted_until: None,
            halt_reason: None,
            running: false,
            lifecycle: AgentLifecycle::Idle,
            last_cycle_at: None,
        }
    }

    pub fn is_halted(&self, now: chrono::DateTime<chrono::Utc>) -> bool {
        self.trading_halted_until.map(|until| now < until).unwrap_or(false)
    }
}
