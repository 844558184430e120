// =============================================================================
// Agent Cycle Engine (C8) — the hard part
// =============================================================================
//
// One `Agent` per competing trader. `tick()` runs the full pipeline: reset
// check, halt check, risk gate, candidate assembly, snapshot fetch with the
// liquidity filter, prompt build, LLM call with retry, parse, validate,
// execute, log, increment. Per-agent serialization is a `tokio::sync::Mutex`
// around the cycle body — a tick that finds it held is dropped via
// `try_lock` rather than queued, coalescing overlapping cycles instead of
// queuing them. Cooperative cancellation uses a `tokio::sync::watch` channel.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tracing::{info, instrument, warn};

use crate::account::performance::{self, PerformanceStats};
use crate::account::projector::AccountProjector;
use crate::decision::{self, validator::ValidationContext};
use crate::exchange::ExchangeAdapter;
use crate::executor;
use crate::llm::{self, ChatTransport};
use crate::logger::DecisionLogger;
use crate::market_data::provider::MarketDataProvider;
use crate::market_data::snapshot;
use crate::prompt::{self, PromptContext, PromptTemplateRegistry};
use crate::types::{
    AccountInfo, ActionOutcome, AgentConfig, AgentLifecycle, AgentRuntimeState, CandidateCoin, CandidateSource,
    CycleRecord, Decision, DecisionAction, MarketSnapshot,
};

/// Symbols not already a position are dropped below this OI·price floor.
const LIQUIDITY_FLOOR_USD: f64 = 15_000_000.0;
/// Externally supplied candidate-pool symbols are truncated to this budget;
/// open-position symbols are exempt and always kept.
const CANDIDATE_POOL_BUDGET: usize = 20;

pub struct Agent {
    pub config: AgentConfig,
    state: RwLock<AgentRuntimeState>,
    cycle_lock: AsyncMutex<()>,
    market_provider: Arc<dyn MarketDataProvider>,
    projector: AccountProjector,
    exchange: Arc<dyn ExchangeAdapter>,
    transport: Arc<dyn ChatTransport>,
    prompt_registry: Arc<PromptTemplateRegistry>,
    logger: Arc<DecisionLogger>,
    candidate_pool: RwLock<Vec<CandidateCoin>>,
    stop_tx: watch::Sender<bool>,
}

impl Agent {
    pub fn new(
        config: AgentConfig,
        market_provider: Arc<dyn MarketDataProvider>,
        exchange: Arc<dyn ExchangeAdapter>,
        transport: Arc<dyn ChatTransport>,
        prompt_registry: Arc<PromptTemplateRegistry>,
        logger: Arc<DecisionLogger>,
    ) -> Self {
        let now = Utc::now();
        let initial_balance = config.initial_balance;
        let projector = AccountProjector::new(exchange.clone(), initial_balance);
        let (stop_tx, _) = watch::channel(false);
        Self {
            config,
            state: RwLock::new(AgentRuntimeState::new(initial_balance, now)),
            cycle_lock: AsyncMutex::new(()),
            market_provider,
            projector,
            exchange,
            transport,
            prompt_registry,
            logger,
            candidate_pool: RwLock::new(Vec::new()),
            stop_tx,
        }
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn runtime_state(&self) -> AgentRuntimeState {
        self.state.read().clone()
    }

    pub fn set_candidate_pool(&self, pool: Vec<CandidateCoin>) {
        *self.candidate_pool.write() = pool;
    }

    pub fn is_running(&self) -> bool {
        self.state.read().running
    }

    /// Current account snapshot, served from the projector's cache.
    pub async fn account(&self) -> anyhow::Result<AccountInfo> {
        self.projector.get().await.map(|(account, _)| account)
    }

    /// Current open positions, served from the projector's cache.
    pub async fn positions(&self) -> anyhow::Result<Vec<crate::types::PositionInfo>> {
        self.projector.get().await.map(|(_, positions)| positions)
    }

    /// Drive the agent's own timer loop until stopped. The Supervisor spawns
    /// one of these per agent; a panic or hang here cannot affect another
    /// agent's loop since each runs on its own task.
    pub async fn run(self: Arc<Self>) {
        self.state.write().running = true;
        let mut stop_rx = self.stop_tx.subscribe();
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(self.config.scan_interval_secs.max(1)));

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.state.write().lifecycle = AgentLifecycle::Cycling;
                    self.tick().await;
                    self.state.write().lifecycle = AgentLifecycle::Idle;
                }
                _ = stop_rx.changed() => {
                    if *stop_rx.borrow() {
                        break;
                    }
                }
            }
        }

        let mut state = self.state.write();
        state.running = false;
        state.lifecycle = AgentLifecycle::Stopped;
    }

    /// Signal the run loop to exit at the next suspension point.
    pub fn stop(&self) {
        self.state.write().lifecycle = AgentLifecycle::Stopping;
        let _ = self.stop_tx.send(true);
    }

    /// One full pass of the cycle state machine. A tick that finds the
    /// cycle lock already held is dropped (coalescing), not queued.
    #[instrument(skip(self), fields(trader_id = %self.config.id))]
    pub async fn tick(&self) {
        let Ok(_guard) = self.cycle_lock.try_lock() else {
            warn!(trader_id = %self.config.id, "tick dropped: previous cycle still running");
            return;
        };

        let now = Utc::now();
        let cycle_number = self.state.read().cycle_count;

        let (account, positions) = match self.projector.get().await {
            Ok(v) => v,
            Err(e) => {
                self.log_failed_cycle(cycle_number, now, format!("account read failed: {e}"));
                self.increment_cycle_count();
                return;
            }
        };

        {
            let mut state = self.state.write();
            reset_if_new_day(&mut state, now, account.total_equity);
        }

        if self.state.read().is_halted(now) {
            self.log_single_action_cycle(cycle_number, now, DecisionAction::Wait, "halted", true);
            self.increment_cycle_count();
            return;
        }

        if let Some(halt_reason) = self.check_risk_gate(&account, now) {
            self.log_single_action_cycle(cycle_number, now, DecisionAction::Wait, &halt_reason, true);
            self.increment_cycle_count();
            return;
        }

        let candidates = self.assemble_candidates(&positions);
        let position_symbols: std::collections::HashSet<String> =
            positions.iter().map(|p| p.symbol.clone()).collect();

        let snapshots = self.fetch_snapshots(&candidates, &position_symbols).await;
        if snapshots.is_empty() {
            self.log_single_action_cycle(cycle_number, now, DecisionAction::Wait, "no market data", true);
            self.increment_cycle_count();
            return;
        }

        let performance = self.compute_performance();
        let ctx = PromptContext {
            timestamp: now,
            cycle_number,
            runtime_minutes: (now - self.state.read().start_time).num_minutes(),
            account,
            positions: positions.clone(),
            candidates: candidates.clone(),
            snapshots: snapshots.clone(),
            performance,
            leverage_caps: self.config.leverage_caps,
            position_size_bounds: self.config.position_size_bounds,
        };
        let (system_prompt, user_prompt) = prompt::build(&ctx, &self.prompt_registry, self.config.system_prompt_template.as_deref());

        let llm_result = llm::call(self.transport.as_ref(), &system_prompt, &user_prompt).await;
        let (success, cot_trace, decisions_json, decisions, error_message) = match llm_result {
            Ok(text) => {
                let outcome = decision::parse(&text);
                let validation_ctx = ValidationContext {
                    leverage_caps: self.config.leverage_caps,
                    position_size_bounds: self.config.position_size_bounds,
                    account_equity: account.total_equity,
                };
                let validated: Vec<Decision> = outcome
                    .decisions
                    .into_iter()
                    .map(|d| decision::validate(d, &validation_ctx))
                    .collect();
                let json = serde_json::to_string(&validated).unwrap_or_default();
                (true, outcome.cot_trace, json, validated, None)
            }
            Err(e) => (false, String::new(), "[]".to_string(), Vec::new(), Some(e.to_string())),
        };

        let mut outcomes = Vec::new();
        for d in &decisions {
            if let Some(outcome) = executor::execute(d, self.exchange.as_ref(), &self.projector, self.config.position_size_bounds).await {
                outcomes.push(outcome);
            }
        }

        let post_account = self.projector.get().await.ok().map(|(a, _)| a);
        let record = CycleRecord {
            cycle_number,
            trader_id: self.config.id.clone(),
            timestamp: now,
            success,
            input_prompt: user_prompt,
            cot_trace,
            decisions_json,
            per_action_outcomes: outcomes,
            account_state_snapshot: post_account,
            error_message,
        };
        if let Err(e) = self.logger.record(&record) {
            warn!(trader_id = %self.config.id, error = %e, "failed to persist cycle record");
        }

        self.state.write().last_cycle_at = Some(now);
        self.increment_cycle_count();
        info!(trader_id = %self.config.id, cycle_number, success, "cycle complete");
    }

    fn increment_cycle_count(&self) {
        self.state.write().cycle_count += 1;
    }

    /// Returns `Some(reason)` and flips into a halt state when daily loss or
    /// drawdown exceeds its configured cap. Updates `peak_equity` only on
    /// the non-halting path.
    fn check_risk_gate(&self, account: &AccountInfo, now: chrono::DateTime<chrono::Utc>) -> Option<String> {
        let mut state = self.state.write();
        let daily_loss_pct = if state.daily_start_equity != 0.0 {
            (state.daily_start_equity - account.total_equity) / state.daily_start_equity * 100.0
        } else {
            0.0
        };
        let drawdown_pct = if state.peak_equity != 0.0 {
            (state.peak_equity - account.total_equity) / state.peak_equity * 100.0
        } else {
            0.0
        };

        let stops = self.config.risk_stops;
        if daily_loss_pct > stops.max_daily_loss_pct || drawdown_pct > stops.max_drawdown_pct {
            let reason = if daily_loss_pct > stops.max_daily_loss_pct {
                format!("daily loss {daily_loss_pct:.2}% exceeds cap {:.2}%", stops.max_daily_loss_pct)
            } else {
                format!("drawdown {drawdown_pct:.2}% exceeds cap {:.2}%", stops.max_drawdown_pct)
            };
            state.trading_halted_until = Some(now + chrono::Duration::minutes(stops.stop_trading_minutes));
            state.halt_reason = Some(reason.clone());
            warn!(trader_id = %self.config.id, reason = %reason, "risk gate tripped, entering halt");
            return Some(reason);
        }

        state.peak_equity = state.peak_equity.max(account.total_equity);
        None
    }

    /// Union the externally supplied candidate pool with current position
    /// symbols; position symbols are required and exempt from the budget
    /// truncation applied to pool-only symbols.
    fn assemble_candidates(&self, positions: &[crate::types::PositionInfo]) -> Vec<CandidateCoin> {
        let mut merged: HashMap<String, CandidateCoin> = HashMap::new();

        for candidate in self.candidate_pool.read().iter().take(CANDIDATE_POOL_BUDGET) {
            merged
                .entry(candidate.symbol.clone())
                .and_modify(|existing| existing.merge(candidate))
                .or_insert_with(|| candidate.clone());
        }

        for position in positions {
            merged
                .entry(position.symbol.clone())
                .or_insert_with(|| CandidateCoin::new(position.symbol.as_str(), CandidateSource::OiTop));
        }

        merged.into_values().collect()
    }

    async fn fetch_snapshots(
        &self,
        candidates: &[CandidateCoin],
        position_symbols: &std::collections::HashSet<String>,
    ) -> HashMap<String, MarketSnapshot> {
        let mut out = HashMap::new();
        for candidate in candidates {
            let symbol = &candidate.symbol;
            let snapshot = match snapshot::get_snapshot(self.market_provider.as_ref(), symbol).await {
                Ok(s) => s,
                Err(e) => {
                    warn!(trader_id = %self.config.id, symbol, error = %e, "snapshot fetch failed, omitting symbol");
                    continue;
                }
            };

            let is_position = position_symbols.contains(symbol);
            if !is_position {
                let oi_value = snapshot.open_interest.map(|oi| oi.latest * snapshot.current_price).unwrap_or(0.0);
                if oi_value < LIQUIDITY_FLOOR_USD {
                    continue;
                }
            }

            out.insert(symbol.clone(), snapshot);
        }
        out
    }

    fn compute_performance(&self) -> Option<PerformanceStats> {
        let records = self.logger.latest_n(&self.config.id, usize::MAX).ok()?;
        if records.is_empty() {
            return None;
        }
        let mut ascending = records;
        ascending.reverse();
        Some(performance::analyze(&ascending))
    }

    fn log_single_action_cycle(
        &self,
        cycle_number: u64,
        now: chrono::DateTime<chrono::Utc>,
        action: DecisionAction,
        reason: &str,
        success: bool,
    ) {
        let decision = Decision::wait("", reason);
        let record = CycleRecord {
            cycle_number,
            trader_id: self.config.id.clone(),
            timestamp: now,
            success,
            input_prompt: String::new(),
            cot_trace: String::new(),
            decisions_json: serde_json::to_string(&[decision]).unwrap_or_default(),
            per_action_outcomes: vec![ActionOutcome {
                symbol: String::new(),
                action,
                success,
                detail: reason.to_string(),
            }],
            account_state_snapshot: None,
            error_message: None,
        };
        if let Err(e) = self.logger.record(&record) {
            warn!(trader_id = %self.config.id, error = %e, "failed to persist halt/no-data cycle record");
        }
    }

    fn log_failed_cycle(&self, cycle_number: u64, now: chrono::DateTime<chrono::Utc>, error_message: String) {
        let record = CycleRecord {
            cycle_number,
            trader_id: self.config.id.clone(),
            timestamp: now,
            success: false,
            input_prompt: String::new(),
            cot_trace: String::new(),
            decisions_json: "[]".to_string(),
            per_action_outcomes: vec![],
            account_state_snapshot: None,
            error_message: Some(error_message),
        };
        if let Err(e) = self.logger.record(&record) {
            warn!(trader_id = %self.config.id, error = %e, "failed to persist error cycle record");
        }
    }
}

fn reset_if_new_day(state: &mut AgentRuntimeState, now: chrono::DateTime<chrono::Utc>, current_equity: f64) {
    let today = now.date_naive();
    if today != state.daily_reset_date {
        state.daily_start_equity = current_equity;
        state.daily_reset_date = today;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::mock::MockExchangeAdapter;
    use crate::llm::mock::MockChatTransport;
    use crate::market_data::mock::MockMarketDataProvider;
    use crate::types::{LeverageCaps, PositionSizeBounds, RiskStops};

    fn test_config(id: &str) -> AgentConfig {
        AgentConfig {
            id: id.to_string(),
            display_name: "Test Trader".to_string(),
            model_provider: "mock".to_string(),
            exchange_adapter: "mock".to_string(),
            initial_balance: 10_000.0,
            scan_interval_secs: 60,
            leverage_caps: LeverageCaps { btc_eth: 10, altcoin: 5 },
            position_size_bounds: PositionSizeBounds {
                min_usd: 10.0,
                max_usd: 1000.0,
                max_margin_usage_pct: 90.0,
                max_position_size_mult: 1.5,
                safety_buffer_pct: 0.0,
                check_available_before_open: false,
            },
            risk_stops: RiskStops {
                max_daily_loss_pct: 5.0,
                max_drawdown_pct: 20.0,
                stop_trading_minutes: 60,
            },
            system_prompt_template: None,
        }
    }

    fn make_agent(id: &str, response: &str) -> (Arc<Agent>, Arc<MockExchangeAdapter>) {
        let market_provider = Arc::new(
            MockMarketDataProvider::with_trending_data("mock", 100.0, 0.1).with_open_interest(500_000.0),
        );
        let exchange = Arc::new(MockExchangeAdapter::new("mock", 10_000.0));
        let transport = Arc::new(MockChatTransport::with_single_response(response.to_string()));
        let registry = Arc::new(PromptTemplateRegistry::new());
        let dir = std::env::temp_dir().join(format!("agent-test-{}", uuid::Uuid::new_v4()));
        let logger = Arc::new(DecisionLogger::new(dir));
        let agent = Arc::new(Agent::new(
            test_config(id),
            market_provider,
            exchange.clone(),
            transport,
            registry,
            logger,
        ));
        (agent, exchange)
    }

    #[tokio::test]
    async fn halted_cycle_skips_llm_and_logs_wait() {
        let (agent, _exchange) = make_agent("t1", "[]");
        agent.state.write().trading_halted_until = Some(Utc::now() + chrono::Duration::minutes(5));
        agent.tick().await;
        let records = agent.logger.latest_n("t1", 1).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].per_action_outcomes[0].detail, "halted");
    }

    #[tokio::test]
    async fn drawdown_trips_halt_and_next_cycle_has_no_orders() {
        let (agent, exchange) = make_agent("t2", r#"[{"symbol":"BTCUSDT","action":"open_long","leverage":5,"position_size_usd":100,"stop_loss":90,"take_profit":130,"confidence":80,"reasoning":"x"}]"#);
        exchange.set_equity(7_900.0, 7_900.0);
        agent.state.write().peak_equity = 10_000.0;
        agent.tick().await;

        let state = agent.runtime_state();
        assert!(state.trading_halted_until.is_some());
        let records = agent.logger.latest_n("t2", 1).unwrap();
        assert!(records[0].per_action_outcomes.is_empty() || records[0].per_action_outcomes[0].action == DecisionAction::Wait);
    }

    #[tokio::test]
    async fn concurrent_tick_is_dropped_not_queued() {
        let (agent, _exchange) = make_agent("t3", "[]");
        let _guard = agent.cycle_lock.lock().await;
        // With the lock already held, tick() must return immediately rather
        // than block.
        let result = tokio::time::timeout(std::time::Duration::from_millis(200), agent.tick()).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn successful_cycle_opens_a_position() {
        let (agent, exchange) = make_agent("t4", r#"reasoning text [{"symbol":"BTCUSDT","action":"open_long","leverage":5,"position_size_usd":100,"stop_loss":90,"take_profit":130,"confidence":80,"reasoning":"go long"}]"#);
        agent.set_candidate_pool(vec![CandidateCoin::new("BTCUSDT", CandidateSource::Ai500)]);
        agent.tick().await;
        let positions = exchange.get_positions().await.unwrap();
        assert_eq!(positions.len(), 1);
    }
}
