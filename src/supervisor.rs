// =============================================================================
// Supervisor (C11)
// =============================================================================
//
// Owns every `Agent` in the process. Grounded in `AppState`'s
// `RwLock`-guarded collections plus `main.rs`'s per-symbol `tokio::spawn`
// loop: here it's one spawned driver per agent instead of one per
// market-data stream, and a reader-writer-locked registry instead of a
// single struct of fields, since the set of agents is dynamic.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::agent::Agent;
use crate::logger::DecisionLogger;
use crate::types::{AgentConfig, CycleRecord};

/// Aggregate row returned by `comparison_view`.
#[derive(Debug, Clone, Serialize)]
pub struct ComparisonRow {
    pub trader_id: String,
    pub trader_name: String,
    pub ai_model: String,
    pub total_equity: f64,
    pub total_pnl: f64,
    pub total_pnl_pct: f64,
    pub position_count: usize,
    pub margin_used_pct: f64,
    pub cycle_count: u64,
    pub is_running: bool,
}

struct Registered {
    agent: Arc<Agent>,
    driver: Option<JoinHandle<()>>,
}

pub struct Supervisor {
    agents: RwLock<HashMap<String, Registered>>,
    logger: Arc<DecisionLogger>,
    cleanup_handle: RwLock<Option<JoinHandle<()>>>,
}

impl Supervisor {
    pub fn new(logger: Arc<DecisionLogger>) -> Self {
        Self {
            agents: RwLock::new(HashMap::new()),
            logger,
            cleanup_handle: RwLock::new(None),
        }
    }

    /// Register a pre-constructed agent. Rejects a duplicate id.
    pub fn add_agent(&self, agent: Arc<Agent>) -> anyhow::Result<()> {
        let id = agent.id().to_string();
        let mut agents = self.agents.write();
        if agents.contains_key(&id) {
            anyhow::bail!("agent id {id} already registered");
        }
        agents.insert(id, Registered { agent, driver: None });
        Ok(())
    }

    /// Spawn one independent cycle driver per registered agent. Each runs
    /// on its own task; a panic in one driver cannot affect another.
    pub fn start_all(&self) {
        let mut agents = self.agents.write();
        for (id, registered) in agents.iter_mut() {
            if registered.driver.is_some() {
                continue;
            }
            let agent = registered.agent.clone();
            let id = id.clone();
            registered.driver = Some(tokio::spawn(async move {
                info!(trader_id = %id, "agent cycle driver starting");
                agent.run().await;
                info!(trader_id = %id, "agent cycle driver stopped");
            }));
        }
    }

    /// Signal every agent to stop and wait (bounded by `grace_period`) for
    /// in-flight cycles to finish.
    pub async fn stop_all(&self, grace_period: std::time::Duration) {
        let handles: Vec<(String, JoinHandle<()>)> = {
            let mut agents = self.agents.write();
            let mut collected = Vec::new();
            for (id, registered) in agents.iter_mut() {
                registered.agent.stop();
                if let Some(handle) = registered.driver.take() {
                    collected.push((id.clone(), handle));
                }
            }
            collected
        };

        for (id, handle) in handles {
            match tokio::time::timeout(grace_period, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(trader_id = %id, error = %e, "agent driver task panicked"),
                Err(_) => warn!(trader_id = %id, "agent driver did not stop within grace period"),
            }
        }
    }

    /// Schedule periodic `CleanOldRecords` across every agent. The first
    /// cleanup runs immediately; subsequent ones on `interval`.
    pub fn start_decision_log_cleanup(self: &Arc<Self>, retention_days: i64, interval: std::time::Duration) {
        let supervisor = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                supervisor.run_cleanup_once(retention_days);
            }
        });
        *self.cleanup_handle.write() = Some(handle);
        self.run_cleanup_once(retention_days);
    }

    fn run_cleanup_once(&self, retention_days: i64) {
        if let Err(e) = self.logger.clean_old_records(retention_days) {
            warn!(error = %e, "decision log cleanup failed");
        }
    }

    pub fn stop_decision_log_cleanup(&self) {
        if let Some(handle) = self.cleanup_handle.write().take() {
            handle.abort();
        }
    }

    pub fn get_agent(&self, id: &str) -> Option<Arc<Agent>> {
        self.agents.read().get(id).map(|r| r.agent.clone())
    }

    pub fn get_all_agents(&self) -> Vec<Arc<Agent>> {
        self.agents.read().values().map(|r| r.agent.clone()).collect()
    }

    pub fn latest_decisions(&self, id: &str, n: usize) -> anyhow::Result<Vec<CycleRecord>> {
        self.logger.latest_n(id, n)
    }

    pub async fn comparison_view(&self) -> Vec<ComparisonRow> {
        let agents = self.get_all_agents();
        let mut rows = Vec::with_capacity(agents.len());
        for agent in agents {
            let state = agent.runtime_state();
            let account = agent.account().await.ok();
            rows.push(ComparisonRow {
                trader_id: agent.id().to_string(),
                trader_name: agent.config.display_name.clone(),
                ai_model: agent.config.model_provider.clone(),
                total_equity: account.map(|a| a.total_equity).unwrap_or(agent.config.initial_balance),
                total_pnl: account.map(|a| a.total_pnl).unwrap_or(0.0),
                total_pnl_pct: account.map(|a| a.total_pnl_pct).unwrap_or(0.0),
                position_count: account.map(|a| a.position_count).unwrap_or(0),
                margin_used_pct: account.map(|a| a.margin_used_pct).unwrap_or(0.0),
                cycle_count: state.cycle_count,
                is_running: state.running,
            });
        }
        rows
    }
}
