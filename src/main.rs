// =============================================================================
// Trading Arena — Main Entry Point
// =============================================================================
//
// Boots one Agent per configured trader, starts every cycle driver under the
// Supervisor, mounts the REST API, and schedules decision-log cleanup. Each
// trader talks to the LLM over a real HTTP transport when an API key is
// configured and falls back to a safe mock otherwise, so the process never
// starts in a state that silently calls out to a paid endpoint by accident.
// =============================================================================

mod account;
mod agent;
mod api;
mod config;
mod decision;
mod exchange;
mod executor;
mod indicators;
mod llm;
mod logger;
mod market_data;
mod prompt;
mod supervisor;
mod types;

use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::ArenaConfig;
use crate::exchange::mock::MockExchangeAdapter;
use crate::llm::mock::MockChatTransport;
use crate::llm::{ChatTransport, HttpChatTransport};
use crate::logger::DecisionLogger;
use crate::market_data::mock::MockMarketDataProvider;
use crate::market_data::MarketDataProvider;
use crate::prompt::PromptTemplateRegistry;
use crate::supervisor::Supervisor;

const CONFIG_PATH: &str = "arena_config.json";
const DECISION_LOG_DIR: &str = "decision_logs";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║              Trading Arena — Starting Up                 ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let config = ArenaConfig::load_or_default(CONFIG_PATH);
    info!(traders = config.traders.len(), api_port = config.api_server_port, "arena config loaded");

    let logger = Arc::new(DecisionLogger::new(DECISION_LOG_DIR));
    let prompt_registry = Arc::new(PromptTemplateRegistry::new());
    let supervisor = Arc::new(Supervisor::new(logger.clone()));

    let llm_base_url = std::env::var("LLM_BASE_URL").unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
    let llm_api_key = std::env::var("LLM_API_KEY").ok();

    for trader_config in &config.traders {
        let market_provider: Arc<dyn MarketDataProvider> =
            Arc::new(MockMarketDataProvider::new(config.market_data_provider.as_str()));

        let exchange = Arc::new(MockExchangeAdapter::new(
            trader_config.exchange_adapter.as_str(),
            trader_config.initial_balance,
        ));

        let transport: Arc<dyn ChatTransport> = match &llm_api_key {
            Some(key) => Arc::new(HttpChatTransport::new(llm_base_url.clone(), trader_config.model_provider.clone(), Some(key.clone()))),
            None => {
                warn!(trader_id = %trader_config.id, "no LLM_API_KEY set, falling back to a mock transport that always holds");
                Arc::new(MockChatTransport::with_single_response(r#"[{"symbol":"","action":"hold","reasoning":"no LLM configured"}]"#))
            }
        };

        let agent = Arc::new(agent::Agent::new(
            trader_config.clone(),
            market_provider,
            exchange,
            transport,
            prompt_registry.clone(),
            logger.clone(),
        ));
        agent.set_candidate_pool(
            config
                .candidate_pool
                .default_coins
                .iter()
                .map(|symbol| types::CandidateCoin::new(symbol.as_str(), types::CandidateSource::Ai500))
                .collect(),
        );

        supervisor.add_agent(agent)?;
        info!(trader_id = %trader_config.id, "trader registered");
    }

    supervisor.start_all();
    info!(count = config.traders.len(), "agent cycle drivers started");

    supervisor.start_decision_log_cleanup(
        config.decision_log_retention_days,
        std::time::Duration::from_secs(config.decision_log_cleanup_interval_hours.max(1) as u64 * 3600),
    );

    let api_supervisor = supervisor.clone();
    let bind_addr = std::env::var("ARENA_BIND_ADDR").unwrap_or_else(|_| format!("0.0.0.0:{}", config.api_server_port));
    let bind_addr_clone = bind_addr.clone();
    tokio::spawn(async move {
        let app = api::rest::router(api_supervisor);
        let listener = tokio::net::TcpListener::bind(&bind_addr_clone)
            .await
            .expect("failed to bind API server");
        info!(addr = %bind_addr_clone, "API server listening");
        axum::serve(listener, app).await.expect("API server failed");
    });

    info!("All traders running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;
    warn!("shutdown signal received, stopping gracefully");

    supervisor.stop_decision_log_cleanup();
    supervisor.stop_all(std::time::Duration::from_secs(30)).await;

    if let Err(e) = config.save(CONFIG_PATH) {
        warn!(error = %e, "failed to save arena config on shutdown");
    }

    info!("trading arena shut down complete");
    Ok(())
}
