// =============================================================================
// System Prompt Template Registry
// =============================================================================
//
// Shaped exactly like `market_data::registry::ProviderRegistry`: a
// reader-writer-locked name -> template map with a built-in default that
// lookups fall back to on a miss, so a misconfigured `system_prompt_template`
// degrades to "use the stock policy" rather than failing the cycle.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::warn;

use super::PromptContext;

pub trait SystemPromptTemplate: Send + Sync {
    fn render(&self, ctx: &PromptContext) -> String;
}

/// The built-in policy: objective, hard constraints, and the exact
/// `Decision` field schema, parameterized by the agent's configured caps.
pub struct BuiltinTemplate;

impl SystemPromptTemplate for BuiltinTemplate {
    fn render(&self, ctx: &PromptContext) -> String {
        format!(
            "You are an autonomous perpetual-futures trading agent managing \
             {equity:.2} USD of equity. Your objective is to maximize \
             risk-adjusted return over time, not to trade every cycle.\n\n\
             Hard constraints (violating any invalidates the decision):\n\
             - Reward/risk ratio must be >= 3.0, computed with entry \
             approximated 20% into the stop_loss -> take_profit range on \
             the side closer to the stop-loss.\n\
             - At most 3 concurrent open positions.\n\
             - Total margin usage must not exceed {margin_cap:.0}% of equity.\n\
             - Leverage cap is {btc_eth_cap}x for BTCUSDT/ETHUSDT and \
             {altcoin_cap}x for all other symbols.\n\
             - Position size must fall within [{min_usd:.2}, {max_usd:.2}] USD \
             when those bounds are configured.\n\n\
             Respond with free-form reasoning first, then a trailing JSON \
             array of decision objects. Each object has the fields: \
             symbol, action (one of open_long, open_short, close_long, \
             close_short, hold, wait), leverage, position_size_usd, \
             stop_loss, take_profit, confidence (0-100), risk_usd \
             (optional), reasoning.",
            equity = ctx.account.total_equity,
            margin_cap = ctx.position_size_bounds.max_margin_usage_pct,
            btc_eth_cap = ctx.leverage_caps.btc_eth,
            altcoin_cap = ctx.leverage_caps.altcoin,
            min_usd = ctx.position_size_bounds.min_usd,
            max_usd = ctx.position_size_bounds.max_usd,
        )
    }
}

/// Process-wide name -> template map, shaped like `ProviderRegistry`.
pub struct PromptTemplateRegistry {
    templates: RwLock<HashMap<String, Arc<dyn SystemPromptTemplate>>>,
}

impl PromptTemplateRegistry {
    pub fn new() -> Self {
        Self {
            templates: RwLock::new(HashMap::new()),
        }
    }

    pub fn register(&self, name: impl Into<String>, template: Arc<dyn SystemPromptTemplate>) {
        self.templates.write().insert(name.into(), template);
    }

    /// Resolve `name` to a template, falling back to the built-in on any
    /// lookup miss (absent name, or `None` requested).
    pub fn resolve(&self, name: Option<&str>) -> Arc<dyn SystemPromptTemplate> {
        if let Some(name) = name {
            if let Some(found) = self.templates.read().get(name).cloned() {
                return found;
            }
            warn!(template = name, "system prompt template not found, using built-in");
        }
        Arc::new(BuiltinTemplate)
    }
}

impl Default for PromptTemplateRegistry {
    fn default() -> Self {
        Self::new()
    }
}
