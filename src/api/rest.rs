// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// All endpoints live under `/api/v1/`. Authentication is out of scope here;
// a surrounding collaborator is expected to wrap these handlers with its own
// auth layer if one is needed.
//
// CORS is configured permissively for development.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};

use crate::supervisor::Supervisor;

/// Build the full REST API router with CORS middleware and shared state.
pub fn router(supervisor: Arc<Supervisor>) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/competition", get(competition))
        .route("/api/v1/traders/:id/account", get(trader_account))
        .route("/api/v1/traders/:id/positions", get(trader_positions))
        .route("/api/v1/traders/:id/performance", get(trader_performance))
        .route("/api/v1/traders/:id/decisions/latest", get(trader_latest_decisions))
        .layer(cors)
        .with_state(supervisor)
}

type ApiError = (StatusCode, Json<serde_json::Value>);

fn not_found(trader_id: &str) -> ApiError {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({ "error": format!("unknown trader id: {trader_id}") })),
    )
}

fn internal_error(e: impl std::fmt::Display) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({ "error": e.to_string() })),
    )
}

// =============================================================================
// Health (public)
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    server_time: i64,
}

async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        server_time: chrono::Utc::now().timestamp_millis(),
    })
}

// =============================================================================
// Competition leaderboard
// =============================================================================

#[derive(Serialize)]
struct CompetitionRow {
    trader_id: String,
    trader_name: String,
    ai_model: String,
    total_equity: f64,
    total_pnl: f64,
    total_pnl_pct: f64,
    position_count: usize,
    margin_used_pct: f64,
    call_count: u64,
    is_running: bool,
}

#[derive(Serialize)]
struct CompetitionResponse {
    traders: Vec<CompetitionRow>,
    count: usize,
}

async fn competition(State(supervisor): State<Arc<Supervisor>>) -> impl IntoResponse {
    let rows: Vec<CompetitionRow> = supervisor
        .comparison_view()
        .await
        .into_iter()
        .map(|r| CompetitionRow {
            trader_id: r.trader_id,
            trader_name: r.trader_name,
            ai_model: r.ai_model,
            total_equity: r.total_equity,
            total_pnl: r.total_pnl,
            total_pnl_pct: r.total_pnl_pct,
            position_count: r.position_count,
            margin_used_pct: r.margin_used_pct,
            call_count: r.cycle_count,
            is_running: r.is_running,
        })
        .collect();
    let count = rows.len();
    Json(CompetitionResponse { traders: rows, count })
}

// =============================================================================
// Per-trader account
// =============================================================================

async fn trader_account(
    State(supervisor): State<Arc<Supervisor>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let agent = supervisor.get_agent(&id).ok_or_else(|| not_found(&id))?;
    let account = agent.account().await.map_err(internal_error)?;
    Ok(Json(account))
}

// =============================================================================
// Per-trader positions
// =============================================================================

async fn trader_positions(
    State(supervisor): State<Arc<Supervisor>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let agent = supervisor.get_agent(&id).ok_or_else(|| not_found(&id))?;
    let positions = agent.positions().await.map_err(internal_error)?;
    Ok(Json(positions))
}

// =============================================================================
// Per-trader performance
// =============================================================================

async fn trader_performance(
    State(supervisor): State<Arc<Supervisor>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    if supervisor.get_agent(&id).is_none() {
        return Err(not_found(&id));
    }
    let mut records = supervisor.latest_decisions(&id, usize::MAX).map_err(internal_error)?;
    records.reverse();
    let stats = crate::account::performance::analyze(&records);
    Ok(Json(stats))
}

// =============================================================================
// Per-trader decision history
// =============================================================================

#[derive(Deserialize)]
struct LatestDecisionsQuery {
    n: Option<usize>,
}

async fn trader_latest_decisions(
    State(supervisor): State<Arc<Supervisor>>,
    Path(id): Path<String>,
    Query(query): Query<LatestDecisionsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    if supervisor.get_agent(&id).is_none() {
        return Err(not_found(&id));
    }
    let n = query.n.unwrap_or(20);
    let records = supervisor.latest_decisions(&id, n).map_err(internal_error)?;
    Ok(Json(records))
}
