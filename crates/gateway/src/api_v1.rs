//! v1 API: research history and usage.
//!
//! Endpoints:
//! - `GET    /v1/usage`            usage summary over the whole history
//! - `GET    /v1/usage/by-prompt`  usage per prompt id
//! - `GET    /v1/history?limit=N`  most recent trace records, newest first
//! - `DELETE /v1/history`          clear the history

use crate::{ApiError, SharedState, api_error};
use axum::{
    Router,
    extract::{Query, State},
    http::StatusCode,
    response::Json,
    routing::get,
};
use delve_history::{HistorySummary, summarize};
use delve_telemetry::{PersistedTrace, PromptUsage};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{error, info};

const DEFAULT_HISTORY_LIMIT: usize = 20;

/// Routes mounted under `/v1`.
pub fn v1_router() -> Router<SharedState> {
    Router::new()
        .route("/usage", get(usage_handler))
        .route("/usage/by-prompt", get(usage_by_prompt_handler))
        .route("/history", get(history_handler).delete(clear_history_handler))
}

fn history_error(e: delve_history::HistoryError) -> ApiError {
    error!(error = %e, "Failed to read research history");
    api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

async fn usage_handler(State(state): State<SharedState>) -> Result<Json<HistorySummary>, ApiError> {
    let traces = state.log.load_history().map_err(history_error)?;
    Ok(Json(summarize(&traces)))
}

async fn usage_by_prompt_handler(
    State(state): State<SharedState>,
) -> Result<Json<BTreeMap<String, PromptUsage>>, ApiError> {
    let traces = state.log.load_history().map_err(history_error)?;
    let mut by_prompt: BTreeMap<String, PromptUsage> = BTreeMap::new();
    for trace in &traces {
        for (prompt_id, usage) in trace.usage_by_prompt() {
            by_prompt.entry(prompt_id).or_default().merge(&usage);
        }
    }
    Ok(Json(by_prompt))
}

#[derive(Deserialize)]
struct HistoryQuery {
    limit: Option<usize>,
}

#[derive(Serialize)]
struct HistoryResponse {
    traces: Vec<PersistedTrace>,
    count: usize,
}

async fn history_handler(
    State(state): State<SharedState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    let traces: Vec<PersistedTrace> = state
        .log
        .recent(limit)
        .map_err(history_error)?
        .iter()
        .map(|t| t.to_persistable())
        .collect();
    Ok(Json(HistoryResponse {
        count: traces.len(),
        traces,
    }))
}

#[derive(Serialize)]
struct ClearResponse {
    status: &'static str,
}

async fn clear_history_handler(
    State(state): State<SharedState>,
) -> Result<Json<ClearResponse>, ApiError> {
    state.log.clear().map_err(history_error)?;
    info!("Research history cleared via API");
    Ok(Json(ClearResponse { status: "cleared" }))
}
