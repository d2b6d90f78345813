//! Read-side balance and ledger queries

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::error::ApiResult;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/balances/:owner_id", get(get_balance))
        .route("/balances/:owner_id/ledger", get(get_ledger))
}

async fn get_balance(
    State(state): State<AppState>,
    Path(owner_id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    let amount = state.balances.get_balance(owner_id).await?;

    Ok(Json(json!({
        "owner_id": owner_id,
        "amount": amount,
    })))
}

#[derive(Debug, Deserialize)]
struct LedgerQuery {
    limit: Option<i64>,
}

async fn get_ledger(
    State(state): State<AppState>,
    Path(owner_id): Path<Uuid>,
    Query(query): Query<LedgerQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let limit = query.limit.unwrap_or(50).clamp(1, 200);
    let entries = state.balances.entries(owner_id, limit).await?;

    Ok(Json(json!({
        "owner_id": owner_id,
        "entries": entries,
    })))
}
