//! Health check endpoint

use axum::{extract::State, routing::get, Json, Router};
use serde_json::json;

use crate::error::ApiResult;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health))
}

async fn health(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    // A failing pool turns the instance unhealthy for the load balancer
    sqlx::query("SELECT 1").execute(&state.pool).await?;

    Ok(Json(json!({ "status": "ok" })))
}
