//! Affiliate referral attribution
//!
//! Attribution is reported by the signup flow; commissions themselves are
//! paid by the engine when referred users complete transactions.

use axum::{extract::State, routing::post, Json, Router};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::error::ApiResult;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/affiliates/referrals", post(attribute))
}

#[derive(Debug, Deserialize)]
struct AttributeRequest {
    affiliate_id: Uuid,
    referred_user_id: Uuid,
}

/// First attribution wins; repeats are acknowledged with created=false
async fn attribute(
    State(state): State<AppState>,
    Json(req): Json<AttributeRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let created = state
        .commissions
        .attribute(req.affiliate_id, req.referred_user_id)
        .await?;

    Ok(Json(json!({ "created": created })))
}
