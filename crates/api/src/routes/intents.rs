//! Order intent creation and credit-funded purchases

use axum::{extract::State, routing::post, Json, Router};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use vitrine_shared::{IntentStatus, PurchaseKind};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/intents", post(create_intent))
        .route("/purchases/credits", post(purchase_with_credits))
}

#[derive(Debug, Deserialize)]
struct CreateIntentRequest {
    owner_id: Uuid,
    package_id: Uuid,
    target: Option<Uuid>,
}

#[derive(Debug, Serialize)]
struct CreateIntentResponse {
    intent_id: Uuid,
    kind: PurchaseKind,
    /// Attach to the gateway payment request; echoed back at confirmation
    correlation_token: String,
    price_cents: i64,
    status: IntentStatus,
    created_at: OffsetDateTime,
}

/// Create a pending intent before redirecting to the gateway checkout.
/// Pricing comes from the catalog, never from the client.
async fn create_intent(
    State(state): State<AppState>,
    Json(req): Json<CreateIntentRequest>,
) -> ApiResult<Json<CreateIntentResponse>> {
    let package = state.packages.get_active(req.package_id).await?;

    if package.kind != PurchaseKind::CreditPack && req.target.is_none() {
        return Err(ApiError::BadRequest(
            "target is required for entitlement purchases".to_string(),
        ));
    }

    let intent = state
        .intents
        .create_intent(
            req.owner_id,
            package.kind,
            req.target,
            Some(package.id),
            package.price_cents,
        )
        .await?;

    Ok(Json(CreateIntentResponse {
        intent_id: intent.id,
        kind: intent.kind,
        correlation_token: intent.correlation_token,
        price_cents: intent.price_cents,
        status: intent.status,
        created_at: intent.created_at,
    }))
}

#[derive(Debug, Deserialize)]
struct CreditPurchaseRequest {
    owner_id: Uuid,
    package_id: Uuid,
    target: Option<Uuid>,
    /// Client-generated id making retries of this request idempotent
    request_id: Uuid,
}

async fn purchase_with_credits(
    State(state): State<AppState>,
    Json(req): Json<CreditPurchaseRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let receipt = state
        .purchases
        .purchase_with_credits(req.owner_id, req.package_id, req.target, req.request_id)
        .await?;

    Ok(Json(serde_json::json!({
        "entitlement_id": receipt.entitlement.id,
        "kind": receipt.entitlement.kind,
        "ends_at": receipt.entitlement.ends_at,
        "cost": receipt.cost,
        "balance": receipt.balance,
    })))
}
