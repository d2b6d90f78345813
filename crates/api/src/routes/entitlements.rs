//! Entitlement read side, cancellation, and the featured-profile query
//! consumed by the marketplace listing service

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use vitrine_shared::{Entitlement, EntitlementKind};

pub fn router() -> Router<AppState> {
    // The :id segment is an owner id on the collection routes and an
    // entitlement id on the action routes; the router requires one name
    // per position.
    Router::new()
        .route("/entitlements/:id", get(list_entitlements))
        .route("/entitlements/:id/active", get(has_active))
        .route("/entitlements/:id/cancel", post(cancel))
        .route("/entitlements/:id/auto-renew", post(set_auto_renew))
        .route("/profiles/:id/featured", get(is_featured))
}

async fn list_entitlements(
    State(state): State<AppState>,
    Path(owner_id): Path<Uuid>,
) -> ApiResult<Json<Vec<Entitlement>>> {
    let entitlements = state.entitlements.list_for_owner(owner_id).await?;
    Ok(Json(entitlements))
}

#[derive(Debug, Deserialize)]
struct HasActiveQuery {
    kind: String,
    target: Option<Uuid>,
}

/// Read-side access check: does the owner hold a live grant of this kind?
async fn has_active(
    State(state): State<AppState>,
    Path(owner_id): Path<Uuid>,
    Query(query): Query<HasActiveQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let kind: EntitlementKind = serde_json::from_value(serde_json::json!(query.kind))
        .map_err(|_| ApiError::BadRequest(format!("invalid entitlement kind: {}", query.kind)))?;

    let active = state
        .entitlements
        .has_active(owner_id, kind, query.target)
        .await?;

    Ok(Json(json!({
        "owner_id": owner_id,
        "kind": kind,
        "active": active,
    })))
}

/// User-initiated cancellation: forward-only, never retroactive
async fn cancel(
    State(state): State<AppState>,
    Path(entitlement_id): Path<Uuid>,
) -> ApiResult<Json<Entitlement>> {
    let entitlement = state.entitlements.cancel(entitlement_id).await?;
    Ok(Json(entitlement))
}

#[derive(Debug, Deserialize)]
struct AutoRenewRequest {
    enabled: bool,
}

async fn set_auto_renew(
    State(state): State<AppState>,
    Path(entitlement_id): Path<Uuid>,
    Json(req): Json<AutoRenewRequest>,
) -> ApiResult<Json<Entitlement>> {
    let entitlement = state
        .entitlements
        .set_auto_renew(entitlement_id, req.enabled)
        .await?;
    Ok(Json(entitlement))
}

/// Read-side listing query: is this profile currently boosted?
async fn is_featured(
    State(state): State<AppState>,
    Path(profile_id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    let featured = state.entitlements.is_featured(profile_id).await?;

    Ok(Json(json!({
        "profile_id": profile_id,
        "featured": featured,
    })))
}
