//! Purchasable package catalog (read side)

use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use vitrine_shared::{CreditPackage, PurchaseKind};

pub fn router() -> Router<AppState> {
    Router::new().route("/packages/:kind", get(list_packages))
}

async fn list_packages(
    State(state): State<AppState>,
    Path(kind): Path<String>,
) -> ApiResult<Json<Vec<CreditPackage>>> {
    let kind: PurchaseKind = kind
        .parse()
        .map_err(|e: String| ApiError::BadRequest(e))?;

    let packages = state.packages.list_active(kind).await?;
    Ok(Json(packages))
}
