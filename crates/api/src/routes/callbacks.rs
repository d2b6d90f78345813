//! Payment gateway callback endpoint
//!
//! The gateway delivers at least once and retries on any non-2xx
//! response. The handler verifies the signature, hands the callback to the
//! confirmation processor, and maps retryable failures to 503 so the
//! gateway redelivers. Terminal outcomes (including recorded invalid ones)
//! answer 2xx/4xx and stop the redelivery loop.

use axum::{
    extract::State,
    http::HeaderMap,
    routing::post,
    Json, Router,
};
use serde_json::json;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use vitrine_ledger::PaymentCallback;

const SIGNATURE_HEADER: &str = "x-gateway-signature";

pub fn router() -> Router<AppState> {
    Router::new().route("/webhooks/payment", post(payment_callback))
}

async fn payment_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> ApiResult<Json<serde_json::Value>> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::BadRequest("missing signature header".to_string()))?;

    state.processor.verify_callback(&body, signature)?;

    let callback: PaymentCallback = serde_json::from_str(&body)
        .map_err(|e| ApiError::BadRequest(format!("malformed callback body: {}", e)))?;

    if callback.event_type != "payment" {
        // Acknowledge unknown event types so the gateway stops resending
        tracing::info!(
            event_type = %callback.event_type,
            "Ignoring unhandled gateway event type"
        );
        return Ok(Json(json!({ "ignored": true })));
    }

    let response = state.processor.process_callback(&callback).await?;

    Ok(Json(serde_json::to_value(&response).map_err(|e| {
        tracing::error!(error = %e, "Failed to serialize callback response");
        ApiError::Internal
    })?))
}
