use axum::{
    extract::{Path, State},
    routing::post,
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use skyfare_core::money;
use skyfare_core::CoreError;

use crate::error::AppError;
use crate::middleware::auth::{require_auth, Claims};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
struct RefundRequest {
    /// Major units; up to the original charge
    amount: f64,
    reason: Option<String>,
}

#[derive(Debug, Serialize)]
struct RefundResponse {
    payment_id: Uuid,
    booking_id: Uuid,
    status: String,
    refunded_amount_cents: i64,
    refund_reason: Option<String>,
}

pub fn routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/v1/payments/{id}/refund", post(refund_payment))
        .route_layer(axum::middleware::from_fn_with_state(state, require_auth))
}

/// POST /v1/payments/{id}/refund
/// Record a full or partial refund against a completed payment
async fn refund_payment(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
    Json(req): Json<RefundRequest>,
) -> Result<Json<RefundResponse>, AppError> {
    let user_id = claims.user_id()?;

    let record = state
        .ledger
        .find_by_id(id)
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("payment {} not found", id)))?;
    if record.user_id != user_id {
        return Err(CoreError::Forbidden("payment belongs to another user".into()).into());
    }

    let amount_cents = money::to_minor_units(req.amount);
    let refunded = state.ledger.process_refund(id, amount_cents, req.reason).await?;

    Ok(Json(RefundResponse {
        payment_id: refunded.id,
        booking_id: refunded.booking_id,
        status: refunded.status.as_str().to_string(),
        refunded_amount_cents: amount_cents,
        refund_reason: refunded.refund_reason.clone(),
    }))
}
