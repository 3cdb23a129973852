use axum::{
    body::Bytes,
    extract::{Query, State},
    http::HeaderMap,
    routing::post,
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
struct PaymobQuery {
    hmac: Option<String>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/webhooks/payments/stripe", post(handle_stripe_webhook))
        .route("/v1/webhooks/payments/paymob", post(handle_paymob_webhook))
}

/// POST /v1/webhooks/payments/stripe
/// Receive signed payment events from Stripe. The body is taken raw;
/// signature verification runs over the exact bytes delivered.
async fn handle_stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    let signature = headers.get("Stripe-Signature").and_then(|h| h.to_str().ok());

    let outcome = state.reconciler.handle_stripe(&body, signature).await?;
    tracing::info!(?outcome, "stripe webhook handled");

    // Acknowledge every durably classified event, including failures,
    // so the provider stops redelivering it
    Ok(Json(json!({ "received": true })))
}

/// POST /v1/webhooks/payments/paymob
/// Paymob carries its HMAC on the callback URL rather than in a header
async fn handle_paymob_webhook(
    State(state): State<AppState>,
    Query(query): Query<PaymobQuery>,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    let outcome = state
        .reconciler
        .handle_paymob(&body, query.hmac.as_deref())
        .await?;
    tracing::info!(?outcome, "paymob webhook handled");

    Ok(Json(json!({ "received": true })))
}
