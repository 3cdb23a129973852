use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use skyfare_booking::CreateBookingRequest;
use skyfare_core::booking::{Booking, BookingPaymentStatus};
use skyfare_core::payment::{PaymentHandle, PaymentOutcome, PaymentProvider};

use crate::error::AppError;
use crate::middleware::auth::{require_auth, Claims};
use crate::state::AppState;

#[derive(Debug, Serialize)]
struct BookingCreatedResponse {
    booking_id: Uuid,
    booking_ref: String,
    status: String,
}

#[derive(Debug, Serialize)]
struct BookingCancelledResponse {
    booking_id: Uuid,
    booking_ref: String,
    status: String,
    cancelled_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Deserialize)]
struct CancelRequest {
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PaymentIntentRequest {
    /// Major units; must equal the booking total to the cent
    amount: f64,
    currency: String,
    provider: PaymentProvider,
}

#[derive(Debug, Serialize)]
struct PaymentStatusResponse {
    booking_status: String,
    payment_status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    provider_status: Option<String>,
}

pub fn routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/v1/bookings", post(create_booking).get(list_bookings))
        .route("/v1/bookings/{id}", get(get_booking))
        .route("/v1/bookings/{id}/cancel", post(cancel_booking))
        .route("/v1/bookings/{id}/payment-intent", post(create_payment_intent))
        .route("/v1/bookings/{id}/payment-status", get(payment_status))
        .route_layer(axum::middleware::from_fn_with_state(state, require_auth))
}

/// POST /v1/bookings
/// Create a booking in PENDING/PENDING, owned by the token's subject
async fn create_booking(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateBookingRequest>,
) -> Result<(StatusCode, Json<BookingCreatedResponse>), AppError> {
    let user_id = claims.user_id()?;
    let booking = state.lifecycle.create_booking(user_id, req).await?;

    Ok((
        StatusCode::CREATED,
        Json(BookingCreatedResponse {
            booking_id: booking.id,
            booking_ref: booking.booking_ref.clone(),
            status: booking.status.as_str().to_string(),
        }),
    ))
}

/// GET /v1/bookings
async fn list_bookings(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<Booking>>, AppError> {
    let user_id = claims.user_id()?;
    let bookings = state.lifecycle.get_user_bookings(user_id).await?;
    Ok(Json(bookings))
}

/// GET /v1/bookings/{id}
async fn get_booking(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> Result<Json<Booking>, AppError> {
    let user_id = claims.user_id()?;
    let booking = state.lifecycle.get_booking(id, user_id).await?;
    Ok(Json(booking))
}

/// POST /v1/bookings/{id}/cancel
async fn cancel_booking(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
    body: Option<Json<CancelRequest>>,
) -> Result<Json<BookingCancelledResponse>, AppError> {
    let user_id = claims.user_id()?;
    let reason = body.and_then(|Json(req)| req.reason);
    let booking = state.lifecycle.cancel_booking(id, user_id, reason).await?;

    Ok(Json(BookingCancelledResponse {
        booking_id: booking.id,
        booking_ref: booking.booking_ref.clone(),
        status: booking.status.as_str().to_string(),
        cancelled_at: booking.cancelled_at,
    }))
}

/// POST /v1/bookings/{id}/payment-intent
/// Register the payment with the chosen provider and return the
/// client-usable handle
async fn create_payment_intent(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
    Json(req): Json<PaymentIntentRequest>,
) -> Result<Json<PaymentHandle>, AppError> {
    let user_id = claims.user_id()?;
    let handle = state
        .orchestrator
        .initialize_payment(id, user_id, req.amount, &req.currency, req.provider)
        .await?;
    Ok(Json(handle))
}

/// GET /v1/bookings/{id}/payment-status
/// Local view of the payment state. While the booking is still
/// PENDING/PROCESSING this polls the provider, so a missed webhook is
/// repaired the moment someone asks.
async fn payment_status(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<Uuid>,
) -> Result<Json<PaymentStatusResponse>, AppError> {
    let user_id = claims.user_id()?;
    let booking = state.lifecycle.get_booking(id, user_id).await?;

    let (booking, provider_status) = match booking.payment_status {
        BookingPaymentStatus::Pending | BookingPaymentStatus::Processing => {
            match state.reconciler.sync_status(id).await {
                Ok(sync) => {
                    let provider_status =
                        sync.remote.map(|r| outcome_str(r.outcome).to_string());
                    (sync.booking, provider_status)
                }
                Err(e) => {
                    // Status reads must not fail because the provider is
                    // down; answer from local state.
                    tracing::warn!(booking_id = %id, error = %e, "status sync failed");
                    (booking, None)
                }
            }
        }
        _ => (booking, None),
    };

    Ok(Json(PaymentStatusResponse {
        booking_status: booking.status.as_str().to_string(),
        payment_status: booking.payment_status.as_str().to_string(),
        provider_status,
    }))
}

fn outcome_str(outcome: PaymentOutcome) -> &'static str {
    match outcome {
        PaymentOutcome::Success => "SUCCESS",
        PaymentOutcome::Pending => "PENDING",
        PaymentOutcome::Failure => "FAILURE",
    }
}
