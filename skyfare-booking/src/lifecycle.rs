use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use uuid::Uuid;

use skyfare_core::booking::{
    Booking, BookingPaymentStatus, BookingStatus, ContactInfo, FlightLeg, Traveler, TripType,
};
use skyfare_core::collaborators::{apply_assignments, Notifier, SeatAssigner};
use skyfare_core::money;
use skyfare_core::repository::BookingRepository;
use skyfare_core::{CoreError, CoreResult};

use crate::reference::generate_booking_ref;
use crate::validate;

#[derive(Debug, Clone, Deserialize)]
pub struct CreateBookingRequest {
    pub trip_type: TripType,
    /// Legacy single-leg shape, required for one-way bookings
    pub flight: Option<FlightLeg>,
    /// Round-trip legs, tagged OUTBOUND/RETURN
    pub legs: Option<Vec<FlightLeg>>,
    pub travelers: Vec<Traveler>,
    pub contact: ContactInfo,
    /// Major units; converted to cents before persistence
    pub total_price: f64,
    pub currency: String,
    pub booking_ref: Option<String>,
}

/// Owns the booking state machine: creation, reads, cancellation and
/// the expiry sweep. Payment transitions are applied elsewhere, by the
/// webhook reconciler.
pub struct BookingLifecycle {
    bookings: Arc<dyn BookingRepository>,
    seats: Arc<dyn SeatAssigner>,
    notifier: Arc<dyn Notifier>,
    pending_timeout: Duration,
}

impl BookingLifecycle {
    pub fn new(
        bookings: Arc<dyn BookingRepository>,
        seats: Arc<dyn SeatAssigner>,
        notifier: Arc<dyn Notifier>,
        pending_timeout_minutes: i64,
    ) -> Self {
        Self {
            bookings,
            seats,
            notifier,
            pending_timeout: Duration::minutes(pending_timeout_minutes),
        }
    }

    pub async fn create_booking(
        &self,
        user_id: Uuid,
        req: CreateBookingRequest,
    ) -> CoreResult<Booking> {
        let legs = validate::canonical_legs(&req)?;

        let booking_ref = match &req.booking_ref {
            Some(supplied) => {
                let code = supplied.trim().to_uppercase();
                if self.bookings.find_by_reference(&code).await?.is_some() {
                    return Err(CoreError::Conflict(format!(
                        "booking reference {} already in use",
                        code
                    )));
                }
                code
            }
            None => generate_booking_ref(),
        };

        let total_cents = money::to_minor_units(req.total_price);
        let mut booking = Booking::new(
            user_id,
            booking_ref,
            req.trip_type,
            legs,
            req.travelers,
            req.contact,
            total_cents,
            req.currency.to_uppercase(),
        );

        self.bookings.insert(&booking).await?;
        tracing::info!(
            booking_id = %booking.id,
            booking_ref = %booking.booking_ref,
            "booking created"
        );

        // Best-effort seat assignment; never fails the booking
        let cabin = booking
            .legs
            .first()
            .map(|l| l.cabin_class.clone())
            .unwrap_or_else(|| "ECONOMY".to_string());
        match self.seats.assign_seats(&booking.travelers, &cabin).await {
            Ok(assignments) if !assignments.is_empty() => {
                booking.travelers = apply_assignments(booking.travelers, &assignments);
                booking.updated_at = Utc::now();
                if let Err(e) = self.bookings.update(&booking).await {
                    tracing::warn!(
                        booking_id = %booking.id,
                        error = %e,
                        "failed to persist seat assignments"
                    );
                }
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(booking_id = %booking.id, error = %e, "seat assignment failed");
            }
        }

        Ok(booking)
    }

    pub async fn get_booking(&self, id: Uuid, user_id: Uuid) -> CoreResult<Booking> {
        let booking = self
            .bookings
            .find_by_id(id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("booking {} not found", id)))?;
        if booking.user_id != user_id {
            return Err(CoreError::Forbidden("booking belongs to another user".into()));
        }
        Ok(booking)
    }

    pub async fn get_user_bookings(&self, user_id: Uuid) -> CoreResult<Vec<Booking>> {
        self.bookings.list_for_user(user_id).await
    }

    pub async fn cancel_booking(
        &self,
        id: Uuid,
        user_id: Uuid,
        reason: Option<String>,
    ) -> CoreResult<Booking> {
        let mut booking = self
            .bookings
            .find_by_id(id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("booking {} not found", id)))?;
        if booking.user_id != user_id {
            return Err(CoreError::Forbidden("booking belongs to another user".into()));
        }
        if booking.status != BookingStatus::Confirmed {
            return Err(CoreError::Validation(format!(
                "booking in status {} cannot be cancelled",
                booking.status.as_str()
            )));
        }

        booking.cancel(reason.clone(), Utc::now());
        self.bookings.update(&booking).await?;
        tracing::info!(booking_id = %booking.id, "booking cancelled by user");

        if let Err(e) = self.notifier.booking_cancelled(&booking, reason.as_deref()).await {
            tracing::warn!(booking_id = %booking.id, error = %e, "cancellation notification failed");
        }

        Ok(booking)
    }

    /// Cancel bookings that never left PENDING/PENDING within the
    /// configured timeout. Anything the reconciler has started on
    /// (payment status PROCESSING or beyond) is left alone regardless
    /// of age. Safe to run repeatedly; each pass only matches rows the
    /// previous pass already moved out of reach.
    pub async fn expire_pending_bookings(&self, now: DateTime<Utc>) -> CoreResult<usize> {
        let cutoff = now - self.pending_timeout;
        let stale = self.bookings.find_expired_pending(cutoff).await?;

        let mut expired = 0usize;
        for mut booking in stale {
            if booking.status != BookingStatus::Pending
                || booking.payment_status != BookingPaymentStatus::Pending
            {
                continue;
            }

            booking.payment_status = BookingPaymentStatus::Failed;
            booking.cancel(Some("payment was not completed in time".to_string()), now);

            // Conditional write so a webhook landing mid-sweep wins the race
            match self
                .bookings
                .update_if_payment_status(&booking, BookingPaymentStatus::Pending)
                .await
            {
                Ok(true) => {
                    expired += 1;
                    tracing::info!(
                        booking_id = %booking.id,
                        booking_ref = %booking.booking_ref,
                        "expired stale pending booking"
                    );
                    if let Err(e) = self
                        .notifier
                        .booking_cancelled(&booking, Some("payment timeout"))
                        .await
                    {
                        tracing::warn!(
                            booking_id = %booking.id,
                            error = %e,
                            "cancellation notification failed"
                        );
                    }
                }
                Ok(false) => {
                    tracing::debug!(booking_id = %booking.id, "booking changed mid-sweep, skipped");
                }
                Err(e) => {
                    tracing::error!(booking_id = %booking.id, error = %e, "failed to expire booking");
                }
            }
        }

        Ok(expired)
    }
}
