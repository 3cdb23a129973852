//! Interfaces for the collaborators the booking flow leans on.
//! Both are best-effort: a failed seat assignment or notification is
//! logged and never fails the booking or payment transition.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::booking::{Booking, Traveler};
use crate::CoreResult;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeatAssignment {
    pub traveler_index: usize,
    pub seat_number: String,
}

#[async_trait]
pub trait SeatAssigner: Send + Sync {
    /// Best-effort seat allocation; an empty result is valid
    async fn assign_seats(
        &self,
        travelers: &[Traveler],
        cabin_class: &str,
    ) -> CoreResult<Vec<SeatAssignment>>;
}

/// Write assignments back onto the traveler list. Indices outside the
/// list are skipped.
pub fn apply_assignments(mut travelers: Vec<Traveler>, assignments: &[SeatAssignment]) -> Vec<Traveler> {
    for assignment in assignments {
        if let Some(traveler) = travelers.get_mut(assignment.traveler_index) {
            traveler.seat_number = Some(assignment.seat_number.clone());
        }
    }
    travelers
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn booking_confirmed(&self, booking: &Booking) -> CoreResult<()>;

    async fn booking_cancelled(&self, booking: &Booking, reason: Option<&str>) -> CoreResult<()>;
}

/// Default assigner that declines to pick seats
pub struct NoopSeatAssigner;

#[async_trait]
impl SeatAssigner for NoopSeatAssigner {
    async fn assign_seats(
        &self,
        _travelers: &[Traveler],
        _cabin_class: &str,
    ) -> CoreResult<Vec<SeatAssignment>> {
        Ok(Vec::new())
    }
}

/// Notifier that only writes to the log. Stands in for the real email
/// sender in development and tests.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn booking_confirmed(&self, booking: &Booking) -> CoreResult<()> {
        tracing::info!(
            booking_id = %booking.id,
            booking_ref = %booking.booking_ref,
            "booking confirmation notification"
        );
        Ok(())
    }

    async fn booking_cancelled(&self, booking: &Booking, reason: Option<&str>) -> CoreResult<()> {
        tracing::info!(
            booking_id = %booking.id,
            booking_ref = %booking.booking_ref,
            reason = reason.unwrap_or("unspecified"),
            "booking cancellation notification"
        );
        Ok(())
    }
}
