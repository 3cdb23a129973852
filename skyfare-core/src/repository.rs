use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::booking::{Booking, BookingPaymentStatus};
use crate::payment::PaymentRecord;
use crate::CoreResult;

/// Repository trait for booking persistence
#[async_trait]
pub trait BookingRepository: Send + Sync {
    async fn insert(&self, booking: &Booking) -> CoreResult<()>;

    async fn find_by_id(&self, id: Uuid) -> CoreResult<Option<Booking>>;

    async fn find_by_reference(&self, booking_ref: &str) -> CoreResult<Option<Booking>>;

    async fn list_for_user(&self, user_id: Uuid) -> CoreResult<Vec<Booking>>;

    async fn update(&self, booking: &Booking) -> CoreResult<()>;

    /// Conditional write: persist `booking` only if the stored row still
    /// has payment status `expected`. Returns false when the guard fails,
    /// which means a concurrent writer got there first.
    async fn update_if_payment_status(
        &self,
        booking: &Booking,
        expected: BookingPaymentStatus,
    ) -> CoreResult<bool>;

    /// Bookings still PENDING/PENDING created before `cutoff`,
    /// candidates for the expiry sweep
    async fn find_expired_pending(&self, cutoff: DateTime<Utc>) -> CoreResult<Vec<Booking>>;
}

/// Repository trait for payment ledger persistence
#[async_trait]
pub trait PaymentRepository: Send + Sync {
    async fn insert(&self, record: &PaymentRecord) -> CoreResult<()>;

    async fn find_by_id(&self, id: Uuid) -> CoreResult<Option<PaymentRecord>>;

    async fn find_by_booking(&self, booking_id: Uuid) -> CoreResult<Vec<PaymentRecord>>;

    async fn find_by_transaction_id(
        &self,
        transaction_id: &str,
    ) -> CoreResult<Option<PaymentRecord>>;

    async fn find_by_provider_order_id(
        &self,
        provider_order_id: &str,
    ) -> CoreResult<Option<PaymentRecord>>;

    async fn update(&self, record: &PaymentRecord) -> CoreResult<()>;
}
