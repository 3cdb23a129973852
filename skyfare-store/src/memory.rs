//! In-memory repositories for tests and local development. They mirror
//! the contracts of the Postgres implementations, including reference
//! and transaction-id uniqueness and the conditional payment-status
//! write.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use skyfare_core::booking::{Booking, BookingPaymentStatus, BookingStatus};
use skyfare_core::payment::PaymentRecord;
use skyfare_core::repository::{BookingRepository, PaymentRepository};
use skyfare_core::{CoreError, CoreResult};

#[derive(Default)]
pub struct InMemoryBookingRepository {
    rows: RwLock<HashMap<Uuid, Booking>>,
}

impl InMemoryBookingRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BookingRepository for InMemoryBookingRepository {
    async fn insert(&self, booking: &Booking) -> CoreResult<()> {
        let mut rows = self.rows.write().await;
        if rows.values().any(|b| b.booking_ref == booking.booking_ref) {
            return Err(CoreError::Conflict(format!(
                "booking reference {} already exists",
                booking.booking_ref
            )));
        }
        rows.insert(booking.id, booking.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> CoreResult<Option<Booking>> {
        Ok(self.rows.read().await.get(&id).cloned())
    }

    async fn find_by_reference(&self, booking_ref: &str) -> CoreResult<Option<Booking>> {
        Ok(self
            .rows
            .read()
            .await
            .values()
            .find(|b| b.booking_ref == booking_ref)
            .cloned())
    }

    async fn list_for_user(&self, user_id: Uuid) -> CoreResult<Vec<Booking>> {
        let mut bookings: Vec<Booking> = self
            .rows
            .read()
            .await
            .values()
            .filter(|b| b.user_id == user_id)
            .cloned()
            .collect();
        // Newest first, matching the Postgres repository
        bookings.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(bookings)
    }

    async fn update(&self, booking: &Booking) -> CoreResult<()> {
        let mut rows = self.rows.write().await;
        if !rows.contains_key(&booking.id) {
            return Err(CoreError::NotFound(format!("booking {} not found", booking.id)));
        }
        rows.insert(booking.id, booking.clone());
        Ok(())
    }

    async fn update_if_payment_status(
        &self,
        booking: &Booking,
        expected: BookingPaymentStatus,
    ) -> CoreResult<bool> {
        let mut rows = self.rows.write().await;
        match rows.get(&booking.id) {
            Some(stored) if stored.payment_status == expected => {
                rows.insert(booking.id, booking.clone());
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(CoreError::NotFound(format!("booking {} not found", booking.id))),
        }
    }

    async fn find_expired_pending(&self, cutoff: DateTime<Utc>) -> CoreResult<Vec<Booking>> {
        let mut expired: Vec<Booking> = self
            .rows
            .read()
            .await
            .values()
            .filter(|b| {
                b.status == BookingStatus::Pending
                    && b.payment_status == BookingPaymentStatus::Pending
                    && b.created_at < cutoff
            })
            .cloned()
            .collect();
        expired.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(expired)
    }
}

#[derive(Default)]
pub struct InMemoryPaymentRepository {
    rows: RwLock<HashMap<Uuid, PaymentRecord>>,
}

impl InMemoryPaymentRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PaymentRepository for InMemoryPaymentRepository {
    async fn insert(&self, record: &PaymentRecord) -> CoreResult<()> {
        let mut rows = self.rows.write().await;
        if let Some(txn) = record.transaction_id.as_deref() {
            if rows.values().any(|r| r.transaction_id.as_deref() == Some(txn)) {
                return Err(CoreError::Conflict(format!(
                    "transaction id {} already recorded",
                    txn
                )));
            }
        }
        rows.insert(record.id, record.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> CoreResult<Option<PaymentRecord>> {
        Ok(self.rows.read().await.get(&id).cloned())
    }

    async fn find_by_booking(&self, booking_id: Uuid) -> CoreResult<Vec<PaymentRecord>> {
        let mut records: Vec<PaymentRecord> = self
            .rows
            .read()
            .await
            .values()
            .filter(|r| r.booking_id == booking_id)
            .cloned()
            .collect();
        // Oldest first, matching the Postgres repository
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(records)
    }

    async fn find_by_transaction_id(
        &self,
        transaction_id: &str,
    ) -> CoreResult<Option<PaymentRecord>> {
        Ok(self
            .rows
            .read()
            .await
            .values()
            .find(|r| r.transaction_id.as_deref() == Some(transaction_id))
            .cloned())
    }

    async fn find_by_provider_order_id(
        &self,
        provider_order_id: &str,
    ) -> CoreResult<Option<PaymentRecord>> {
        Ok(self
            .rows
            .read()
            .await
            .values()
            .filter(|r| r.provider_order_id() == Some(provider_order_id))
            .max_by_key(|r| r.created_at)
            .cloned())
    }

    async fn update(&self, record: &PaymentRecord) -> CoreResult<()> {
        let mut rows = self.rows.write().await;
        if !rows.contains_key(&record.id) {
            return Err(CoreError::NotFound(format!("payment {} not found", record.id)));
        }
        if let Some(txn) = record.transaction_id.as_deref() {
            if rows
                .values()
                .any(|r| r.id != record.id && r.transaction_id.as_deref() == Some(txn))
            {
                return Err(CoreError::Conflict(format!(
                    "transaction id {} already recorded",
                    txn
                )));
            }
        }
        rows.insert(record.id, record.clone());
        Ok(())
    }
}
