use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;
use std::str::FromStr;
use uuid::Uuid;

use skyfare_core::booking::{
    Booking, BookingPaymentStatus, BookingStatus, ContactInfo, FlightLeg, Traveler, TripType,
};
use skyfare_core::repository::BookingRepository;
use skyfare_core::{CoreError, CoreResult};

pub struct PgBookingRepository {
    pool: PgPool,
}

impl PgBookingRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// Internal struct for type-safe querying
#[derive(sqlx::FromRow)]
struct BookingRow {
    id: Uuid,
    user_id: Uuid,
    booking_ref: String,
    trip_type: String,
    legs: Value,
    travelers: Value,
    contact: Value,
    total_amount_cents: i64,
    currency: String,
    status: String,
    payment_status: String,
    payment_intent_id: Option<String>,
    payment_completed_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
    cancellation_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl BookingRow {
    fn into_booking(self) -> CoreResult<Booking> {
        let legs: Vec<FlightLeg> = serde_json::from_value(self.legs)
            .map_err(|e| CoreError::Storage(format!("bad legs column: {}", e)))?;
        let travelers: Vec<Traveler> = serde_json::from_value(self.travelers)
            .map_err(|e| CoreError::Storage(format!("bad travelers column: {}", e)))?;
        let contact: ContactInfo = serde_json::from_value(self.contact)
            .map_err(|e| CoreError::Storage(format!("bad contact column: {}", e)))?;

        Ok(Booking {
            id: self.id,
            user_id: self.user_id,
            booking_ref: self.booking_ref,
            trip_type: TripType::from_str(&self.trip_type)?,
            legs,
            travelers,
            contact,
            total_amount_cents: self.total_amount_cents,
            currency: self.currency,
            status: BookingStatus::from_str(&self.status)?,
            payment_status: BookingPaymentStatus::from_str(&self.payment_status)?,
            payment_intent_id: self.payment_intent_id,
            payment_completed_at: self.payment_completed_at,
            cancelled_at: self.cancelled_at,
            cancellation_reason: self.cancellation_reason,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

fn encode<T: serde::Serialize>(value: &T, what: &str) -> CoreResult<Value> {
    serde_json::to_value(value).map_err(|e| CoreError::Storage(format!("cannot encode {}: {}", what, e)))
}

fn storage_err(e: sqlx::Error) -> CoreError {
    CoreError::Storage(e.to_string())
}

fn constraint_err(e: sqlx::Error, what: &str) -> CoreError {
    if let sqlx::Error::Database(db) = &e {
        if db.is_unique_violation() {
            return CoreError::Conflict(format!("{} already exists", what));
        }
    }
    CoreError::Storage(e.to_string())
}

#[async_trait]
impl BookingRepository for PgBookingRepository {
    async fn insert(&self, booking: &Booking) -> CoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO bookings
                (id, user_id, booking_ref, trip_type, legs, travelers, contact,
                 total_amount_cents, currency, status, payment_status, payment_intent_id,
                 payment_completed_at, cancelled_at, cancellation_reason, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            "#,
        )
        .bind(booking.id)
        .bind(booking.user_id)
        .bind(&booking.booking_ref)
        .bind(booking.trip_type.as_str())
        .bind(encode(&booking.legs, "legs")?)
        .bind(encode(&booking.travelers, "travelers")?)
        .bind(encode(&booking.contact, "contact")?)
        .bind(booking.total_amount_cents)
        .bind(&booking.currency)
        .bind(booking.status.as_str())
        .bind(booking.payment_status.as_str())
        .bind(&booking.payment_intent_id)
        .bind(booking.payment_completed_at)
        .bind(booking.cancelled_at)
        .bind(&booking.cancellation_reason)
        .bind(booking.created_at)
        .bind(booking.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| constraint_err(e, "booking reference"))?;

        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> CoreResult<Option<Booking>> {
        let row = sqlx::query_as::<_, BookingRow>("SELECT * FROM bookings WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;

        row.map(BookingRow::into_booking).transpose()
    }

    async fn find_by_reference(&self, booking_ref: &str) -> CoreResult<Option<Booking>> {
        let row = sqlx::query_as::<_, BookingRow>("SELECT * FROM bookings WHERE booking_ref = $1")
            .bind(booking_ref)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;

        row.map(BookingRow::into_booking).transpose()
    }

    async fn list_for_user(&self, user_id: Uuid) -> CoreResult<Vec<Booking>> {
        let rows = sqlx::query_as::<_, BookingRow>(
            "SELECT * FROM bookings WHERE user_id = $1 ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;

        rows.into_iter().map(BookingRow::into_booking).collect()
    }

    async fn update(&self, booking: &Booking) -> CoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE bookings SET
                trip_type = $2, legs = $3, travelers = $4, contact = $5,
                total_amount_cents = $6, currency = $7, status = $8, payment_status = $9,
                payment_intent_id = $10, payment_completed_at = $11, cancelled_at = $12,
                cancellation_reason = $13, updated_at = $14
            WHERE id = $1
            "#,
        )
        .bind(booking.id)
        .bind(booking.trip_type.as_str())
        .bind(encode(&booking.legs, "legs")?)
        .bind(encode(&booking.travelers, "travelers")?)
        .bind(encode(&booking.contact, "contact")?)
        .bind(booking.total_amount_cents)
        .bind(&booking.currency)
        .bind(booking.status.as_str())
        .bind(booking.payment_status.as_str())
        .bind(&booking.payment_intent_id)
        .bind(booking.payment_completed_at)
        .bind(booking.cancelled_at)
        .bind(&booking.cancellation_reason)
        .bind(booking.updated_at)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound(format!("booking {} not found", booking.id)));
        }
        Ok(())
    }

    async fn update_if_payment_status(
        &self,
        booking: &Booking,
        expected: BookingPaymentStatus,
    ) -> CoreResult<bool> {
        // The guard rides on the WHERE clause so the check-and-write is a
        // single atomic statement.
        let result = sqlx::query(
            r#"
            UPDATE bookings SET
                trip_type = $2, legs = $3, travelers = $4, contact = $5,
                total_amount_cents = $6, currency = $7, status = $8, payment_status = $9,
                payment_intent_id = $10, payment_completed_at = $11, cancelled_at = $12,
                cancellation_reason = $13, updated_at = $14
            WHERE id = $1 AND payment_status = $15
            "#,
        )
        .bind(booking.id)
        .bind(booking.trip_type.as_str())
        .bind(encode(&booking.legs, "legs")?)
        .bind(encode(&booking.travelers, "travelers")?)
        .bind(encode(&booking.contact, "contact")?)
        .bind(booking.total_amount_cents)
        .bind(&booking.currency)
        .bind(booking.status.as_str())
        .bind(booking.payment_status.as_str())
        .bind(&booking.payment_intent_id)
        .bind(booking.payment_completed_at)
        .bind(booking.cancelled_at)
        .bind(&booking.cancellation_reason)
        .bind(booking.updated_at)
        .bind(expected.as_str())
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(result.rows_affected() > 0)
    }

    async fn find_expired_pending(&self, cutoff: DateTime<Utc>) -> CoreResult<Vec<Booking>> {
        let rows = sqlx::query_as::<_, BookingRow>(
            r#"
            SELECT * FROM bookings
            WHERE status = 'PENDING' AND payment_status = 'PENDING' AND created_at < $1
            ORDER BY created_at
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;

        rows.into_iter().map(BookingRow::into_booking).collect()
    }
}
