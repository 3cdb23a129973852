use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;
use std::str::FromStr;
use uuid::Uuid;

use skyfare_core::payment::{PaymentProvider, PaymentRecord, PaymentRecordStatus};
use skyfare_core::repository::PaymentRepository;
use skyfare_core::{CoreError, CoreResult};

pub struct PgPaymentRepository {
    pool: PgPool,
}

impl PgPaymentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// Internal struct for type-safe querying
#[derive(sqlx::FromRow)]
struct PaymentRow {
    id: Uuid,
    booking_id: Uuid,
    user_id: Uuid,
    amount_cents: i64,
    currency: String,
    provider: String,
    method: String,
    status: String,
    transaction_id: Option<String>,
    payment_handle: Option<String>,
    provider_response: Option<Value>,
    paid_at: Option<DateTime<Utc>>,
    refunded_at: Option<DateTime<Utc>>,
    refund_reason: Option<String>,
    failure_code: Option<String>,
    failure_message: Option<String>,
    metadata: Value,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl PaymentRow {
    fn into_record(self) -> CoreResult<PaymentRecord> {
        Ok(PaymentRecord {
            id: self.id,
            booking_id: self.booking_id,
            user_id: self.user_id,
            amount_cents: self.amount_cents,
            currency: self.currency,
            provider: PaymentProvider::from_str(&self.provider)?,
            method: self.method,
            status: PaymentRecordStatus::from_str(&self.status)?,
            transaction_id: self.transaction_id,
            payment_handle: self.payment_handle,
            provider_response: self.provider_response,
            paid_at: self.paid_at,
            refunded_at: self.refunded_at,
            refund_reason: self.refund_reason,
            failure_code: self.failure_code,
            failure_message: self.failure_message,
            metadata: self.metadata,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

fn storage_err(e: sqlx::Error) -> CoreError {
    CoreError::Storage(e.to_string())
}

fn constraint_err(e: sqlx::Error, what: &str) -> CoreError {
    if let sqlx::Error::Database(db) = &e {
        if db.is_unique_violation() {
            return CoreError::Conflict(format!("{} already recorded", what));
        }
    }
    CoreError::Storage(e.to_string())
}

#[async_trait]
impl PaymentRepository for PgPaymentRepository {
    async fn insert(&self, record: &PaymentRecord) -> CoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO payments
                (id, booking_id, user_id, amount_cents, currency, provider, method, status,
                 transaction_id, payment_handle, provider_response, paid_at, refunded_at,
                 refund_reason, failure_code, failure_message, metadata, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
            "#,
        )
        .bind(record.id)
        .bind(record.booking_id)
        .bind(record.user_id)
        .bind(record.amount_cents)
        .bind(&record.currency)
        .bind(record.provider.as_str())
        .bind(&record.method)
        .bind(record.status.as_str())
        .bind(&record.transaction_id)
        .bind(&record.payment_handle)
        .bind(&record.provider_response)
        .bind(record.paid_at)
        .bind(record.refunded_at)
        .bind(&record.refund_reason)
        .bind(&record.failure_code)
        .bind(&record.failure_message)
        .bind(&record.metadata)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| constraint_err(e, "transaction id"))?;

        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> CoreResult<Option<PaymentRecord>> {
        let row = sqlx::query_as::<_, PaymentRow>("SELECT * FROM payments WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;

        row.map(PaymentRow::into_record).transpose()
    }

    async fn find_by_booking(&self, booking_id: Uuid) -> CoreResult<Vec<PaymentRecord>> {
        // Oldest first; callers walk the attempts in creation order
        let rows = sqlx::query_as::<_, PaymentRow>(
            "SELECT * FROM payments WHERE booking_id = $1 ORDER BY created_at",
        )
        .bind(booking_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;

        rows.into_iter().map(PaymentRow::into_record).collect()
    }

    async fn find_by_transaction_id(
        &self,
        transaction_id: &str,
    ) -> CoreResult<Option<PaymentRecord>> {
        let row =
            sqlx::query_as::<_, PaymentRow>("SELECT * FROM payments WHERE transaction_id = $1")
                .bind(transaction_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(storage_err)?;

        row.map(PaymentRow::into_record).transpose()
    }

    async fn find_by_provider_order_id(
        &self,
        provider_order_id: &str,
    ) -> CoreResult<Option<PaymentRecord>> {
        let row = sqlx::query_as::<_, PaymentRow>(
            r#"
            SELECT * FROM payments
            WHERE metadata->>'provider_order_id' = $1
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(provider_order_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;

        row.map(PaymentRow::into_record).transpose()
    }

    async fn update(&self, record: &PaymentRecord) -> CoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE payments SET
                status = $2, transaction_id = $3, payment_handle = $4, provider_response = $5,
                paid_at = $6, refunded_at = $7, refund_reason = $8, failure_code = $9,
                failure_message = $10, metadata = $11, updated_at = $12
            WHERE id = $1
            "#,
        )
        .bind(record.id)
        .bind(record.status.as_str())
        .bind(&record.transaction_id)
        .bind(&record.payment_handle)
        .bind(&record.provider_response)
        .bind(record.paid_at)
        .bind(record.refunded_at)
        .bind(&record.refund_reason)
        .bind(&record.failure_code)
        .bind(&record.failure_message)
        .bind(&record.metadata)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| constraint_err(e, "transaction id"))?;

        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound(format!("payment {} not found", record.id)));
        }
        Ok(())
    }
}
