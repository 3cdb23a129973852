//! Append-style ledger of payment attempts. One record per conceptual
//! provider transaction; provider notifications land here through an
//! idempotent upsert keyed on the transaction id.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use skyfare_core::payment::{PaymentProvider, PaymentRecord, PaymentRecordStatus};
use skyfare_core::repository::PaymentRepository;
use skyfare_core::{CoreError, CoreResult};

/// Fields needed to open a ledger entry. Optional fields are applied on
/// top of the defaults from [`PaymentRecord::new`].
#[derive(Debug, Clone)]
pub struct NewPayment {
    pub booking_id: Uuid,
    pub user_id: Uuid,
    pub amount_cents: i64,
    pub currency: String,
    pub provider: PaymentProvider,
    pub method: String,
    pub transaction_id: Option<String>,
    pub payment_handle: Option<String>,
    pub provider_order_id: Option<String>,
}

impl NewPayment {
    fn into_record(self) -> PaymentRecord {
        let mut record = PaymentRecord::new(
            self.booking_id,
            self.user_id,
            self.amount_cents,
            self.currency,
            self.provider,
            self.method,
        );
        record.transaction_id = self.transaction_id;
        record.payment_handle = self.payment_handle;
        if let Some(order_id) = self.provider_order_id.as_deref() {
            record.set_provider_order_id(order_id);
        }
        record
    }
}

/// Status patch applied when a provider notification or status poll
/// lands on a transaction.
#[derive(Debug, Clone)]
pub struct TransactionUpdate {
    pub status: PaymentRecordStatus,
    pub provider_response: Option<Value>,
    pub failure_code: Option<String>,
    pub failure_message: Option<String>,
}

impl TransactionUpdate {
    pub fn status_only(status: PaymentRecordStatus) -> Self {
        Self {
            status,
            provider_response: None,
            failure_code: None,
            failure_message: None,
        }
    }
}

pub struct PaymentLedger {
    payments: Arc<dyn PaymentRepository>,
}

impl PaymentLedger {
    pub fn new(payments: Arc<dyn PaymentRepository>) -> Self {
        Self { payments }
    }

    /// Open a PENDING entry for a fresh payment attempt.
    pub async fn create_payment(&self, new: NewPayment) -> CoreResult<PaymentRecord> {
        let record = new.into_record();
        self.payments.insert(&record).await?;
        info!(
            payment_id = %record.id,
            booking_id = %record.booking_id,
            provider = record.provider.as_str(),
            "opened ledger entry"
        );
        Ok(record)
    }

    /// Idempotency boundary for provider notifications. Resolution order:
    /// a record already carrying this transaction id, then an entry from
    /// initiation that knows only its provider order id (claimed by
    /// stamping the transaction id on it), then a lazily created record
    /// when the notification beat the initiation write entirely.
    pub async fn upsert_by_transaction_id(
        &self,
        transaction_id: &str,
        template: NewPayment,
        update: TransactionUpdate,
    ) -> CoreResult<PaymentRecord> {
        if let Some(record) = self.payments.find_by_transaction_id(transaction_id).await? {
            return self.apply_update(record, update).await;
        }

        if let Some(order_id) = template.provider_order_id.as_deref() {
            if let Some(mut record) = self.payments.find_by_provider_order_id(order_id).await? {
                if record.transaction_id.is_none() {
                    record.transaction_id = Some(transaction_id.to_string());
                    return self.apply_update(record, update).await;
                }
            }
        }

        let mut template = template;
        template.transaction_id = Some(transaction_id.to_string());
        let mut record = template.into_record();
        Self::patch(&mut record, update);
        self.payments.insert(&record).await?;
        info!(
            payment_id = %record.id,
            transaction_id,
            "notification arrived before initiation, created ledger entry"
        );
        Ok(record)
    }

    pub async fn find_by_id(&self, id: Uuid) -> CoreResult<Option<PaymentRecord>> {
        self.payments.find_by_id(id).await
    }

    pub async fn find_by_booking(&self, booking_id: Uuid) -> CoreResult<Vec<PaymentRecord>> {
        self.payments.find_by_booking(booking_id).await
    }

    pub async fn find_by_transaction_id(
        &self,
        transaction_id: &str,
    ) -> CoreResult<Option<PaymentRecord>> {
        self.payments.find_by_transaction_id(transaction_id).await
    }

    pub async fn find_by_provider_order_id(
        &self,
        provider_order_id: &str,
    ) -> CoreResult<Option<PaymentRecord>> {
        self.payments.find_by_provider_order_id(provider_order_id).await
    }

    /// Refund a completed payment, fully or in part. The ledger only
    /// records the decision; moving money is the operator's problem.
    pub async fn process_refund(
        &self,
        payment_id: Uuid,
        amount_cents: i64,
        reason: Option<String>,
    ) -> CoreResult<PaymentRecord> {
        let mut record = self
            .payments
            .find_by_id(payment_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("payment {} not found", payment_id)))?;

        if record.status != PaymentRecordStatus::Completed {
            return Err(CoreError::Conflict(format!(
                "payment {} is {} and cannot be refunded",
                payment_id,
                record.status.as_str()
            )));
        }
        if amount_cents <= 0 {
            return Err(CoreError::Validation("refund amount must be positive".into()));
        }
        if amount_cents > record.amount_cents {
            return Err(CoreError::Validation(format!(
                "refund of {} cents exceeds the original charge of {} cents",
                amount_cents, record.amount_cents
            )));
        }

        record.status = if amount_cents == record.amount_cents {
            PaymentRecordStatus::Refunded
        } else {
            PaymentRecordStatus::PartiallyRefunded
        };
        record.refunded_at = Some(Utc::now());
        record.refund_reason = reason;
        record.metadata["refund_amount_cents"] = Value::from(amount_cents);
        record.updated_at = Utc::now();
        self.payments.update(&record).await?;

        info!(
            payment_id = %record.id,
            amount_cents,
            status = record.status.as_str(),
            "refund recorded"
        );
        Ok(record)
    }

    async fn apply_update(
        &self,
        mut record: PaymentRecord,
        update: TransactionUpdate,
    ) -> CoreResult<PaymentRecord> {
        if !record.status.allows(&update.status) {
            warn!(
                payment_id = %record.id,
                current = record.status.as_str(),
                proposed = update.status.as_str(),
                "ignoring status regression on settled payment"
            );
            return Ok(record);
        }
        Self::patch(&mut record, update);
        self.payments.update(&record).await?;
        Ok(record)
    }

    fn patch(record: &mut PaymentRecord, update: TransactionUpdate) {
        record.status = update.status;
        let now = Utc::now();
        match record.status {
            PaymentRecordStatus::Completed => {
                if record.paid_at.is_none() {
                    record.paid_at = Some(now);
                }
            }
            PaymentRecordStatus::Refunded | PaymentRecordStatus::PartiallyRefunded => {
                if record.refunded_at.is_none() {
                    record.refunded_at = Some(now);
                }
            }
            _ => {}
        }
        if let Some(response) = update.provider_response {
            record.provider_response = Some(response);
        }
        if update.failure_code.is_some() {
            record.failure_code = update.failure_code;
        }
        if update.failure_message.is_some() {
            record.failure_message = update.failure_message;
        }
        record.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skyfare_store::memory::InMemoryPaymentRepository;

    fn ledger() -> (PaymentLedger, Arc<InMemoryPaymentRepository>) {
        let repo = Arc::new(InMemoryPaymentRepository::new());
        (PaymentLedger::new(repo.clone()), repo)
    }

    fn new_payment(transaction_id: Option<&str>, provider_order_id: Option<&str>) -> NewPayment {
        NewPayment {
            booking_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            amount_cents: 150_00,
            currency: "USD".to_string(),
            provider: PaymentProvider::Paymob,
            method: "CARD".to_string(),
            transaction_id: transaction_id.map(str::to_owned),
            payment_handle: None,
            provider_order_id: provider_order_id.map(str::to_owned),
        }
    }

    #[tokio::test]
    async fn upsert_creates_then_updates_one_record() {
        let (ledger, _repo) = ledger();

        let first = ledger
            .upsert_by_transaction_id(
                "txn-1",
                new_payment(None, Some("order-1")),
                TransactionUpdate::status_only(PaymentRecordStatus::Processing),
            )
            .await
            .unwrap();
        assert_eq!(first.status, PaymentRecordStatus::Processing);
        assert_eq!(first.transaction_id.as_deref(), Some("txn-1"));

        let second = ledger
            .upsert_by_transaction_id(
                "txn-1",
                new_payment(None, Some("order-1")),
                TransactionUpdate::status_only(PaymentRecordStatus::Completed),
            )
            .await
            .unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(second.status, PaymentRecordStatus::Completed);
        assert!(second.paid_at.is_some());

        let all = ledger.find_by_booking(first.booking_id).await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn completed_record_is_never_downgraded() {
        let (ledger, _repo) = ledger();
        ledger
            .upsert_by_transaction_id(
                "txn-2",
                new_payment(None, None),
                TransactionUpdate::status_only(PaymentRecordStatus::Completed),
            )
            .await
            .unwrap();

        let after = ledger
            .upsert_by_transaction_id(
                "txn-2",
                new_payment(None, None),
                TransactionUpdate::status_only(PaymentRecordStatus::Processing),
            )
            .await
            .unwrap();
        assert_eq!(after.status, PaymentRecordStatus::Completed);
        assert!(after.paid_at.is_some());
    }

    #[tokio::test]
    async fn upsert_claims_initiation_entry_by_provider_order_id() {
        let (ledger, _repo) = ledger();
        let opened = ledger
            .create_payment(new_payment(None, Some("order-77")))
            .await
            .unwrap();
        assert!(opened.transaction_id.is_none());

        let settled = ledger
            .upsert_by_transaction_id(
                "txn-77",
                new_payment(None, Some("order-77")),
                TransactionUpdate::status_only(PaymentRecordStatus::Completed),
            )
            .await
            .unwrap();
        assert_eq!(settled.id, opened.id);
        assert_eq!(settled.transaction_id.as_deref(), Some("txn-77"));

        let all = ledger.find_by_booking(opened.booking_id).await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn paid_at_is_stamped_once() {
        let (ledger, _repo) = ledger();
        let first = ledger
            .upsert_by_transaction_id(
                "txn-3",
                new_payment(None, None),
                TransactionUpdate::status_only(PaymentRecordStatus::Completed),
            )
            .await
            .unwrap();
        let stamped = first.paid_at.unwrap();

        let second = ledger
            .upsert_by_transaction_id(
                "txn-3",
                new_payment(None, None),
                TransactionUpdate::status_only(PaymentRecordStatus::Completed),
            )
            .await
            .unwrap();
        assert_eq!(second.paid_at.unwrap(), stamped);
    }

    #[tokio::test]
    async fn full_refund_marks_record_refunded() {
        let (ledger, _repo) = ledger();
        let paid = ledger
            .upsert_by_transaction_id(
                "txn-4",
                new_payment(None, None),
                TransactionUpdate::status_only(PaymentRecordStatus::Completed),
            )
            .await
            .unwrap();

        let refunded = ledger
            .process_refund(paid.id, 150_00, Some("schedule change".to_string()))
            .await
            .unwrap();
        assert_eq!(refunded.status, PaymentRecordStatus::Refunded);
        assert!(refunded.refunded_at.is_some());
        assert_eq!(refunded.refund_reason.as_deref(), Some("schedule change"));
    }

    #[tokio::test]
    async fn partial_refund_marks_record_partially_refunded() {
        let (ledger, _repo) = ledger();
        let paid = ledger
            .upsert_by_transaction_id(
                "txn-5",
                new_payment(None, None),
                TransactionUpdate::status_only(PaymentRecordStatus::Completed),
            )
            .await
            .unwrap();

        let refunded = ledger.process_refund(paid.id, 50_00, None).await.unwrap();
        assert_eq!(refunded.status, PaymentRecordStatus::PartiallyRefunded);
        assert_eq!(refunded.metadata["refund_amount_cents"], 5000);
    }

    #[tokio::test]
    async fn refund_above_original_amount_is_rejected() {
        let (ledger, _repo) = ledger();
        let paid = ledger
            .upsert_by_transaction_id(
                "txn-6",
                new_payment(None, None),
                TransactionUpdate::status_only(PaymentRecordStatus::Completed),
            )
            .await
            .unwrap();

        let err = ledger.process_refund(paid.id, 200_00, None).await.unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }

    #[tokio::test]
    async fn refund_of_pending_payment_is_rejected() {
        let (ledger, _repo) = ledger();
        let pending = ledger.create_payment(new_payment(None, None)).await.unwrap();

        let err = ledger.process_refund(pending.id, 150_00, None).await.unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn refund_of_unknown_payment_is_not_found() {
        let (ledger, _repo) = ledger();
        let err = ledger
            .process_refund(Uuid::new_v4(), 10_00, None)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }
}
