use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{CoreError, CoreResult};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentProvider {
    Stripe,
    Paymob,
    Cash,
    Other,
}

/// Status of one payment attempt in the ledger
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentRecordStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Declined,
    Refunded,
    PartiallyRefunded,
    Cancelled,
    Expired,
}

impl PaymentRecordStatus {
    /// A COMPLETED record may only move on to a refund state; everything
    /// else about it is settled. Other statuses accept any transition.
    pub fn allows(&self, next: &PaymentRecordStatus) -> bool {
        match self {
            PaymentRecordStatus::Completed => matches!(
                next,
                PaymentRecordStatus::Completed
                    | PaymentRecordStatus::Refunded
                    | PaymentRecordStatus::PartiallyRefunded
            ),
            _ => true,
        }
    }
}

/// Outcome classification of a provider notification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentOutcome {
    Success,
    Pending,
    Failure,
}

/// Ledger entry for one attempt to pay a booking via one provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub id: Uuid,
    pub booking_id: Uuid,
    pub user_id: Uuid,
    pub amount_cents: i64,
    pub currency: String,
    pub provider: PaymentProvider,
    pub method: String,
    pub status: PaymentRecordStatus,
    /// Provider's transaction id. Unique across all records once set;
    /// this is the idempotency key for webhook reconciliation.
    pub transaction_id: Option<String>,
    pub payment_handle: Option<String>,
    pub provider_response: Option<serde_json::Value>,
    pub paid_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub refund_reason: Option<String>,
    pub failure_code: Option<String>,
    pub failure_message: Option<String>,
    /// Carries provider order id, integration id, handle expiry
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentRecord {
    pub fn new(
        booking_id: Uuid,
        user_id: Uuid,
        amount_cents: i64,
        currency: String,
        provider: PaymentProvider,
        method: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            booking_id,
            user_id,
            amount_cents,
            currency,
            provider,
            method,
            status: PaymentRecordStatus::Pending,
            transaction_id: None,
            payment_handle: None,
            provider_response: None,
            paid_at: None,
            refunded_at: None,
            refund_reason: None,
            failure_code: None,
            failure_message: None,
            metadata: serde_json::json!({}),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn provider_order_id(&self) -> Option<&str> {
        self.metadata.get("provider_order_id").and_then(|v| v.as_str())
    }

    pub fn set_provider_order_id(&mut self, provider_order_id: &str) {
        self.metadata["provider_order_id"] = serde_json::Value::from(provider_order_id);
    }
}

/// Client-usable handle returned when a payment is initiated
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentHandle {
    pub handle: String,
    pub provider_order_id: String,
    pub expires_at: Option<DateTime<Utc>>,
}

/// A provider's view of a transaction, as reported by its status API
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteTransaction {
    pub transaction_id: String,
    pub provider_order_id: Option<String>,
    pub outcome: PaymentOutcome,
    pub amount_cents: Option<i64>,
    pub currency: Option<String>,
    pub raw: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingDetails {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Which provider this gateway talks to
    fn provider(&self) -> PaymentProvider;

    /// Obtain a short-lived credential for subsequent calls
    async fn authenticate(&self) -> CoreResult<String>;

    /// Register a remote order; the same merchant order id may be
    /// registered more than once, the gateway does not deduplicate
    async fn register_order(
        &self,
        token: &str,
        merchant_order_id: &str,
        amount_cents: i64,
        currency: &str,
    ) -> CoreResult<String>;

    /// Request a client-usable payment handle (client secret / payment key)
    async fn request_payment_handle(
        &self,
        token: &str,
        amount_cents: i64,
        provider_order_id: &str,
        billing: &BillingDetails,
        currency: &str,
    ) -> CoreResult<PaymentHandle>;

    /// Fetch the provider's current view of a transaction.
    /// Manual reconciliation only, never called on the webhook path.
    async fn get_remote_status(
        &self,
        transaction_or_intent_id: &str,
        token: &str,
    ) -> CoreResult<RemoteTransaction>;
}

impl PaymentProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentProvider::Stripe => "STRIPE",
            PaymentProvider::Paymob => "PAYMOB",
            PaymentProvider::Cash => "CASH",
            PaymentProvider::Other => "OTHER",
        }
    }
}

impl std::str::FromStr for PaymentProvider {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        match s {
            "STRIPE" => Ok(PaymentProvider::Stripe),
            "PAYMOB" => Ok(PaymentProvider::Paymob),
            "CASH" => Ok(PaymentProvider::Cash),
            "OTHER" => Ok(PaymentProvider::Other),
            other => Err(CoreError::Storage(format!("unknown provider: {}", other))),
        }
    }
}

impl PaymentRecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentRecordStatus::Pending => "PENDING",
            PaymentRecordStatus::Processing => "PROCESSING",
            PaymentRecordStatus::Completed => "COMPLETED",
            PaymentRecordStatus::Failed => "FAILED",
            PaymentRecordStatus::Declined => "DECLINED",
            PaymentRecordStatus::Refunded => "REFUNDED",
            PaymentRecordStatus::PartiallyRefunded => "PARTIALLY_REFUNDED",
            PaymentRecordStatus::Cancelled => "CANCELLED",
            PaymentRecordStatus::Expired => "EXPIRED",
        }
    }
}

impl std::str::FromStr for PaymentRecordStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        match s {
            "PENDING" => Ok(PaymentRecordStatus::Pending),
            "PROCESSING" => Ok(PaymentRecordStatus::Processing),
            "COMPLETED" => Ok(PaymentRecordStatus::Completed),
            "FAILED" => Ok(PaymentRecordStatus::Failed),
            "DECLINED" => Ok(PaymentRecordStatus::Declined),
            "REFUNDED" => Ok(PaymentRecordStatus::Refunded),
            "PARTIALLY_REFUNDED" => Ok(PaymentRecordStatus::PartiallyRefunded),
            "CANCELLED" => Ok(PaymentRecordStatus::Cancelled),
            "EXPIRED" => Ok(PaymentRecordStatus::Expired),
            other => Err(CoreError::Storage(format!("unknown record status: {}", other))),
        }
    }
}
