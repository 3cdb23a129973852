//! Card-rail provider speaking the Stripe dialect: form-encoded
//! payment intents, the secret key as a bearer token, and signed
//! webhook deliveries.

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use skyfare_core::payment::{
    BillingDetails, PaymentGateway, PaymentHandle, PaymentOutcome, PaymentProvider,
    RemoteTransaction,
};
use skyfare_core::{CoreError, CoreResult};

use super::{require_success, send_with_retry, RetryPolicy, REQUEST_TIMEOUT};

type HmacSha256 = Hmac<Sha256>;

/// Accept events signed up to five minutes away from our clock.
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub webhook_secret: String,
    pub api_base: String,
}

pub struct StripeGateway {
    config: StripeConfig,
    http: reqwest::Client,
    retry: RetryPolicy,
}

impl StripeGateway {
    pub fn new(config: StripeConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("Failed to create HTTP client");
        Self {
            config,
            http,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct StripeIntent {
    id: String,
    client_secret: Option<String>,
    status: String,
    amount: Option<i64>,
    currency: Option<String>,
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    fn provider(&self) -> PaymentProvider {
        PaymentProvider::Stripe
    }

    /// The secret key doubles as the call credential; there is no
    /// separate auth round-trip on this rail.
    async fn authenticate(&self) -> CoreResult<String> {
        Ok(self.config.secret_key.clone())
    }

    /// Create a payment intent. The intent id is this provider's order
    /// id and, once the customer pays, its transaction id as well.
    async fn register_order(
        &self,
        token: &str,
        merchant_order_id: &str,
        amount_cents: i64,
        currency: &str,
    ) -> CoreResult<String> {
        let url = format!("{}/v1/payment_intents", self.config.api_base);
        let params = [
            ("amount", amount_cents.to_string()),
            ("currency", currency.to_lowercase()),
            ("metadata[merchant_order_id]", merchant_order_id.to_string()),
            ("automatic_payment_methods[enabled]", "true".to_string()),
        ];
        let resp = send_with_retry(&self.retry, "stripe create intent", || {
            self.http.post(&url).bearer_auth(token).form(&params).send()
        })
        .await?;
        let resp = require_success("stripe", "create intent", resp).await?;
        let intent: StripeIntent = resp.json().await.map_err(|e| {
            CoreError::ProviderRejected(format!("stripe returned an unreadable intent: {}", e))
        })?;
        Ok(intent.id)
    }

    async fn request_payment_handle(
        &self,
        token: &str,
        _amount_cents: i64,
        provider_order_id: &str,
        _billing: &BillingDetails,
        _currency: &str,
    ) -> CoreResult<PaymentHandle> {
        let url = format!(
            "{}/v1/payment_intents/{}",
            self.config.api_base, provider_order_id
        );
        let resp = send_with_retry(&self.retry, "stripe retrieve intent", || {
            self.http.get(&url).bearer_auth(token).send()
        })
        .await?;
        let resp = require_success("stripe", "retrieve intent", resp).await?;
        let intent: StripeIntent = resp.json().await.map_err(|e| {
            CoreError::ProviderRejected(format!("stripe returned an unreadable intent: {}", e))
        })?;
        let handle = intent.client_secret.ok_or_else(|| {
            CoreError::ProviderRejected("stripe intent carries no client secret".into())
        })?;
        Ok(PaymentHandle {
            handle,
            provider_order_id: intent.id,
            expires_at: None,
        })
    }

    async fn get_remote_status(
        &self,
        transaction_or_intent_id: &str,
        token: &str,
    ) -> CoreResult<RemoteTransaction> {
        let url = format!(
            "{}/v1/payment_intents/{}",
            self.config.api_base, transaction_or_intent_id
        );
        let resp = send_with_retry(&self.retry, "stripe intent status", || {
            self.http.get(&url).bearer_auth(token).send()
        })
        .await?;
        let resp = require_success("stripe", "intent status", resp).await?;
        let raw: serde_json::Value = resp.json().await.map_err(|e| {
            CoreError::ProviderRejected(format!("stripe returned an unreadable intent: {}", e))
        })?;
        let intent: StripeIntent = serde_json::from_value(raw.clone()).map_err(|e| {
            CoreError::ProviderRejected(format!("stripe returned an unreadable intent: {}", e))
        })?;
        Ok(RemoteTransaction {
            transaction_id: intent.id.clone(),
            provider_order_id: Some(intent.id),
            outcome: classify_intent_status(&intent.status),
            amount_cents: intent.amount,
            currency: intent.currency,
            raw,
        })
    }
}

/// Everything between creation and a terminal state counts as pending:
/// requires_payment_method, requires_action, processing and friends.
pub fn classify_intent_status(status: &str) -> PaymentOutcome {
    match status {
        "succeeded" => PaymentOutcome::Success,
        "canceled" => PaymentOutcome::Failure,
        _ => PaymentOutcome::Pending,
    }
}

/// Signed event envelope as delivered to the webhook endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct StripeEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub type_: String,
    pub data: StripeEventData,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StripeEventData {
    pub object: StripeIntentObject,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StripeIntentObject {
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub amount: Option<i64>,
    #[serde(default)]
    pub amount_received: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
    #[serde(default)]
    pub last_payment_error: Option<serde_json::Value>,
}

impl StripeEvent {
    /// Map the event type to an outcome; None is an event kind this
    /// service does not act on.
    pub fn outcome(&self) -> Option<PaymentOutcome> {
        match self.type_.as_str() {
            "payment_intent.succeeded" => Some(PaymentOutcome::Success),
            "payment_intent.processing" => Some(PaymentOutcome::Pending),
            "payment_intent.payment_failed" | "payment_intent.canceled" => {
                Some(PaymentOutcome::Failure)
            }
            _ => None,
        }
    }

    pub fn merchant_order_id(&self) -> Option<&str> {
        self.data
            .object
            .metadata
            .as_ref()?
            .get("merchant_order_id")?
            .as_str()
    }

    pub fn failure_message(&self) -> Option<String> {
        self.data
            .object
            .last_payment_error
            .as_ref()?
            .get("message")?
            .as_str()
            .map(str::to_owned)
    }
}

/// Verify a `Stripe-Signature` header against the raw request body.
/// The signed payload is `{timestamp}.{body}` over the exact bytes as
/// delivered; any re-serialization would change the digest.
pub fn verify_signature(secret: &str, payload: &[u8], header: &str) -> CoreResult<()> {
    let mut timestamp: Option<i64> = None;
    let mut candidates: Vec<&str> = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse().ok(),
            Some(("v1", value)) => candidates.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or_else(|| {
        CoreError::SignatureRejected("signature header carries no timestamp".into())
    })?;
    if candidates.is_empty() {
        return Err(CoreError::SignatureRejected(
            "signature header carries no v1 signature".into(),
        ));
    }

    let age = Utc::now().timestamp() - timestamp;
    if age.abs() > SIGNATURE_TOLERANCE_SECS {
        return Err(CoreError::SignatureRejected(format!(
            "signature timestamp outside tolerance ({}s away)",
            age
        )));
    }

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| CoreError::SignatureRejected("webhook secret is unusable".into()))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);

    for candidate in &candidates {
        if let Ok(bytes) = hex::decode(candidate) {
            if mac.clone().verify_slice(&bytes).is_ok() {
                return Ok(());
            }
        }
    }
    Err(CoreError::SignatureRejected(
        "no v1 signature matched the payload".into(),
    ))
}
