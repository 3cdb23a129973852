//! Regional wallet/card provider speaking the Paymob dialect: a
//! three-step auth/order/payment-key handshake and HMAC-authenticated
//! transaction callbacks.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha512;
use tokio::sync::Mutex;

use skyfare_core::payment::{
    BillingDetails, PaymentGateway, PaymentHandle, PaymentOutcome, PaymentProvider,
    RemoteTransaction,
};
use skyfare_core::{CoreError, CoreResult};

use super::{require_success, send_with_retry, RetryPolicy, REQUEST_TIMEOUT};

type HmacSha512 = Hmac<Sha512>;

/// Provider auth tokens live for an hour; refresh well before that.
const TOKEN_TTL_SECS: i64 = 3000;
/// Payment keys handed to the client expire after this long.
const PAYMENT_KEY_TTL_SECS: i64 = 3600;

#[derive(Debug, Clone)]
pub struct PaymobConfig {
    pub api_key: String,
    pub hmac_secret: String,
    pub integration_id: i64,
    pub api_base: String,
}

struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

pub struct PaymobGateway {
    config: PaymobConfig,
    http: reqwest::Client,
    retry: RetryPolicy,
    token: Mutex<Option<CachedToken>>,
}

impl PaymobGateway {
    pub fn new(config: PaymobConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("Failed to create HTTP client");
        Self {
            config,
            http,
            retry: RetryPolicy::default(),
            token: Mutex::new(None),
        }
    }
}

#[derive(Debug, Deserialize)]
struct AuthResponse {
    token: String,
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct PaymentKeyResponse {
    token: String,
}

#[async_trait]
impl PaymentGateway for PaymobGateway {
    fn provider(&self) -> PaymentProvider {
        PaymentProvider::Paymob
    }

    /// Exchange the API key for a short-lived token, reusing the cached
    /// one while it is still fresh.
    async fn authenticate(&self) -> CoreResult<String> {
        {
            let cached = self.token.lock().await;
            if let Some(entry) = cached.as_ref() {
                if entry.expires_at > Utc::now() {
                    return Ok(entry.token.clone());
                }
            }
        }

        let url = format!("{}/api/auth/tokens", self.config.api_base);
        let body = serde_json::json!({ "api_key": self.config.api_key });
        let resp = send_with_retry(&self.retry, "paymob auth", || {
            self.http.post(&url).json(&body).send()
        })
        .await?;
        let resp = require_success("paymob", "auth", resp).await?;
        let auth: AuthResponse = resp.json().await.map_err(|e| {
            CoreError::ProviderRejected(format!("paymob returned an unreadable token: {}", e))
        })?;

        let mut cached = self.token.lock().await;
        *cached = Some(CachedToken {
            token: auth.token.clone(),
            expires_at: Utc::now() + Duration::seconds(TOKEN_TTL_SECS),
        });
        Ok(auth.token)
    }

    async fn register_order(
        &self,
        token: &str,
        merchant_order_id: &str,
        amount_cents: i64,
        currency: &str,
    ) -> CoreResult<String> {
        let url = format!("{}/api/ecommerce/orders", self.config.api_base);
        let body = serde_json::json!({
            "auth_token": token,
            "delivery_needed": false,
            "amount_cents": amount_cents,
            "currency": currency,
            "merchant_order_id": merchant_order_id,
            "items": [],
        });
        let resp = send_with_retry(&self.retry, "paymob register order", || {
            self.http.post(&url).json(&body).send()
        })
        .await?;
        let resp = require_success("paymob", "register order", resp).await?;
        let order: OrderResponse = resp.json().await.map_err(|e| {
            CoreError::ProviderRejected(format!("paymob returned an unreadable order: {}", e))
        })?;
        Ok(order.id.to_string())
    }

    async fn request_payment_handle(
        &self,
        token: &str,
        amount_cents: i64,
        provider_order_id: &str,
        billing: &BillingDetails,
        currency: &str,
    ) -> CoreResult<PaymentHandle> {
        let order_id: i64 = provider_order_id.parse().map_err(|_| {
            CoreError::Validation(format!(
                "paymob order id must be numeric, got {}",
                provider_order_id
            ))
        })?;
        // The provider rejects empty billing fields, so absent ones are
        // filled with its conventional "NA" placeholder.
        let billing_data = serde_json::json!({
            "first_name": billing.first_name,
            "last_name": billing.last_name,
            "email": billing.email,
            "phone_number": billing.phone.as_deref().unwrap_or("NA"),
            "apartment": "NA",
            "floor": "NA",
            "street": "NA",
            "building": "NA",
            "shipping_method": "NA",
            "postal_code": "NA",
            "city": "NA",
            "country": "NA",
            "state": "NA",
        });
        let body = serde_json::json!({
            "auth_token": token,
            "amount_cents": amount_cents,
            "expiration": PAYMENT_KEY_TTL_SECS,
            "order_id": order_id,
            "billing_data": billing_data,
            "currency": currency,
            "integration_id": self.config.integration_id,
        });

        let url = format!("{}/api/acceptance/payment_keys", self.config.api_base);
        let resp = send_with_retry(&self.retry, "paymob payment key", || {
            self.http.post(&url).json(&body).send()
        })
        .await?;
        let resp = require_success("paymob", "payment key", resp).await?;
        let key: PaymentKeyResponse = resp.json().await.map_err(|e| {
            CoreError::ProviderRejected(format!("paymob returned an unreadable payment key: {}", e))
        })?;

        Ok(PaymentHandle {
            handle: key.token,
            provider_order_id: provider_order_id.to_string(),
            expires_at: Some(Utc::now() + Duration::seconds(PAYMENT_KEY_TTL_SECS)),
        })
    }

    async fn get_remote_status(
        &self,
        transaction_or_intent_id: &str,
        token: &str,
    ) -> CoreResult<RemoteTransaction> {
        let url = format!(
            "{}/api/acceptance/transactions/{}",
            self.config.api_base, transaction_or_intent_id
        );
        let resp = send_with_retry(&self.retry, "paymob transaction status", || {
            self.http.get(&url).bearer_auth(token).send()
        })
        .await?;
        let resp = require_success("paymob", "transaction status", resp).await?;
        let raw: serde_json::Value = resp.json().await.map_err(|e| {
            CoreError::ProviderRejected(format!("paymob returned an unreadable transaction: {}", e))
        })?;
        let txn: PaymobTransaction = serde_json::from_value(raw.clone()).map_err(|e| {
            CoreError::ProviderRejected(format!("paymob returned an unreadable transaction: {}", e))
        })?;
        Ok(RemoteTransaction {
            transaction_id: txn.id.to_string(),
            provider_order_id: Some(txn.order.id.to_string()),
            outcome: classify_transaction(&txn),
            amount_cents: Some(txn.amount_cents),
            currency: if txn.currency.is_empty() {
                None
            } else {
                Some(txn.currency.clone())
            },
            raw,
        })
    }
}

pub fn classify_transaction(txn: &PaymobTransaction) -> PaymentOutcome {
    if txn.success && !txn.pending {
        PaymentOutcome::Success
    } else if txn.pending {
        PaymentOutcome::Pending
    } else {
        PaymentOutcome::Failure
    }
}

/// Callback envelope posted to the webhook endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct PaymobEvent {
    #[serde(rename = "type")]
    pub type_: String,
    pub obj: PaymobTransaction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymobTransaction {
    pub id: i64,
    pub amount_cents: i64,
    #[serde(default)]
    pub currency: String,
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub pending: bool,
    #[serde(default)]
    pub error_occured: bool,
    #[serde(default)]
    pub is_auth: bool,
    #[serde(default)]
    pub is_capture: bool,
    #[serde(default)]
    pub is_refunded: bool,
    #[serde(default)]
    pub is_standalone_payment: bool,
    #[serde(default)]
    pub is_voided: bool,
    #[serde(default)]
    pub is_3d_secure: bool,
    #[serde(default)]
    pub has_parent_transaction: bool,
    #[serde(default)]
    pub integration_id: i64,
    #[serde(default)]
    pub owner: i64,
    #[serde(default)]
    pub created_at: String,
    pub order: PaymobOrder,
    #[serde(default)]
    pub source_data: PaymobSourceData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymobOrder {
    pub id: i64,
    #[serde(default)]
    pub merchant_order_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PaymobSourceData {
    #[serde(default)]
    pub pan: String,
    #[serde(default)]
    pub sub_type: String,
    #[serde(default, rename = "type")]
    pub type_: String,
}

/// The provider signs the concatenation of these fields in this fixed
/// lexicographic order, booleans rendered as "true"/"false".
pub fn transaction_hmac_payload(txn: &PaymobTransaction) -> String {
    let mut payload = String::new();
    payload.push_str(&txn.amount_cents.to_string());
    payload.push_str(&txn.created_at);
    payload.push_str(&txn.currency);
    payload.push_str(bool_str(txn.error_occured));
    payload.push_str(bool_str(txn.has_parent_transaction));
    payload.push_str(&txn.id.to_string());
    payload.push_str(&txn.integration_id.to_string());
    payload.push_str(bool_str(txn.is_3d_secure));
    payload.push_str(bool_str(txn.is_auth));
    payload.push_str(bool_str(txn.is_capture));
    payload.push_str(bool_str(txn.is_refunded));
    payload.push_str(bool_str(txn.is_standalone_payment));
    payload.push_str(bool_str(txn.is_voided));
    payload.push_str(&txn.order.id.to_string());
    payload.push_str(&txn.owner.to_string());
    payload.push_str(bool_str(txn.pending));
    payload.push_str(&txn.source_data.pan);
    payload.push_str(&txn.source_data.sub_type);
    payload.push_str(&txn.source_data.type_);
    payload.push_str(bool_str(txn.success));
    payload
}

fn bool_str(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

pub fn compute_hmac(secret: &str, txn: &PaymobTransaction) -> CoreResult<String> {
    let mut mac = HmacSha512::new_from_slice(secret.as_bytes())
        .map_err(|_| CoreError::SignatureRejected("hmac secret is unusable".into()))?;
    mac.update(transaction_hmac_payload(txn).as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Verify the `hmac` value delivered alongside a callback.
pub fn verify_hmac(secret: &str, txn: &PaymobTransaction, supplied: &str) -> CoreResult<()> {
    let mut mac = HmacSha512::new_from_slice(secret.as_bytes())
        .map_err(|_| CoreError::SignatureRejected("hmac secret is unusable".into()))?;
    mac.update(transaction_hmac_payload(txn).as_bytes());
    let bytes = hex::decode(supplied)
        .map_err(|_| CoreError::SignatureRejected("hmac value is not valid hex".into()))?;
    mac.verify_slice(&bytes)
        .map_err(|_| CoreError::SignatureRejected("transaction hmac does not match".into()))
}
