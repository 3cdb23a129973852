//! Provider clients and the HTTP plumbing they share.

pub mod paymob;
pub mod stripe;

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use skyfare_core::payment::{
    BillingDetails, PaymentGateway, PaymentHandle, PaymentOutcome, PaymentProvider,
    RemoteTransaction,
};
use skyfare_core::{CoreError, CoreResult};

/// Hard ceiling on any single provider request.
pub(crate) const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Retry budget for transient provider failures. Client errors are
/// never retried; a 4xx answer will not improve on replay.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// First retry waits the initial delay, each later one doubles it.
    fn backoff_for(&self, attempt: u32) -> Duration {
        self.initial_backoff * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

fn is_transient(err: &reqwest::Error) -> bool {
    err.is_connect() || err.is_timeout()
}

/// Run a provider request under the retry policy. Server errors and
/// connection failures are retried with doubling backoff; any other
/// response is handed back for the caller to inspect.
pub(crate) async fn send_with_retry<F, Fut>(
    policy: &RetryPolicy,
    op: &str,
    mut send: F,
) -> CoreResult<reqwest::Response>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<reqwest::Response, reqwest::Error>>,
{
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        match send().await {
            Ok(resp) if resp.status().is_server_error() => {
                if attempt > policy.max_retries {
                    return Err(CoreError::ProviderUnavailable(format!(
                        "{} failed with {} after {} attempts",
                        op,
                        resp.status(),
                        attempt
                    )));
                }
                let delay = policy.backoff_for(attempt);
                warn!(
                    op,
                    status = %resp.status(),
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "provider returned a server error, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Ok(resp) => return Ok(resp),
            Err(err) if is_transient(&err) => {
                if attempt > policy.max_retries {
                    return Err(CoreError::ProviderUnavailable(format!(
                        "{} unreachable after {} attempts: {}",
                        op, attempt, err
                    )));
                }
                let delay = policy.backoff_for(attempt);
                warn!(
                    op,
                    error = %err,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "provider unreachable, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => {
                return Err(CoreError::ProviderUnavailable(format!(
                    "{} request failed: {}",
                    op, err
                )))
            }
        }
    }
}

/// Map a non-2xx answer to a terminal error, keeping a slice of the
/// body for the log trail.
pub(crate) async fn require_success(
    provider: &str,
    op: &str,
    resp: reqwest::Response,
) -> CoreResult<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    let snippet: String = body.chars().take(300).collect();
    Err(CoreError::ProviderRejected(format!(
        "{} {} returned {}: {}",
        provider, op, status, snippet
    )))
}

/// The set of gateways this deployment can take payments through,
/// keyed by provider.
#[derive(Clone, Default)]
pub struct GatewayRegistry {
    gateways: HashMap<PaymentProvider, Arc<dyn PaymentGateway>>,
}

impl GatewayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, gateway: Arc<dyn PaymentGateway>) -> Self {
        self.gateways.insert(gateway.provider(), gateway);
        self
    }

    pub fn get(&self, provider: &PaymentProvider) -> CoreResult<Arc<dyn PaymentGateway>> {
        self.gateways.get(provider).cloned().ok_or_else(|| {
            CoreError::Validation(format!(
                "unsupported payment provider: {}",
                provider.as_str()
            ))
        })
    }
}

/// Gateway double for tests and development. Hands out deterministic
/// order ids and handles, and reports whatever remote outcome it was
/// last told to.
pub struct MockGateway {
    provider: PaymentProvider,
    remote_outcome: tokio::sync::RwLock<PaymentOutcome>,
    pub order_calls: AtomicUsize,
    pub status_calls: AtomicUsize,
}

impl MockGateway {
    pub fn new(provider: PaymentProvider) -> Self {
        Self {
            provider,
            remote_outcome: tokio::sync::RwLock::new(PaymentOutcome::Pending),
            order_calls: AtomicUsize::new(0),
            status_calls: AtomicUsize::new(0),
        }
    }

    pub async fn set_remote_outcome(&self, outcome: PaymentOutcome) {
        *self.remote_outcome.write().await = outcome;
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    fn provider(&self) -> PaymentProvider {
        self.provider.clone()
    }

    async fn authenticate(&self) -> CoreResult<String> {
        Ok("mock-token".to_string())
    }

    async fn register_order(
        &self,
        _token: &str,
        merchant_order_id: &str,
        _amount_cents: i64,
        _currency: &str,
    ) -> CoreResult<String> {
        self.order_calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("mock-order-{}", merchant_order_id))
    }

    async fn request_payment_handle(
        &self,
        _token: &str,
        _amount_cents: i64,
        provider_order_id: &str,
        _billing: &BillingDetails,
        _currency: &str,
    ) -> CoreResult<PaymentHandle> {
        Ok(PaymentHandle {
            handle: format!("mock-handle-{}", provider_order_id),
            provider_order_id: provider_order_id.to_string(),
            expires_at: None,
        })
    }

    async fn get_remote_status(
        &self,
        transaction_or_intent_id: &str,
        _token: &str,
    ) -> CoreResult<RemoteTransaction> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let outcome = *self.remote_outcome.read().await;
        Ok(RemoteTransaction {
            transaction_id: transaction_or_intent_id.to_string(),
            provider_order_id: None,
            outcome,
            amount_cents: None,
            currency: None,
            raw: serde_json::json!({ "mock": true, "id": transaction_or_intent_id }),
        })
    }
}
