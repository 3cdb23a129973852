use std::sync::Arc;

use skyfare_booking::BookingLifecycle;
use skyfare_payments::{PaymentLedger, PaymentOrchestrator, WebhookReconciler};

#[derive(Clone)]
pub struct AuthConfig {
    pub secret: String,
    pub expiration: u64,
}

#[derive(Clone)]
pub struct AppState {
    pub lifecycle: Arc<BookingLifecycle>,
    pub orchestrator: Arc<PaymentOrchestrator>,
    pub reconciler: Arc<WebhookReconciler>,
    pub ledger: Arc<PaymentLedger>,
    pub auth: AuthConfig,
}
