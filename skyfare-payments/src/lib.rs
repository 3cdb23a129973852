pub mod ledger;
pub mod orchestrator;
pub mod providers;
pub mod reconciler;

pub use ledger::PaymentLedger;
pub use orchestrator::PaymentOrchestrator;
pub use reconciler::{ReconcileOutcome, ReconcilerConfig, VerificationMode, WebhookReconciler};
