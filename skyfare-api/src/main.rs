use std::net::SocketAddr;
use std::sync::Arc;

use skyfare_api::{
    app,
    state::{AppState, AuthConfig},
    worker,
};
use skyfare_booking::BookingLifecycle;
use skyfare_core::collaborators::{LogNotifier, NoopSeatAssigner};
use skyfare_payments::providers::paymob::{PaymobConfig, PaymobGateway};
use skyfare_payments::providers::stripe::{StripeConfig, StripeGateway};
use skyfare_payments::providers::GatewayRegistry;
use skyfare_payments::{
    PaymentLedger, PaymentOrchestrator, ReconcilerConfig, VerificationMode, WebhookReconciler,
};
use skyfare_store::{Database, PgBookingRepository, PgPaymentRepository};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "skyfare=debug,tower_http=debug,axum::rejection=trace".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = skyfare_store::app_config::Config::load().expect("Failed to load config");
    tracing::info!("Starting Skyfare API on port {}", config.server.port);

    let db = Database::new(&config.database.url)
        .await
        .expect("Failed to connect to Postgres");
    db.migrate().await.expect("Failed to run migrations");

    let bookings = Arc::new(PgBookingRepository::new(db.pool.clone()));
    let payments = Arc::new(PgPaymentRepository::new(db.pool.clone()));
    let ledger = Arc::new(PaymentLedger::new(payments));

    let gateways = GatewayRegistry::new()
        .with(Arc::new(StripeGateway::new(StripeConfig {
            secret_key: config.stripe.secret_key.clone(),
            webhook_secret: config.stripe.webhook_secret.clone(),
            api_base: config.stripe.api_base.clone(),
        })))
        .with(Arc::new(PaymobGateway::new(PaymobConfig {
            api_key: config.paymob.api_key.clone(),
            hmac_secret: config.paymob.hmac_secret.clone(),
            integration_id: config.paymob.integration_id,
            api_base: config.paymob.api_base.clone(),
        })));

    let notifier = Arc::new(LogNotifier);
    let lifecycle = Arc::new(BookingLifecycle::new(
        bookings.clone(),
        Arc::new(NoopSeatAssigner),
        notifier.clone(),
        config.booking.pending_timeout_minutes,
    ));

    let orchestrator = Arc::new(PaymentOrchestrator::new(
        bookings.clone(),
        ledger.clone(),
        gateways.clone(),
    ));

    let mode = if config.webhooks.allow_unverified {
        tracing::warn!("webhook signature verification is in fallback mode");
        VerificationMode::FallbackOnStructuralMatch
    } else {
        VerificationMode::Strict
    };
    let reconciler = Arc::new(WebhookReconciler::new(
        bookings.clone(),
        ledger.clone(),
        gateways,
        notifier,
        ReconcilerConfig {
            stripe_webhook_secret: config.stripe.webhook_secret.clone(),
            paymob_hmac_secret: config.paymob.hmac_secret.clone(),
            mode,
        },
    ));

    tokio::spawn(worker::run_expiry_sweeper(
        lifecycle.clone(),
        config.booking.sweep_interval_seconds,
    ));

    let app_state = AppState {
        lifecycle,
        orchestrator,
        reconciler,
        ledger,
        auth: AuthConfig {
            secret: config.auth.jwt_secret.clone(),
            expiration: config.auth.jwt_expiration_seconds,
        },
    };

    let app = app(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
