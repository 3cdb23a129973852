//! Folds provider notifications back into the ledger and the booking.
//! Every path through here is safe to replay: redeliveries, races and
//! out-of-order events all converge on the same stored state.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use skyfare_core::booking::{Booking, BookingPaymentStatus};
use skyfare_core::collaborators::Notifier;
use skyfare_core::payment::{
    PaymentOutcome, PaymentProvider, PaymentRecordStatus, RemoteTransaction,
};
use skyfare_core::repository::BookingRepository;
use skyfare_core::{CoreError, CoreResult};

use crate::ledger::{NewPayment, PaymentLedger, TransactionUpdate};
use crate::providers::{paymob, stripe, GatewayRegistry};

/// How notification authenticity failures are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationMode {
    /// Unverifiable events are rejected. The default.
    Strict,
    /// Events that fail verification but still parse as a well-formed
    /// event for the expected provider are processed anyway, loudly.
    /// For deployments where the provider's signing material is not
    /// configured.
    FallbackOnStructuralMatch,
}

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    pub stripe_webhook_secret: String,
    pub paymob_hmac_secret: String,
    pub mode: VerificationMode,
}

/// What became of one delivered event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Ledger and booking were brought up to date.
    Processed,
    /// The transaction had already settled; nothing changed.
    AlreadyProcessed,
    /// A recognized event kind this service does not act on.
    Ignored,
}

/// A provider event reduced to the fields reconciliation runs on.
#[derive(Debug, Clone)]
struct NormalizedEvent {
    provider: PaymentProvider,
    transaction_id: String,
    provider_order_id: Option<String>,
    outcome: PaymentOutcome,
    amount_cents: Option<i64>,
    currency: Option<String>,
    failure_message: Option<String>,
    raw: Value,
}

/// Result of a manual status sync against the provider.
#[derive(Debug, Clone)]
pub struct SyncOutcome {
    pub booking: Booking,
    pub remote: Option<RemoteTransaction>,
    /// True when the poll uncovered a settled transaction and the
    /// stored state was brought up to date.
    pub repaired: bool,
}

pub struct WebhookReconciler {
    bookings: Arc<dyn BookingRepository>,
    ledger: Arc<PaymentLedger>,
    gateways: GatewayRegistry,
    notifier: Arc<dyn Notifier>,
    config: ReconcilerConfig,
}

impl WebhookReconciler {
    pub fn new(
        bookings: Arc<dyn BookingRepository>,
        ledger: Arc<PaymentLedger>,
        gateways: GatewayRegistry,
        notifier: Arc<dyn Notifier>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            bookings,
            ledger,
            gateways,
            notifier,
            config,
        }
    }

    /// Process a signed Stripe-dialect event delivered to the webhook
    /// endpoint. `payload` must be the raw request body; verification
    /// runs over the exact bytes.
    pub async fn handle_stripe(
        &self,
        payload: &[u8],
        signature_header: Option<&str>,
    ) -> CoreResult<ReconcileOutcome> {
        let raw: Value = serde_json::from_slice(payload)
            .map_err(|e| CoreError::MalformedEvent(format!("event body is not JSON: {}", e)))?;
        let event: stripe::StripeEvent = serde_json::from_value(raw.clone())
            .map_err(|e| CoreError::MalformedEvent(format!("not a stripe event: {}", e)))?;

        let verification = match signature_header {
            Some(header) => {
                stripe::verify_signature(&self.config.stripe_webhook_secret, payload, header)
            }
            None => Err(CoreError::SignatureRejected(
                "missing Stripe-Signature header".into(),
            )),
        };
        if let Err(err) = verification {
            self.tolerate_unverified("stripe", &event.id, err)?;
        }

        let Some(outcome) = event.outcome() else {
            info!(event_id = %event.id, event_type = %event.type_, "ignoring stripe event kind");
            return Ok(ReconcileOutcome::Ignored);
        };

        let object = &event.data.object;
        let normalized = NormalizedEvent {
            provider: PaymentProvider::Stripe,
            transaction_id: object.id.clone(),
            provider_order_id: Some(object.id.clone()),
            outcome,
            amount_cents: object.amount_received.or(object.amount),
            currency: object.currency.as_deref().map(str::to_uppercase),
            failure_message: event.failure_message(),
            raw,
        };

        let booking = self
            .resolve_booking(
                event.merchant_order_id(),
                normalized.provider_order_id.as_deref(),
                &normalized.transaction_id,
            )
            .await?;
        self.apply(booking, normalized).await
    }

    /// Process a Paymob-dialect transaction callback. The HMAC arrives
    /// out of band (a query parameter on the callback URL).
    pub async fn handle_paymob(
        &self,
        payload: &[u8],
        supplied_hmac: Option<&str>,
    ) -> CoreResult<ReconcileOutcome> {
        let raw: Value = serde_json::from_slice(payload)
            .map_err(|e| CoreError::MalformedEvent(format!("event body is not JSON: {}", e)))?;
        let event: paymob::PaymobEvent = serde_json::from_value(raw.clone())
            .map_err(|e| CoreError::MalformedEvent(format!("not a paymob callback: {}", e)))?;

        if event.type_ != "TRANSACTION" {
            info!(event_type = %event.type_, "ignoring paymob callback kind");
            return Ok(ReconcileOutcome::Ignored);
        }

        let txn_id = event.obj.id.to_string();
        let verification = match supplied_hmac {
            Some(supplied) => {
                paymob::verify_hmac(&self.config.paymob_hmac_secret, &event.obj, supplied)
            }
            None => Err(CoreError::SignatureRejected(
                "missing hmac query parameter".into(),
            )),
        };
        if let Err(err) = verification {
            self.tolerate_unverified("paymob", &txn_id, err)?;
        }

        let txn = &event.obj;
        let normalized = NormalizedEvent {
            provider: PaymentProvider::Paymob,
            transaction_id: txn_id,
            provider_order_id: Some(txn.order.id.to_string()),
            outcome: paymob::classify_transaction(txn),
            amount_cents: Some(txn.amount_cents),
            currency: if txn.currency.is_empty() {
                None
            } else {
                Some(txn.currency.clone())
            },
            failure_message: txn
                .error_occured
                .then(|| "provider flagged error_occured".to_string()),
            raw,
        };

        let booking = self
            .resolve_booking(
                txn.order.merchant_order_id.as_deref(),
                normalized.provider_order_id.as_deref(),
                &normalized.transaction_id,
            )
            .await?;
        self.apply(booking, normalized).await
    }

    /// Ask the provider for its authoritative view of a booking's
    /// latest transaction and fold the answer back in, healing a missed
    /// notification. No-op when the booking has settled or no attempt
    /// has produced a transaction id yet.
    pub async fn sync_status(&self, booking_id: Uuid) -> CoreResult<SyncOutcome> {
        let booking = self
            .bookings
            .find_by_id(booking_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("booking {} not found", booking_id)))?;

        if booking.payment_status == BookingPaymentStatus::Completed {
            return Ok(SyncOutcome {
                booking,
                remote: None,
                repaired: false,
            });
        }

        let records = self.ledger.find_by_booking(booking.id).await?;
        let latest = records
            .iter()
            .rev()
            .find_map(|r| r.transaction_id.as_deref().map(|t| (r, t.to_string())));
        let Some((record, txn_id)) = latest else {
            return Ok(SyncOutcome {
                booking,
                remote: None,
                repaired: false,
            });
        };

        let gateway = self.gateways.get(&record.provider)?;
        let token = gateway.authenticate().await?;
        let remote = gateway.get_remote_status(&txn_id, &token).await?;

        if remote.outcome == PaymentOutcome::Success {
            info!(
                booking_id = %booking.id,
                transaction_id = %remote.transaction_id,
                "status sync found a settled transaction, repairing"
            );
            let event = NormalizedEvent {
                provider: record.provider.clone(),
                transaction_id: remote.transaction_id.clone(),
                provider_order_id: remote.provider_order_id.clone(),
                outcome: PaymentOutcome::Success,
                amount_cents: remote.amount_cents,
                currency: remote.currency.clone(),
                failure_message: None,
                raw: remote.raw.clone(),
            };
            self.apply(booking, event).await?;
            let booking = self
                .bookings
                .find_by_id(booking_id)
                .await?
                .ok_or_else(|| CoreError::Storage("booking vanished during status sync".into()))?;
            return Ok(SyncOutcome {
                booking,
                remote: Some(remote),
                repaired: true,
            });
        }

        Ok(SyncOutcome {
            booking,
            remote: Some(remote),
            repaired: false,
        })
    }

    /// In strict mode verification failures are terminal. In fallback
    /// mode a structurally recognizable event is processed anyway; the
    /// failure stays visible in the log.
    fn tolerate_unverified(&self, provider: &str, event_id: &str, err: CoreError) -> CoreResult<()> {
        match self.config.mode {
            VerificationMode::Strict => Err(err),
            VerificationMode::FallbackOnStructuralMatch => {
                warn!(
                    provider,
                    event_id,
                    error = %err,
                    "processing unverified event on structural match"
                );
                Ok(())
            }
        }
    }

    /// Find the booking an event belongs to: the merchant order id
    /// stamped at initiation, then the ledger's transaction and
    /// provider-order mappings.
    async fn resolve_booking(
        &self,
        merchant_order_id: Option<&str>,
        provider_order_id: Option<&str>,
        transaction_id: &str,
    ) -> CoreResult<Booking> {
        if let Some(raw_id) = merchant_order_id {
            if let Ok(booking_id) = Uuid::parse_str(raw_id) {
                if let Some(booking) = self.bookings.find_by_id(booking_id).await? {
                    return Ok(booking);
                }
            }
            warn!(
                merchant_order_id = raw_id,
                "event names a merchant order id with no matching booking"
            );
        }

        if let Some(record) = self.ledger.find_by_transaction_id(transaction_id).await? {
            if let Some(booking) = self.bookings.find_by_id(record.booking_id).await? {
                return Ok(booking);
            }
        }

        if let Some(order_id) = provider_order_id {
            if let Some(record) = self.ledger.find_by_provider_order_id(order_id).await? {
                if let Some(booking) = self.bookings.find_by_id(record.booking_id).await? {
                    return Ok(booking);
                }
            }
        }

        Err(CoreError::NotFound(
            "event does not resolve to any booking".into(),
        ))
    }

    /// Apply a classified event: ledger first, then the booking through
    /// a conditional write so concurrent deliveries cannot interleave
    /// into a downgrade.
    async fn apply(
        &self,
        mut booking: Booking,
        event: NormalizedEvent,
    ) -> CoreResult<ReconcileOutcome> {
        if booking.payment_status == BookingPaymentStatus::Completed {
            info!(
                booking_id = %booking.id,
                transaction_id = %event.transaction_id,
                "booking already settled, acknowledging duplicate event"
            );
            return Ok(ReconcileOutcome::AlreadyProcessed);
        }

        let template = NewPayment {
            booking_id: booking.id,
            user_id: booking.user_id,
            amount_cents: event.amount_cents.unwrap_or(booking.total_amount_cents),
            currency: event
                .currency
                .clone()
                .unwrap_or_else(|| booking.currency.clone()),
            provider: event.provider.clone(),
            method: "CARD".to_string(),
            transaction_id: Some(event.transaction_id.clone()),
            payment_handle: None,
            provider_order_id: event.provider_order_id.clone(),
        };

        match event.outcome {
            PaymentOutcome::Success => {
                self.ledger
                    .upsert_by_transaction_id(
                        &event.transaction_id,
                        template,
                        TransactionUpdate {
                            status: PaymentRecordStatus::Completed,
                            provider_response: Some(event.raw.clone()),
                            failure_code: None,
                            failure_message: None,
                        },
                    )
                    .await?;

                let guard = booking.payment_status.clone();
                booking.confirm_payment(Utc::now());
                if booking.payment_intent_id.is_none() {
                    booking.payment_intent_id = Some(event.transaction_id.clone());
                }
                let written = self
                    .bookings
                    .update_if_payment_status(&booking, guard)
                    .await?;
                if !written {
                    // Lost the race. Whoever won either settled the
                    // booking already or left a state the next event or
                    // status sync will reconcile.
                    warn!(
                        booking_id = %booking.id,
                        "conditional confirm lost to a concurrent write"
                    );
                    return Ok(ReconcileOutcome::Processed);
                }

                if let Err(err) = self.notifier.booking_confirmed(&booking).await {
                    warn!(
                        booking_id = %booking.id,
                        error = %err,
                        "confirmation notification failed"
                    );
                }
                info!(
                    booking_id = %booking.id,
                    transaction_id = %event.transaction_id,
                    "payment settled, booking confirmed"
                );
                Ok(ReconcileOutcome::Processed)
            }
            PaymentOutcome::Pending => {
                self.ledger
                    .upsert_by_transaction_id(
                        &event.transaction_id,
                        template,
                        TransactionUpdate {
                            status: PaymentRecordStatus::Processing,
                            provider_response: Some(event.raw.clone()),
                            failure_code: None,
                            failure_message: None,
                        },
                    )
                    .await?;

                let guard = booking.payment_status.clone();
                booking.set_payment_status(BookingPaymentStatus::Processing);
                if !self
                    .bookings
                    .update_if_payment_status(&booking, guard)
                    .await?
                {
                    warn!(
                        booking_id = %booking.id,
                        "conditional processing write lost to a concurrent update"
                    );
                }
                Ok(ReconcileOutcome::Processed)
            }
            PaymentOutcome::Failure => {
                self.ledger
                    .upsert_by_transaction_id(
                        &event.transaction_id,
                        template,
                        TransactionUpdate {
                            status: PaymentRecordStatus::Failed,
                            provider_response: Some(event.raw.clone()),
                            failure_code: None,
                            failure_message: event.failure_message.clone(),
                        },
                    )
                    .await?;

                let guard = booking.payment_status.clone();
                booking.set_payment_status(BookingPaymentStatus::Failed);
                if !self
                    .bookings
                    .update_if_payment_status(&booking, guard)
                    .await?
                {
                    warn!(
                        booking_id = %booking.id,
                        "conditional failure write lost to a concurrent update"
                    );
                }
                info!(
                    booking_id = %booking.id,
                    transaction_id = %event.transaction_id,
                    "payment attempt failed"
                );
                Ok(ReconcileOutcome::Processed)
            }
        }
    }
}
