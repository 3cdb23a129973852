//! Initiation side of taking a payment: validate the attempt against
//! the booking, run the provider handshake, open the ledger entry.

use std::sync::Arc;

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use skyfare_core::booking::{Booking, BookingPaymentStatus, BookingStatus};
use skyfare_core::money;
use skyfare_core::payment::{BillingDetails, PaymentHandle, PaymentProvider};
use skyfare_core::repository::BookingRepository;
use skyfare_core::{CoreError, CoreResult};

use crate::ledger::{NewPayment, PaymentLedger};
use crate::providers::GatewayRegistry;

pub struct PaymentOrchestrator {
    bookings: Arc<dyn BookingRepository>,
    ledger: Arc<PaymentLedger>,
    gateways: GatewayRegistry,
}

impl PaymentOrchestrator {
    pub fn new(
        bookings: Arc<dyn BookingRepository>,
        ledger: Arc<PaymentLedger>,
        gateways: GatewayRegistry,
    ) -> Self {
        Self {
            bookings,
            ledger,
            gateways,
        }
    }

    /// Initialize a payment attempt for a booking: register the order
    /// with the chosen provider and hand back the client-usable handle.
    /// The ledger entry opens PENDING; notifications settle it later.
    pub async fn initialize_payment(
        &self,
        booking_id: Uuid,
        user_id: Uuid,
        amount: f64,
        currency: &str,
        provider: PaymentProvider,
    ) -> CoreResult<PaymentHandle> {
        let mut booking = self
            .bookings
            .find_by_id(booking_id)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("booking {} not found", booking_id)))?;

        if booking.user_id != user_id {
            return Err(CoreError::Forbidden(
                "booking belongs to another user".into(),
            ));
        }
        if booking.payment_status == BookingPaymentStatus::Completed {
            return Err(CoreError::Conflict("booking is already paid".into()));
        }
        if booking.status != BookingStatus::Pending {
            return Err(CoreError::Conflict(format!(
                "booking is {} and cannot be paid",
                booking.status.as_str()
            )));
        }
        if !currency.eq_ignore_ascii_case(&booking.currency) {
            return Err(CoreError::Validation(format!(
                "payment currency {} does not match booking currency {}",
                currency, booking.currency
            )));
        }
        // The client restates the amount it is about to charge; any
        // mismatch against the stored total stops the flow before a
        // provider call is made.
        if !money::amounts_match(amount, booking.total_amount_cents) {
            return Err(CoreError::Validation(format!(
                "payment amount {:.2} does not match booking total {:.2}",
                amount,
                money::from_minor_units(booking.total_amount_cents)
            )));
        }

        let gateway = self.gateways.get(&provider)?;
        let token = gateway.authenticate().await?;
        let provider_order_id = gateway
            .register_order(
                &token,
                &booking.id.to_string(),
                booking.total_amount_cents,
                &booking.currency,
            )
            .await?;
        let billing = billing_from(&booking);
        let handle = gateway
            .request_payment_handle(
                &token,
                booking.total_amount_cents,
                &provider_order_id,
                &billing,
                &booking.currency,
            )
            .await?;

        // Intent-style rails reuse the order id as the transaction id;
        // order-based rails only learn it from the first notification.
        let transaction_id =
            (provider == PaymentProvider::Stripe).then(|| handle.provider_order_id.clone());

        let record = self
            .ledger
            .create_payment(NewPayment {
                booking_id: booking.id,
                user_id: booking.user_id,
                amount_cents: booking.total_amount_cents,
                currency: booking.currency.clone(),
                provider: provider.clone(),
                method: "CARD".to_string(),
                transaction_id,
                payment_handle: Some(handle.handle.clone()),
                provider_order_id: Some(handle.provider_order_id.clone()),
            })
            .await?;

        booking.payment_intent_id = Some(handle.provider_order_id.clone());
        booking.updated_at = Utc::now();
        self.bookings.update(&booking).await?;

        info!(
            booking_id = %booking.id,
            payment_id = %record.id,
            provider = provider.as_str(),
            provider_order_id = %handle.provider_order_id,
            "payment attempt initialized"
        );
        Ok(handle)
    }
}

fn billing_from(booking: &Booking) -> BillingDetails {
    let lead = booking.travelers.first();
    BillingDetails {
        first_name: lead
            .map(|t| t.first_name.clone())
            .unwrap_or_else(|| "Guest".to_string()),
        last_name: lead
            .map(|t| t.last_name.clone())
            .unwrap_or_else(|| "Traveler".to_string()),
        email: booking.contact.email.clone(),
        phone: booking.contact.phone.clone(),
    }
}
