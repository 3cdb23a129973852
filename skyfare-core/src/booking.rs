use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{CoreError, CoreResult};

/// Booking status in the lifecycle
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
}

/// Payment status as tracked on the booking itself.
/// The payment ledger keeps its own, finer-grained status per attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingPaymentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Refunded,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TripType {
    OneWay,
    RoundTrip,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LegDirection {
    Outbound,
    Return,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlightLeg {
    pub flight_number: String,
    pub airline: String,
    pub origin: String,
    pub destination: String,
    pub departure_time: DateTime<Utc>,
    pub arrival_time: DateTime<Utc>,
    pub cabin_class: String,
    pub direction: Option<LegDirection>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Traveler {
    pub first_name: String,
    pub last_name: String,
    pub date_of_birth: Option<NaiveDate>,
    pub seat_number: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactInfo {
    pub email: String,
    pub phone: Option<String>,
}

/// The single source of truth for a purchase attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    pub id: Uuid,
    pub user_id: Uuid,
    pub booking_ref: String,
    pub trip_type: TripType,
    pub legs: Vec<FlightLeg>,
    pub travelers: Vec<Traveler>,
    pub contact: ContactInfo,
    pub total_amount_cents: i64,
    pub currency: String,
    pub status: BookingStatus,
    pub payment_status: BookingPaymentStatus,
    pub payment_intent_id: Option<String>,
    pub payment_completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        user_id: Uuid,
        booking_ref: String,
        trip_type: TripType,
        legs: Vec<FlightLeg>,
        travelers: Vec<Traveler>,
        contact: ContactInfo,
        total_amount_cents: i64,
        currency: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            booking_ref,
            trip_type,
            legs,
            travelers,
            contact,
            total_amount_cents,
            currency,
            status: BookingStatus::Pending,
            payment_status: BookingPaymentStatus::Pending,
            payment_intent_id: None,
            payment_completed_at: None,
            cancelled_at: None,
            cancellation_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Mark the booking paid and confirmed in one step.
    /// CONFIRMED always implies a COMPLETED payment.
    pub fn confirm_payment(&mut self, now: DateTime<Utc>) {
        self.payment_status = BookingPaymentStatus::Completed;
        self.status = BookingStatus::Confirmed;
        self.payment_completed_at = Some(now);
        self.updated_at = now;
    }

    /// Update only the payment flag, leaving the booking status alone
    pub fn set_payment_status(&mut self, status: BookingPaymentStatus) {
        self.payment_status = status;
        self.updated_at = Utc::now();
    }

    pub fn cancel(&mut self, reason: Option<String>, now: DateTime<Utc>) {
        self.status = BookingStatus::Cancelled;
        self.cancelled_at = Some(now);
        self.cancellation_reason = reason;
        self.updated_at = now;
    }

    pub fn is_terminal(&self) -> bool {
        self.status == BookingStatus::Cancelled
    }
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "PENDING",
            BookingStatus::Confirmed => "CONFIRMED",
            BookingStatus::Cancelled => "CANCELLED",
        }
    }
}

impl std::str::FromStr for BookingStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        match s {
            "PENDING" => Ok(BookingStatus::Pending),
            "CONFIRMED" => Ok(BookingStatus::Confirmed),
            "CANCELLED" => Ok(BookingStatus::Cancelled),
            other => Err(CoreError::Storage(format!("unknown booking status: {}", other))),
        }
    }
}

impl BookingPaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingPaymentStatus::Pending => "PENDING",
            BookingPaymentStatus::Processing => "PROCESSING",
            BookingPaymentStatus::Completed => "COMPLETED",
            BookingPaymentStatus::Failed => "FAILED",
            BookingPaymentStatus::Refunded => "REFUNDED",
            BookingPaymentStatus::Cancelled => "CANCELLED",
        }
    }
}

impl std::str::FromStr for BookingPaymentStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        match s {
            "PENDING" => Ok(BookingPaymentStatus::Pending),
            "PROCESSING" => Ok(BookingPaymentStatus::Processing),
            "COMPLETED" => Ok(BookingPaymentStatus::Completed),
            "FAILED" => Ok(BookingPaymentStatus::Failed),
            "REFUNDED" => Ok(BookingPaymentStatus::Refunded),
            "CANCELLED" => Ok(BookingPaymentStatus::Cancelled),
            other => Err(CoreError::Storage(format!("unknown payment status: {}", other))),
        }
    }
}

impl TripType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TripType::OneWay => "ONE_WAY",
            TripType::RoundTrip => "ROUND_TRIP",
        }
    }
}

impl std::str::FromStr for TripType {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        match s {
            "ONE_WAY" => Ok(TripType::OneWay),
            "ROUND_TRIP" => Ok(TripType::RoundTrip),
            other => Err(CoreError::Storage(format!("unknown trip type: {}", other))),
        }
    }
}
