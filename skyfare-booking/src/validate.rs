use skyfare_core::booking::{FlightLeg, LegDirection, TripType};
use skyfare_core::{CoreError, CoreResult};

use crate::lifecycle::CreateBookingRequest;

/// Validate a booking request and return its legs in canonical order
/// (outbound first for round trips).
pub fn canonical_legs(req: &CreateBookingRequest) -> CoreResult<Vec<FlightLeg>> {
    if req.travelers.is_empty() {
        return Err(CoreError::Validation("at least one traveler is required".into()));
    }
    for traveler in &req.travelers {
        if traveler.first_name.trim().is_empty() || traveler.last_name.trim().is_empty() {
            return Err(CoreError::Validation("traveler names must not be empty".into()));
        }
    }
    if !req.contact.email.contains('@') {
        return Err(CoreError::Validation("contact email is invalid".into()));
    }
    if req.total_price <= 0.0 {
        return Err(CoreError::Validation("total price must be positive".into()));
    }
    if req.currency.len() != 3 || !req.currency.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(CoreError::Validation("currency must be a 3-letter code".into()));
    }

    let legs = match req.trip_type {
        TripType::OneWay => {
            let flight = req.flight.clone().ok_or_else(|| {
                CoreError::Validation("one-way bookings require the flight field".into())
            })?;
            vec![flight]
        }
        TripType::RoundTrip => {
            let legs = req.legs.clone().ok_or_else(|| {
                CoreError::Validation("round-trip bookings require the legs field".into())
            })?;
            if legs.len() != 2 {
                return Err(CoreError::Validation(
                    "a round trip requires exactly two legs".into(),
                ));
            }
            let outbound = legs
                .iter()
                .find(|l| l.direction == Some(LegDirection::Outbound))
                .cloned();
            let inbound = legs
                .iter()
                .find(|l| l.direction == Some(LegDirection::Return))
                .cloned();
            let (outbound, inbound) = match (outbound, inbound) {
                (Some(o), Some(r)) => (o, r),
                _ => {
                    return Err(CoreError::Validation(
                        "a round trip requires one OUTBOUND and one RETURN leg".into(),
                    ))
                }
            };
            if inbound.departure_time <= outbound.arrival_time {
                return Err(CoreError::Validation(
                    "return departure must be after the outbound arrival".into(),
                ));
            }
            vec![outbound, inbound]
        }
    };

    for leg in &legs {
        if leg.origin.trim().is_empty() || leg.destination.trim().is_empty() {
            return Err(CoreError::Validation("leg origin and destination are required".into()));
        }
        if leg.arrival_time <= leg.departure_time {
            return Err(CoreError::Validation(
                "leg arrival must be after its departure".into(),
            ));
        }
    }

    Ok(legs)
}
