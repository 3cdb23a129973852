//! Amount conversions. Providers are always paid in minor units (cents);
//! major-unit floats exist only at the API boundary.

/// Convert a major-unit amount (e.g. 1500.00) to minor units (150000)
pub fn to_minor_units(amount: f64) -> i64 {
    (amount * 100.0).round() as i64
}

/// Convert minor units back to a major-unit amount for display
pub fn from_minor_units(cents: i64) -> f64 {
    cents as f64 / 100.0
}

/// True when a major-unit amount equals a stored minor-unit total
/// to the cent
pub fn amounts_match(amount: f64, total_cents: i64) -> bool {
    to_minor_units(amount) == total_cents
}
