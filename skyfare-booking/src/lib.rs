pub mod lifecycle;
pub mod reference;
pub mod validate;

pub use lifecycle::{BookingLifecycle, CreateBookingRequest};
