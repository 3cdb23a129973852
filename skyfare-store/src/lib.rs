pub mod app_config;
pub mod booking_repo;
pub mod database;
pub mod memory;
pub mod payment_repo;

pub use app_config::Config;
pub use booking_repo::PgBookingRepository;
pub use database::Database;
pub use payment_repo::PgPaymentRepository;
