use std::sync::Arc;

use chrono::Utc;
use tokio::time::{interval, Duration};
use tracing::{debug, error, info};

use skyfare_booking::BookingLifecycle;

/// Periodically cancel bookings that never left PENDING/PENDING.
/// Spawned from main; runs for the life of the process.
pub async fn run_expiry_sweeper(lifecycle: Arc<BookingLifecycle>, interval_seconds: u64) {
    let mut ticker = interval(Duration::from_secs(interval_seconds));
    info!(interval_seconds, "expiry sweeper started");

    loop {
        ticker.tick().await;
        match lifecycle.expire_pending_bookings(Utc::now()).await {
            Ok(0) => debug!("expiry sweep found nothing to do"),
            Ok(expired) => info!(expired, "expiry sweep cancelled stale bookings"),
            Err(e) => error!(error = %e, "expiry sweep failed"),
        }
    }
}
