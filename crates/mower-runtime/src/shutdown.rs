//! Cooperative shutdown signal shared by every control loop.
//!
//! The coordinator owns the [`watch::Sender`]; each loop holds a receiver and
//! races every sleep against it.  A dropped sender counts as a shutdown.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

pub type ShutdownSignal = watch::Receiver<bool>;

/// Resolve once shutdown has been requested.
pub async fn signalled(shutdown: &mut ShutdownSignal) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Sleep until `deadline`.  Returns `true` if shutdown was requested first
/// (or was already pending).
pub async fn sleep_until(shutdown: &mut ShutdownSignal, deadline: Instant) -> bool {
    if *shutdown.borrow() {
        return true;
    }
    tokio::select! {
        _ = tokio::time::sleep_until(deadline) => *shutdown.borrow(),
        _ = signalled(shutdown) => true,
    }
}

/// Sleep for `period`, see [`sleep_until`].
pub async fn sleep(shutdown: &mut ShutdownSignal, period: Duration) -> bool {
    sleep_until(shutdown, Instant::now() + period).await
}
