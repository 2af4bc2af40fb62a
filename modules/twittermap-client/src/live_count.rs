//! Periodic dataset-wide count poll.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::session::Session;

/// Poll the dataset-wide count every `period` until the task is aborted.
pub(crate) fn spawn_live_count_task(session: Session, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let period = period.max(Duration::from_millis(1));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(session = %session.id(), period_ms = period.as_millis() as u64, "Live count poller started");

        loop {
            ticker.tick().await;
            if let Err(err) = session.poll_live_count().await {
                warn!(session = %session.id(), error = %err, "Live count poll failed");
            }
        }
    })
}
