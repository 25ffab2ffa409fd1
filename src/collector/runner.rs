use std::sync::Arc;
use std::sync::atomic::Ordering;

use tokio::time::{self, Duration, MissedTickBehavior};

use crate::{collector::Collector, metrics::METRICS};

/// Runs the periodic window rollover for a collector.
///
/// Every `interval`, rolls over each window whose deadline has
/// elapsed. The interval is independent of the window lengths, so a
/// window closes up to one interval after its nominal deadline.
///
/// GUARANTEES:
/// - This loop never exits voluntarily
/// - The first tick happens one full interval after start
///
pub async fn run_rollover(collector: Arc<Collector>, interval: Duration) {
    let mut ticker = time::interval_at(time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let rolled = collector.rollover();
        if rolled > 0 {
            METRICS.windows_rolled.fetch_add(rolled, Ordering::Relaxed);
            log::debug!("rollover pass closed {} window(s)", rolled);
        }
    }
}
