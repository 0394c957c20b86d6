//! Time-based listeners

use chrono::{DateTime, Utc};
use sh_core::ListenerHandle;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{trace, warn};

/// Shortest period a timer runs at
pub const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Call `action` every `interval`, starting one interval from now
///
/// The timer runs on a spawned task that is aborted when the returned handle
/// drops. Periods below [`MIN_INTERVAL`] are raised to it. Must be called from
/// within a tokio runtime.
pub fn track_time_interval<F>(interval: Duration, action: F) -> ListenerHandle
where
    F: Fn(DateTime<Utc>) + Send + 'static,
{
    if interval < MIN_INTERVAL {
        warn!(
            "Interval of {:?} is too short, using {:?}",
            interval, MIN_INTERVAL
        );
    }
    let interval = interval.max(MIN_INTERVAL);

    let task = tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let now = Utc::now();
            trace!(interval_secs = interval.as_secs(), "Interval fired");
            action(now);
        }
    });

    ListenerHandle::new(move || task.abort())
}
