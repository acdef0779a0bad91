use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration, MissedTickBehavior};
use tracing::debug;

/// A source whose cached reading is refreshed out of band. Failures are
/// absorbed by the implementor.
#[async_trait]
pub trait Refresh: Send + Sync {
    fn name(&self) -> &str;
    async fn refresh(&self);
}

/// Serial refresh loop for one rate-limited source.
pub struct Poller {
    target: Arc<dyn Refresh>,
    period: Duration,
}

impl Poller {
    pub fn new(target: Arc<dyn Refresh>, period: Duration) -> Self {
        Poller { target, period }
    }

    /// Runs until the returned handle is aborted. The caller is expected to
    /// have done the first refresh already, so the loop waits a full period
    /// before its first tick.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        let mut interval = time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // The first tick completes immediately, let's consume it
        interval.tick().await;

        loop {
            interval.tick().await;
            debug!(source = self.target.name(), "Refreshing");
            // Awaited inline: the next tick cannot start before this returns.
            self.target.refresh().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[derive(Default)]
    struct Counting {
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        work: Duration,
    }

    #[async_trait]
    impl Refresh for Counting {
        fn name(&self) -> &str {
            "counting"
        }

        async fn refresh(&self) {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            if !self.work.is_zero() {
                time::sleep(self.work).await;
            }
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_refreshes_once_per_period() {
        let target = Arc::new(Counting::default());
        let handle = Poller::new(target.clone(), Duration::from_secs(60)).spawn();

        time::sleep(Duration::from_secs(59)).await;
        assert_eq!(target.calls.load(Ordering::SeqCst), 0);

        time::sleep(Duration::from_secs(2)).await;
        assert_eq!(target.calls.load(Ordering::SeqCst), 1);

        time::sleep(Duration::from_secs(120)).await;
        assert_eq!(target.calls.load(Ordering::SeqCst), 3);

        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_refreshes_never_overlap() {
        let target = Arc::new(Counting {
            work: Duration::from_secs(90),
            ..Default::default()
        });
        let handle = Poller::new(target.clone(), Duration::from_secs(60)).spawn();

        time::sleep(Duration::from_secs(600)).await;
        assert!(target.calls.load(Ordering::SeqCst) >= 3);
        assert_eq!(target.max_in_flight.load(Ordering::SeqCst), 1);

        handle.abort();
    }
}
