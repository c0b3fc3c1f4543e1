//! Background driver for periodic tuning. The engines never start timers of
//! their own; callers either tick them directly or hand a closure to
//! [`spawn_periodic`].

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Handle to a periodic task. Dropping it leaves the task running.
pub struct PeriodicTask {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<u64>,
}

impl PeriodicTask {
    /// Signal the task to stop and wait for it. Returns how many ticks ran.
    pub async fn shutdown(self) -> u64 {
        let _ = self.shutdown.send(true);
        self.handle.await.unwrap_or(0)
    }
}

/// Run `tick` every `period` until shut down. The first run happens one full
/// period after spawning; missed ticks are delayed rather than burst.
pub fn spawn_periodic<F>(name: &'static str, period: Duration, mut tick: F) -> PeriodicTask
where
    F: FnMut() + Send + 'static,
{
    let (shutdown, mut stop) = watch::channel(false);
    let handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut ticks = 0u64;
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    tick();
                    ticks += 1;
                }
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::debug!(task = name, ticks, "periodic task stopped");
        ticks
    });
    PeriodicTask { shutdown, handle }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn ticks_once_per_period_until_shutdown() {
        let count = Arc::new(AtomicU64::new(0));
        let seen = count.clone();
        let task = spawn_periodic("test", Duration::from_secs(10), move || {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);

        let ticks = task.shutdown().await;
        assert_eq!(ticks, 3);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }
}
