//! Owned periodic background tasks.

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// A background loop that runs a job on a fixed interval until cancelled.
///
/// The task is owned by whoever spawned it. Dropping the handle does not
/// stop the loop; call [`PeriodicTask::shutdown`] to cancel and join it.
pub struct PeriodicTask {
    name: &'static str,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl PeriodicTask {
    /// Spawn `job` every `interval`. The first run happens one interval
    /// after spawning. A zero interval is clamped to one second so that
    /// `tokio::time::interval` does not panic.
    pub fn spawn<F, Fut>(name: &'static str, interval: Duration, mut job: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let interval = if interval.is_zero() {
            tracing::warn!(task = name, "zero interval configured, using 1s");
            Duration::from_secs(1)
        } else {
            interval
        };

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = job() => {}
                }
            }
            tracing::debug!(task = name, "periodic task stopped");
        });

        tracing::debug!(task = name, interval_ms = interval.as_millis() as u64, "periodic task started");
        Self {
            name,
            cancel,
            handle,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Cancel the loop and wait for it to finish.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await
            && e.is_panic()
        {
            tracing::error!(task = self.name, error = ?e, "periodic task panicked");
        }
    }
}
