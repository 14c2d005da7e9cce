//! Drives reconcile operations to completion.
//!
//! A requeue sleeps for the requested delay, a hard error backs off
//! exponentially. Work on the same resource is serialized.

use dashmap::DashMap;
use kvdi_pki::Reconciled;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::Duration;

/// Initial delay after a hard error
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
/// Max delay between hard error retries
const MAX_BACKOFF: Duration = Duration::from_secs(30);

pub struct Runner {
    locks: DashMap<String, Arc<Mutex<()>>>,
    max_attempts: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
}

impl Runner {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            locks: DashMap::new(),
            max_attempts: max_attempts.max(1),
            initial_backoff: INITIAL_BACKOFF,
            max_backoff: MAX_BACKOFF,
        }
    }

    #[cfg(test)]
    fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self
    }

    fn lock_for(&self, resource: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(resource.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Run `op` until it reports ready or the attempts are used up.
    ///
    /// Returns the number of attempts it took.
    pub async fn run<F, Fut>(&self, resource: &str, mut op: F) -> anyhow::Result<u32>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = kvdi_pki::Result<Reconciled<()>>>,
    {
        let lock = self.lock_for(resource);
        let _guard = lock.lock().await;

        let mut backoff = self.initial_backoff;
        for attempt in 1..=self.max_attempts {
            match op().await {
                Ok(Reconciled::Ready(())) => {
                    tracing::info!(resource, attempt, "Reconciled");
                    return Ok(attempt);
                }
                Ok(Reconciled::Requeue(requeue)) => {
                    tracing::info!(
                        resource,
                        attempt,
                        delay_ms = requeue.after.as_millis() as u64,
                        "Requeued: {}",
                        requeue.reason
                    );
                    tokio::time::sleep(requeue.after).await;
                }
                Err(e) => {
                    tracing::warn!(
                        resource,
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = backoff.as_millis() as u64,
                        "Reconcile failed, retrying: {e}"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(self.max_backoff);
                }
            }
        }

        anyhow::bail!(
            "{resource} did not converge after {} attempts",
            self.max_attempts
        )
    }
}
