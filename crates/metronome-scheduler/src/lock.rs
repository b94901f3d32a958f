use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use metronome_core::Clock;
use metronome_store::CoordinationStore;
use rand::Rng;
use tracing::{debug, warn};

use crate::error::Result;

/// First retry delay after a contested acquisition attempt.
const INITIAL_BACKOFF: Duration = Duration::from_millis(25);
/// Retry delay cap.
const MAX_BACKOFF: Duration = Duration::from_secs(1);

/// Cross-process mutual exclusion over one coordination-store key.
///
/// The token value is the holder's expiry as epoch seconds. Acquisition is an
/// atomic set-if-absent with a store TTL; a holder that crashed without
/// releasing is taken over by compare-and-swapping the stale value once its
/// encoded expiry has passed. Unavailability after a crash is therefore
/// bounded by the TTL.
///
/// Contested acquisition sleeps between attempts with bounded exponential
/// backoff plus jitter rather than spinning, so a busy fleet does not burn
/// CPU on the lock key.
pub struct DistributedLock {
    store: Arc<dyn CoordinationStore>,
    clock: Arc<dyn Clock>,
    key: String,
    ttl: Duration,
}

impl DistributedLock {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        clock: Arc<dyn Clock>,
        key: String,
        ttl: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            key,
            ttl,
        }
    }

    /// Run `f` while holding the lock and return its result.
    ///
    /// The token is deleted on every exit path of `f`, success or error.
    /// Acquisition retries until it succeeds, so this blocks while another
    /// process is inside its own critical section.
    pub async fn with_lock<T, F, Fut>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.acquire().await?;
        let result = f().await;
        if let Err(e) = self.release().await {
            // The token will still lapse via its TTL; the fleet stalls for at
            // most that long.
            warn!(key = %self.key, error = %e, "failed to release scheduler lock");
        }
        result
    }

    /// Acquire the lock, retrying until successful.
    pub async fn acquire(&self) -> Result<()> {
        let mut backoff = INITIAL_BACKOFF;
        loop {
            if self.try_acquire().await? {
                return Ok(());
            }
            debug!(key = %self.key, backoff_ms = backoff.as_millis() as u64, "lock contested");
            tokio::time::sleep(with_jitter(backoff)).await;
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    }

    /// Delete the token, releasing the lock for other processes.
    pub async fn release(&self) -> Result<()> {
        self.store.delete(&self.key).await?;
        Ok(())
    }

    /// One acquisition attempt: set-if-absent, then the stale-takeover path.
    async fn try_acquire(&self) -> Result<bool> {
        let now = self.clock.epoch_secs();
        let token = (now + self.ttl.as_secs() as i64).to_string();

        if self.store.set_if_absent(&self.key, &token, self.ttl).await? {
            return Ok(true);
        }

        // Somebody holds the key. If their encoded expiry has passed, the
        // holder crashed mid-section: swap the stale token for ours. The
        // compare-and-swap loses cleanly when another process races us here.
        match self.store.get(&self.key).await? {
            None => Ok(false), // released or expired between calls; retry
            Some(held) => {
                // An unparseable token cannot be trusted to expire: treat it
                // as stale so the fleet is not wedged forever.
                let held_expiry = held.parse::<i64>().unwrap_or(i64::MIN);
                if held_expiry < now {
                    let swapped = self
                        .store
                        .compare_and_swap(&self.key, &held, &token)
                        .await?;
                    if swapped {
                        debug!(key = %self.key, stale_expiry = held_expiry, "took over stale lock");
                    }
                    Ok(swapped)
                } else {
                    Ok(false)
                }
            }
        }
    }
}

/// Randomize `base` by ±50% so contending processes do not retry in phase.
fn with_jitter(base: Duration) -> Duration {
    base.mul_f64(rand::thread_rng().gen_range(0.5..=1.5))
}
