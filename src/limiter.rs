//! Counting semaphore bounding concurrent outbound HTTP requests.
//!
//! Shared by the Uploader's live delivery tasks and the Backlog's
//! replay tasks so that total outbound concurrency is capped by a
//! single budget, regardless of which path a batch took.

use std::sync::Arc;

use tokio::sync::{Semaphore, SemaphorePermit};

/// A cloneable handle to a fixed-capacity pool of outbound-request permits.
#[derive(Clone)]
pub struct Limiter {
    semaphore: Arc<Semaphore>,
}

impl Limiter {
    /// Create a limiter with `capacity` permits.
    pub fn new(capacity: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
        }
    }

    /// Acquire one permit, blocking until one is free.
    ///
    /// The returned guard releases the permit on drop; hold it across
    /// the full HTTP round-trip it is guarding.
    pub async fn acquire(&self) -> LimiterPermit<'_> {
        let permit = self
            .semaphore
            .acquire()
            .await
            .expect("limiter semaphore is never closed");
        LimiterPermit { _permit: permit }
    }
}

/// RAII guard for a single limiter permit; releases on drop.
pub struct LimiterPermit<'a> {
    _permit: SemaphorePermit<'a>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn never_exceeds_capacity() {
        let limiter = Limiter::new(2);
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let limiter = limiter.clone();
            let in_flight = in_flight.clone();
            let max_seen = max_seen.clone();
            handles.push(tokio::spawn(async move {
                let _permit = limiter.acquire().await;
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        assert!(max_seen.load(Ordering::SeqCst) <= 2);
    }
}
