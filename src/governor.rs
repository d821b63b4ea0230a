//! Concurrency control: permit pool, exchange registry, bounded job runs.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::TransportError;

/// Correlation id for one exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// A held concurrency slot. Dropping it releases the slot.
pub struct ExchangePermit {
    _permit: OwnedSemaphorePermit,
}

/// Counting permit pool. Waiters are served strictly in arrival order, so
/// no caller starves.
#[derive(Debug, Clone)]
pub struct PermitPool {
    semaphore: Arc<Semaphore>,
}

impl PermitPool {
    pub fn new(permits: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(permits.max(1))),
        }
    }

    /// Wait for a free slot.
    pub async fn acquire(&self) -> Result<ExchangePermit, TransportError> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| TransportError::unknown(format!("permit pool closed: {e}")))?;
        Ok(ExchangePermit { _permit: permit })
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

/// Run every job through a pool of `limit` permits.
///
/// Results come back aligned with the input order. A failing job records
/// its error in its own slot and never aborts or cancels siblings.
pub async fn run_bounded<T, E, Fut>(jobs: Vec<Fut>, limit: usize) -> Vec<Result<T, E>>
where
    Fut: Future<Output = Result<T, E>>,
{
    let semaphore = Arc::new(Semaphore::new(limit.max(1)));
    let bounded = jobs.into_iter().map(|job| {
        let semaphore = semaphore.clone();
        async move {
            // The semaphore lives for the duration of this call and is
            // never closed, so a failed acquire cannot happen in practice;
            // falling through just runs the job unbounded.
            let _permit = semaphore.acquire_owned().await.ok();
            job.await
        }
    });
    futures::future::join_all(bounded).await
}

/// Tracks in-flight exchanges by correlation id so any one of them, or all
/// of them, can be cancelled.
///
/// Entries are removed immediately on completion or cancellation. Owned by
/// a client/orchestrator instance, never global.
#[derive(Debug, Default)]
pub struct ExchangeRegistry {
    entries: Mutex<HashMap<RequestId, CancellationToken>>,
}

impl ExchangeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a correlation id and cancellation token for a new exchange.
    pub fn register(&self) -> (RequestId, CancellationToken) {
        let id = RequestId::new();
        let token = CancellationToken::new();
        self.lock_entries().insert(id, token.clone());
        (id, token)
    }

    /// Remove a completed exchange. No-op when already gone.
    pub fn deregister(&self, id: RequestId) {
        self.lock_entries().remove(&id);
    }

    /// Cancel one exchange. Returns whether it was still in flight.
    pub fn cancel(&self, id: RequestId) -> bool {
        match self.lock_entries().remove(&id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every in-flight exchange.
    pub fn cancel_all(&self) {
        for (_, token) in self.lock_entries().drain() {
            token.cancel();
        }
    }

    pub fn in_flight(&self) -> usize {
        self.lock_entries().len()
    }

    fn lock_entries(&self) -> MutexGuard<'_, HashMap<RequestId, CancellationToken>> {
        // Nothing panics while holding this lock; recover a poisoned guard
        // rather than propagating the panic.
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn run_bounded_never_exceeds_the_limit() {
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let jobs: Vec<_> = (0..10)
            .map(|i| {
                let current = current.clone();
                let peak = peak.clone();
                async move {
                    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    current.fetch_sub(1, Ordering::SeqCst);
                    Ok::<usize, TransportError>(i)
                }
            })
            .collect();

        let results = run_bounded(jobs, 3).await;
        assert_eq!(results.len(), 10);
        assert!(peak.load(Ordering::SeqCst) <= 3, "limit exceeded");
    }

    #[tokio::test]
    async fn one_failing_job_does_not_stop_the_others() {
        let jobs: Vec<_> = (0..10)
            .map(|i| async move {
                if i == 4 {
                    Err(TransportError::network("boom"))
                } else {
                    Ok(i)
                }
            })
            .collect();

        let results = run_bounded(jobs, 3).await;
        assert_eq!(results.len(), 10);
        assert!(results[4].is_err());
        let ok_count = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(ok_count, 9);
        // Alignment with the input order.
        assert_eq!(*results[7].as_ref().unwrap(), 7);
    }

    #[tokio::test]
    async fn permits_release_on_drop() {
        let pool = PermitPool::new(2);
        let a = pool.acquire().await.unwrap();
        let _b = pool.acquire().await.unwrap();
        assert_eq!(pool.available(), 0);
        drop(a);
        assert_eq!(pool.available(), 1);
    }

    #[tokio::test]
    async fn cancelling_one_exchange_leaves_others_alone() {
        let registry = ExchangeRegistry::new();
        let (id_a, token_a) = registry.register();
        let (_id_b, token_b) = registry.register();

        assert!(registry.cancel(id_a));
        assert!(token_a.is_cancelled());
        assert!(!token_b.is_cancelled());
        assert_eq!(registry.in_flight(), 1);

        // Cancelling again is a no-op.
        assert!(!registry.cancel(id_a));
    }

    #[tokio::test]
    async fn cancel_all_clears_the_registry() {
        let registry = ExchangeRegistry::new();
        let (_, token_a) = registry.register();
        let (_, token_b) = registry.register();
        registry.cancel_all();
        assert!(token_a.is_cancelled());
        assert!(token_b.is_cancelled());
        assert_eq!(registry.in_flight(), 0);
    }
}
