//! Per-BMC concurrency limiter: a lazily-populated map of
//! `Semaphore`s, one per BMC id, so two tasks targeting the same BMC never
//! run concurrently while unrelated BMCs proceed in parallel.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

pub enum Slot {
    /// Held no semaphore; limiting is disabled or the bmc id is empty.
    Bypassed,
    Limited(OwnedSemaphorePermit),
    Canceled,
}

pub struct BmcLimiter {
    capacity: usize,
    semaphores: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl BmcLimiter {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            semaphores: Mutex::new(HashMap::new()),
        }
    }

    pub async fn acquire(&self, bmc_id: &str, cancel: &CancellationToken) -> Slot {
        if self.capacity == 0 || bmc_id.is_empty() {
            return Slot::Bypassed;
        }
        let sem = {
            let mut map = self.semaphores.lock().await;
            map.entry(bmc_id.to_string())
                .or_insert_with(|| Arc::new(Semaphore::new(self.capacity)))
                .clone()
        };
        tokio::select! {
            permit = sem.acquire_owned() => match permit {
                Ok(p) => Slot::Limited(p),
                Err(_) => Slot::Bypassed, // semaphore closed; never happens, we never call close()
            },
            _ = cancel.cancelled() => Slot::Canceled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_bmc_serializes() {
        let limiter = Arc::new(BmcLimiter::new(1));
        let cancel = CancellationToken::new();
        let first = limiter.acquire("bmc-1", &cancel).await;
        assert!(matches!(first, Slot::Limited(_)));

        let limiter2 = limiter.clone();
        let cancel2 = cancel.clone();
        let blocked = tokio::spawn(async move { limiter2.acquire("bmc-1", &cancel2).await });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!blocked.is_finished());

        drop(first);
        let second = blocked.await.unwrap();
        assert!(matches!(second, Slot::Limited(_)));
    }

    #[tokio::test]
    async fn zero_capacity_bypasses() {
        let limiter = BmcLimiter::new(0);
        let cancel = CancellationToken::new();
        assert!(matches!(limiter.acquire("bmc-1", &cancel).await, Slot::Bypassed));
    }

    #[tokio::test]
    async fn empty_bmc_id_bypasses() {
        let limiter = BmcLimiter::new(4);
        let cancel = CancellationToken::new();
        assert!(matches!(limiter.acquire("", &cancel).await, Slot::Bypassed));
    }

    #[tokio::test]
    async fn cancellation_unblocks_acquire() {
        let limiter = Arc::new(BmcLimiter::new(1));
        let cancel = CancellationToken::new();
        let _held = limiter.acquire("bmc-1", &cancel).await;

        let limiter2 = limiter.clone();
        let cancel2 = cancel.clone();
        let blocked = tokio::spawn(async move { limiter2.acquire("bmc-1", &cancel2).await });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        cancel.cancel();
        let result = blocked.await.unwrap();
        assert!(matches!(result, Slot::Canceled));
    }
}
