//! Bounds the number of upstream calls in flight at once.
//!
//! A thin wrapper around `tokio::sync::Semaphore`.

use std::sync::Arc;

use tokio::sync::{Semaphore, SemaphorePermit};

pub struct ConcurrencyGate {
    semaphore: Arc<Semaphore>,
}

impl ConcurrencyGate {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
        }
    }

    /// Wait for a free slot. Never fails except if the semaphore were
    /// closed, which this type never does.
    pub async fn acquire(&self) -> SemaphorePermit<'_> {
        self.semaphore
            .acquire()
            .await
            .expect("concurrency gate semaphore is never closed")
    }

    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn limits_concurrent_holders() {
        let gate = ConcurrencyGate::new(2);
        let p1 = gate.acquire().await;
        let p2 = gate.acquire().await;
        assert_eq!(gate.available_permits(), 0);

        let gate_ref = &gate;
        let waited = tokio::time::timeout(std::time::Duration::from_millis(50), gate_ref.acquire()).await;
        assert!(waited.is_err(), "third acquire should block while two permits are held");

        drop(p1);
        drop(p2);
        assert_eq!(gate.available_permits(), 2);
    }

    #[tokio::test]
    async fn releases_permit_on_drop() {
        let gate = ConcurrencyGate::new(1);
        {
            let _permit = gate.acquire().await;
            assert_eq!(gate.available_permits(), 0);
        }
        assert_eq!(gate.available_permits(), 1);
    }
}
