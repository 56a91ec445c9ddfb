//! In-flight request coalescing keyed by [`Fingerprint`].
//!
//! The first caller for a given fingerprint becomes the "owner" and is
//! responsible for actually calling upstream; every later caller for the
//! same fingerprint while the owner is still working becomes a "waiter"
//! and receives the owner's outcome once published. Uses a `DashMap` of
//! pending slots plus a `watch` channel per slot, so every waiter (not just
//! the first) observes the published value.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{broadcast, watch};

use crate::fingerprint::Fingerprint;

/// Broadcast capacity per streaming slot. A lagging waiter drops the oldest
/// unread items rather than block the owner's forwarding loop; it simply
/// skips ahead on its next `recv`.
const STREAM_BROADCAST_CAPACITY: usize = 256;

/// Outcome published by the owner to every waiter on completion.
#[derive(Debug, Clone)]
pub enum Outcome {
    Success(serde_json::Value),
    /// A genuine upstream failure the owner observed; waiters see the same
    /// error rather than retrying on their own.
    Failed(String),
    /// The owner disappeared without publishing (panicked, was cancelled).
    /// Waiters should fall through to making their own upstream call rather
    /// than surface this as an error.
    Cancelled,
}

/// What a waiter got back from [`wait_for_outcome_with_deadline`].
pub enum WaitResult {
    Outcome(Outcome),
    /// The deadline elapsed before the owner published anything.
    TimedOut,
}

struct PendingSlot {
    sender: watch::Sender<Option<Outcome>>,
}

/// Coalesces concurrent requests that share a fingerprint into a single
/// upstream call.
#[derive(Default)]
pub struct RequestDeduplicator {
    pending: DashMap<Fingerprint, Arc<PendingSlot>>,
}

/// Handle returned to the caller that became the owner for a fingerprint.
/// Dropping it without calling `publish` counts as a cancellation: waiters
/// are released with a `Failed` outcome so nobody blocks forever on an
/// owner that disappeared.
pub struct OwnerHandle<'a> {
    dedup: &'a RequestDeduplicator,
    key: Fingerprint,
    slot: Arc<PendingSlot>,
    published: bool,
}

impl OwnerHandle<'_> {
    pub fn publish(mut self, outcome: Outcome) {
        let _ = self.slot.sender.send(Some(outcome));
        self.dedup.pending.remove(&self.key);
        self.published = true;
    }
}

impl Drop for OwnerHandle<'_> {
    fn drop(&mut self) {
        if !self.published {
            let _ = self.slot.sender.send(Some(Outcome::Cancelled));
            self.dedup.pending.remove(&self.key);
        }
    }
}

/// What `acquire` handed back: either become the owner, or wait on the
/// existing owner's outcome.
pub enum Acquired<'a> {
    Owner(OwnerHandle<'a>),
    Waiter(watch::Receiver<Option<Outcome>>),
}

impl RequestDeduplicator {
    pub fn new() -> Self {
        Self {
            pending: DashMap::new(),
        }
    }

    /// Join or create the in-flight slot for `key`.
    pub fn acquire(&self, key: Fingerprint) -> Acquired<'_> {
        match self.pending.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(existing) => {
                Acquired::Waiter(existing.get().sender.subscribe())
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                let (tx, _rx) = watch::channel(None);
                let slot = Arc::new(PendingSlot { sender: tx });
                vacant.insert(slot.clone());
                Acquired::Owner(OwnerHandle {
                    dedup: self,
                    key,
                    slot,
                    published: false,
                })
            }
        }
    }

    pub fn in_flight_count(&self) -> usize {
        self.pending.len()
    }
}

/// Block until the owner publishes, returning its outcome.
pub async fn wait_for_outcome(mut rx: watch::Receiver<Option<Outcome>>) -> Outcome {
    loop {
        if let Some(outcome) = rx.borrow().clone() {
            return outcome;
        }
        if rx.changed().await.is_err() {
            return Outcome::Cancelled;
        }
    }
}

/// Wait for the owner's outcome, bounded by `deadline`. A waiter that times
/// out should fall through to making its own upstream call rather than
/// retry the wait or claim a new slot.
pub async fn wait_for_outcome_with_deadline(
    rx: watch::Receiver<Option<Outcome>>,
    deadline: Duration,
) -> WaitResult {
    match tokio::time::timeout(deadline, wait_for_outcome(rx)).await {
        Ok(outcome) => WaitResult::Outcome(outcome),
        Err(_) => WaitResult::TimedOut,
    }
}

/// One increment of a coalesced streaming response, published by the owner
/// to every subscriber (itself included).
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Item { index: usize, translation: String },
    Failed(String),
    Done { total: usize },
}

/// Coalesces concurrent streaming requests that share a fingerprint onto a
/// single upstream stream. Structurally the same owner/waiter split as
/// [`RequestDeduplicator`], but built on a `broadcast` channel since a
/// streaming response is a sequence of items rather than one final value.
#[derive(Default)]
pub struct StreamDeduplicator {
    pending: DashMap<Fingerprint, broadcast::Sender<StreamEvent>>,
}

/// Handle held by the caller that became the owner for a streaming
/// fingerprint. Dropping it (even without publishing `Done`/`Failed`)
/// removes the slot so a later request starts its own stream rather than
/// subscribe to one that will never complete.
pub struct StreamOwnerHandle {
    dedup: Arc<StreamDeduplicator>,
    key: Fingerprint,
    sender: broadcast::Sender<StreamEvent>,
}

impl StreamOwnerHandle {
    pub fn publish(&self, event: StreamEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StreamEvent> {
        self.sender.subscribe()
    }

    /// A clone of the underlying sender, for moving into a spawned task
    /// alongside the handle itself (whose `Drop` releases the slot).
    pub fn sender(&self) -> broadcast::Sender<StreamEvent> {
        self.sender.clone()
    }
}

impl Drop for StreamOwnerHandle {
    fn drop(&mut self) {
        self.dedup.pending.remove(&self.key);
    }
}

pub enum StreamAcquired {
    Owner(StreamOwnerHandle),
    Waiter(broadcast::Receiver<StreamEvent>),
}

impl StreamDeduplicator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            pending: DashMap::new(),
        })
    }

    /// Join or create the in-flight streaming slot for `key`. The returned
    /// handle owns an `Arc` clone of the map rather than borrowing it, so it
    /// can be moved into a `tokio::spawn`'d task that outlives the caller.
    pub fn acquire(self: &Arc<Self>, key: Fingerprint) -> StreamAcquired {
        match self.pending.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(existing) => {
                StreamAcquired::Waiter(existing.get().subscribe())
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                let (tx, _rx) = broadcast::channel(STREAM_BROADCAST_CAPACITY);
                vacant.insert(tx.clone());
                StreamAcquired::Owner(StreamOwnerHandle {
                    dedup: Arc::clone(self),
                    key,
                    sender: tx,
                })
            }
        }
    }

    pub fn in_flight_count(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key(n: u8) -> Fingerprint {
        Fingerprint::compute(&[format!("t{n}")], "en", "m")
    }

    #[tokio::test]
    async fn first_caller_becomes_owner_second_becomes_waiter() {
        let dedup = RequestDeduplicator::new();
        let k = key(1);

        let owner = match dedup.acquire(k) {
            Acquired::Owner(h) => h,
            Acquired::Waiter(_) => panic!("expected owner"),
        };
        assert_eq!(dedup.in_flight_count(), 1);

        let waiter_rx = match dedup.acquire(k) {
            Acquired::Waiter(rx) => rx,
            Acquired::Owner(_) => panic!("expected waiter"),
        };

        owner.publish(Outcome::Success(json!("done")));
        assert_eq!(dedup.in_flight_count(), 0);

        match wait_for_outcome(waiter_rx).await {
            Outcome::Success(v) => assert_eq!(v, json!("done")),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn dropping_owner_without_publishing_releases_waiters() {
        let dedup = RequestDeduplicator::new();
        let k = key(2);

        let owner = match dedup.acquire(k) {
            Acquired::Owner(h) => h,
            Acquired::Waiter(_) => panic!("expected owner"),
        };
        let waiter_rx = match dedup.acquire(k) {
            Acquired::Waiter(rx) => rx,
            Acquired::Owner(_) => panic!("expected waiter"),
        };

        drop(owner);

        match wait_for_outcome(waiter_rx).await {
            Outcome::Cancelled => {}
            other => panic!("expected cancellation, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn waiter_times_out_while_owner_is_still_working() {
        let dedup = RequestDeduplicator::new();
        let k = key(4);

        let owner = match dedup.acquire(k) {
            Acquired::Owner(h) => h,
            Acquired::Waiter(_) => panic!("expected owner"),
        };
        let waiter_rx = match dedup.acquire(k) {
            Acquired::Waiter(rx) => rx,
            Acquired::Owner(_) => panic!("expected waiter"),
        };

        let result = wait_for_outcome_with_deadline(waiter_rx, Duration::from_millis(10)).await;
        assert!(matches!(result, WaitResult::TimedOut));

        owner.publish(Outcome::Success(json!("done")));
    }

    #[tokio::test]
    async fn distinct_fingerprints_each_get_their_own_owner() {
        let dedup = RequestDeduplicator::new();
        let (k1, k2) = (key(1), key(2));

        assert!(matches!(dedup.acquire(k1), Acquired::Owner(_)));
        assert!(matches!(dedup.acquire(k2), Acquired::Owner(_)));
        assert_eq!(dedup.in_flight_count(), 2);
    }

    #[tokio::test]
    async fn slot_is_reusable_after_publish_completes() {
        let dedup = RequestDeduplicator::new();
        let k = key(3);

        let owner = match dedup.acquire(k) {
            Acquired::Owner(h) => h,
            Acquired::Waiter(_) => panic!("expected owner"),
        };
        owner.publish(Outcome::Success(json!(1)));

        // a fresh request for the same fingerprint after completion must
        // start a brand new owner slot, not rejoin the finished one.
        assert!(matches!(dedup.acquire(k), Acquired::Owner(_)));
    }

    #[tokio::test]
    async fn stream_owner_fans_out_items_to_concurrent_waiters() {
        let dedup = StreamDeduplicator::new();
        let k = key(5);

        let owner = match dedup.acquire(k) {
            StreamAcquired::Owner(h) => h,
            StreamAcquired::Waiter(_) => panic!("expected owner"),
        };
        let mut waiter_a = match dedup.acquire(k) {
            StreamAcquired::Waiter(rx) => rx,
            StreamAcquired::Owner(_) => panic!("expected waiter"),
        };
        let mut waiter_b = match dedup.acquire(k) {
            StreamAcquired::Waiter(rx) => rx,
            StreamAcquired::Owner(_) => panic!("expected waiter"),
        };
        assert_eq!(dedup.in_flight_count(), 1);

        owner.publish(StreamEvent::Item {
            index: 0,
            translation: "Bonjour".to_string(),
        });
        owner.publish(StreamEvent::Done { total: 1 });

        for rx in [&mut waiter_a, &mut waiter_b] {
            match rx.recv().await.unwrap() {
                StreamEvent::Item { index, translation } => {
                    assert_eq!(index, 0);
                    assert_eq!(translation, "Bonjour");
                }
                other => panic!("unexpected event: {other:?}"),
            }
            assert!(matches!(rx.recv().await.unwrap(), StreamEvent::Done { total: 1 }));
        }

        drop(owner);
        assert_eq!(dedup.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn dropping_stream_owner_releases_the_slot_for_a_fresh_attempt() {
        let dedup = StreamDeduplicator::new();
        let k = key(6);

        let owner = match dedup.acquire(k) {
            StreamAcquired::Owner(h) => h,
            StreamAcquired::Waiter(_) => panic!("expected owner"),
        };
        drop(owner);

        assert_eq!(dedup.in_flight_count(), 0);
        assert!(matches!(dedup.acquire(k), StreamAcquired::Owner(_)));
    }
}
