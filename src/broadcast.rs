//! In-process fan-out of newly captured log records
//!
//! Synchronous publish/subscribe with no persistence, delivery guarantee,
//! or backpressure; subscribers are dashboard viewers, so the list stays
//! small. The subscriber list is snapshot-cloned before iteration, so
//! subscribe/unsubscribe never race an in-progress broadcast.

use crate::record::LogRecord;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

type Callback = Arc<dyn Fn(&LogRecord) + Send + Sync>;

/// Handle returned by [`LogBroadcaster::subscribe`], used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subscription(u64);

#[derive(Default)]
pub struct LogBroadcaster {
    subscribers: Mutex<Vec<(u64, Callback)>>,
    next_id: AtomicU64,
}

impl LogBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<(u64, Callback)>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&LogRecord) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.lock().push((id, Arc::new(callback)));
        Subscription(id)
    }

    pub fn unsubscribe(&self, subscription: Subscription) {
        self.lock().retain(|(id, _)| *id != subscription.0);
    }

    /// Deliver a record to every current subscriber
    ///
    /// Each invocation is isolated: a panicking subscriber is reported and
    /// skipped, never preventing delivery to the rest, and the fault does
    /// not propagate to the broadcasting caller.
    pub fn broadcast(&self, record: &LogRecord) {
        let subscribers: Vec<(u64, Callback)> = self.lock().clone();
        for (id, callback) in subscribers {
            if catch_unwind(AssertUnwindSafe(|| callback(record))).is_err() {
                tracing::warn!(subscriber = id, "log subscriber panicked during broadcast");
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_every_subscriber_receives_each_broadcast() {
        let broadcaster = LogBroadcaster::new();
        let counters: Vec<Arc<AtomicUsize>> =
            (0..3).map(|_| Arc::new(AtomicUsize::new(0))).collect();

        for counter in &counters {
            let counter = counter.clone();
            broadcaster.subscribe(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }

        let record = LogRecord::new("GET /");
        broadcaster.broadcast(&record);
        broadcaster.broadcast(&record);

        for counter in &counters {
            assert_eq!(counter.load(Ordering::SeqCst), 2);
        }
    }

    #[test]
    fn test_panicking_subscriber_does_not_block_the_rest() {
        let broadcaster = LogBroadcaster::new();
        let delivered = Arc::new(AtomicUsize::new(0));

        broadcaster.subscribe(|_| panic!("subscriber bug"));
        {
            let delivered = delivered.clone();
            broadcaster.subscribe(move |_| {
                delivered.fetch_add(1, Ordering::SeqCst);
            });
        }

        broadcaster.broadcast(&LogRecord::new("GET /"));
        assert_eq!(delivered.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let broadcaster = LogBroadcaster::new();
        let delivered = Arc::new(AtomicUsize::new(0));

        let subscription = {
            let delivered = delivered.clone();
            broadcaster.subscribe(move |_| {
                delivered.fetch_add(1, Ordering::SeqCst);
            })
        };
        assert_eq!(broadcaster.subscriber_count(), 1);

        broadcaster.broadcast(&LogRecord::new("GET /"));
        broadcaster.unsubscribe(subscription);
        broadcaster.broadcast(&LogRecord::new("GET /"));

        assert_eq!(delivered.load(Ordering::SeqCst), 1);
        assert_eq!(broadcaster.subscriber_count(), 0);
    }

    #[test]
    fn test_subscriber_sees_assigned_id() {
        let broadcaster = LogBroadcaster::new();
        let seen = Arc::new(AtomicUsize::new(0));
        {
            let seen = seen.clone();
            broadcaster.subscribe(move |record| {
                seen.store(record.id as usize, Ordering::SeqCst);
            });
        }

        let record = LogRecord::new("GET /").with_id(77);
        broadcaster.broadcast(&record);
        assert_eq!(seen.load(Ordering::SeqCst), 77);
    }
}
