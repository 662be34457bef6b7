//! One-shot event scheduler with shared, cancellable entries.
//!
//! # Ownership
//!
//! Every scheduled callback lives in an `Arc<Entry>`. The scheduler's queue
//! holds one strong reference; every [`EventHandle`] holds another. Nothing
//! points back into the queue's storage, so the queue may reorder or grow
//! freely.
//!
//! Cancelling takes the callback out of the entry. That is idempotent (the
//! second take finds `None`) and wins against a concurrent poll: whichever
//! side takes the callback first decides whether it runs. The entry memory
//! itself is released when the last `Arc` drops.
//!
//! ```text
//!   EventScheduler.queue ──┐
//!                          ├──► Arc<Entry { callback: Mutex<Option<F>> }>
//!   EventHandle (token) ───┘
//!   WeakEventHandle ─ ─ ─ ─► (does not keep the entry alive)
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::trace;

type Callback<C> = Box<dyn FnOnce(&mut C) + Send>;

/// Ordering key: fire time first, insertion order second.
type EventKey = (Instant, u64);

struct Entry<C> {
    key: EventKey,
    callback: Mutex<Option<Callback<C>>>,
}

impl<C> Entry<C> {
    fn take(&self) -> Option<Callback<C>> {
        self.callback.lock().take()
    }

    fn is_pending(&self) -> bool {
        self.callback.lock().is_some()
    }
}

/// A queue of one-shot callbacks that run against a context `C`.
///
/// `C` is whatever state the callbacks mutate. For token expiry it is the
/// token table, which keeps callbacks free of shared-ownership plumbing.
pub struct EventScheduler<C> {
    queue: BTreeMap<EventKey, Arc<Entry<C>>>,
    next_seq: u64,
}

impl<C> Default for EventScheduler<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> fmt::Debug for EventScheduler<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventScheduler")
            .field("scheduled", &self.queue.len())
            .finish()
    }
}

impl<C> EventScheduler<C> {
    pub fn new() -> Self {
        Self {
            queue: BTreeMap::new(),
            next_seq: 0,
        }
    }

    /// Schedules `callback` to run once `delay` has passed since `now`.
    pub fn schedule<F>(&mut self, now: Instant, delay: Duration, callback: F) -> EventHandle<C>
    where
        F: FnOnce(&mut C) + Send + 'static,
    {
        self.schedule_at(now + delay, callback)
    }

    /// Schedules `callback` to run at the first poll at or after `at`.
    pub fn schedule_at<F>(&mut self, at: Instant, callback: F) -> EventHandle<C>
    where
        F: FnOnce(&mut C) + Send + 'static,
    {
        let key = (at, self.next_seq);
        self.next_seq += 1;

        let entry = Arc::new(Entry {
            key,
            callback: Mutex::new(Some(Box::new(callback))),
        });
        self.queue.insert(key, Arc::clone(&entry));
        trace!(seq = key.1, "event scheduled");

        EventHandle { entry }
    }

    /// Runs every entry whose fire time is at or before `now`, in order.
    ///
    /// Cancelled entries are dropped without running. Returns how many
    /// callbacks actually ran.
    pub fn poll(&mut self, now: Instant, ctx: &mut C) -> usize {
        let mut fired = 0;
        while let Some(entry) = self.queue.first_entry() {
            if entry.key().0 > now {
                break;
            }
            let entry = entry.remove();
            if let Some(callback) = entry.take() {
                callback(ctx);
                fired += 1;
            }
        }
        fired
    }

    /// Cancels `handle` and removes its entry from the queue right away.
    ///
    /// Equivalent to [`EventHandle::cancel`] plus eager cleanup. Returns
    /// `true` if this call is what stopped the callback.
    pub fn cancel(&mut self, handle: &EventHandle<C>) -> bool {
        let stopped = handle.cancel();
        self.queue.remove(&handle.entry.key);
        stopped
    }

    /// Number of entries still queued, cancelled ones included until the
    /// next poll or explicit [`cancel`](Self::cancel) removes them.
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Fire time of the earliest queued entry.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.queue.keys().next().map(|(at, _)| *at)
    }
}

/// A strong handle to a scheduled entry.
///
/// Cloning the handle adds an owner. Dropping a handle does not cancel the
/// event; call [`cancel`](Self::cancel) for that.
pub struct EventHandle<C> {
    entry: Arc<Entry<C>>,
}

impl<C> Clone for EventHandle<C> {
    fn clone(&self) -> Self {
        Self {
            entry: Arc::clone(&self.entry),
        }
    }
}

impl<C> fmt::Debug for EventHandle<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHandle")
            .field("seq", &self.entry.key.1)
            .field("pending", &self.is_pending())
            .finish()
    }
}

impl<C> EventHandle<C> {
    /// Stops the callback from running. Idempotent.
    ///
    /// Returns `true` only for the call that actually removed the callback.
    pub fn cancel(&self) -> bool {
        self.entry.take().is_some()
    }

    /// `true` until the callback runs or is cancelled.
    pub fn is_pending(&self) -> bool {
        self.entry.is_pending()
    }

    /// When the entry is due.
    pub fn fire_at(&self) -> Instant {
        self.entry.key.0
    }

    /// A handle that can cancel without keeping the entry alive.
    pub fn downgrade(&self) -> WeakEventHandle<C> {
        WeakEventHandle {
            entry: Arc::downgrade(&self.entry),
        }
    }

    /// Number of strong owners, the scheduler's queue slot included.
    pub fn owners(&self) -> usize {
        Arc::strong_count(&self.entry)
    }
}

/// A non-owning cancellation token for a scheduled entry.
pub struct WeakEventHandle<C> {
    entry: Weak<Entry<C>>,
}

impl<C> Clone for WeakEventHandle<C> {
    fn clone(&self) -> Self {
        Self {
            entry: Weak::clone(&self.entry),
        }
    }
}

impl<C> WeakEventHandle<C> {
    /// Returns a strong handle if the entry is still alive.
    pub fn upgrade(&self) -> Option<EventHandle<C>> {
        self.entry.upgrade().map(|entry| EventHandle { entry })
    }

    /// Cancels the entry if it is still alive. Idempotent.
    pub fn cancel(&self) -> bool {
        self.entry
            .upgrade()
            .is_some_and(|entry| entry.take().is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poll_runs_in_fire_time_order() {
        let mut sched: EventScheduler<Vec<u32>> = EventScheduler::new();
        let t0 = Instant::now();
        sched.schedule(t0, Duration::from_secs(3), |log| log.push(3));
        sched.schedule(t0, Duration::from_secs(1), |log| log.push(1));
        sched.schedule(t0, Duration::from_secs(2), |log| log.push(2));

        let mut log = Vec::new();
        let fired = sched.poll(t0 + Duration::from_secs(5), &mut log);

        assert_eq!(fired, 3);
        assert_eq!(log, vec![1, 2, 3]);
        assert!(sched.is_empty());
    }

    #[test]
    fn test_poll_ties_break_by_insertion_order() {
        let mut sched: EventScheduler<Vec<&'static str>> = EventScheduler::new();
        let at = Instant::now();
        sched.schedule_at(at, |log| log.push("first"));
        sched.schedule_at(at, |log| log.push("second"));

        let mut log = Vec::new();
        sched.poll(at, &mut log);

        assert_eq!(log, vec!["first", "second"]);
    }

    #[test]
    fn test_poll_leaves_future_entries() {
        let mut sched: EventScheduler<u32> = EventScheduler::new();
        let t0 = Instant::now();
        sched.schedule(t0, Duration::from_secs(10), |n| *n += 1);

        let mut n = 0;
        assert_eq!(sched.poll(t0 + Duration::from_secs(9), &mut n), 0);
        assert_eq!(sched.len(), 1);
        assert_eq!(sched.next_deadline(), Some(t0 + Duration::from_secs(10)));
    }

    #[test]
    fn test_scheduler_cancel_removes_entry_eagerly() {
        let mut sched: EventScheduler<u32> = EventScheduler::new();
        let t0 = Instant::now();
        let handle = sched.schedule(t0, Duration::ZERO, |n| *n += 1);

        assert!(sched.cancel(&handle));
        assert!(sched.is_empty());
        assert!(!sched.cancel(&handle), "second cancel is a no-op");
    }

    #[test]
    fn test_handle_owners_counts_queue_slot() {
        let mut sched: EventScheduler<u32> = EventScheduler::new();
        let handle = sched.schedule(Instant::now(), Duration::ZERO, |_| {});
        let extra = handle.clone();

        assert_eq!(handle.owners(), 3);
        drop(extra);
        assert_eq!(handle.owners(), 2);
    }
}
