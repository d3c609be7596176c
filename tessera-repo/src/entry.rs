//! Cache entry state: borrower count and one-shot readiness.
//!
//! Everything here is shard-local. The types are built on `Rc`/`RefCell` and
//! are deliberately `!Send`.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use tessera_core::TableId;
use tokio::sync::{watch, Notify};

/// Threshold crossed by a borrower count update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The count went from 0 to 1.
    BecameNonzero,
    /// The count went from 1 to 0.
    BecameZero,
    /// No threshold was crossed.
    Unchanged,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Tally {
    count: u32,
    /// Number of 0 -> 1 transitions so far.
    activations: u64,
}

/// Number of live borrowers of a cache entry.
///
/// Watchers are woken only when the count crosses zero in either direction.
/// Every 0 -> 1 transition also bumps an activation counter so that a borrow
/// that comes and goes before a watcher runs is still observed.
#[derive(Debug)]
pub struct BorrowCount {
    tally: watch::Sender<Tally>,
}

impl BorrowCount {
    /// Creates a count of zero.
    #[must_use]
    pub fn new() -> Self {
        let (tally, _) = watch::channel(Tally::default());
        Self { tally }
    }

    /// Returns the current number of borrowers.
    #[must_use]
    pub fn get(&self) -> u32 {
        self.tally.borrow().count
    }

    /// Returns the number of 0 -> 1 transitions so far.
    #[must_use]
    pub fn activations(&self) -> u64 {
        self.tally.borrow().activations
    }

    /// Adds a borrower.
    ///
    /// # Panics
    ///
    /// Panics if the count would overflow.
    pub fn increment(&self) -> Transition {
        let current = *self.tally.borrow();
        let Some(count) = current.count.checked_add(1) else {
            panic!("borrower count overflow");
        };
        let transition = if count == 1 {
            Transition::BecameNonzero
        } else {
            Transition::Unchanged
        };
        self.tally.send_if_modified(|tally| {
            tally.count = count;
            if transition == Transition::BecameNonzero {
                tally.activations += 1;
                return true;
            }
            false
        });
        transition
    }

    /// Removes a borrower.
    ///
    /// # Panics
    ///
    /// Panics if the count is already zero.
    pub fn decrement(&self) -> Transition {
        let current = self.tally.borrow().count;
        assert!(current > 0, "borrower count underflow");
        let count = current - 1;
        let transition = if count == 0 {
            Transition::BecameZero
        } else {
            Transition::Unchanged
        };
        self.tally.send_if_modified(|tally| {
            tally.count = count;
            transition == Transition::BecameZero
        });
        transition
    }

    /// Waits until the count is zero.
    pub async fn became_zero(&self) {
        let mut rx = self.tally.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|tally| tally.count == 0).await;
    }

    /// Waits for a 0 -> 1 transition after the given activation count.
    ///
    /// Returns immediately if one already happened, even if the count has
    /// since dropped back to zero.
    pub async fn became_nonzero(&self, since: u64) {
        let mut rx = self.tally.subscribe();
        let _ = rx.wait_for(|tally| tally.activations != since).await;
    }
}

impl Default for BorrowCount {
    fn default() -> Self {
        Self::new()
    }
}

enum Slot<T> {
    Pending,
    Ready(Rc<T>),
    Retired,
}

/// One-shot readiness signal carrying the constructed value.
///
/// Published at most once, observable any number of times. Waiting is
/// cancellable by dropping the wait future.
pub struct Readiness<T> {
    slot: RefCell<Slot<T>>,
    published: Notify,
}

impl<T> Readiness<T> {
    /// Creates an unset signal.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slot: RefCell::new(Slot::Pending),
            published: Notify::new(),
        }
    }

    /// Sets the value and wakes every waiter.
    ///
    /// # Panics
    ///
    /// Panics if the signal was already published.
    pub fn publish(&self, value: Rc<T>) {
        {
            let mut slot = self.slot.borrow_mut();
            assert!(
                matches!(*slot, Slot::Pending),
                "readiness published twice"
            );
            *slot = Slot::Ready(value);
        }
        self.published.notify_waiters();
    }

    /// Returns the value if it has been published and not yet retired.
    #[must_use]
    pub fn get(&self) -> Option<Rc<T>> {
        match &*self.slot.borrow() {
            Slot::Ready(value) => Some(Rc::clone(value)),
            Slot::Pending | Slot::Retired => None,
        }
    }

    /// Returns true once the value has been published and not yet retired.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(*self.slot.borrow(), Slot::Ready(_))
    }

    /// Waits for the value.
    pub async fn wait(&self) -> Rc<T> {
        loop {
            // Registered before the check so a publish in between is not lost.
            let notified = self.published.notified();
            if let Some(value) = self.get() {
                return value;
            }
            notified.await;
        }
    }

    /// Takes the value out for teardown. The signal can never fire again.
    pub fn retire(&self) -> Option<Rc<T>> {
        match self.slot.replace(Slot::Retired) {
            Slot::Ready(value) => Some(value),
            Slot::Pending | Slot::Retired => None,
        }
    }
}

impl<T> Default for Readiness<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Readiness<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*self.slot.borrow() {
            Slot::Pending => "pending",
            Slot::Ready(_) => "ready",
            Slot::Retired => "retired",
        };
        f.debug_struct("Readiness").field("state", &state).finish()
    }
}

/// Per-table cache record on one shard.
///
/// Created by the cache, destroyed only by its lifecycle task.
#[derive(Debug)]
pub(crate) struct CacheEntry<I> {
    pub(crate) table_id: TableId,
    pub(crate) readiness: Readiness<I>,
    /// Provisional borrows and access handles together.
    pub(crate) borrowers: BorrowCount,
    /// Live access handles only.
    pub(crate) handles: Cell<u32>,
}

impl<I> CacheEntry<I> {
    pub(crate) fn new(table_id: TableId) -> Self {
        Self {
            table_id,
            readiness: Readiness::new(),
            borrowers: BorrowCount::new(),
            handles: Cell::new(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::time::Duration;

    #[test]
    fn test_transitions() {
        let count = BorrowCount::new();
        assert_eq!(count.increment(), Transition::BecameNonzero);
        assert_eq!(count.increment(), Transition::Unchanged);
        assert_eq!(count.decrement(), Transition::Unchanged);
        assert_eq!(count.decrement(), Transition::BecameZero);
        assert_eq!(count.get(), 0);
        assert_eq!(count.activations(), 1);
    }

    #[test]
    #[should_panic(expected = "borrower count underflow")]
    fn test_decrement_below_zero_panics() {
        BorrowCount::new().decrement();
    }

    #[test]
    #[should_panic(expected = "readiness published twice")]
    fn test_double_publish_panics() {
        let readiness = Readiness::new();
        readiness.publish(Rc::new(1));
        readiness.publish(Rc::new(2));
    }

    #[test]
    #[should_panic(expected = "readiness published twice")]
    fn test_publish_after_retire_panics() {
        let readiness = Readiness::<u32>::new();
        assert!(readiness.retire().is_none());
        readiness.publish(Rc::new(1));
    }

    #[tokio::test]
    async fn test_wait_sees_later_publish() {
        let readiness = Rc::new(Readiness::new());
        let local = tokio::task::LocalSet::new();

        local
            .run_until(async {
                let waiter = {
                    let readiness = Rc::clone(&readiness);
                    tokio::task::spawn_local(async move { *readiness.wait().await })
                };
                tokio::task::yield_now().await;
                assert!(!readiness.is_ready());

                readiness.publish(Rc::new(7));
                assert_eq!(waiter.await.unwrap(), 7);
            })
            .await;

        assert_eq!(readiness.retire().map(|value| *value), Some(7));
        assert!(readiness.get().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_became_nonzero_catches_missed_borrow() {
        let count = BorrowCount::new();
        let since = count.activations();

        // Borrowed and released before anybody watched.
        count.increment();
        count.decrement();

        tokio::time::timeout(Duration::from_secs(1), count.became_nonzero(since))
            .await
            .unwrap();
        tokio::time::timeout(Duration::from_secs(1), count.became_zero())
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_became_zero_waits_for_last_release() {
        let count = BorrowCount::new();
        count.increment();
        count.increment();

        let pending = tokio::time::timeout(Duration::from_secs(1), count.became_zero()).await;
        assert!(pending.is_err());

        count.decrement();
        count.decrement();
        tokio::time::timeout(Duration::from_secs(1), count.became_zero())
            .await
            .unwrap();
    }

    proptest! {
        #[test]
        fn test_count_matches_model(ops in prop::collection::vec(any::<bool>(), 0..200)) {
            let count = BorrowCount::new();
            let mut model: u32 = 0;
            let mut activations: u64 = 0;

            for acquire in ops {
                if acquire {
                    let transition = count.increment();
                    model += 1;
                    if model == 1 {
                        activations += 1;
                        prop_assert_eq!(transition, Transition::BecameNonzero);
                    } else {
                        prop_assert_eq!(transition, Transition::Unchanged);
                    }
                } else if model > 0 {
                    let transition = count.decrement();
                    model -= 1;
                    let expected = if model == 0 {
                        Transition::BecameZero
                    } else {
                        Transition::Unchanged
                    };
                    prop_assert_eq!(transition, expected);
                }
                prop_assert_eq!(count.get(), model);
                prop_assert_eq!(count.activations(), activations);
            }
        }
    }
}
