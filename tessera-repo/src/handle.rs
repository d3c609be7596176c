//! Borrow tokens handed out by the shard cache.

use std::fmt;
use std::ops::Deref;
use std::rc::Rc;

use tessera_core::{ShardId, TableId};

use crate::entry::CacheEntry;

/// One unit of the entry's borrower count, released on drop.
///
/// Taken before waiting for readiness so the entry cannot be torn down under
/// a waiting caller.
pub(crate) struct Borrow<I> {
    entry: Rc<CacheEntry<I>>,
}

impl<I> Borrow<I> {
    pub(crate) fn new(entry: Rc<CacheEntry<I>>) -> Self {
        entry.borrowers.increment();
        Self { entry }
    }

    pub(crate) const fn entry(&self) -> &Rc<CacheEntry<I>> {
        &self.entry
    }
}

impl<I> Drop for Borrow<I> {
    fn drop(&mut self) {
        self.entry.borrowers.decrement();
    }
}

/// Scoped access to a cached table interface.
///
/// Holding a handle keeps the table's cache entry alive. Handles cannot be
/// cloned or sent to another shard; ask the cache again for another one.
pub struct AccessHandle<I> {
    interface: Rc<I>,
    borrow: Borrow<I>,
    shard: ShardId,
}

impl<I> AccessHandle<I> {
    pub(crate) fn new(interface: Rc<I>, borrow: Borrow<I>, shard: ShardId) -> Self {
        let handles = &borrow.entry().handles;
        let Some(count) = handles.get().checked_add(1) else {
            panic!("access handle count overflow");
        };
        handles.set(count);
        Self {
            interface,
            borrow,
            shard,
        }
    }

    /// Returns the table this handle is for.
    #[must_use]
    pub fn table_id(&self) -> TableId {
        self.borrow.entry().table_id
    }

    /// Returns the shard that issued this handle.
    #[must_use]
    pub const fn shard(&self) -> ShardId {
        self.shard
    }

    /// Returns true if both handles point at the same interface object.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.interface, &other.interface)
    }
}

impl<I> Deref for AccessHandle<I> {
    type Target = I;

    fn deref(&self) -> &I {
        &self.interface
    }
}

impl<I> Drop for AccessHandle<I> {
    fn drop(&mut self) {
        let handles = &self.borrow.entry().handles;
        let Some(count) = handles.get().checked_sub(1) else {
            panic!("access handle count underflow");
        };
        handles.set(count);
        // The borrow itself is released when the field drops.
    }
}

impl<I> fmt::Debug for AccessHandle<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessHandle")
            .field("table_id", &self.table_id())
            .field("shard", &self.shard)
            .finish_non_exhaustive()
    }
}
