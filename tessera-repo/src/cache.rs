//! Shard cache - the per-shard map of table interfaces.
//!
//! Every method must be called on the shard that owns the cache (the type is
//! `!Send`). Lifecycle tasks are spawned onto the shard's `LocalSet`.
//!
//! A lifecycle task panics only on a broken invariant. The panic is caught at
//! the task boundary and raised again from [`ShardCache::shutdown`], which
//! takes the shard down with it.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tessera_core::{ShardId, TableId};
use tessera_routing::SnapshotCell;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::config::RepoConfig;
use crate::directory::DirectoryHandle;
use crate::entry::CacheEntry;
use crate::error::{RepoError, RepoResult};
use crate::handle::{AccessHandle, Borrow};
use crate::interface::InterfaceConstructor;
use crate::lifecycle::{EntryMap, LifecycleTask, ShardEnv};

/// First panic raised by a lifecycle task on this shard.
#[derive(Default)]
struct Fatal {
    payload: RefCell<Option<Box<dyn Any + Send>>>,
    raised: CancellationToken,
}

impl Fatal {
    fn record(&self, payload: Box<dyn Any + Send>) {
        let mut slot = self.payload.borrow_mut();
        if slot.is_none() {
            *slot = Some(payload);
        }
        self.raised.cancel();
    }
}

/// Cache of table interfaces for one shard.
pub struct ShardCache<C: InterfaceConstructor> {
    entries: EntryMap<C::Interface>,
    env: Rc<ShardEnv<C>>,
    tasks: TaskTracker,
    fatal: Rc<Fatal>,
}

impl<C: InterfaceConstructor> ShardCache<C> {
    /// Creates an empty cache for `shard`.
    pub fn new(
        shard: ShardId,
        config: &RepoConfig,
        constructor: Arc<C>,
        routing: Arc<SnapshotCell>,
        directory: DirectoryHandle,
    ) -> Self {
        Self {
            entries: Rc::new(RefCell::new(HashMap::new())),
            env: Rc::new(ShardEnv {
                shard,
                constructor,
                routing,
                directory,
                idle_timeout: config.idle_timeout,
                drain: CancellationToken::new(),
            }),
            tasks: TaskTracker::new(),
            fatal: Rc::new(Fatal::default()),
        }
    }

    /// Returns a handle to the interface for `table_id`, constructing it if
    /// this shard has none cached.
    ///
    /// Waits until the interface is ready.
    ///
    /// # Errors
    ///
    /// Returns `RepoError::Cancelled` if `cancel` fires first and
    /// `RepoError::ShuttingDown` if the shard drains first. Either way the
    /// caller's borrow is released and the entry's lifecycle is unaffected.
    pub async fn get_interface(
        &self,
        table_id: TableId,
        cancel: &CancellationToken,
    ) -> RepoResult<AccessHandle<C::Interface>> {
        if self.env.drain.is_cancelled() {
            return Err(RepoError::ShuttingDown { table_id });
        }

        // No suspension between lookup and borrow.
        let borrow = Borrow::new(self.find_or_create(table_id));
        let entry = Rc::clone(borrow.entry());

        if let Some(interface) = entry.readiness.get() {
            return Ok(AccessHandle::new(interface, borrow, self.env.shard));
        }

        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(RepoError::Cancelled { table_id }),
            () = self.env.drain.cancelled() => Err(RepoError::ShuttingDown { table_id }),
            interface = entry.readiness.wait() => {
                Ok(AccessHandle::new(interface, borrow, self.env.shard))
            }
        }
    }

    fn find_or_create(&self, table_id: TableId) -> Rc<CacheEntry<C::Interface>> {
        let mut entries = self.entries.borrow_mut();
        if let Some(entry) = entries.get(&table_id) {
            return Rc::clone(entry);
        }

        let entry = Rc::new(CacheEntry::new(table_id));
        entries.insert(table_id, Rc::clone(&entry));
        drop(entries);

        let task = LifecycleTask::new(
            Rc::clone(&entry),
            Rc::clone(&self.entries),
            Rc::clone(&self.env),
        );
        let fatal = Rc::clone(&self.fatal);
        let shard = self.env.shard;
        self.tasks.spawn_local(async move {
            if let Err(payload) = AssertUnwindSafe(task.run()).catch_unwind().await {
                error!(shard = %shard, table_id = %table_id, "Lifecycle task panicked");
                fatal.record(payload);
            }
        });
        debug!(shard = %self.env.shard, table_id = %table_id, "Created cache entry");
        entry
    }

    /// Returns the shard this cache belongs to.
    #[must_use]
    pub fn shard(&self) -> ShardId {
        self.env.shard
    }

    /// Returns the shard's routing snapshot source.
    #[must_use]
    pub fn routing(&self) -> &Arc<SnapshotCell> {
        &self.env.routing
    }

    /// Returns the idle timeout entries are torn down after.
    #[must_use]
    pub fn idle_timeout(&self) -> Duration {
        self.env.idle_timeout
    }

    /// Returns the number of cached tables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    /// Returns true if no table is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    /// Returns true if `table_id` has a cache entry.
    #[must_use]
    pub fn contains(&self, table_id: TableId) -> bool {
        self.entries.borrow().contains_key(&table_id)
    }

    /// Returns the borrower count of `table_id`'s entry, including callers
    /// still waiting for readiness.
    #[must_use]
    pub fn borrowers(&self, table_id: TableId) -> Option<u32> {
        self.entries
            .borrow()
            .get(&table_id)
            .map(|entry| entry.borrowers.get())
    }

    /// Returns true if `table_id`'s interface has been published.
    #[must_use]
    pub fn is_ready(&self, table_id: TableId) -> bool {
        self.entries
            .borrow()
            .get(&table_id)
            .is_some_and(|entry| entry.readiness.is_ready())
    }

    /// Returns true once shutdown has started.
    #[must_use]
    pub fn is_draining(&self) -> bool {
        self.env.drain.is_cancelled()
    }

    /// Resolves once a lifecycle task on this shard has panicked.
    ///
    /// The shard should stop taking work and call [`Self::shutdown`], which
    /// raises the panic again.
    pub async fn failed(&self) {
        self.fatal.raised.cancelled().await;
    }

    /// Drains the cache: every lifecycle task is cancelled and awaited.
    ///
    /// Callers must have dropped every access handle first.
    ///
    /// # Panics
    ///
    /// Resumes the first lifecycle task panic, including the one raised when
    /// an access handle is still alive at drain time.
    pub async fn shutdown(&self) {
        info!(shard = %self.env.shard, entries = self.len(), "Draining shard cache");
        self.env.drain.cancel();
        self.tasks.close();
        self.tasks.wait().await;

        let payload = self.fatal.payload.borrow_mut().take();
        if let Some(payload) = payload {
            std::panic::resume_unwind(payload);
        }

        let remaining = self.len();
        if remaining > 0 {
            warn!(shard = %self.env.shard, remaining, "Entries left after drain");
        } else {
            debug!(shard = %self.env.shard, "Shard cache drained");
        }
    }
}

impl<C: InterfaceConstructor> std::fmt::Debug for ShardCache<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardCache")
            .field("shard", &self.env.shard)
            .field("entries", &self.len())
            .field("draining", &self.is_draining())
            .finish_non_exhaustive()
    }
}
