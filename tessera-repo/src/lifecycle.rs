//! Lifecycle task - builds, serves and retires one cache entry.
//!
//! ```text
//! INITIALIZING ──► READY ──► ACTIVE ⇄ IDLE_WAIT ──► DESTROYING
//!       │                       │         │              ▲
//!       └──── drain ────────────┴─────────┴──────────────┘
//! ```
//!
//! The task is the only code that ever removes its entry from the shard's
//! map, and it does so in the same synchronous step that tears the
//! interface down.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use tessera_core::{ShardId, TableId};
use tessera_routing::SnapshotCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace, warn};

use crate::directory::DirectoryHandle;
use crate::entry::CacheEntry;
use crate::interface::{ConstructContext, Constructed, InterfaceConstructor};

/// A shard's table map, shared between the cache and its lifecycle tasks.
pub(crate) type EntryMap<I> = Rc<RefCell<HashMap<TableId, Rc<CacheEntry<I>>>>>;

/// Why the serving loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    IdleExpired,
    Drained,
}

/// Shard-wide inputs every lifecycle task on a shard shares.
pub(crate) struct ShardEnv<C> {
    pub(crate) shard: ShardId,
    pub(crate) constructor: Arc<C>,
    pub(crate) routing: Arc<SnapshotCell>,
    pub(crate) directory: DirectoryHandle,
    pub(crate) idle_timeout: Duration,
    pub(crate) drain: CancellationToken,
}

pub(crate) struct LifecycleTask<C: InterfaceConstructor> {
    entry: Rc<CacheEntry<C::Interface>>,
    entries: EntryMap<C::Interface>,
    env: Rc<ShardEnv<C>>,
}

impl<C: InterfaceConstructor> LifecycleTask<C> {
    pub(crate) fn new(
        entry: Rc<CacheEntry<C::Interface>>,
        entries: EntryMap<C::Interface>,
        env: Rc<ShardEnv<C>>,
    ) -> Self {
        Self {
            entry,
            entries,
            env,
        }
    }

    #[instrument(skip_all, fields(shard = %self.env.shard, table_id = %self.entry.table_id))]
    pub(crate) async fn run(self) {
        match self.initialize().await {
            Some(interface) => {
                self.entry.readiness.publish(Rc::new(interface));
                debug!("Table interface ready");
                if self.serve().await == Exit::Drained {
                    self.drain_waiters().await;
                }
            }
            None => self.drain_waiters().await,
        }
        self.destroy();
    }

    /// Constructs the interface and waits for its initial data.
    ///
    /// Returns `None` if the shard drained first.
    async fn initialize(&self) -> Option<C::Interface> {
        let table_id = self.entry.table_id;
        let drain = &self.env.drain;

        let subview = tokio::select! {
            biased;
            () = drain.cancelled() => return None,
            subview = self.env.directory.subview(table_id) => subview,
        };
        let directory = match subview {
            Ok(directory) => directory,
            Err(err) => {
                warn!(error = %err, "No directory subview, table interface will not become ready");
                drain.cancelled().await;
                return None;
            }
        };

        let Constructed { interface, ready } = self.env.constructor.construct(ConstructContext {
            table_id,
            shard: self.env.shard,
            routing: Arc::clone(&self.env.routing),
            directory,
        });

        tokio::select! {
            biased;
            () = drain.cancelled() => {
                debug!("Shutdown during construction");
                None
            }
            () = ready => Some(interface),
        }
    }

    /// Alternates between ACTIVE and IDLE_WAIT until the idle timer expires
    /// or the shard drains.
    async fn serve(&self) -> Exit {
        let borrowers = &self.entry.borrowers;
        let drain = &self.env.drain;

        loop {
            if borrowers.get() > 0 {
                trace!(borrowers = borrowers.get(), "Active");
                tokio::select! {
                    biased;
                    () = drain.cancelled() => return Exit::Drained,
                    () = borrowers.became_zero() => {}
                }
            }

            let since = borrowers.activations();
            trace!("Idle");
            tokio::select! {
                biased;
                () = drain.cancelled() => return Exit::Drained,
                // Ahead of the timer: a borrow in the same poll keeps the entry.
                () = borrowers.became_nonzero(since) => {}
                () = tokio::time::sleep(self.env.idle_timeout) => {
                    assert_eq!(borrowers.get(), 0, "idle timer fired with live borrowers");
                    debug!("Idle timeout expired");
                    return Exit::IdleExpired;
                }
            }
        }
    }

    /// Waits for callers still blocked on readiness to observe the drain.
    ///
    /// # Panics
    ///
    /// Panics if an access handle is still alive.
    async fn drain_waiters(&self) {
        assert_eq!(
            self.entry.handles.get(),
            0,
            "shutdown with live access handles for {}",
            self.entry.table_id
        );
        self.entry.borrowers.became_zero().await;
    }

    /// Tears the interface down and removes the entry. Never suspends.
    fn destroy(self) {
        let table_id = self.entry.table_id;
        assert_eq!(
            self.entry.borrowers.get(),
            0,
            "destroying {table_id} with live borrowers"
        );

        drop(self.entry.readiness.retire());
        let removed = self.entries.borrow_mut().remove(&table_id);
        assert!(
            removed.is_some_and(|removed| Rc::ptr_eq(&removed, &self.entry)),
            "cache entry for {table_id} replaced while its lifecycle task ran"
        );
        debug!("Cache entry destroyed");
    }
}
