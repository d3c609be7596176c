//! Fake table interface constructor.
//!
//! Counts constructions and teardowns and lets a test decide when the
//! constructed interfaces become ready.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use tessera_core::{ShardId, TableId};
use tessera_repo::{ConstructContext, Constructed, InterfaceConstructor};
use tokio::sync::watch;

#[derive(Debug)]
struct Counters {
    constructions: AtomicUsize,
    teardowns: AtomicUsize,
    gate: watch::Sender<bool>,
}

/// Constructor producing [`FakeInterface`]s.
///
/// Clones share counters and the readiness gate.
#[derive(Debug, Clone)]
pub struct FakeConstructor {
    counters: Arc<Counters>,
}

impl FakeConstructor {
    /// Creates a constructor whose interfaces are ready immediately.
    #[must_use]
    pub fn ready() -> Self {
        Self::with_gate(true)
    }

    /// Creates a constructor whose interfaces wait for [`Self::open_gate`].
    #[must_use]
    pub fn gated() -> Self {
        Self::with_gate(false)
    }

    fn with_gate(open: bool) -> Self {
        let (gate, _) = watch::channel(open);
        Self {
            counters: Arc::new(Counters {
                constructions: AtomicUsize::new(0),
                teardowns: AtomicUsize::new(0),
                gate,
            }),
        }
    }

    /// Lets every pending and future construction become ready.
    pub fn open_gate(&self) {
        self.counters.gate.send_replace(true);
    }

    /// Returns the number of interfaces constructed so far.
    #[must_use]
    pub fn constructions(&self) -> usize {
        self.counters.constructions.load(Ordering::SeqCst)
    }

    /// Returns the number of interfaces torn down so far.
    #[must_use]
    pub fn teardowns(&self) -> usize {
        self.counters.teardowns.load(Ordering::SeqCst)
    }

    /// Returns the number of interfaces currently alive.
    #[must_use]
    pub fn live(&self) -> usize {
        self.constructions() - self.teardowns()
    }
}

impl InterfaceConstructor for FakeConstructor {
    type Interface = FakeInterface;

    fn construct(&self, ctx: ConstructContext) -> Constructed<FakeInterface> {
        let serial = self.counters.constructions.fetch_add(1, Ordering::SeqCst);
        let mut gate = self.counters.gate.subscribe();
        let ready = async move {
            if gate.wait_for(|open| *open).await.is_err() {
                std::future::pending::<()>().await;
            }
        }
        .boxed_local();

        Constructed {
            interface: FakeInterface {
                table_id: ctx.table_id,
                built_on: ctx.shard,
                serial,
                counters: Arc::clone(&self.counters),
            },
            ready,
        }
    }
}

/// Interface built by [`FakeConstructor`]. Counts its own teardown.
#[derive(Debug)]
pub struct FakeInterface {
    /// Table it was built for.
    pub table_id: TableId,
    /// Shard it was built on.
    pub built_on: ShardId,
    /// Construction order across the constructor's lifetime, from 0.
    pub serial: usize,
    counters: Arc<Counters>,
}

impl Drop for FakeInterface {
    fn drop(&mut self) {
        self.counters.teardowns.fetch_add(1, Ordering::SeqCst);
    }
}
