//! Topology watcher - rebuilds and propagates routing snapshots.
//!
//! The watcher subscribes to the topology store, rebuilds the snapshot on
//! every change and pushes it into one FIFO feed per shard. Each shard drains
//! its own feed with an independent task, so per-shard application order
//! matches production order while shards never wait on each other.
//!
//! ```text
//! topology ──► TopologyWatcher ──► feed[0] ──► SnapshotCell (shard 0)
//!                              ├─► feed[1] ──► SnapshotCell (shard 1)
//!                              └─► feed[n] ──► SnapshotCell (shard n)
//! ```

use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::builder::build_snapshot;
use crate::cell::SnapshotCell;
use crate::snapshot::RoutingSnapshot;
use crate::topology::Topology;

/// Receiving end of one shard's snapshot feed.
#[derive(Debug)]
pub struct SnapshotFeed {
    rx: mpsc::UnboundedReceiver<Arc<RoutingSnapshot>>,
}

impl SnapshotFeed {
    /// Applies every delivered snapshot to `cell`, in delivery order.
    ///
    /// Returns when the watcher is dropped and the feed is drained.
    pub async fn apply_to(mut self, cell: Arc<SnapshotCell>) {
        while let Some(snapshot) = self.rx.recv().await {
            cell.store(snapshot);
        }
    }

    /// Applies snapshots that are already queued without waiting.
    ///
    /// Returns the number of snapshots applied.
    pub fn apply_pending(&mut self, cell: &SnapshotCell) -> usize {
        let mut applied = 0;
        while let Ok(snapshot) = self.rx.try_recv() {
            cell.store(snapshot);
            applied += 1;
        }
        applied
    }
}

/// Watches topology and feeds routing snapshots to every shard.
#[derive(Debug)]
pub struct TopologyWatcher {
    topology: watch::Receiver<Arc<Topology>>,
    feeds: Vec<mpsc::UnboundedSender<Arc<RoutingSnapshot>>>,
    /// Last snapshot produced; conflicted tables carry over from it.
    last: Arc<RoutingSnapshot>,
}

impl TopologyWatcher {
    /// Creates a watcher over the topology store's change subscription.
    #[must_use]
    pub fn new(topology: watch::Receiver<Arc<Topology>>) -> Self {
        Self {
            topology,
            feeds: Vec::new(),
            last: Arc::new(RoutingSnapshot::empty()),
        }
    }

    /// Registers a shard and returns the feed it must drain.
    ///
    /// Shards should subscribe before the watcher starts running.
    pub fn subscribe(&mut self) -> SnapshotFeed {
        let (tx, rx) = mpsc::unbounded_channel();
        self.feeds.push(tx);
        SnapshotFeed { rx }
    }

    /// Rebuilds the snapshot from the current topology and hands it to every
    /// shard feed.
    ///
    /// This never suspends: the snapshot is built and queued for every shard
    /// in one step.
    pub fn on_topology_change(&mut self) -> Arc<RoutingSnapshot> {
        let topology = Arc::clone(&self.topology.borrow_and_update());
        let snapshot = Arc::new(build_snapshot(&topology, &self.last));

        // A closed feed means that shard has shut down; the rest still get it.
        self.feeds.retain(|feed| feed.send(Arc::clone(&snapshot)).is_ok());
        self.last = Arc::clone(&snapshot);
        snapshot
    }

    /// Runs until `shutdown` fires or the topology store goes away.
    ///
    /// The topology current at start is delivered before waiting for changes.
    #[instrument(skip_all, name = "topology_watcher")]
    pub async fn run(mut self, shutdown: CancellationToken) {
        self.on_topology_change();
        info!(shards = self.feeds.len(), "Topology watcher started");

        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => {
                    debug!("Topology watcher shutting down");
                    break;
                }
                changed = self.topology.changed() => {
                    if changed.is_err() {
                        debug!("Topology store closed");
                        break;
                    }
                    let snapshot = self.on_topology_change();
                    debug!(version = snapshot.version(), "Propagated routing snapshot");
                }
            }
        }
    }
}
