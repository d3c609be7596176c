//! Reusable harness and topology builders.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tessera_core::{KeyRange, MachineId, PeerId, ShardId, TableId};
use tessera_repo::{
    BusinessCard, Coordinator, DirectoryState, InterfaceConstructor, PeerDirectory, RepoConfig,
    ShardCache,
};
use tessera_routing::{PlacementPlan, Role, SnapshotCell, TableConfig, Topology};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Idle timeout used by the cache scenarios.
pub const IDLE: Duration = Duration::from_secs(60);

/// Slack used on either side of a deadline.
pub const EPSILON: Duration = Duration::from_millis(1);

/// Lets every runnable task on the current thread make progress.
///
/// Only yields; paused time does not move.
pub async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}

/// One shard cache wired to a live directory coordinator.
///
/// Must be created inside a `LocalSet` on a Tokio runtime.
pub struct Harness<C: InterfaceConstructor> {
    /// The cache under test.
    pub cache: ShardCache<C>,
    /// The cache's routing snapshot source.
    pub routing: Arc<SnapshotCell>,
    /// Publishes directory changes.
    pub directory_tx: watch::Sender<Arc<DirectoryState>>,
    coordinator: CancellationToken,
}

impl<C: InterfaceConstructor> Harness<C> {
    /// Creates a harness with an empty directory.
    pub fn start(constructor: Arc<C>, idle_timeout: Duration) -> Self {
        Self::with_directory(constructor, idle_timeout, DirectoryState::new())
    }

    /// Creates a harness publishing `directory`.
    pub fn with_directory(
        constructor: Arc<C>,
        idle_timeout: Duration,
        directory: DirectoryState,
    ) -> Self {
        let (directory_tx, directory_rx) = watch::channel(Arc::new(directory));
        let (coordinator, handle) = Coordinator::new(directory_rx);
        let shutdown = CancellationToken::new();
        tokio::spawn(coordinator.run(shutdown.clone()));

        let routing = Arc::new(SnapshotCell::new());
        let config = RepoConfig::new().with_idle_timeout(idle_timeout);
        let cache = ShardCache::new(
            ShardId::new(0),
            &config,
            constructor,
            Arc::clone(&routing),
            handle,
        );
        Self {
            cache,
            routing,
            directory_tx,
            coordinator: shutdown,
        }
    }

    /// Stops the directory coordinator.
    pub fn stop_coordinator(&self) {
        self.coordinator.cancel();
    }
}

impl<C: InterfaceConstructor> Drop for Harness<C> {
    fn drop(&mut self) {
        self.coordinator.cancel();
    }
}

/// A plan with `machine` primary for the whole key space.
#[must_use]
pub fn whole_range_on(machine: u64) -> TableConfig {
    TableConfig::Resolved(PlacementPlan::new().with_role(
        MachineId::new(machine),
        KeyRange::universe(),
        Role::Primary,
    ))
}

/// A plan splitting the key space at `split` between two primaries.
#[must_use]
pub fn split_between(split: &'static [u8], low: u64, high: u64) -> TableConfig {
    TableConfig::Resolved(
        PlacementPlan::new()
            .with_role(MachineId::new(low), KeyRange::new(Bytes::new(), split), Role::Primary)
            .with_role(MachineId::new(high), KeyRange::from_start(split), Role::Primary)
            .with_role(MachineId::new(low), KeyRange::from_start(split), Role::Secondary),
    )
}

/// A topology with every table in `tables` owned by `machine`.
#[must_use]
pub fn uniform_topology(tables: impl IntoIterator<Item = u64>, machine: u64) -> Topology {
    tables.into_iter().fold(Topology::new(), |topology, table| {
        topology.with_table(TableId::new(table), whole_range_on(machine))
    })
}

/// A directory where machine `m` runs as peer `m` and publishes a card for
/// every table in `tables`.
#[must_use]
pub fn full_directory(machines: impl IntoIterator<Item = u64>, tables: &[u64]) -> DirectoryState {
    machines.into_iter().fold(DirectoryState::new(), |state, machine| {
        let entry = tables
            .iter()
            .fold(PeerDirectory::new(MachineId::new(machine)), |entry, &table| {
                entry.with_card(
                    TableId::new(table),
                    BusinessCard::new(format!("m{machine}-t{table}").into_bytes()),
                )
            });
        state.with_peer(PeerId::new(machine), entry)
    })
}
