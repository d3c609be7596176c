//! Router - resolves keys to primary machines on one shard.
//!
//! Every lookup loads the shard's current snapshot exactly once, so a single
//! routing decision never mixes data from two snapshots.

use std::sync::Arc;

use tessera_core::{MachineId, TableId};

use crate::cell::SnapshotCell;
use crate::error::{RoutingError, RoutingResult};
use crate::snapshot::RoutingSnapshot;

/// Result of a routing operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    /// The table the key belongs to.
    pub table_id: TableId,
    /// The machine acting as primary for the key.
    pub machine_id: MachineId,
    /// Version of the snapshot the decision was made from.
    pub snapshot_version: u64,
}

/// Routes keys using a shard's current routing snapshot.
#[derive(Debug, Clone)]
pub struct Router {
    cell: Arc<SnapshotCell>,
}

impl Router {
    /// Creates a router reading from `cell`.
    #[must_use]
    pub const fn new(cell: Arc<SnapshotCell>) -> Self {
        Self { cell }
    }

    /// Returns the primary machine for `key` in `table_id`.
    ///
    /// # Errors
    ///
    /// Returns `RoutingError::TableUnknown` if the current snapshot has no
    /// data for the table, and `RoutingError::NoPrimaryForKey` if no range
    /// covers the key.
    pub fn primary_for(&self, table_id: TableId, key: &[u8]) -> RoutingResult<Route> {
        let snapshot = self.cell.load();
        Self::route_in(&snapshot, table_id, key)
    }

    /// Routes against an explicit snapshot.
    ///
    /// # Errors
    ///
    /// Same as [`Router::primary_for`].
    pub fn route_in(
        snapshot: &RoutingSnapshot,
        table_id: TableId,
        key: &[u8],
    ) -> RoutingResult<Route> {
        let regions = snapshot
            .table(table_id)
            .ok_or(RoutingError::TableUnknown { table_id })?;
        let machine_id = regions
            .lookup(key)
            .ok_or(RoutingError::NoPrimaryForKey { table_id })?;
        Ok(Route {
            table_id,
            machine_id,
            snapshot_version: snapshot.version(),
        })
    }

    /// Returns the current snapshot version.
    #[must_use]
    pub fn snapshot_version(&self) -> u64 {
        self.cell.version()
    }

    /// Returns the cell this router reads from.
    #[must_use]
    pub const fn cell(&self) -> &Arc<SnapshotCell> {
        &self.cell
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::build_snapshot;
    use crate::topology::{PlacementPlan, Role, TableConfig, Topology};
    use bytes::Bytes;
    use tessera_core::KeyRange;

    fn create_test_router() -> Router {
        let plan = PlacementPlan::new()
            .with_role(MachineId::new(1), KeyRange::new(Bytes::new(), &b"m"[..]), Role::Primary)
            .with_role(MachineId::new(2), KeyRange::new(&b"m"[..], &b"t"[..]), Role::Primary);
        let topology = Topology::new().with_table(TableId::new(1), TableConfig::Resolved(plan));
        let snapshot = build_snapshot(&topology, &RoutingSnapshot::empty());
        Router::new(Arc::new(SnapshotCell::with_snapshot(Arc::new(snapshot))))
    }

    #[test]
    fn test_route_to_primary() {
        let router = create_test_router();

        let route = router.primary_for(TableId::new(1), b"apple").unwrap();
        assert_eq!(route.machine_id, MachineId::new(1));
        assert_eq!(route.snapshot_version, 1);

        let route = router.primary_for(TableId::new(1), b"orange").unwrap();
        assert_eq!(route.machine_id, MachineId::new(2));
    }

    #[test]
    fn test_route_unknown_table() {
        let router = create_test_router();
        let result = router.primary_for(TableId::new(7), b"apple");
        assert_eq!(
            result,
            Err(RoutingError::TableUnknown {
                table_id: TableId::new(7)
            })
        );
    }

    #[test]
    fn test_route_uncovered_key() {
        let router = create_test_router();
        let result = router.primary_for(TableId::new(1), b"zebra");
        assert!(matches!(result, Err(RoutingError::NoPrimaryForKey { .. })));
    }

    #[test]
    fn test_consistent_routing() {
        let router = create_test_router();

        let first = router.primary_for(TableId::new(1), b"key");
        let second = router.primary_for(TableId::new(1), b"key");
        assert_eq!(first, second);
    }
}
