//! Per-shard holder of the current routing snapshot.

use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::snapshot::RoutingSnapshot;

/// The "current" routing snapshot of one shard.
///
/// Replacement is a single pointer swap: a reader that loaded a snapshot keeps
/// a consistent view of it no matter how many replacements happen meanwhile.
#[derive(Debug)]
pub struct SnapshotCell {
    current: ArcSwap<RoutingSnapshot>,
}

impl SnapshotCell {
    /// Creates a cell holding the empty snapshot.
    #[must_use]
    pub fn new() -> Self {
        Self::with_snapshot(Arc::new(RoutingSnapshot::empty()))
    }

    /// Creates a cell holding `snapshot`.
    #[must_use]
    pub fn with_snapshot(snapshot: Arc<RoutingSnapshot>) -> Self {
        Self {
            current: ArcSwap::new(snapshot),
        }
    }

    /// Returns the current snapshot.
    #[must_use]
    pub fn load(&self) -> Arc<RoutingSnapshot> {
        self.current.load_full()
    }

    /// Replaces the current snapshot.
    pub fn store(&self, snapshot: Arc<RoutingSnapshot>) {
        debug_assert!(
            snapshot.version() >= self.current.load().version(),
            "routing snapshots applied out of order"
        );
        self.current.store(snapshot);
    }

    /// Returns the version of the current snapshot.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.current.load().version()
    }
}

impl Default for SnapshotCell {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::build_snapshot;
    use crate::topology::Topology;

    #[test]
    fn test_loaded_snapshot_survives_replacement() {
        let cell = SnapshotCell::new();
        let before = cell.load();

        let next = build_snapshot(&Topology::new(), &before);
        cell.store(Arc::new(next));

        assert_eq!(before.version(), 0);
        assert_eq!(cell.version(), 1);
    }
}
