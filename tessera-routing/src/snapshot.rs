//! Routing snapshot - mapping of key ranges to primary machines.
//!
//! A `RoutingSnapshot` is built once from topology and then only read. A
//! shard replaces its current snapshot wholesale; it never edits one.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use tessera_core::{KeyBound, KeyRange, MachineId, TableId};

/// Maps the key ranges of one table to the machine acting as primary.
///
/// Ranges are stored in a B-tree ordered by (start, end), so a lookup finds
/// the last range starting at or before the key and checks containment.
/// That is only exact for non-overlapping ranges, which is all a valid
/// placement plan produces.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegionMap {
    regions: BTreeMap<KeyRange, MachineId>,
}

impl RegionMap {
    /// Creates an empty region map.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            regions: BTreeMap::new(),
        }
    }

    /// Records `machine` as primary for `range`.
    ///
    /// This overwrites any existing assignment for exactly this range and
    /// returns the machine it replaced.
    pub fn assign(&mut self, range: KeyRange, machine: MachineId) -> Option<MachineId> {
        self.regions.insert(range, machine)
    }

    /// Returns the primary for the range containing `key`.
    ///
    /// With overlapping ranges only the range starting closest before `key`
    /// is checked, so a key covered by an earlier, wider range may miss.
    #[must_use]
    pub fn lookup(&self, key: &[u8]) -> Option<MachineId> {
        let probe = KeyRange {
            start: Bytes::copy_from_slice(key),
            end: KeyBound::Unbounded,
        };
        self.regions
            .range(..=probe)
            .next_back()
            .filter(|(range, _)| range.contains(key))
            .map(|(_, &machine)| machine)
    }

    /// Returns the primary recorded for exactly `range`.
    #[must_use]
    pub fn get(&self, range: &KeyRange) -> Option<MachineId> {
        self.regions.get(range).copied()
    }

    /// Returns an iterator over all range assignments.
    pub fn iter(&self) -> impl Iterator<Item = (&KeyRange, MachineId)> + '_ {
        self.regions.iter().map(|(range, &machine)| (range, machine))
    }

    /// Returns the number of ranges.
    #[must_use]
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    /// Returns true if no range is assigned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}

/// Immutable per-table routing data.
///
/// Region maps are reference counted so a table carried over from the
/// previous snapshot shares its map instead of copying it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutingSnapshot {
    /// Position in the producer's sequence. Zero is the initial empty snapshot.
    version: u64,
    tables: BTreeMap<TableId, Arc<RegionMap>>,
}

impl RoutingSnapshot {
    /// Creates the empty snapshot every shard starts with.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            version: 0,
            tables: BTreeMap::new(),
        }
    }

    pub(crate) const fn from_parts(version: u64, tables: BTreeMap<TableId, Arc<RegionMap>>) -> Self {
        Self { version, tables }
    }

    /// Returns the version number of the snapshot.
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }

    /// Returns the region map of a table.
    #[must_use]
    pub fn table(&self, table_id: TableId) -> Option<&RegionMap> {
        self.tables.get(&table_id).map(Arc::as_ref)
    }

    pub(crate) fn table_shared(&self, table_id: TableId) -> Option<&Arc<RegionMap>> {
        self.tables.get(&table_id)
    }

    /// Returns true if the snapshot has routing data for the table.
    #[must_use]
    pub fn contains_table(&self, table_id: TableId) -> bool {
        self.tables.contains_key(&table_id)
    }

    /// Returns the primary for `key` within `table_id`.
    #[must_use]
    pub fn lookup(&self, table_id: TableId, key: &[u8]) -> Option<MachineId> {
        self.table(table_id).and_then(|regions| regions.lookup(key))
    }

    /// Iterates tables in id order.
    pub fn tables(&self) -> impl Iterator<Item = (TableId, &RegionMap)> + '_ {
        self.tables.iter().map(|(&id, regions)| (id, regions.as_ref()))
    }

    /// Returns the number of tables with routing data.
    #[must_use]
    pub fn table_count(&self) -> usize {
        self.tables.len()
    }
}
