//! Builds a new `RoutingSnapshot` from topology.
//!
//! Per table:
//! - deleted: omitted
//! - in conflict: previous region map carried over if the previous snapshot
//!   had one, otherwise omitted
//! - resolved: every (range, Primary) pair of every machine is recorded,
//!   walking machines in id order, so a later machine's claim on the same
//!   range overwrites an earlier one
//!
//! Plans are trusted to be non-overlapping. Distinct primary ranges that
//! overlap are logged but kept, and lookups inside the overlap are then
//! unreliable.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::snapshot::{RegionMap, RoutingSnapshot};
use crate::topology::{PlacementPlan, Role, TableConfig, Topology};

/// Builds the snapshot that follows `previous` for the given topology.
///
/// The result's version is `previous.version() + 1`.
#[must_use]
pub fn build_snapshot(topology: &Topology, previous: &RoutingSnapshot) -> RoutingSnapshot {
    let mut tables = BTreeMap::new();
    let mut deleted = 0_u32;
    let mut carried = 0_u32;

    for (table_id, config) in topology.tables() {
        match config {
            TableConfig::Deleted => deleted += 1,
            TableConfig::InConflict => {
                // Nothing reliable while the plan is in conflict; the last
                // known-good mapping is the best guess.
                if let Some(regions) = previous.table_shared(table_id) {
                    tables.insert(table_id, Arc::clone(regions));
                    carried += 1;
                }
            }
            TableConfig::Resolved(plan) => {
                let regions = primaries_of(plan);
                tables.insert(table_id, Arc::new(regions));
            }
        }
    }

    let version = previous.version() + 1;
    debug!(
        version,
        tables = tables.len(),
        deleted,
        carried,
        "Built routing snapshot"
    );
    RoutingSnapshot::from_parts(version, tables)
}

fn primaries_of(plan: &PlacementPlan) -> RegionMap {
    let mut regions = RegionMap::new();
    for (machine, roles) in plan.machine_roles() {
        for (range, role) in roles {
            if *role != Role::Primary {
                continue;
            }
            if let Some((other, owner)) = regions
                .iter()
                .find(|(other, _)| *other != range && other.overlaps(range))
            {
                warn!(
                    range = ?range,
                    machine = %machine,
                    other = ?other,
                    owner = %owner,
                    "Placement plan names overlapping primary ranges"
                );
            }
            if let Some(replaced) = regions.assign(range.clone(), machine) {
                warn!(
                    range = ?range,
                    replaced = %replaced,
                    machine = %machine,
                    "Placement plan names two primaries for one range"
                );
            }
        }
    }
    regions
}
