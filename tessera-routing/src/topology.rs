//! Topology model as published by the cluster's topology store.
//!
//! The store hands out a full `Topology` on every change. Each table is
//! either deleted, in conflict (no cluster-wide agreement on its placement
//! yet), or resolved to a placement plan.

use std::collections::BTreeMap;

use tessera_core::{KeyRange, MachineId, TableId};

/// Role a machine plays for one key range of a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// The machine serves reads and writes for the range.
    Primary,
    /// The machine holds a replica of the range.
    Secondary,
    /// The machine holds nothing for the range.
    Nothing,
}

/// Cluster-wide assignment of roles over key ranges to machines for one table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlacementPlan {
    machine_roles: BTreeMap<MachineId, BTreeMap<KeyRange, Role>>,
}

impl PlacementPlan {
    /// Creates an empty plan.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            machine_roles: BTreeMap::new(),
        }
    }

    /// Returns the plan with `machine` playing `role` for `range`.
    #[must_use]
    pub fn with_role(mut self, machine: MachineId, range: KeyRange, role: Role) -> Self {
        self.assign(machine, range, role);
        self
    }

    /// Assigns `role` for `range` to `machine`, replacing any earlier role for
    /// exactly that range.
    pub fn assign(&mut self, machine: MachineId, range: KeyRange, role: Role) {
        self.machine_roles
            .entry(machine)
            .or_default()
            .insert(range, role);
    }

    /// Iterates machines in id order together with their per-range roles.
    pub fn machine_roles(
        &self,
    ) -> impl Iterator<Item = (MachineId, &BTreeMap<KeyRange, Role>)> + '_ {
        self.machine_roles.iter().map(|(&machine, roles)| (machine, roles))
    }

    /// Returns the number of machines mentioned by the plan.
    #[must_use]
    pub fn machine_count(&self) -> usize {
        self.machine_roles.len()
    }
}

/// Configuration state of one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableConfig {
    /// The table was deleted.
    Deleted,
    /// The placement plan is in conflict and not resolved cluster-wide.
    InConflict,
    /// The placement plan is resolved.
    Resolved(PlacementPlan),
}

/// Full topology state: configuration for every table the store knows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Topology {
    tables: BTreeMap<TableId, TableConfig>,
}

impl Topology {
    /// Creates an empty topology.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            tables: BTreeMap::new(),
        }
    }

    /// Returns the topology with `config` set for `table_id`.
    #[must_use]
    pub fn with_table(mut self, table_id: TableId, config: TableConfig) -> Self {
        self.set(table_id, config);
        self
    }

    /// Sets the configuration of a table.
    pub fn set(&mut self, table_id: TableId, config: TableConfig) {
        self.tables.insert(table_id, config);
    }

    /// Returns the configuration of a table, if the store knows it.
    #[must_use]
    pub fn get(&self, table_id: TableId) -> Option<&TableConfig> {
        self.tables.get(&table_id)
    }

    /// Iterates all tables in id order.
    pub fn tables(&self) -> impl Iterator<Item = (TableId, &TableConfig)> + '_ {
        self.tables.iter().map(|(&id, config)| (id, config))
    }

    /// Returns the number of tables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    /// Returns true if the topology has no tables.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}
