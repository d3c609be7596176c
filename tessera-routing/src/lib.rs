//! Tessera Routing - Per-shard routing snapshots derived from topology.
//!
//! This crate turns cluster topology (per-table placement plans) into an
//! immutable `RoutingSnapshot` mapping key ranges to the machine acting as
//! primary, and propagates every new snapshot to all shards in the order it
//! was produced.
//!
//! # Design
//!
//! - **Immutable snapshots**: A snapshot is never mutated once published
//! - **Atomic replacement**: Each shard swaps a single pointer
//! - **Ordered delivery**: One FIFO feed per shard

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod builder;
mod cell;
mod error;
mod router;
mod snapshot;
mod topology;
mod watcher;

pub use builder::build_snapshot;
pub use cell::SnapshotCell;
pub use error::{RoutingError, RoutingResult};
pub use router::{Route, Router};
pub use snapshot::{RegionMap, RoutingSnapshot};
pub use topology::{PlacementPlan, Role, TableConfig, Topology};
pub use watcher::{SnapshotFeed, TopologyWatcher};
