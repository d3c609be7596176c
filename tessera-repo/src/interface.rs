//! Construction seam for table interfaces.

use std::sync::Arc;

use futures::future::LocalBoxFuture;
use tessera_core::{ShardId, TableId};
use tessera_routing::SnapshotCell;

use crate::directory::DirectorySubview;

/// Inputs handed to the constructor for one table on one shard.
#[derive(Debug, Clone)]
pub struct ConstructContext {
    /// The table being constructed.
    pub table_id: TableId,
    /// The shard the interface will live on.
    pub shard: ShardId,
    /// The shard's routing snapshot source. Always holds the current snapshot.
    pub routing: Arc<SnapshotCell>,
    /// The directory projected onto this table.
    pub directory: DirectorySubview,
}

/// A constructed interface and its initial readiness signal.
pub struct Constructed<I> {
    /// The interface, not yet usable by callers.
    pub interface: I,
    /// Completes once the interface has its initial data.
    ///
    /// May never complete. Dropping it abandons the construction.
    pub ready: LocalBoxFuture<'static, ()>,
}

/// Builds table interfaces.
///
/// One constructor is shared by every shard; `construct` runs on the shard
/// that will own the interface. Construction failure is expressed as a
/// `ready` future that never completes, retrying is up to the implementation.
pub trait InterfaceConstructor: Send + Sync + 'static {
    /// The interface type handed out to callers.
    type Interface: 'static;

    /// Starts building the interface for `ctx.table_id`.
    fn construct(&self, ctx: ConstructContext) -> Constructed<Self::Interface>;
}
