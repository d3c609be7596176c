//! Tessera Repo - shard-local cache of table interfaces.
//!
//! Each worker shard keeps at most one interface per table. The first
//! request for a table constructs it; later requests share it. Callers hold
//! an `AccessHandle` while they use the interface, and an interface nobody
//! has borrowed for the idle timeout is torn down.
//!
//! # Design
//!
//! - **Single-threaded shards**: Cache state is `Rc`/`RefCell`, never locked
//! - **One lifecycle task per entry**: The only code that removes an entry
//! - **Borrow before wait**: A waiting caller keeps the entry alive
//! - **Drain token**: Shutdown cancels every wait on the shard
//!
//! # Example
//!
//! ```ignore
//! let pool = ShardPool::start(RepoConfig::new(), RoutedConstructor, topology_rx, directory_rx)?;
//! let location = pool
//!     .run_on(ShardId::new(0), move |ctx| async move {
//!         let table = ctx.get_interface(table_id).await?;
//!         Ok::<_, RepoError>(table.locate(b"key"))
//!     })
//!     .await??;
//! pool.shutdown().await?;
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod cache;
mod config;
mod directory;
mod entry;
mod error;
mod handle;
mod interface;
mod lifecycle;
mod pool;
mod routed;

pub use cache::ShardCache;
pub use config::{ConfigError, RepoConfig, IDLE_TIMEOUT_DEFAULT, SHARDS_DEFAULT, SHARDS_MAX};
pub use directory::{
    BusinessCard, Coordinator, DirectoryHandle, DirectoryState, DirectorySubview, PeerDirectory,
    PeerTableState, TableCards,
};
pub use entry::{BorrowCount, Readiness, Transition};
pub use error::{DirectoryError, PoolError, RepoError, RepoResult};
pub use handle::AccessHandle;
pub use interface::{ConstructContext, Constructed, InterfaceConstructor};
pub use pool::{ShardContext, ShardPool};
pub use routed::{Location, RoutedConstructor, RoutedInterface};
