//! Repository error types.
//!
//! The only failure a caller of `get_interface` can see is cancellation.
//! Broken lifecycle invariants are not errors; they panic.

use tessera_core::{ShardId, TableId};

use crate::config::ConfigError;

/// Errors returned by `ShardCache::get_interface`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RepoError {
    /// The caller's cancellation token fired before the interface was ready.
    #[error("request for {table_id} cancelled")]
    Cancelled {
        /// The table that was requested.
        table_id: TableId,
    },

    /// The shard is shutting down.
    #[error("shard shutting down, request for {table_id} abandoned")]
    ShuttingDown {
        /// The table that was requested.
        table_id: TableId,
    },
}

impl RepoError {
    /// Returns the table the failed request was for.
    #[must_use]
    pub const fn table_id(&self) -> TableId {
        match self {
            Self::Cancelled { table_id } | Self::ShuttingDown { table_id } => *table_id,
        }
    }
}

/// Result type for repository operations.
pub type RepoResult<T> = Result<T, RepoError>;

/// Errors from the directory coordinator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DirectoryError {
    /// The coordinator task has stopped.
    #[error("directory coordinator unavailable")]
    CoordinatorUnavailable,
}

/// Errors from the shard pool.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// The configuration is invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// `ShardPool::start` was called outside a Tokio runtime.
    #[error("shard pool must be started from within a tokio runtime")]
    NoRuntime,

    /// A shard's runtime or thread could not be created.
    #[error("failed to start {shard}: {source}")]
    Spawn {
        /// The shard being started.
        shard: ShardId,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The shard index is out of range.
    #[error("unknown {shard}")]
    UnknownShard {
        /// The requested shard.
        shard: ShardId,
    },

    /// The shard has stopped and no longer accepts jobs.
    #[error("{shard} has stopped")]
    ShardStopped {
        /// The stopped shard.
        shard: ShardId,
    },

    /// The job was dropped before producing a result.
    #[error("job on {shard} dropped before completing")]
    JobDropped {
        /// The shard the job ran on.
        shard: ShardId,
    },

    /// The shard thread panicked.
    #[error("{shard} thread panicked")]
    ShardPanicked {
        /// The shard whose thread panicked.
        shard: ShardId,
    },
}
