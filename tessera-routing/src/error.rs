//! Routing error types.

use tessera_core::TableId;

/// Errors from routing lookups.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoutingError {
    /// The current snapshot has no routing data for the table.
    #[error("no routing data for {table_id}")]
    TableUnknown {
        /// The table that was looked up.
        table_id: TableId,
    },

    /// No range of the table covers the key.
    #[error("no primary for key in {table_id}")]
    NoPrimaryForKey {
        /// The table that was looked up.
        table_id: TableId,
    },
}

/// Result type for routing operations.
pub type RoutingResult<T> = Result<T, RoutingError>;
