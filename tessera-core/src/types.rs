//! Strongly-typed identifiers for Tessera entities.
//!
//! Explicit types prevent bugs from mixing up IDs: a table id can never be
//! passed where a machine id is expected.

use std::fmt;

/// Macro to generate strongly-typed ID wrappers.
///
/// Each ID type wraps an integer and provides:
/// - Type safety (can't mix `TableId` with `MachineId`)
/// - Debug/Display formatting
/// - Zero-cost abstraction (same as the raw integer)
macro_rules! define_id {
    ($name:ident, $raw:ty, $prefix:expr, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
        #[repr(transparent)]
        pub struct $name($raw);

        impl $name {
            /// Creates a new ID from a raw value.
            #[inline]
            #[must_use]
            pub const fn new(value: $raw) -> Self {
                Self(value)
            }

            /// Returns the raw value.
            #[inline]
            #[must_use]
            pub const fn get(self) -> $raw {
                self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", $prefix, self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}-{}", $prefix, self.0)
            }
        }

        impl From<$raw> for $name {
            fn from(value: $raw) -> Self {
                Self::new(value)
            }
        }

        impl From<$name> for $raw {
            fn from(id: $name) -> Self {
                id.get()
            }
        }
    };
}

// Tables are the unit of routing and caching.
define_id!(TableId, u64, "table", "Unique identifier for a table, stable for the table's lifetime.");

// Cluster membership.
define_id!(MachineId, u64, "machine", "Identifier of a machine that can hold a primary role.");
define_id!(PeerId, u64, "peer", "Identifier of a peer publishing state in the cluster directory.");

// Local scheduling.
define_id!(ShardId, u32, "shard", "Index of a worker shard on this process.");

impl ShardId {
    /// Returns the shard index as a `usize` for indexing per-shard vectors.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}
