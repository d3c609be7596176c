//! Tessera Core - Strongly-typed identifiers and key ranges.
//!
//! This crate holds the vocabulary shared by the routing layer and the
//! table interface repository. It has no runtime and no I/O.
//!
//! # Design Principles
//!
//! - **Strongly-typed IDs**: Prevent mixing up a `TableId` with a `MachineId`
//! - **Explicit types**: Use u32/u64, not usize
//! - **No unsafe code**: Safety > Performance

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod key_range;
mod types;

pub use key_range::{KeyBound, KeyRange};
pub use types::{MachineId, PeerId, ShardId, TableId};
