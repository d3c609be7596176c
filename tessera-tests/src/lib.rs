//! Tessera Tests - scenario and property tests across the Tessera crates.
//!
//! ## Test Organization
//!
//! **Integration Tests** (`*_tests.rs`):
//! - `cache_tests`: Shard cache lifecycle scenarios on paused time
//! - `routing_tests`: Snapshot building and propagation across shards
//! - `pool_tests`: Multi-threaded shard pool
//! - `properties`: Randomized borrow/release/time sequences
//!
//! **Support Modules**:
//! - `fakes`: `FakeConstructor` with a controllable readiness gate
//! - `scenarios`: Test harness and topology builders
//!
//! ## Naming Conventions
//!
//! - Integration tests: `test_<component>_<scenario>`
//! - Unit tests: Inline in each crate under `#[cfg(test)]`

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod fakes;
pub mod scenarios;

#[cfg(test)]
mod cache_tests;
#[cfg(test)]
mod properties;
