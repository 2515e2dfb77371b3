//! Storage layer for codepal
//!
//! Repository snapshots, index fingerprints and the persisted-index layout

mod index_store;
mod snapshot;

pub use index_store::{format_size, write_atomic, IndexStore};
pub use snapshot::{IndexParams, Snapshot, SnapshotEntry};
