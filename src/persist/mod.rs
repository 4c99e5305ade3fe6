//! Delta persistence: the write-back cache and the durable file store.

pub mod delta;
pub mod store;

pub use delta::ChunkDelta;
pub use store::{DeltaFetch, DeltaStore, StoreEvent};
