//! Chunked voxel-world engine: off-thread terrain generation, per-block
//! face visibility, batched meshing with a dirty-block consolidation
//! state machine, and delta-based chunk persistence.

// Core module with fundamental types
pub mod core;

// World module with generation, meshing and the manager
pub mod world;

// Persistence module with the chunk delta store
pub mod persist;

pub mod config;
pub mod constants;

pub use crate::config::{EngineConfig, PersistenceConfig};
pub use crate::core::block::BlockKind;
pub use crate::core::chunk::ChunkCoord;
pub use crate::world::manager::WorldManager;
