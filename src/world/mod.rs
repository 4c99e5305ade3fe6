//! World pipeline: terrain generation, meshing, the background worker
//! pool, and the manager that orchestrates all of it.

pub mod biome;
pub mod generator;
pub mod manager;
pub mod mesher;
pub mod workers;

// Re-export commonly used types
pub use biome::Biome;
pub use generator::TerrainGenerator;
pub use manager::{RenderItem, WorldManager, WorldStats};
pub use mesher::{BatchedMesh, BatchedMeshSet, MeshData, SingleMesh};
pub use workers::{WorkRequest, WorkResponse, WorkerPool};
