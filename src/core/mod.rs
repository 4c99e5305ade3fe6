//! Core data structures for the voxel engine.
//! Contains the block registry, faces, chunks, visibility and vertices.

pub mod block;
pub mod chunk;
pub mod face;
pub mod vertex;
pub mod visibility;

// Re-export commonly used types
pub use block::{BlockKind, BlockProps, PrimitiveKind, validate_registry};
pub use chunk::{Chunk, ChunkCoord, ConsolidationSnapshot, ConsolidationState, EditOutcome};
pub use face::{ALL_FACES, Face};
pub use vertex::Vertex;
pub use visibility::{MaskRules, NeighborSample, VisibilityEngine};
