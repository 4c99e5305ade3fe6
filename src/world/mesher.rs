//! Builds draw-ready geometry from block data.
//!
//! Batched meshes hold every visible face of one block kind in one chunk,
//! so the render collaborator issues one draw call per kind per chunk.
//! Freshly edited blocks get a standalone single-block mesh instead, which
//! renders the same frame the edit happens and is folded into the batches
//! on the next consolidation.

use glam::IVec3;
use rustc_hash::FxHashMap;

use crate::constants::*;
use crate::core::block::{BlockKind, PrimitiveKind};
use crate::core::chunk::ConsolidationSnapshot;
use crate::core::face::Face;
use crate::core::vertex::Vertex;
use crate::core::visibility::NeighborSample;

/// Vertex/index buffers with explicit disposal. A released mesh must
/// never reach the renderer again.
#[derive(Default)]
pub struct MeshData {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    released: bool,
}

impl MeshData {
    pub fn index_count(&self) -> u32 {
        self.indices.len() as u32
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Drop the buffer contents now instead of waiting for the owner to
    /// go away; mirrors releasing the GPU-side buffers.
    pub fn release(&mut self) {
        self.vertices = Vec::new();
        self.indices = Vec::new();
        self.released = true;
    }

    fn add_quad(
        &mut self,
        corners: [[f32; 3]; 4],
        normal: [f32; 3],
        color: [f32; 3],
    ) {
        let base = self.vertices.len() as u32;
        let uvs = [[0.0, 1.0], [1.0, 1.0], [1.0, 0.0], [0.0, 0.0]];
        for (position, uv) in corners.into_iter().zip(uvs) {
            self.vertices.push(Vertex {
                position,
                normal,
                color,
                uv,
            });
        }
        self.indices
            .extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
    }

    fn add_block_face(&mut self, kind: BlockKind, world: IVec3, face: Face) {
        let x = world.x as f32;
        let y = world.y as f32;
        let z = world.z as f32;
        let props = kind.props();
        let (corners, color) = match face {
            Face::Up => (
                [
                    [x, y + 1.0, z],
                    [x, y + 1.0, z + 1.0],
                    [x + 1.0, y + 1.0, z + 1.0],
                    [x + 1.0, y + 1.0, z],
                ],
                props.top_color,
            ),
            Face::Down => (
                [
                    [x, y, z + 1.0],
                    [x, y, z],
                    [x + 1.0, y, z],
                    [x + 1.0, y, z + 1.0],
                ],
                props.color,
            ),
            Face::North => (
                [
                    [x, y, z + 1.0],
                    [x + 1.0, y, z + 1.0],
                    [x + 1.0, y + 1.0, z + 1.0],
                    [x, y + 1.0, z + 1.0],
                ],
                props.color,
            ),
            Face::South => (
                [
                    [x + 1.0, y, z],
                    [x, y, z],
                    [x, y + 1.0, z],
                    [x + 1.0, y + 1.0, z],
                ],
                props.color,
            ),
            Face::East => (
                [
                    [x + 1.0, y, z + 1.0],
                    [x + 1.0, y, z],
                    [x + 1.0, y + 1.0, z],
                    [x + 1.0, y + 1.0, z + 1.0],
                ],
                props.color,
            ),
            Face::West => (
                [
                    [x, y, z],
                    [x, y, z + 1.0],
                    [x, y + 1.0, z + 1.0],
                    [x, y + 1.0, z],
                ],
                props.color,
            ),
        };
        self.add_quad(corners, face.normal(), color);
    }
}

/// One draw call's worth of same-kind blocks in a chunk.
pub struct BatchedMesh {
    pub kind: BlockKind,
    /// Number of blocks this batch represents (including fully occluded
    /// ones that emitted no faces).
    pub block_count: u32,
    pub data: MeshData,
}

/// The batched meshes of one chunk, keyed by block kind and rebuilt
/// wholesale on every consolidation.
#[derive(Default)]
pub struct BatchedMeshSet {
    pub by_kind: FxHashMap<BlockKind, BatchedMesh>,
}

impl BatchedMeshSet {
    pub fn release(&mut self) {
        for mesh in self.by_kind.values_mut() {
            mesh.data.release();
        }
        self.by_kind.clear();
    }

    pub fn total_blocks(&self) -> u32 {
        self.by_kind.values().map(|m| m.block_count).sum()
    }
}

/// Standalone mesh for one freshly edited block.
pub struct SingleMesh {
    pub kind: BlockKind,
    pub origin: IVec3,
    pub data: MeshData,
}

impl SingleMesh {
    pub fn new(kind: BlockKind, world: IVec3, mask: u8) -> Self {
        let mut data = MeshData::default();
        if kind.renders_as() == PrimitiveKind::Cube {
            for face in Face::ALL {
                if mask & face.bit() != 0 {
                    data.add_block_face(kind, world, face);
                }
            }
        }
        SingleMesh {
            kind,
            origin: world,
            data,
        }
    }

    pub fn release(&mut self) {
        self.data.release();
    }
}

fn local_idx(local: IVec3) -> usize {
    ((local.x * CHUNK_SIZE + local.z) * WORLD_HEIGHT + local.y) as usize
}

/// Resolve a (possibly out-of-chunk) local position against a snapshot.
/// Lateral neighbors come from the captured boundary planes; a missing
/// plane reads as unloaded, which the mask rules treat as solid.
fn sample(snapshot: &ConsolidationSnapshot, local: IVec3) -> NeighborSample {
    if !(0..WORLD_HEIGHT).contains(&local.y) {
        return NeighborSample::Absent;
    }
    let x_in = (0..CHUNK_SIZE).contains(&local.x);
    let z_in = (0..CHUNK_SIZE).contains(&local.z);
    if x_in && z_in {
        return NeighborSample::Loaded(snapshot.blocks[local_idx(local)]);
    }

    let (face, along) = if local.x == CHUNK_SIZE && z_in {
        (Face::East, local.z)
    } else if local.x == -1 && z_in {
        (Face::West, local.z)
    } else if local.z == CHUNK_SIZE && x_in {
        (Face::North, local.x)
    } else if local.z == -1 && x_in {
        (Face::South, local.x)
    } else {
        return NeighborSample::Unloaded;
    };

    match &snapshot.neighbor_planes[face as usize] {
        Some(plane) => NeighborSample::Loaded(plane[(along * WORLD_HEIGHT + local.y) as usize]),
        None => NeighborSample::Unloaded,
    }
}

/// Visibility mask for every block in the snapshot, in block-array order.
pub fn compute_masks(snapshot: &ConsolidationSnapshot) -> Vec<u8> {
    let mut masks = vec![0u8; CHUNK_VOLUME];
    for x in 0..CHUNK_SIZE {
        for z in 0..CHUNK_SIZE {
            for y in 0..WORLD_HEIGHT {
                let local = IVec3::new(x, y, z);
                let kind = snapshot.blocks[local_idx(local)];
                if kind.is_air() {
                    continue;
                }
                let neighbors =
                    Face::ALL.map(|face| sample(snapshot, local + face.offset()));
                masks[local_idx(local)] = snapshot.rules.compute_mask(kind, neighbors);
            }
        }
    }
    masks
}

/// Consolidation-mode layout: one batched mesh per distinct block kind,
/// faces picked by freshly computed masks, for exactly the snapshot's
/// block set. Pure with respect to the snapshot; no procedural
/// generation runs here.
pub fn build_batches(snapshot: &ConsolidationSnapshot) -> BatchedMeshSet {
    let masks = compute_masks(snapshot);
    let (base_x, base_z) = (
        snapshot.coord.0 * CHUNK_SIZE,
        snapshot.coord.1 * CHUNK_SIZE,
    );

    let mut set = BatchedMeshSet::default();
    for x in 0..CHUNK_SIZE {
        for z in 0..CHUNK_SIZE {
            for y in 0..WORLD_HEIGHT {
                let local = IVec3::new(x, y, z);
                let kind = snapshot.blocks[local_idx(local)];
                if kind.renders_as() != PrimitiveKind::Cube {
                    continue;
                }
                let batch = set.by_kind.entry(kind).or_insert_with(|| BatchedMesh {
                    kind,
                    block_count: 0,
                    data: MeshData::default(),
                });
                batch.block_count += 1;

                let mask = masks[local_idx(local)];
                if mask == 0 {
                    continue;
                }
                let world = IVec3::new(base_x + x, y, base_z + z);
                for face in Face::ALL {
                    if mask & face.bit() != 0 {
                        batch.data.add_block_face(kind, world, face);
                    }
                }
            }
        }
    }
    set
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::face::ALL_FACES;
    use crate::core::visibility::VisibilityEngine;

    fn empty_snapshot() -> ConsolidationSnapshot {
        ConsolidationSnapshot {
            coord: (0, 0),
            blocks: vec![BlockKind::Air; CHUNK_VOLUME],
            neighbor_planes: [None, None, None, None, None, None],
            rules: VisibilityEngine::new(BlockKind::default_transparent(), 64).rules(),
        }
    }

    fn set(snapshot: &mut ConsolidationSnapshot, local: IVec3, kind: BlockKind) {
        snapshot.blocks[local_idx(local)] = kind;
    }

    #[test]
    fn lone_block_emits_six_faces() {
        let mut snapshot = empty_snapshot();
        set(&mut snapshot, IVec3::new(5, 100, 5), BlockKind::Stone);
        let masks = compute_masks(&snapshot);
        assert_eq!(masks[local_idx(IVec3::new(5, 100, 5))], ALL_FACES);
        let batches = build_batches(&snapshot);
        let stone = &batches.by_kind[&BlockKind::Stone];
        assert_eq!(stone.block_count, 1);
        // 6 faces * 4 vertices, 6 faces * 6 indices
        assert_eq!(stone.data.vertices.len(), 24);
        assert_eq!(stone.data.index_count(), 36);
    }

    #[test]
    fn adjacent_solid_blocks_cull_the_shared_face() {
        let mut snapshot = empty_snapshot();
        set(&mut snapshot, IVec3::new(5, 100, 5), BlockKind::Stone);
        set(&mut snapshot, IVec3::new(6, 100, 5), BlockKind::Stone);
        let masks = compute_masks(&snapshot);
        let a = masks[local_idx(IVec3::new(5, 100, 5))];
        let b = masks[local_idx(IVec3::new(6, 100, 5))];
        let batches = build_batches(&snapshot);
        assert_eq!(a & Face::East.bit(), 0);
        assert_eq!(b & Face::West.bit(), 0);
        // 10 visible faces across both blocks.
        assert_eq!(batches.by_kind[&BlockKind::Stone].data.index_count(), 60);
    }

    #[test]
    fn one_batch_per_distinct_kind() {
        let mut snapshot = empty_snapshot();
        set(&mut snapshot, IVec3::new(1, 50, 1), BlockKind::Stone);
        set(&mut snapshot, IVec3::new(3, 50, 1), BlockKind::Dirt);
        set(&mut snapshot, IVec3::new(5, 50, 1), BlockKind::Dirt);
        let batches = build_batches(&snapshot);
        assert_eq!(batches.by_kind.len(), 2);
        assert_eq!(batches.by_kind[&BlockKind::Dirt].block_count, 2);
        assert_eq!(batches.total_blocks(), 3);
    }

    #[test]
    fn chunk_edge_without_neighbor_hides_the_outward_face() {
        let mut snapshot = empty_snapshot();
        set(&mut snapshot, IVec3::new(15, 100, 5), BlockKind::Stone);
        let masks = compute_masks(&snapshot);
        let mask = masks[local_idx(IVec3::new(15, 100, 5))];
        assert_eq!(mask & Face::East.bit(), 0);
        assert_ne!(mask & Face::Up.bit(), 0);
    }

    #[test]
    fn loaded_neighbor_plane_exposes_the_edge_face() {
        let mut snapshot = empty_snapshot();
        set(&mut snapshot, IVec3::new(15, 100, 5), BlockKind::Stone);
        // Neighbor chunk to the east is loaded and all air at the seam.
        snapshot.neighbor_planes[Face::East as usize] =
            Some(vec![BlockKind::Air; (CHUNK_SIZE * WORLD_HEIGHT) as usize]);
        let masks = compute_masks(&snapshot);
        assert_ne!(masks[local_idx(IVec3::new(15, 100, 5))] & Face::East.bit(), 0);
    }

    #[test]
    fn single_mesh_honors_its_mask() {
        let mesh = SingleMesh::new(BlockKind::Dirt, IVec3::new(0, 64, 0), Face::Up.bit());
        assert_eq!(mesh.data.vertices.len(), 4);
        let mut full = SingleMesh::new(BlockKind::Dirt, IVec3::new(0, 64, 0), ALL_FACES);
        assert_eq!(full.data.index_count(), 36);
        full.release();
        assert!(full.data.is_released());
        assert_eq!(full.data.index_count(), 0);
    }

    #[test]
    fn world_top_and_bottom_count_as_open() {
        let mut snapshot = empty_snapshot();
        set(&mut snapshot, IVec3::new(4, WORLD_HEIGHT - 1, 4), BlockKind::Snow);
        let masks = compute_masks(&snapshot);
        assert_ne!(
            masks[local_idx(IVec3::new(4, WORLD_HEIGHT - 1, 4))] & Face::Up.bit(),
            0
        );
    }
}
