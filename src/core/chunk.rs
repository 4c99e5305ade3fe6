use std::time::{Duration, Instant};

use glam::IVec3;
use rustc_hash::FxHashMap;

use crate::constants::*;
use crate::core::block::BlockKind;
use crate::core::face::Face;
use crate::core::visibility::MaskRules;
use crate::world::mesher::{BatchedMeshSet, SingleMesh};

pub type ChunkCoord = (i32, i32);

/// Chunk coordinate owning the given world column.
pub fn chunk_of(x: i32, z: i32) -> ChunkCoord {
    (x.div_euclid(CHUNK_SIZE), z.div_euclid(CHUNK_SIZE))
}

/// World position -> position local to its owning chunk.
pub fn local_of(pos: IVec3) -> IVec3 {
    IVec3::new(pos.x.rem_euclid(CHUNK_SIZE), pos.y, pos.z.rem_euclid(CHUNK_SIZE))
}

pub fn in_world_bounds(y: i32) -> bool {
    (0..WORLD_HEIGHT).contains(&y)
}

fn idx(local: IVec3) -> usize {
    debug_assert!(
        (0..CHUNK_SIZE).contains(&local.x)
            && (0..WORLD_HEIGHT).contains(&local.y)
            && (0..CHUNK_SIZE).contains(&local.z)
    );
    ((local.x * CHUNK_SIZE + local.z) * WORLD_HEIGHT + local.y) as usize
}

/// Consolidation lifecycle of a chunk's dirty blocks.
///
/// Idle: every block lives in a batched mesh. Scheduled: at least one
/// pending edit, debounce deadline armed. Consolidating: one snapshot in
/// flight with a background worker; never more than one per chunk.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ConsolidationState {
    Idle,
    Scheduled { deadline: Instant },
    Consolidating { request_id: u64, snapshot_seq: u64 },
}

/// What a mutation asks the world manager to do next.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum EditOutcome {
    /// Debounce armed (or re-armed); nothing to dispatch yet.
    Scheduled,
    /// Dirty count crossed the threshold: consolidate right now.
    ConsolidateNow,
    /// A consolidation is already in flight; the edit stays pending for
    /// the next cycle.
    InFlight,
}

/// A freshly edited block rendered standalone until consolidated.
pub struct PendingEdit {
    /// Edit sequence tag; edits at or below a snapshot's sequence are
    /// folded in when that snapshot's result lands.
    pub seq: u64,
    pub mesh: SingleMesh,
}

/// Immutable payload handed to a consolidation worker. The worker must
/// depend on nothing outside this snapshot.
pub struct ConsolidationSnapshot {
    pub coord: ChunkCoord,
    pub blocks: Vec<BlockKind>,
    /// Boundary planes of the four loaded lateral neighbors, indexed by
    /// `Face as usize` (Up/Down stay `None`). A missing plane means the
    /// neighbor is unloaded and its side is assumed solid.
    pub neighbor_planes: [Option<Vec<BlockKind>>; 6],
    pub rules: MaskRules,
}

/// One 16x16 column of the world, full height.
///
/// Owns the authoritative block array, the batched per-kind meshes, the
/// standalone meshes for not-yet-consolidated edits, and the
/// consolidation state machine. Only the world manager's thread writes
/// to `blocks`; workers only ever see snapshots.
pub struct Chunk {
    pub coord: ChunkCoord,
    /// Identity for discarding results that arrive after unload/reload.
    pub epoch: u64,
    blocks: Vec<BlockKind>,
    /// Generated terrain before any player edit, kept so the persistence
    /// layer can store only true deviations.
    base: Vec<BlockKind>,
    pub batched: BatchedMeshSet,
    pub pending: FxHashMap<IVec3, PendingEdit>,
    pub dirty_count: u32,
    pub state: ConsolidationState,
    /// Rules epoch the current batched meshes were built under.
    pub mesh_rules_epoch: u64,
    /// A rebuild was requested while a consolidation was in flight (a
    /// neighbor changed at the seam); honored once the flight lands.
    pub rebuild_requested: bool,
    edit_seq: u64,
}

impl Chunk {
    pub fn new(coord: ChunkCoord, epoch: u64) -> Self {
        Chunk {
            coord,
            epoch,
            blocks: vec![BlockKind::Air; CHUNK_VOLUME],
            base: vec![BlockKind::Air; CHUNK_VOLUME],
            batched: BatchedMeshSet::default(),
            pending: FxHashMap::default(),
            dirty_count: 0,
            state: ConsolidationState::Idle,
            mesh_rules_epoch: 0,
            rebuild_requested: false,
            edit_seq: 0,
        }
    }

    /// Install generated terrain as both the live and the base state.
    /// Deltas are overlaid afterwards via [`Chunk::apply_delta`].
    pub fn install_terrain(&mut self, blocks: Vec<BlockKind>) {
        debug_assert_eq!(blocks.len(), CHUNK_VOLUME);
        self.base = blocks.clone();
        self.blocks = blocks;
    }

    pub fn get(&self, local: IVec3) -> BlockKind {
        if !in_world_bounds(local.y) {
            return BlockKind::Air;
        }
        self.blocks[idx(local)]
    }

    pub fn base_kind(&self, local: IVec3) -> BlockKind {
        if !in_world_bounds(local.y) {
            return BlockKind::Air;
        }
        self.base[idx(local)]
    }

    /// Overlay one persisted delta entry. Touches only the live state so
    /// the base keeps describing what the generator produced.
    pub fn apply_delta(&mut self, local: IVec3, kind: BlockKind) {
        if in_world_bounds(local.y) {
            self.blocks[idx(local)] = kind;
        }
    }

    /// Record a player mutation and run the state-machine transition.
    ///
    /// The block array always reflects the latest requested state, even
    /// mid-consolidation; an edit landing during a flight is only marked
    /// for the next cycle, never dropped.
    pub fn record_edit(
        &mut self,
        local: IVec3,
        kind: BlockKind,
        mesh: SingleMesh,
        now: Instant,
        debounce: Duration,
        threshold: u32,
    ) -> EditOutcome {
        self.blocks[idx(local)] = kind;
        self.edit_seq += 1;
        if let Some(previous) = self.pending.insert(
            local,
            PendingEdit {
                seq: self.edit_seq,
                mesh,
            },
        ) {
            // Same block edited twice before consolidation: one pending
            // entry per coordinate, the older mesh is dead.
            let mut previous = previous;
            previous.mesh.release();
        } else {
            self.dirty_count += 1;
        }

        match self.state {
            ConsolidationState::Consolidating { .. } => EditOutcome::InFlight,
            ConsolidationState::Idle | ConsolidationState::Scheduled { .. } => {
                if self.dirty_count >= threshold {
                    EditOutcome::ConsolidateNow
                } else {
                    self.state = ConsolidationState::Scheduled {
                        deadline: now + debounce,
                    };
                    EditOutcome::Scheduled
                }
            }
        }
    }

    /// True when the debounce deadline has passed.
    pub fn consolidation_due(&self, now: Instant) -> bool {
        matches!(self.state, ConsolidationState::Scheduled { deadline } if now >= deadline)
    }

    /// Snapshot the authoritative block state and enter Consolidating.
    /// Callers must ensure no other request is in flight.
    pub fn begin_consolidation(&mut self, request_id: u64) -> Vec<BlockKind> {
        debug_assert!(!matches!(
            self.state,
            ConsolidationState::Consolidating { .. }
        ));
        self.state = ConsolidationState::Consolidating {
            request_id,
            snapshot_seq: self.edit_seq,
        };
        self.blocks.clone()
    }

    /// Apply a finished consolidation: swap in the rebuilt batched
    /// meshes, release every standalone mesh the snapshot covered, and
    /// keep later edits pending for the next cycle.
    ///
    /// Returns false if `request_id` does not match the in-flight
    /// request; the stale meshes are released, nothing else changes.
    pub fn finish_consolidation(
        &mut self,
        request_id: u64,
        mut meshes: BatchedMeshSet,
        rules_epoch: u64,
        now: Instant,
        debounce: Duration,
    ) -> bool {
        let snapshot_seq = match self.state {
            ConsolidationState::Consolidating {
                request_id: in_flight,
                snapshot_seq,
            } if in_flight == request_id => snapshot_seq,
            _ => {
                meshes.release();
                return false;
            }
        };

        self.batched.release();
        self.batched = meshes;
        self.mesh_rules_epoch = rules_epoch;

        self.pending.retain(|_, edit| {
            if edit.seq <= snapshot_seq {
                edit.mesh.release();
                false
            } else {
                true
            }
        });
        self.dirty_count = self.pending.len() as u32;

        self.state = if self.dirty_count > 0 {
            // Late edits re-trigger scheduling for the next cycle.
            ConsolidationState::Scheduled {
                deadline: now + debounce,
            }
        } else {
            ConsolidationState::Idle
        };
        true
    }

    /// The plane of this chunk's blocks butting against `face`
    /// (East = x max, West = x min, North = z max, South = z min), used
    /// when a neighboring chunk snapshots its surroundings.
    pub fn boundary_plane(&self, face: Face) -> Vec<BlockKind> {
        let mut plane = Vec::with_capacity((CHUNK_SIZE * WORLD_HEIGHT) as usize);
        match face {
            Face::East | Face::West => {
                let x = if face == Face::East { CHUNK_SIZE - 1 } else { 0 };
                for z in 0..CHUNK_SIZE {
                    for y in 0..WORLD_HEIGHT {
                        plane.push(self.blocks[idx(IVec3::new(x, y, z))]);
                    }
                }
            }
            Face::North | Face::South => {
                let z = if face == Face::North { CHUNK_SIZE - 1 } else { 0 };
                for x in 0..CHUNK_SIZE {
                    for y in 0..WORLD_HEIGHT {
                        plane.push(self.blocks[idx(IVec3::new(x, y, z))]);
                    }
                }
            }
            Face::Up | Face::Down => {}
        }
        plane
    }

    /// Explicitly release every mesh resource. Called on unload; from
    /// here on the chunk must not be rendered.
    pub fn release_all(&mut self) {
        self.batched.release();
        for (_, edit) in self.pending.iter_mut() {
            edit.mesh.release();
        }
        self.pending.clear();
        self.dirty_count = 0;
        self.state = ConsolidationState::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::mesher::{BatchedMesh, MeshData, SingleMesh};

    fn test_mesh() -> SingleMesh {
        SingleMesh::new(BlockKind::Stone, IVec3::new(0, 64, 0), crate::core::face::ALL_FACES)
    }

    fn edit(chunk: &mut Chunk, local: IVec3, now: Instant) -> EditOutcome {
        chunk.record_edit(
            local,
            BlockKind::Stone,
            test_mesh(),
            now,
            Duration::from_millis(1000),
            50,
        )
    }

    #[test]
    fn coordinate_helpers_handle_negative_space() {
        assert_eq!(chunk_of(0, 0), (0, 0));
        assert_eq!(chunk_of(15, 15), (0, 0));
        assert_eq!(chunk_of(-1, -1), (-1, -1));
        assert_eq!(chunk_of(-16, 16), (-1, 1));
        assert_eq!(local_of(IVec3::new(-1, 7, 16)), IVec3::new(15, 7, 0));
    }

    #[test]
    fn edit_arms_debounce_and_tracks_dirty_count() {
        let mut chunk = Chunk::new((0, 0), 1);
        let now = Instant::now();
        assert_eq!(edit(&mut chunk, IVec3::new(1, 64, 1), now), EditOutcome::Scheduled);
        assert_eq!(chunk.dirty_count, 1);
        assert!(matches!(chunk.state, ConsolidationState::Scheduled { .. }));
        assert!(!chunk.consolidation_due(now));
        assert!(chunk.consolidation_due(now + Duration::from_millis(1001)));
    }

    #[test]
    fn double_edit_of_same_block_keeps_one_pending_entry() {
        let mut chunk = Chunk::new((0, 0), 1);
        let now = Instant::now();
        edit(&mut chunk, IVec3::new(1, 64, 1), now);
        edit(&mut chunk, IVec3::new(1, 64, 1), now);
        assert_eq!(chunk.dirty_count, 1);
        assert_eq!(chunk.pending.len(), 1);
    }

    #[test]
    fn threshold_bypasses_debounce() {
        let mut chunk = Chunk::new((0, 0), 1);
        let now = Instant::now();
        let mut last = EditOutcome::Scheduled;
        for i in 0..50 {
            last = edit(&mut chunk, IVec3::new(i % 16, 64 + i / 16, 3), now);
        }
        assert_eq!(last, EditOutcome::ConsolidateNow);
    }

    #[test]
    fn forty_nine_edits_do_not_trigger() {
        let mut chunk = Chunk::new((0, 0), 1);
        let now = Instant::now();
        let mut last = EditOutcome::ConsolidateNow;
        for i in 0..49 {
            last = edit(&mut chunk, IVec3::new(i % 16, 64 + i / 16, 3), now);
        }
        assert_eq!(last, EditOutcome::Scheduled);
    }

    #[test]
    fn edits_during_flight_survive_consolidation() {
        let mut chunk = Chunk::new((0, 0), 1);
        let now = Instant::now();
        edit(&mut chunk, IVec3::new(1, 64, 1), now);
        let snapshot = chunk.begin_consolidation(7);
        assert_eq!(snapshot.len(), CHUNK_VOLUME);

        // Lands while the worker is busy.
        assert_eq!(edit(&mut chunk, IVec3::new(2, 64, 2), now), EditOutcome::InFlight);

        let applied = chunk.finish_consolidation(
            7,
            BatchedMeshSet::default(),
            0,
            now,
            Duration::from_millis(1000),
        );
        assert!(applied);
        assert_eq!(chunk.dirty_count, 1);
        assert!(chunk.pending.contains_key(&IVec3::new(2, 64, 2)));
        assert!(!chunk.pending.contains_key(&IVec3::new(1, 64, 1)));
        assert!(matches!(chunk.state, ConsolidationState::Scheduled { .. }));
    }

    #[test]
    fn clean_consolidation_returns_to_idle() {
        let mut chunk = Chunk::new((0, 0), 1);
        let now = Instant::now();
        edit(&mut chunk, IVec3::new(1, 64, 1), now);
        chunk.begin_consolidation(9);
        assert!(chunk.finish_consolidation(
            9,
            BatchedMeshSet::default(),
            0,
            now,
            Duration::from_millis(1000),
        ));
        assert_eq!(chunk.dirty_count, 0);
        assert!(chunk.pending.is_empty());
        assert_eq!(chunk.state, ConsolidationState::Idle);
    }

    #[test]
    fn stale_request_id_is_rejected() {
        let mut chunk = Chunk::new((0, 0), 1);
        let now = Instant::now();
        edit(&mut chunk, IVec3::new(1, 64, 1), now);
        chunk.begin_consolidation(1);
        let mut stale = BatchedMeshSet::default();
        stale.by_kind.insert(
            BlockKind::Stone,
            BatchedMesh {
                kind: BlockKind::Stone,
                block_count: 1,
                data: MeshData::default(),
            },
        );
        assert!(!chunk.finish_consolidation(
            2,
            stale,
            0,
            now,
            Duration::from_millis(1000),
        ));
        // The stale result never lands; the in-flight request stays.
        assert!(chunk.batched.by_kind.is_empty());
        assert!(matches!(chunk.state, ConsolidationState::Consolidating { .. }));
    }

    #[test]
    fn deltas_do_not_touch_base() {
        let mut chunk = Chunk::new((0, 0), 1);
        let mut terrain = vec![BlockKind::Air; CHUNK_VOLUME];
        terrain[idx(IVec3::new(3, 60, 3))] = BlockKind::Stone;
        chunk.install_terrain(terrain);
        chunk.apply_delta(IVec3::new(3, 60, 3), BlockKind::Glass);
        assert_eq!(chunk.get(IVec3::new(3, 60, 3)), BlockKind::Glass);
        assert_eq!(chunk.base_kind(IVec3::new(3, 60, 3)), BlockKind::Stone);
    }

    #[test]
    fn boundary_plane_reads_the_right_column() {
        let mut chunk = Chunk::new((0, 0), 1);
        let mut terrain = vec![BlockKind::Air; CHUNK_VOLUME];
        terrain[idx(IVec3::new(15, 70, 4))] = BlockKind::Sand;
        chunk.install_terrain(terrain);
        let east = chunk.boundary_plane(Face::East);
        assert_eq!(east[(4 * WORLD_HEIGHT + 70) as usize], BlockKind::Sand);
        let west = chunk.boundary_plane(Face::West);
        assert_eq!(west[(4 * WORLD_HEIGHT + 70) as usize], BlockKind::Air);
    }
}
