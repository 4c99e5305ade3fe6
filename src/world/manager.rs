//! World manager: owns the chunk registry, drives load/unload against the
//! viewer position, routes mutations, and pumps the background workers
//! and the delta store. Everything here runs on the main thread and
//! never blocks; chunk-sized work arrives as messages.

use std::time::Instant;

use glam::{IVec3, Vec3};
use rustc_hash::FxHashMap;
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::constants::*;
use crate::core::block::{BlockKind, validate_registry};
use crate::core::chunk::{
    Chunk, ChunkCoord, ConsolidationSnapshot, ConsolidationState, EditOutcome, chunk_of,
    in_world_bounds, local_of,
};
use crate::core::face::Face;
use crate::core::visibility::{NeighborSample, VisibilityEngine, update_region};
use crate::persist::delta::ChunkDelta;
use crate::persist::store::{DeltaFetch, DeltaStore, StoreEvent};
use crate::world::mesher::{BatchedMesh, BatchedMeshSet, SingleMesh};
use crate::world::workers::{WorkRequest, WorkResponse, WorkerPool};

/// Lifecycle of one chunk coordinate inside the registry.
enum ChunkSlot {
    /// Waiting on the delta store before generation can be ordered.
    AwaitingDeltas {
        epoch: u64,
        queued: Vec<(IVec3, BlockKind)>,
    },
    /// Terrain generation in flight (or waiting for queue room).
    Generating {
        epoch: u64,
        attempts: u32,
        dispatched: bool,
        delta: ChunkDelta,
        queued: Vec<(IVec3, BlockKind)>,
    },
    Ready(Box<Chunk>),
    /// Generation failed repeatedly; rendered as an empty placeholder.
    Failed { epoch: u64 },
}

/// One renderable handle, consumed by the render collaborator per frame.
pub enum RenderItem<'a> {
    Batched(&'a BatchedMesh),
    Single(&'a SingleMesh),
}

#[derive(Debug, Default, Clone, Copy)]
pub struct WorldStats {
    pub ready: usize,
    pub loading: usize,
    pub failed: usize,
    pub consolidating: usize,
    pub pending_edits: usize,
    pub store_cached: usize,
    pub flushes_in_flight: usize,
}

pub struct WorldManager {
    config: EngineConfig,
    visibility: VisibilityEngine,
    pool: WorkerPool,
    store: DeltaStore,
    chunks: FxHashMap<ChunkCoord, ChunkSlot>,
    next_epoch: u64,
    next_request_id: u64,
}

impl WorldManager {
    pub fn new(config: EngineConfig) -> Result<Self, String> {
        validate_registry()?;
        let pool = WorkerPool::new(config.worker_threads.max(1), config.seed);
        let store = DeltaStore::new(&config.persistence);
        let visibility =
            VisibilityEngine::new(&config.transparent_kinds, VISIBILITY_ERROR_LIMIT);
        info!(
            seed = config.seed,
            render_distance = config.render_distance,
            workers = pool.worker_count(),
            "world manager up"
        );
        Ok(WorldManager {
            config,
            visibility,
            pool,
            store,
            chunks: FxHashMap::default(),
            next_epoch: 1,
            next_request_id: 1,
        })
    }

    fn next_epoch(&mut self) -> u64 {
        let epoch = self.next_epoch;
        self.next_epoch += 1;
        epoch
    }

    fn next_request_id(&mut self) -> u64 {
        let id = self.next_request_id;
        self.next_request_id += 1;
        id
    }

    /// Per-frame tick: pump store and worker responses, reconcile the
    /// loaded set against the viewer, and fire due debounce deadlines.
    pub fn update(&mut self, viewer: Vec3) {
        let now = Instant::now();
        self.pump_store();
        self.pump_workers(now);
        self.reconcile_loaded_set(viewer);
        self.redispatch_stalled_generation();
        self.fire_due_consolidations(now);
    }

    // ---- load/unload ----------------------------------------------------

    fn reconcile_loaded_set(&mut self, viewer: Vec3) {
        let center = chunk_of(viewer.x.floor() as i32, viewer.z.floor() as i32);
        let radius = self.config.render_distance;

        // Load what is missing, nearest first.
        let mut missing: Vec<(i32, ChunkCoord)> = Vec::new();
        for cx in (center.0 - radius)..=(center.0 + radius) {
            for cz in (center.1 - radius)..=(center.1 + radius) {
                if !self.chunks.contains_key(&(cx, cz)) {
                    let dx = cx - center.0;
                    let dz = cz - center.1;
                    missing.push((dx * dx + dz * dz, (cx, cz)));
                }
            }
        }
        missing.sort_by_key(|(dist, _)| *dist);
        for (_, coord) in missing {
            self.begin_load(coord);
        }

        // Unload what fell out of range.
        let stale: Vec<ChunkCoord> = self
            .chunks
            .keys()
            .filter(|(cx, cz)| {
                (cx - center.0).abs() > radius || (cz - center.1).abs() > radius
            })
            .copied()
            .collect();
        for coord in stale {
            self.unload(coord);
        }
    }

    fn begin_load(&mut self, coord: ChunkCoord) {
        let epoch = self.next_epoch();
        debug!(cx = coord.0, cz = coord.1, epoch, "loading chunk");
        match self.store.get_deltas(coord) {
            DeltaFetch::Ready(delta) => {
                self.chunks.insert(
                    coord,
                    ChunkSlot::Generating {
                        epoch,
                        attempts: 0,
                        dispatched: false,
                        delta,
                        queued: Vec::new(),
                    },
                );
                self.dispatch_generation(coord);
            }
            DeltaFetch::Loading => {
                self.chunks.insert(
                    coord,
                    ChunkSlot::AwaitingDeltas {
                        epoch,
                        queued: Vec::new(),
                    },
                );
            }
        }
    }

    fn unload(&mut self, coord: ChunkCoord) {
        let Some(slot) = self.chunks.remove(&coord) else {
            return;
        };
        match slot {
            ChunkSlot::Ready(mut chunk) => {
                // Flush is queued before the in-memory state goes away;
                // the store keeps the cache entry until the write lands.
                self.store.flush(coord);
                chunk.release_all();
                debug!(cx = coord.0, cz = coord.1, "unloaded chunk");
            }
            ChunkSlot::AwaitingDeltas { .. }
            | ChunkSlot::Generating { .. }
            | ChunkSlot::Failed { .. } => {
                // Nothing rendered yet; in-flight responses are dropped
                // by the epoch check when they arrive.
                debug!(cx = coord.0, cz = coord.1, "dropped loading chunk");
            }
        }
    }

    /// Flush every loaded chunk's deltas and release all meshes. Used at
    /// session end.
    pub fn unload_all(&mut self) {
        let coords: Vec<ChunkCoord> = self.chunks.keys().copied().collect();
        for coord in coords {
            self.unload(coord);
        }
    }

    // ---- generation -----------------------------------------------------

    fn dispatch_generation(&mut self, coord: ChunkCoord) {
        let request_id = self.next_request_id();
        let Some(ChunkSlot::Generating { epoch, .. }) = self.chunks.get(&coord) else {
            return;
        };
        let epoch = *epoch;
        let sent = self.pool.dispatch(WorkRequest::Generate {
            request_id,
            epoch,
            coord,
        });
        if let Some(ChunkSlot::Generating { dispatched, .. }) = self.chunks.get_mut(&coord) {
            *dispatched = sent;
        }
    }

    fn redispatch_stalled_generation(&mut self) {
        let stalled: Vec<ChunkCoord> = self
            .chunks
            .iter()
            .filter_map(|(coord, slot)| match slot {
                ChunkSlot::Generating {
                    dispatched: false, ..
                } => Some(*coord),
                _ => None,
            })
            .collect();
        for coord in stalled {
            self.dispatch_generation(coord);
        }
    }

    fn finish_generation(&mut self, coord: ChunkCoord, epoch: u64, blocks: Vec<BlockKind>) {
        let Some(ChunkSlot::Generating {
            epoch: slot_epoch,
            delta,
            queued,
            ..
        }) = self.chunks.get_mut(&coord)
        else {
            return;
        };
        if *slot_epoch != epoch {
            return;
        }
        let delta = std::mem::take(delta);
        let queued = std::mem::take(queued);

        let mut chunk = Box::new(Chunk::new(coord, epoch));
        chunk.install_terrain(blocks);
        // Stored player edits win over generated terrain, before the
        // first mesh build.
        for (&local, &kind) in delta.changes.iter() {
            chunk.apply_delta(local, kind);
        }
        self.chunks.insert(coord, ChunkSlot::Ready(chunk));
        self.dispatch_consolidation(coord);

        // Mutations that arrived while the chunk was still generating.
        for (pos, kind) in queued {
            self.apply_edit(pos, kind);
        }

        // Lateral neighbors meshed against an assumed-solid seam can now
        // resolve real blocks; fold that in on their next cycle.
        let deadline = Instant::now() + self.config.debounce();
        for face in [Face::North, Face::South, Face::East, Face::West] {
            let offset = face.offset();
            self.schedule_rebuild((coord.0 + offset.x, coord.1 + offset.z), deadline);
        }
    }

    /// Arm a consolidation on a Ready, otherwise-Idle chunk so its
    /// batched meshes get rebuilt. Chunks already Scheduled or
    /// Consolidating are left alone.
    fn schedule_rebuild(&mut self, coord: ChunkCoord, deadline: Instant) {
        if let Some(ChunkSlot::Ready(chunk)) = self.chunks.get_mut(&coord) {
            match chunk.state {
                ConsolidationState::Idle => {
                    chunk.state = ConsolidationState::Scheduled { deadline };
                }
                // The in-flight snapshot predates this request; rebuild
                // again once it lands.
                ConsolidationState::Consolidating { .. } => chunk.rebuild_requested = true,
                ConsolidationState::Scheduled { .. } => {}
            }
        }
    }

    fn fail_generation(&mut self, coord: ChunkCoord, epoch: u64, message: String) {
        let Some(ChunkSlot::Generating {
            epoch: slot_epoch,
            attempts,
            ..
        }) = self.chunks.get_mut(&coord)
        else {
            return;
        };
        if *slot_epoch != epoch {
            return;
        }
        *attempts += 1;
        let attempts = *attempts;
        if attempts < GENERATION_RETRY_LIMIT {
            warn!(
                cx = coord.0,
                cz = coord.1,
                attempts, "generation failed, retrying: {message}"
            );
            self.dispatch_generation(coord);
        } else {
            error!(
                cx = coord.0,
                cz = coord.1,
                "generation failed permanently, rendering empty placeholder: {message}"
            );
            self.chunks.insert(coord, ChunkSlot::Failed { epoch });
        }
    }

    // ---- consolidation --------------------------------------------------

    fn dispatch_consolidation(&mut self, coord: ChunkCoord) {
        let request_id = self.next_request_id();
        let rules = self.visibility.rules();
        let rules_epoch = rules.epoch();

        // Boundary planes of the four loaded lateral neighbors, captured
        // now so the worker stays pure.
        let mut neighbor_planes: [Option<Vec<BlockKind>>; 6] =
            [None, None, None, None, None, None];
        for face in [Face::North, Face::South, Face::East, Face::West] {
            let offset = face.offset();
            let neighbor = (coord.0 + offset.x, coord.1 + offset.z);
            if let Some(ChunkSlot::Ready(chunk)) = self.chunks.get(&neighbor) {
                neighbor_planes[face as usize] = Some(chunk.boundary_plane(face.opposite()));
            }
        }

        let Some(ChunkSlot::Ready(chunk)) = self.chunks.get_mut(&coord) else {
            return;
        };
        if matches!(chunk.state, ConsolidationState::Consolidating { .. }) {
            return;
        }
        let epoch = chunk.epoch;
        let blocks = chunk.begin_consolidation(request_id);
        let snapshot = ConsolidationSnapshot {
            coord,
            blocks,
            neighbor_planes,
            rules,
        };
        if !self.pool.dispatch(WorkRequest::Consolidate {
            request_id,
            epoch,
            rules_epoch,
            snapshot,
        }) {
            // Queue full: back out to Scheduled and try again next tick.
            if let Some(ChunkSlot::Ready(chunk)) = self.chunks.get_mut(&coord) {
                chunk.state = ConsolidationState::Scheduled {
                    deadline: Instant::now(),
                };
            }
        }
    }

    fn fire_due_consolidations(&mut self, now: Instant) {
        let due: Vec<ChunkCoord> = self
            .chunks
            .iter()
            .filter_map(|(coord, slot)| match slot {
                ChunkSlot::Ready(chunk) if chunk.consolidation_due(now) => Some(*coord),
                _ => None,
            })
            .collect();
        for coord in due {
            self.dispatch_consolidation(coord);
        }
    }

    fn finish_consolidation(
        &mut self,
        coord: ChunkCoord,
        epoch: u64,
        request_id: u64,
        rules_epoch: u64,
        meshes: BatchedMeshSet,
    ) {
        let now = Instant::now();
        let debounce = self.config.debounce();
        let current_rules = self.visibility.epoch();
        let Some(ChunkSlot::Ready(chunk)) = self.chunks.get_mut(&coord) else {
            // Unloaded mid-flight; the result is stale by definition.
            let mut meshes = meshes;
            meshes.release();
            return;
        };
        if chunk.epoch != epoch {
            let mut meshes = meshes;
            meshes.release();
            return;
        }
        if !chunk.finish_consolidation(request_id, meshes, rules_epoch, now, debounce) {
            return;
        }
        // Rules changed while the worker ran: these meshes are already
        // stale, rebuild on the next cycle.
        if rules_epoch != current_rules && chunk.state == ConsolidationState::Idle {
            chunk.state = ConsolidationState::Scheduled { deadline: now };
        }
        // Likewise a seam change that arrived mid-flight.
        if chunk.rebuild_requested {
            chunk.rebuild_requested = false;
            if chunk.state == ConsolidationState::Idle {
                chunk.state = ConsolidationState::Scheduled {
                    deadline: now + debounce,
                };
            }
        }
    }

    // ---- message pumps --------------------------------------------------

    fn pump_store(&mut self) {
        for event in self.store.poll() {
            match event {
                StoreEvent::DeltasLoaded { coord, delta } => {
                    if let Some(ChunkSlot::AwaitingDeltas { epoch, queued }) =
                        self.chunks.get_mut(&coord)
                    {
                        let epoch = *epoch;
                        let queued = std::mem::take(queued);
                        self.chunks.insert(
                            coord,
                            ChunkSlot::Generating {
                                epoch,
                                attempts: 0,
                                dispatched: false,
                                delta,
                                queued,
                            },
                        );
                        self.dispatch_generation(coord);
                    }
                }
            }
        }
    }

    fn pump_workers(&mut self, _now: Instant) {
        for response in self.pool.poll(MAX_RESULTS_PER_FRAME) {
            match response {
                WorkResponse::Generated {
                    epoch,
                    coord,
                    result,
                    ..
                } => match result {
                    Ok(blocks) => self.finish_generation(coord, epoch, blocks),
                    Err(message) => self.fail_generation(coord, epoch, message),
                },
                WorkResponse::Consolidated {
                    request_id,
                    epoch,
                    coord,
                    rules_epoch,
                    meshes,
                } => {
                    self.finish_consolidation(coord, epoch, request_id, rules_epoch, meshes);
                }
            }
        }
    }

    // ---- queries and mutation -------------------------------------------

    /// Block kind at a world position; air outside loaded/ready chunks.
    pub fn get_block(&self, pos: IVec3) -> BlockKind {
        if !in_world_bounds(pos.y) {
            return BlockKind::Air;
        }
        match self.chunks.get(&chunk_of(pos.x, pos.z)) {
            Some(ChunkSlot::Ready(chunk)) => chunk.get(local_of(pos)),
            _ => BlockKind::Air,
        }
    }

    /// Place a block (or air, via [`WorldManager::remove_block`]).
    /// Mutations against a still-generating chunk are queued and applied
    /// the moment terrain arrives; mutations into unloaded or failed
    /// chunks are rejected.
    pub fn set_block(&mut self, pos: IVec3, kind: BlockKind) -> bool {
        if !in_world_bounds(pos.y) {
            return false;
        }
        let coord = chunk_of(pos.x, pos.z);
        match self.chunks.get_mut(&coord) {
            Some(ChunkSlot::AwaitingDeltas { queued, .. })
            | Some(ChunkSlot::Generating { queued, .. }) => {
                queued.push((pos, kind));
                return true;
            }
            Some(ChunkSlot::Ready(_)) => {}
            Some(ChunkSlot::Failed { .. }) | None => return false,
        }
        self.apply_edit(pos, kind)
    }

    pub fn remove_block(&mut self, pos: IVec3) -> bool {
        self.set_block(pos, BlockKind::Air)
    }

    fn apply_edit(&mut self, pos: IVec3, kind: BlockKind) -> bool {
        let coord = chunk_of(pos.x, pos.z);
        let local = local_of(pos);

        let current = match self.chunks.get(&coord) {
            Some(ChunkSlot::Ready(chunk)) => chunk.get(local),
            _ => return false,
        };
        if current == kind {
            return false;
        }

        // Build the standalone mesh before mutating, so the mask sees
        // the pre-edit neighborhood consistently with the neighbors'.
        let mask = self.mask_for(pos, kind);
        let mesh = SingleMesh::new(kind, pos, mask);

        let now = Instant::now();
        let debounce = self.config.debounce();
        let threshold = self.config.dirty_block_threshold;
        let Some(ChunkSlot::Ready(chunk)) = self.chunks.get_mut(&coord) else {
            return false;
        };
        let base = chunk.base_kind(local);
        let outcome = chunk.record_edit(local, kind, mesh, now, debounce, threshold);

        // Delta minimality: only deviations from generated terrain are
        // persisted; an edit back to base erases the stored entry.
        if kind == base {
            self.store.remove_change(coord, local);
        } else {
            self.store.record_change(coord, local, kind);
        }

        self.refresh_pending_neighbors(pos);

        // A seam edit flips a face baked into the adjacent chunk's
        // batched meshes; schedule that chunk for a rebuild.
        for face in [Face::North, Face::South, Face::East, Face::West] {
            let offset = face.offset();
            let on_seam = (offset.x > 0 && local.x == CHUNK_SIZE - 1)
                || (offset.x < 0 && local.x == 0)
                || (offset.z > 0 && local.z == CHUNK_SIZE - 1)
                || (offset.z < 0 && local.z == 0);
            if on_seam {
                self.schedule_rebuild((coord.0 + offset.x, coord.1 + offset.z), now + debounce);
            }
        }

        if outcome == EditOutcome::ConsolidateNow {
            self.dispatch_consolidation(coord);
        }
        true
    }

    /// Re-mask pending standalone meshes around a mutated block; their
    /// opposite faces may have flipped.
    fn refresh_pending_neighbors(&mut self, pos: IVec3) {
        for npos in update_region(&[pos]) {
            if npos == pos || !in_world_bounds(npos.y) {
                continue;
            }
            let ncoord = chunk_of(npos.x, npos.z);
            let nlocal = local_of(npos);
            let nkind = match self.chunks.get(&ncoord) {
                Some(ChunkSlot::Ready(chunk)) if chunk.pending.contains_key(&nlocal) => {
                    chunk.get(nlocal)
                }
                _ => continue,
            };
            let mask = self.mask_for(npos, nkind);
            if let Some(ChunkSlot::Ready(chunk)) = self.chunks.get_mut(&ncoord) {
                if let Some(edit) = chunk.pending.get_mut(&nlocal) {
                    edit.mesh.release();
                    edit.mesh = SingleMesh::new(nkind, npos, mask);
                }
            }
        }
    }

    fn sample_world(&mut self, pos: IVec3) -> NeighborSample {
        if !in_world_bounds(pos.y) {
            return NeighborSample::Absent;
        }
        match self.chunks.get(&chunk_of(pos.x, pos.z)) {
            Some(ChunkSlot::Ready(chunk)) => NeighborSample::Loaded(chunk.get(local_of(pos))),
            Some(ChunkSlot::Failed { .. }) => {
                // Placeholder chunks count as malformed neighbor data.
                // Tripping the limit disables the engine; meshes built
                // under the old rules must render all faces too.
                if self.visibility.record_lookup_failure() {
                    self.reschedule_stale_meshes();
                }
                NeighborSample::Unloaded
            }
            _ => NeighborSample::Unloaded,
        }
    }

    fn mask_for(&mut self, pos: IVec3, kind: BlockKind) -> u8 {
        let neighbors = Face::ALL.map(|face| self.sample_world(pos + face.offset()));
        self.visibility.rules().compute_mask(kind, neighbors)
    }

    // ---- configuration and introspection --------------------------------

    /// Swap the transparent-kind set; every chunk whose meshes were built
    /// under the old rules is re-scheduled.
    pub fn set_transparent_kinds(&mut self, kinds: &[BlockKind]) {
        self.visibility.set_transparent_kinds(kinds);
        self.reschedule_stale_meshes();
    }

    /// Re-schedule every Ready chunk whose meshes were built under an
    /// older rules epoch. In-flight consolidations are left alone; their
    /// results fail the epoch check on arrival and requeue themselves.
    fn reschedule_stale_meshes(&mut self) {
        let epoch = self.visibility.epoch();
        let now = Instant::now();
        for slot in self.chunks.values_mut() {
            if let ChunkSlot::Ready(chunk) = slot {
                if chunk.mesh_rules_epoch != epoch
                    && matches!(
                        chunk.state,
                        ConsolidationState::Idle | ConsolidationState::Scheduled { .. }
                    )
                {
                    chunk.state = ConsolidationState::Scheduled { deadline: now };
                }
            }
        }
    }

    /// Every batched mesh plus every not-yet-consolidated standalone
    /// mesh, for the render collaborator.
    pub fn renderables(&self) -> Vec<RenderItem<'_>> {
        let mut items = Vec::new();
        for slot in self.chunks.values() {
            if let ChunkSlot::Ready(chunk) = slot {
                for mesh in chunk.batched.by_kind.values() {
                    if !mesh.data.is_released() && mesh.data.index_count() > 0 {
                        items.push(RenderItem::Batched(mesh));
                    }
                }
                for edit in chunk.pending.values() {
                    if !edit.mesh.data.is_released() {
                        items.push(RenderItem::Single(&edit.mesh));
                    }
                }
            }
        }
        items
    }

    pub fn chunk_state(&self, coord: ChunkCoord) -> Option<ConsolidationState> {
        match self.chunks.get(&coord) {
            Some(ChunkSlot::Ready(chunk)) => Some(chunk.state),
            _ => None,
        }
    }

    pub fn is_ready(&self, coord: ChunkCoord) -> bool {
        matches!(self.chunks.get(&coord), Some(ChunkSlot::Ready(_)))
    }

    pub fn pending_edit_count(&self, coord: ChunkCoord) -> usize {
        match self.chunks.get(&coord) {
            Some(ChunkSlot::Ready(chunk)) => chunk.pending.len(),
            _ => 0,
        }
    }

    pub fn batched_block_count(&self, coord: ChunkCoord) -> u32 {
        match self.chunks.get(&coord) {
            Some(ChunkSlot::Ready(chunk)) => chunk.batched.total_blocks(),
            _ => 0,
        }
    }

    pub fn store(&mut self) -> &mut DeltaStore {
        &mut self.store
    }

    pub fn stats(&self) -> WorldStats {
        let mut stats = WorldStats {
            store_cached: self.store.cached_chunks(),
            flushes_in_flight: self.store.flushes_in_flight(),
            ..WorldStats::default()
        };
        for slot in self.chunks.values() {
            match slot {
                ChunkSlot::Ready(chunk) => {
                    stats.ready += 1;
                    stats.pending_edits += chunk.pending.len();
                    if matches!(chunk.state, ConsolidationState::Consolidating { .. }) {
                        stats.consolidating += 1;
                    }
                }
                ChunkSlot::AwaitingDeltas { .. } | ChunkSlot::Generating { .. } => {
                    stats.loading += 1;
                }
                ChunkSlot::Failed { .. } => stats.failed += 1,
            }
        }
        stats
    }
}
