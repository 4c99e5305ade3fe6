//! Face-visibility engine.
//!
//! Computes the 6-bit per-block mask of faces that need rendering. The
//! mask rules are a small immutable value so background workers can carry
//! a copy inside a consolidation snapshot and stay pure.

use glam::IVec3;
use rustc_hash::FxHashSet;

use crate::core::block::BlockKind;
use crate::core::face::{ALL_FACES, Face};

/// What a neighbor lookup produced.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum NeighborSample {
    Loaded(BlockKind),
    /// Outside the world volume (above the sky, below bedrock).
    Absent,
    /// The neighboring chunk is not loaded; assumed solid so chunk edges
    /// never show through before the neighbor arrives.
    Unloaded,
}

/// The immutable rule set used to compute masks.
#[derive(Clone, Debug)]
pub struct MaskRules {
    transparent: FxHashSet<BlockKind>,
    epoch: u64,
    disabled: bool,
}

impl MaskRules {
    /// A kind a face can be seen through: air or a configured
    /// transparent kind.
    pub fn sees_through(&self, kind: BlockKind) -> bool {
        kind.is_air() || self.transparent.contains(&kind)
    }

    pub fn is_transparent(&self, kind: BlockKind) -> bool {
        !kind.is_air() && self.transparent.contains(&kind)
    }

    /// Masks computed under a different epoch are stale and must be
    /// rebuilt.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Face bit D is set iff the neighbor toward D is absent, air, or
    /// transparent, or the block itself is transparent. Transparent
    /// blocks always render all six faces; this can double-render the
    /// shared face between two adjacent transparent kinds, which is the
    /// intended tradeoff.
    pub fn compute_mask(&self, block: BlockKind, neighbors: [NeighborSample; 6]) -> u8 {
        if block.is_air() {
            return 0;
        }
        if self.disabled || self.is_transparent(block) {
            return ALL_FACES;
        }
        let mut mask = 0u8;
        for face in Face::ALL {
            let visible = match neighbors[face as usize] {
                NeighborSample::Loaded(kind) => self.sees_through(kind),
                NeighborSample::Absent => true,
                NeighborSample::Unloaded => false,
            };
            if visible {
                mask |= face.bit();
            }
        }
        mask
    }
}

/// Mutable engine state owned by the world manager.
pub struct VisibilityEngine {
    rules: MaskRules,
    errors: u32,
    error_limit: u32,
}

impl VisibilityEngine {
    pub fn new(transparent_kinds: &[BlockKind], error_limit: u32) -> Self {
        Self {
            rules: MaskRules {
                transparent: transparent_kinds.iter().copied().collect(),
                epoch: 0,
                disabled: false,
            },
            errors: 0,
            error_limit,
        }
    }

    /// Snapshot of the current rules, for worker dispatch.
    pub fn rules(&self) -> MaskRules {
        self.rules.clone()
    }

    /// Replace the transparent-kind set. Bumps the rules epoch, which
    /// invalidates every mask computed under the previous set.
    pub fn set_transparent_kinds(&mut self, kinds: &[BlockKind]) {
        self.rules.transparent = kinds.iter().copied().collect();
        self.rules.epoch += 1;
    }

    pub fn epoch(&self) -> u64 {
        self.rules.epoch
    }

    pub fn disabled(&self) -> bool {
        self.rules.disabled
    }

    pub fn error_count(&self) -> u32 {
        self.errors
    }

    /// Record a failed neighbor lookup. The failing face was already
    /// treated as solid (a hidden face, never a hole); past the limit the
    /// engine shuts itself off and every mask becomes all-faces.
    /// Returns true if this call tripped the limit.
    pub fn record_lookup_failure(&mut self) -> bool {
        if self.rules.disabled {
            return false;
        }
        self.errors += 1;
        if self.errors >= self.error_limit {
            tracing::warn!(
                errors = self.errors,
                "visibility engine disabled, rendering all faces"
            );
            self.rules.disabled = true;
            self.rules.epoch += 1;
            return true;
        }
        false
    }
}

/// Positions whose mask may change after mutations at `positions`: each
/// mutated block plus its six neighbors (the neighbor's opposite face can
/// flip too).
pub fn update_region(positions: &[IVec3]) -> Vec<IVec3> {
    let mut affected = FxHashSet::default();
    for &pos in positions {
        affected.insert(pos);
        for face in Face::ALL {
            affected.insert(pos + face.offset());
        }
    }
    let mut out: Vec<IVec3> = affected.into_iter().collect();
    out.sort_by_key(|p| (p.x, p.y, p.z));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> MaskRules {
        VisibilityEngine::new(BlockKind::default_transparent(), 4).rules()
    }

    fn all_loaded(kind: BlockKind) -> [NeighborSample; 6] {
        [NeighborSample::Loaded(kind); 6]
    }

    #[test]
    fn buried_block_has_empty_mask() {
        let mask = rules().compute_mask(BlockKind::Stone, all_loaded(BlockKind::Stone));
        assert_eq!(mask, 0);
    }

    #[test]
    fn exposed_block_has_full_mask() {
        let mask = rules().compute_mask(BlockKind::Stone, all_loaded(BlockKind::Air));
        assert_eq!(mask, ALL_FACES);
    }

    #[test]
    fn transparent_block_renders_all_faces_even_when_buried() {
        let mask = rules().compute_mask(BlockKind::Water, all_loaded(BlockKind::Stone));
        assert_eq!(mask, ALL_FACES);
    }

    #[test]
    fn air_never_renders() {
        assert_eq!(rules().compute_mask(BlockKind::Air, all_loaded(BlockKind::Air)), 0);
    }

    #[test]
    fn single_visible_face() {
        let mut neighbors = all_loaded(BlockKind::Stone);
        neighbors[Face::Up as usize] = NeighborSample::Loaded(BlockKind::Air);
        let mask = rules().compute_mask(BlockKind::Dirt, neighbors);
        assert_eq!(mask, Face::Up.bit());
    }

    #[test]
    fn unloaded_neighbor_hides_face() {
        let mut neighbors = all_loaded(BlockKind::Air);
        neighbors[Face::East as usize] = NeighborSample::Unloaded;
        let mask = rules().compute_mask(BlockKind::Stone, neighbors);
        assert_eq!(mask & Face::East.bit(), 0);
        assert_ne!(mask & Face::Up.bit(), 0);
    }

    #[test]
    fn mask_symmetry_between_solid_neighbors() {
        // Two adjacent solid blocks: neither exposes the shared face.
        let r = rules();
        let mut a_neighbors = all_loaded(BlockKind::Air);
        a_neighbors[Face::East as usize] = NeighborSample::Loaded(BlockKind::Stone);
        let mut b_neighbors = all_loaded(BlockKind::Air);
        b_neighbors[Face::West as usize] = NeighborSample::Loaded(BlockKind::Stone);
        let a = r.compute_mask(BlockKind::Stone, a_neighbors);
        let b = r.compute_mask(BlockKind::Stone, b_neighbors);
        assert_eq!(a & Face::East.bit(), 0);
        assert_eq!(b & Face::West.bit(), 0);
    }

    #[test]
    fn changing_transparent_set_bumps_epoch() {
        let mut engine = VisibilityEngine::new(BlockKind::default_transparent(), 4);
        let before = engine.epoch();
        engine.set_transparent_kinds(&[BlockKind::Water]);
        assert!(engine.epoch() > before);
        // Leaves no longer see-through under the new rules.
        assert!(!engine.rules().sees_through(BlockKind::Leaves));
    }

    #[test]
    fn error_threshold_disables_engine() {
        let mut engine = VisibilityEngine::new(BlockKind::default_transparent(), 3);
        let before = engine.epoch();
        assert!(!engine.record_lookup_failure());
        assert!(!engine.record_lookup_failure());
        assert!(engine.record_lookup_failure());
        assert!(engine.disabled());
        // Disabling invalidates masks built under the old rules.
        assert!(engine.epoch() > before);
        // Disabled engine renders everything instead of guessing.
        let mask = engine
            .rules()
            .compute_mask(BlockKind::Stone, all_loaded(BlockKind::Stone));
        assert_eq!(mask, ALL_FACES);
    }

    #[test]
    fn update_region_covers_target_and_neighbors() {
        let affected = update_region(&[IVec3::new(4, 60, 4)]);
        assert_eq!(affected.len(), 7);
        assert!(affected.contains(&IVec3::new(4, 61, 4)));
        assert!(affected.contains(&IVec3::new(3, 60, 4)));
    }
}
