use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::core::block::BlockKind;

/// Engine-wide configuration, passed into `WorldManager::new`.
///
/// There is deliberately no global settings singleton; everything the
/// engine tunes at runtime lives here.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct EngineConfig {
    pub seed: u32,
    /// Chunk radius around the viewer that stays loaded.
    pub render_distance: i32,
    /// Inactivity delay before dirty blocks are consolidated.
    pub consolidation_debounce_ms: u64,
    /// Dirty-block count that bypasses the debounce entirely.
    pub dirty_block_threshold: u32,
    /// Block kinds rendered as see-through in addition to the registry
    /// defaults (e.g. to treat leaves as opaque on low settings, remove
    /// them here instead).
    pub transparent_kinds: Vec<BlockKind>,
    pub persistence: PersistenceConfig,
    pub worker_threads: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            seed: 2147,
            render_distance: RENDER_DISTANCE,
            consolidation_debounce_ms: CONSOLIDATION_DEBOUNCE_MS,
            dirty_block_threshold: DIRTY_BLOCK_THRESHOLD,
            transparent_kinds: BlockKind::default_transparent().to_vec(),
            persistence: PersistenceConfig::default(),
            worker_threads: num_cpus::get().min(ASYNC_WORKER_COUNT),
        }
    }
}

impl EngineConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.consolidation_debounce_ms)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PersistenceConfig {
    /// Where delta files live. `None` picks the per-user data directory.
    pub store_dir: Option<PathBuf>,
    /// When false the store is wiped at session start; deltas then only
    /// survive chunk unload/reload within one session.
    pub cross_session: bool,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            store_dir: None,
            cross_session: false,
        }
    }
}

impl PersistenceConfig {
    pub fn resolved_dir(&self) -> PathBuf {
        if let Some(dir) = &self.store_dir {
            return dir.clone();
        }
        directories::ProjectDirs::from("dev", "voxelworld", "voxelworld")
            .map(|dirs| dirs.data_dir().join("deltas"))
            .unwrap_or_else(|| PathBuf::from("voxelworld-deltas"))
    }
}
