// World constants
pub const WORLD_HEIGHT: i32 = 256;
pub const CHUNK_SIZE: i32 = 16;
pub const CHUNK_VOLUME: usize = (CHUNK_SIZE * CHUNK_SIZE * WORLD_HEIGHT) as usize;
pub const SEA_LEVEL: i32 = 64;

// Chunk lifecycle defaults (overridable through EngineConfig)
pub const RENDER_DISTANCE: i32 = 3;
pub const CONSOLIDATION_DEBOUNCE_MS: u64 = 1000;
pub const DIRTY_BLOCK_THRESHOLD: u32 = 50;
pub const GENERATION_RETRY_LIMIT: u32 = 3;
pub const VISIBILITY_ERROR_LIMIT: u32 = 64;

// Background workers
pub const ASYNC_WORKER_COUNT: usize = 4;
pub const MAX_RESULTS_PER_FRAME: usize = 8;

// Main loop cadence
pub const TICK_HZ: u32 = 60;
