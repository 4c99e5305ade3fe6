//! Background worker pool for terrain generation and consolidation.
//!
//! Typed request/response messages correlated by request id travel over
//! crossbeam channels; workers own a generator clone each and only ever
//! see immutable snapshots, so the main thread never blocks and nothing
//! is shared live.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::thread;

use crossbeam_channel::{Receiver, Sender, TryRecvError, bounded};

use crate::core::chunk::{ChunkCoord, ConsolidationSnapshot};
use crate::world::generator::TerrainGenerator;
use crate::world::mesher::{self, BatchedMeshSet};

pub enum WorkRequest {
    /// Normal mode: produce base terrain from noise.
    Generate {
        request_id: u64,
        epoch: u64,
        coord: ChunkCoord,
    },
    /// Consolidation mode: masks + batch layout for the exact snapshot,
    /// no procedural generation.
    Consolidate {
        request_id: u64,
        epoch: u64,
        rules_epoch: u64,
        snapshot: ConsolidationSnapshot,
    },
}

pub enum WorkResponse {
    Generated {
        request_id: u64,
        epoch: u64,
        coord: ChunkCoord,
        result: Result<Vec<crate::core::block::BlockKind>, String>,
    },
    Consolidated {
        request_id: u64,
        epoch: u64,
        coord: ChunkCoord,
        rules_epoch: u64,
        meshes: BatchedMeshSet,
    },
}

pub struct WorkerPool {
    request_tx: Sender<WorkRequest>,
    response_rx: Receiver<WorkResponse>,
    worker_count: usize,
}

impl WorkerPool {
    pub fn new(worker_count: usize, seed: u32) -> Self {
        let (request_tx, request_rx) = bounded::<WorkRequest>(256);
        let (response_tx, response_rx) = bounded::<WorkResponse>(256);

        for worker_id in 0..worker_count {
            let rx = request_rx.clone();
            let tx = response_tx.clone();
            let generator = TerrainGenerator::new(seed);

            thread::Builder::new()
                .name(format!("voxel-worker-{worker_id}"))
                .spawn(move || {
                    while let Ok(request) = rx.recv() {
                        let response = Self::handle(&generator, request);
                        if tx.send(response).is_err() {
                            break;
                        }
                    }
                })
                .expect("failed to spawn voxel worker");
        }

        WorkerPool {
            request_tx,
            response_rx,
            worker_count,
        }
    }

    fn handle(generator: &TerrainGenerator, request: WorkRequest) -> WorkResponse {
        match request {
            WorkRequest::Generate {
                request_id,
                epoch,
                coord,
            } => {
                // A panicking generator is a generation failure, not a
                // dead worker.
                let result = catch_unwind(AssertUnwindSafe(|| {
                    generator.generate(coord.0, coord.1)
                }))
                .map_err(|_| "generator panicked".to_string())
                .and_then(|r| r)
                .map(|terrain| terrain.blocks);
                WorkResponse::Generated {
                    request_id,
                    epoch,
                    coord,
                    result,
                }
            }
            WorkRequest::Consolidate {
                request_id,
                epoch,
                rules_epoch,
                snapshot,
            } => {
                let coord = snapshot.coord;
                let meshes = mesher::build_batches(&snapshot);
                WorkResponse::Consolidated {
                    request_id,
                    epoch,
                    coord,
                    rules_epoch,
                    meshes,
                }
            }
        }
    }

    /// Non-blocking dispatch. Returns false when the queue is full; the
    /// caller re-dispatches on a later tick.
    pub fn dispatch(&self, request: WorkRequest) -> bool {
        self.request_tx.try_send(request).is_ok()
    }

    /// Drain up to `max` finished responses without blocking.
    pub fn poll(&self, max: usize) -> Vec<WorkResponse> {
        let mut responses = Vec::new();
        for _ in 0..max {
            match self.response_rx.try_recv() {
                Ok(response) => responses.push(response),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        responses
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    use crate::constants::CHUNK_VOLUME;
    use crate::core::block::BlockKind;
    use crate::core::visibility::VisibilityEngine;

    fn wait_one(pool: &WorkerPool) -> WorkResponse {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            if let Some(response) = pool.poll(1).pop() {
                return response;
            }
            assert!(Instant::now() < deadline, "worker response timed out");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn generate_round_trip_carries_correlation() {
        let pool = WorkerPool::new(1, 99);
        assert!(pool.dispatch(WorkRequest::Generate {
            request_id: 41,
            epoch: 7,
            coord: (1, -2),
        }));
        match wait_one(&pool) {
            WorkResponse::Generated {
                request_id,
                epoch,
                coord,
                result,
            } => {
                assert_eq!(request_id, 41);
                assert_eq!(epoch, 7);
                assert_eq!(coord, (1, -2));
                assert_eq!(result.unwrap().len(), CHUNK_VOLUME);
            }
            _ => panic!("expected a generation response"),
        }
    }

    #[test]
    fn consolidate_round_trip_builds_meshes() {
        let pool = WorkerPool::new(1, 99);
        let mut blocks = vec![BlockKind::Air; CHUNK_VOLUME];
        blocks[0] = BlockKind::Bedrock;
        let snapshot = ConsolidationSnapshot {
            coord: (0, 0),
            blocks,
            neighbor_planes: [None, None, None, None, None, None],
            rules: VisibilityEngine::new(BlockKind::default_transparent(), 64).rules(),
        };
        assert!(pool.dispatch(WorkRequest::Consolidate {
            request_id: 5,
            epoch: 1,
            rules_epoch: 0,
            snapshot,
        }));
        match wait_one(&pool) {
            WorkResponse::Consolidated { request_id, meshes, .. } => {
                assert_eq!(request_id, 5);
                assert_eq!(meshes.total_blocks(), 1);
            }
            _ => panic!("expected a consolidation response"),
        }
    }
}
