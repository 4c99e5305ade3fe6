//! Asynchronous delta store with a write-back cache.
//!
//! The in-memory cache is authoritative until flushed. All file I/O runs
//! on a dedicated store thread; the main thread only sends messages over
//! an unbounded channel, so a flush is guaranteed queued the moment
//! `flush` returns, and `record_change` never blocks.
//!
//! Flush protocol: at most one flush per chunk key is in flight. The
//! cache entry is evicted only when the acknowledged flush captured the
//! entry's current revision; a change recorded during the flight bumps
//! the revision, and the mismatch triggers a follow-up flush instead of
//! an eviction. Nothing is ever lost to the race.

use std::fs;
use std::path::PathBuf;
use std::thread;

use crossbeam_channel::{Receiver, Sender, TryRecvError, unbounded};
use glam::IVec3;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, warn};

use crate::config::PersistenceConfig;
use crate::core::block::BlockKind;
use crate::core::chunk::ChunkCoord;
use crate::persist::delta::{ChunkDelta, delta_path, read_delta_file, write_delta_file};

enum IoRequest {
    Read {
        request_id: u64,
        coord: ChunkCoord,
    },
    /// `None` means the delta became empty: remove the file.
    Write {
        request_id: u64,
        coord: ChunkCoord,
        delta: Option<ChunkDelta>,
    },
    Wipe,
}

enum IoResponse {
    ReadDone {
        request_id: u64,
        coord: ChunkCoord,
        delta: Option<ChunkDelta>,
    },
    WriteDone {
        request_id: u64,
        coord: ChunkCoord,
        ok: bool,
    },
}

/// Store event surfaced to the world manager.
pub enum StoreEvent {
    /// A requested delta read finished (possibly empty).
    DeltasLoaded { coord: ChunkCoord, delta: ChunkDelta },
}

/// Outcome of a non-blocking delta lookup.
pub enum DeltaFetch {
    Ready(ChunkDelta),
    /// A durable-store read is in flight; a `DeltasLoaded` event follows.
    Loading,
}

struct CacheEntry {
    delta: ChunkDelta,
    /// Bumped on every record; a flush captures the revision it wrote.
    rev: u64,
}

pub struct DeltaStore {
    cache: FxHashMap<ChunkCoord, CacheEntry>,
    /// Chunks known to have no stored delta, so reloads skip the disk.
    known_empty: FxHashSet<ChunkCoord>,
    in_flight: FxHashMap<ChunkCoord, u64>,
    pending_reads: FxHashMap<u64, ChunkCoord>,
    reads_requested: FxHashSet<ChunkCoord>,
    io_tx: Sender<IoRequest>,
    io_rx: Receiver<IoResponse>,
    next_request_id: u64,
}

impl DeltaStore {
    pub fn new(config: &PersistenceConfig) -> Self {
        let dir = config.resolved_dir();
        let (io_tx, request_rx) = unbounded::<IoRequest>();
        let (response_tx, io_rx) = unbounded::<IoResponse>();

        let worker_dir = dir.clone();
        thread::Builder::new()
            .name("delta-store-io".to_string())
            .spawn(move || io_worker(worker_dir, request_rx, response_tx))
            .expect("failed to spawn delta store worker");

        let store = DeltaStore {
            cache: FxHashMap::default(),
            known_empty: FxHashSet::default(),
            in_flight: FxHashMap::default(),
            pending_reads: FxHashMap::default(),
            reads_requested: FxHashSet::default(),
            io_tx,
            io_rx,
            next_request_id: 1,
        };

        if !config.cross_session {
            debug!("wiping delta store at session start");
            let _ = store.io_tx.send(IoRequest::Wipe);
        }
        store
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_request_id;
        self.next_request_id += 1;
        id
    }

    /// Cache first, then the durable store, and an empty delta when
    /// neither has anything; never an error. The empty outcome is cached
    /// so repeat lookups stay in memory.
    pub fn get_deltas(&mut self, coord: ChunkCoord) -> DeltaFetch {
        if let Some(entry) = self.cache.get(&coord) {
            return DeltaFetch::Ready(entry.delta.clone());
        }
        if self.known_empty.contains(&coord) {
            return DeltaFetch::Ready(ChunkDelta::default());
        }
        if self.reads_requested.insert(coord) {
            let request_id = self.next_id();
            self.pending_reads.insert(request_id, coord);
            let _ = self.io_tx.send(IoRequest::Read { request_id, coord });
        }
        DeltaFetch::Loading
    }

    /// Record one block deviation from generated terrain. Synchronous,
    /// in-memory only.
    pub fn record_change(&mut self, coord: ChunkCoord, local: IVec3, kind: BlockKind) {
        self.known_empty.remove(&coord);
        let entry = self.cache.entry(coord).or_insert_with(|| CacheEntry {
            delta: ChunkDelta::default(),
            rev: 0,
        });
        entry.delta.record(local, kind);
        entry.rev += 1;
    }

    /// Drop the recorded deviation for a block that was edited back to
    /// its generated value.
    pub fn remove_change(&mut self, coord: ChunkCoord, local: IVec3) {
        if let Some(entry) = self.cache.get_mut(&coord) {
            entry.delta.unrecord(local);
            entry.rev += 1;
        }
    }

    /// Queue an asynchronous flush of the cached entry for `coord`.
    /// No-ops when nothing is cached or a flush is already in flight
    /// (the in-flight ack will requeue if the entry changed meanwhile).
    pub fn flush(&mut self, coord: ChunkCoord) {
        if self.in_flight.contains_key(&coord) {
            return;
        }
        let request_id = self.next_id();
        let Some(entry) = self.cache.get(&coord) else {
            return;
        };
        let rev = entry.rev;
        let delta = if entry.delta.is_empty() {
            None
        } else {
            Some(entry.delta.clone())
        };
        self.in_flight.insert(coord, rev);
        let _ = self.io_tx.send(IoRequest::Write {
            request_id,
            coord,
            delta,
        });
        debug!(cx = coord.0, cz = coord.1, rev, "delta flush queued");
    }

    /// Forget the whole session: cache and durable store.
    pub fn clear_session(&mut self) {
        self.cache.clear();
        self.known_empty.clear();
        self.in_flight.clear();
        let _ = self.io_tx.send(IoRequest::Wipe);
    }

    pub fn cached_chunks(&self) -> usize {
        self.cache.len()
    }

    pub fn flushes_in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Drain I/O completions. Read completions surface as events; flush
    /// acknowledgements run the eviction protocol internally.
    pub fn poll(&mut self) -> Vec<StoreEvent> {
        let mut events = Vec::new();
        loop {
            let response = match self.io_rx.try_recv() {
                Ok(response) => response,
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            };
            match response {
                IoResponse::ReadDone {
                    request_id,
                    coord,
                    delta,
                } => {
                    if self.pending_reads.remove(&request_id).is_none() {
                        continue;
                    }
                    self.reads_requested.remove(&coord);
                    let delta = delta.unwrap_or_default();
                    if delta.is_empty() {
                        self.known_empty.insert(coord);
                    } else if !self.cache.contains_key(&coord) {
                        // A change recorded while the read was in flight
                        // wins over the stored state.
                        self.cache.insert(
                            coord,
                            CacheEntry {
                                delta: delta.clone(),
                                rev: 0,
                            },
                        );
                    }
                    events.push(StoreEvent::DeltasLoaded { coord, delta });
                }
                IoResponse::WriteDone {
                    request_id: _,
                    coord,
                    ok,
                } => {
                    let Some(captured_rev) = self.in_flight.remove(&coord) else {
                        continue;
                    };
                    if !ok {
                        // Entry stays cached; the next flush trigger
                        // retries.
                        warn!(cx = coord.0, cz = coord.1, "delta flush failed, kept in cache");
                        continue;
                    }
                    match self.cache.get(&coord) {
                        Some(entry) if entry.rev == captured_rev => {
                            let was_empty = entry.delta.is_empty();
                            self.cache.remove(&coord);
                            if was_empty {
                                self.known_empty.insert(coord);
                            }
                        }
                        Some(_) => {
                            // Changes landed mid-flight; flush again so
                            // they reach the durable store too.
                            self.flush(coord);
                        }
                        None => {}
                    }
                }
            }
        }
        events
    }
}

fn io_worker(dir: PathBuf, rx: Receiver<IoRequest>, tx: Sender<IoResponse>) {
    if let Err(e) = fs::create_dir_all(&dir) {
        warn!("cannot create delta store dir {}: {e}", dir.display());
    }
    while let Ok(request) = rx.recv() {
        match request {
            IoRequest::Read { request_id, coord } => {
                let path = delta_path(&dir, coord);
                let delta = if path.exists() {
                    match read_delta_file(&path) {
                        Ok(delta) => Some(delta),
                        Err(e) => {
                            // Treated as "no edits yet" rather than
                            // blocking the chunk load.
                            warn!(cx = coord.0, cz = coord.1, "delta read failed: {e}");
                            None
                        }
                    }
                } else {
                    None
                };
                if tx
                    .send(IoResponse::ReadDone {
                        request_id,
                        coord,
                        delta,
                    })
                    .is_err()
                {
                    break;
                }
            }
            IoRequest::Write {
                request_id,
                coord,
                delta,
            } => {
                let path = delta_path(&dir, coord);
                let ok = match delta {
                    Some(delta) => match write_delta_file(&path, &delta) {
                        Ok(()) => true,
                        Err(e) => {
                            warn!(cx = coord.0, cz = coord.1, "delta write failed: {e}");
                            false
                        }
                    },
                    None => path.exists().then(|| fs::remove_file(&path).is_ok()).unwrap_or(true),
                };
                if tx
                    .send(IoResponse::WriteDone {
                        request_id,
                        coord,
                        ok,
                    })
                    .is_err()
                {
                    break;
                }
            }
            IoRequest::Wipe => {
                if let Ok(entries) = fs::read_dir(&dir) {
                    for entry in entries.flatten() {
                        if entry.path().extension().is_some_and(|ext| ext == "delta") {
                            let _ = fs::remove_file(entry.path());
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn test_config(tag: &str) -> PersistenceConfig {
        PersistenceConfig {
            store_dir: Some(std::env::temp_dir().join(format!(
                "voxelworld-store-{}-{tag}",
                std::process::id()
            ))),
            cross_session: true,
        }
    }

    fn drain_until<F: FnMut(&mut DeltaStore) -> bool>(store: &mut DeltaStore, mut done: F) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while !done(store) {
            assert!(Instant::now() < deadline, "store operation timed out");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn unknown_chunk_resolves_to_empty_delta() {
        let mut store = DeltaStore::new(&test_config("empty"));
        assert!(matches!(store.get_deltas((3, 3)), DeltaFetch::Loading));
        let mut loaded = None;
        drain_until(&mut store, |s| {
            for event in s.poll() {
                let StoreEvent::DeltasLoaded { coord, delta } = event;
                loaded = Some((coord, delta));
            }
            loaded.is_some()
        });
        let (coord, delta) = loaded.unwrap();
        assert_eq!(coord, (3, 3));
        assert!(delta.is_empty());
        // Second lookup is served from the negative cache.
        assert!(matches!(store.get_deltas((3, 3)), DeltaFetch::Ready(d) if d.is_empty()));
    }

    #[test]
    fn record_is_synchronous_and_cached() {
        let mut store = DeltaStore::new(&test_config("record"));
        store.record_change((0, 0), IVec3::new(10, 64, 10), BlockKind::Stone);
        match store.get_deltas((0, 0)) {
            DeltaFetch::Ready(delta) => {
                assert_eq!(
                    delta.changes.get(&IVec3::new(10, 64, 10)),
                    Some(&BlockKind::Stone)
                );
            }
            DeltaFetch::Loading => panic!("cache hit expected"),
        }
    }

    #[test]
    fn flush_round_trips_through_disk() {
        let config = test_config("flush");
        let mut store = DeltaStore::new(&config);
        store.record_change((5, -2), IVec3::new(1, 80, 1), BlockKind::Glass);
        store.flush((5, -2));
        assert_eq!(store.flushes_in_flight(), 1);
        drain_until(&mut store, |s| {
            s.poll();
            s.flushes_in_flight() == 0
        });
        // Evicted from cache on success...
        assert_eq!(store.cached_chunks(), 0);
        // ...and readable back from the durable store.
        assert!(matches!(store.get_deltas((5, -2)), DeltaFetch::Loading));
        let mut loaded = None;
        drain_until(&mut store, |s| {
            for event in s.poll() {
                let StoreEvent::DeltasLoaded { delta, .. } = event;
                loaded = Some(delta);
            }
            loaded.is_some()
        });
        assert_eq!(
            loaded.unwrap().changes.get(&IVec3::new(1, 80, 1)),
            Some(&BlockKind::Glass)
        );
    }

    #[test]
    fn change_during_flight_is_not_lost() {
        let mut store = DeltaStore::new(&test_config("race"));
        store.record_change((1, 1), IVec3::new(0, 64, 0), BlockKind::Stone);
        store.flush((1, 1));
        // Lands while the first flush is (or may be) in flight.
        store.record_change((1, 1), IVec3::new(0, 65, 0), BlockKind::Dirt);
        drain_until(&mut store, |s| {
            s.poll();
            s.flushes_in_flight() == 0 && s.cached_chunks() == 0
        });
        // Both changes reached the durable store.
        let mut loaded = None;
        store.get_deltas((1, 1));
        drain_until(&mut store, |s| {
            for event in s.poll() {
                let StoreEvent::DeltasLoaded { delta, .. } = event;
                loaded = Some(delta);
            }
            loaded.is_some()
        });
        let delta = loaded.unwrap();
        assert_eq!(delta.changes.len(), 2);
    }

    #[test]
    fn clear_session_forgets_everything() {
        let mut store = DeltaStore::new(&test_config("clear"));
        store.record_change((9, 9), IVec3::new(2, 64, 2), BlockKind::Sand);
        store.flush((9, 9));
        drain_until(&mut store, |s| {
            s.poll();
            s.flushes_in_flight() == 0
        });
        store.clear_session();
        assert_eq!(store.cached_chunks(), 0);
        assert!(matches!(store.get_deltas((9, 9)), DeltaFetch::Loading));
        let mut loaded = None;
        drain_until(&mut store, |s| {
            for event in s.poll() {
                let StoreEvent::DeltasLoaded { delta, .. } = event;
                loaded = Some(delta);
            }
            loaded.is_some()
        });
        assert!(loaded.unwrap().is_empty());
    }
}
