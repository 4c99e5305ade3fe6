//! Persisted chunk deltas and their on-disk framing.
//!
//! A delta records only the blocks a player changed away from generated
//! terrain, so stored state grows with activity, not with world size.
//! Breaking a block is recorded as a change to air.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use glam::IVec3;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::core::block::BlockKind;
use crate::core::chunk::ChunkCoord;

const MAGIC_HEADER: &[u8; 4] = b"VXDL";
const VERSION: u32 = 1;

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ChunkDelta {
    /// Chunk-local block position -> replacement kind (air = removal).
    pub changes: FxHashMap<IVec3, BlockKind>,
    /// Unix milliseconds of the last recorded change.
    pub last_modified_ms: i64,
}

impl Default for ChunkDelta {
    fn default() -> Self {
        Self {
            changes: FxHashMap::default(),
            last_modified_ms: 0,
        }
    }
}

impl ChunkDelta {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn record(&mut self, local: IVec3, kind: BlockKind) {
        self.changes.insert(local, kind);
        self.last_modified_ms = chrono::Utc::now().timestamp_millis();
    }

    /// Drop the entry for a block that went back to its generated value.
    pub fn unrecord(&mut self, local: IVec3) {
        self.changes.remove(&local);
        self.last_modified_ms = chrono::Utc::now().timestamp_millis();
    }
}

/// File name for a chunk's delta, keyed by the coordinate string.
pub fn delta_file_name(coord: ChunkCoord) -> String {
    format!("c{}_{}.delta", coord.0, coord.1)
}

pub fn delta_path(dir: &Path, coord: ChunkCoord) -> PathBuf {
    dir.join(delta_file_name(coord))
}

pub fn write_delta_file(path: &Path, delta: &ChunkDelta) -> Result<(), String> {
    let file =
        File::create(path).map_err(|e| format!("cannot create {}: {e}", path.display()))?;
    let mut writer = BufWriter::new(file);
    writer.write_all(MAGIC_HEADER).map_err(|e| e.to_string())?;
    writer
        .write_all(&VERSION.to_le_bytes())
        .map_err(|e| e.to_string())?;

    let data = bincode::serialize(delta).map_err(|e| format!("serialize failed: {e}"))?;
    writer
        .write_all(&(data.len() as u64).to_le_bytes())
        .map_err(|e| e.to_string())?;
    writer.write_all(&data).map_err(|e| e.to_string())?;
    writer.flush().map_err(|e| e.to_string())?;
    Ok(())
}

pub fn read_delta_file(path: &Path) -> Result<ChunkDelta, String> {
    let file = File::open(path).map_err(|e| format!("cannot open {}: {e}", path.display()))?;
    let mut reader = BufReader::new(file);

    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic).map_err(|e| e.to_string())?;
    if &magic != MAGIC_HEADER {
        return Err("bad delta file magic".to_string());
    }

    let mut version_bytes = [0u8; 4];
    reader
        .read_exact(&mut version_bytes)
        .map_err(|e| e.to_string())?;
    let version = u32::from_le_bytes(version_bytes);
    if version != VERSION {
        return Err(format!("unsupported delta file version {version}"));
    }

    let mut size_bytes = [0u8; 8];
    reader
        .read_exact(&mut size_bytes)
        .map_err(|e| e.to_string())?;
    let size = u64::from_le_bytes(size_bytes) as usize;

    let mut data = vec![0u8; size];
    reader.read_exact(&mut data).map_err(|e| e.to_string())?;
    bincode::deserialize(&data).map_err(|e| format!("deserialize failed: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_file(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("voxelworld-{}-{name}", std::process::id()))
    }

    #[test]
    fn delta_round_trips_through_file() {
        let mut delta = ChunkDelta::default();
        delta.record(IVec3::new(10, 64, 10), BlockKind::Glass);
        delta.record(IVec3::new(0, 70, 15), BlockKind::Air);

        let path = temp_file("roundtrip.delta");
        write_delta_file(&path, &delta).unwrap();
        let loaded = read_delta_file(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded, delta);
        assert_eq!(
            loaded.changes.get(&IVec3::new(10, 64, 10)),
            Some(&BlockKind::Glass)
        );
    }

    #[test]
    fn unrecord_restores_minimality() {
        let mut delta = ChunkDelta::default();
        delta.record(IVec3::new(1, 2, 3), BlockKind::Stone);
        delta.unrecord(IVec3::new(1, 2, 3));
        assert!(delta.is_empty());
    }

    #[test]
    fn rejects_garbage_files() {
        let path = temp_file("garbage.delta");
        std::fs::write(&path, b"definitely not a delta file").unwrap();
        assert!(read_delta_file(&path).is_err());
        std::fs::remove_file(&path).ok();
    }
}
