//! Start-block accounting for cartridge data files.
//!
//! A real tape filesystem reports the starting block of a file through an
//! extended attribute once the data is flushed. The directory-backed library
//! keeps the same information in a per-cartridge map, assigned in append
//! order, so recalls can be scheduled in on-tape order.

use crate::error::{TapeError, TapeResult};
use crate::layout::tape_dir;
use coldstore_core::UNSET_BLOCK;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Nominal tape block size the accounting is expressed in.
const BLOCK_SIZE: u64 = 512 * 1024;

const MAP_FILE: &str = ".blockmap.json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct BlockMap {
    next: i64,
    files: HashMap<String, i64>,
}

fn map_path(mount_point: &Path, tape_id: &str) -> PathBuf {
    tape_dir(mount_point, tape_id).join(MAP_FILE)
}

fn load(mount_point: &Path, tape_id: &str) -> TapeResult<BlockMap> {
    match std::fs::read(map_path(mount_point, tape_id)) {
        Ok(bytes) => serde_json::from_slice(&bytes)
            .map_err(|e| TapeError::Internal(format!("block map of {tape_id}: {e}"))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BlockMap::default()),
        Err(e) => Err(e.into()),
    }
}

fn store(mount_point: &Path, tape_id: &str, map: &BlockMap) -> TapeResult<()> {
    let bytes = serde_json::to_vec(map)
        .map_err(|e| TapeError::Internal(format!("block map of {tape_id}: {e}")))?;
    std::fs::write(map_path(mount_point, tape_id), bytes)?;
    Ok(())
}

/// Record the start block of a freshly written data file. Re-recording an
/// existing file keeps its original block.
pub fn assign_start_block(
    mount_point: &Path,
    tape_id: &str,
    file_name: &str,
    size: u64,
) -> TapeResult<i64> {
    let mut map = load(mount_point, tape_id)?;
    if let Some(block) = map.files.get(file_name) {
        return Ok(*block);
    }
    let block = map.next;
    map.files.insert(file_name.to_string(), block);
    map.next += size.div_ceil(BLOCK_SIZE).max(1) as i64;
    store(mount_point, tape_id, &map)?;
    Ok(block)
}

/// Start block recorded for a data file, or [`UNSET_BLOCK`] when unknown.
pub fn start_block(mount_point: &Path, tape_id: &str, file_name: &str) -> TapeResult<i64> {
    let map = load(mount_point, tape_id)?;
    Ok(map.files.get(file_name).copied().unwrap_or(UNSET_BLOCK))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_are_assigned_in_append_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("T1")).unwrap();

        let a = assign_start_block(dir.path(), "T1", "f1", 3 * BLOCK_SIZE).unwrap();
        let b = assign_start_block(dir.path(), "T1", "f2", 1).unwrap();
        let c = assign_start_block(dir.path(), "T1", "f3", 0).unwrap();

        assert_eq!(a, 0);
        assert_eq!(b, 3);
        assert_eq!(c, 4);

        // Idempotent for an existing file.
        assert_eq!(assign_start_block(dir.path(), "T1", "f1", 99).unwrap(), 0);
        assert_eq!(start_block(dir.path(), "T1", "f2").unwrap(), 3);
        assert_eq!(start_block(dir.path(), "T1", "missing").unwrap(), UNSET_BLOCK);
    }
}
