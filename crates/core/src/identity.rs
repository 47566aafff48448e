//! Stable file identity.

use crate::{TAPE_FILE_PREFIX, UNSET_BLOCK};
use serde::{Deserialize, Serialize};

/// Identity of a managed file that survives renames: filesystem id,
/// inode generation, inode number.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct FileUid {
    pub fsid: u64,
    pub igen: u32,
    pub ino: u64,
}

impl FileUid {
    pub fn new(fsid: u64, igen: u32, ino: u64) -> Self {
        Self { fsid, igen, ino }
    }

    /// High half of the filesystem id, as encoded in tape file names.
    pub fn fsid_hi(&self) -> u32 {
        (self.fsid >> 32) as u32
    }

    /// Low half of the filesystem id, as encoded in tape file names.
    pub fn fsid_lo(&self) -> u32 {
        (self.fsid & 0xffff_ffff) as u32
    }

    /// File name of this file's data within a tape's data directory:
    /// `<prefix>.<fsid_h>.<fsid_l>.<igen>.<inode>`.
    pub fn tape_file_name(&self) -> String {
        format!(
            "{}.{}.{}.{}.{}",
            TAPE_FILE_PREFIX,
            self.fsid_hi(),
            self.fsid_lo(),
            self.igen,
            self.ino
        )
    }
}

impl std::fmt::Display for FileUid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.fsid, self.igen, self.ino)
    }
}

/// Tape start block of a file, or [`UNSET_BLOCK`] when the tape filesystem
/// did not report one. Unknown blocks order last so recalls over known
/// blocks stay sequential.
pub fn start_block_sort_key(block: i64) -> i64 {
    if block == UNSET_BLOCK { i64::MAX } else { block }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tape_file_name_splits_fsid() {
        let uid = FileUid::new(0x0000_0001_0000_0002, 7, 42);
        assert_eq!(uid.tape_file_name(), "coldstore.1.2.7.42");
    }

    #[test]
    fn unknown_start_blocks_sort_last() {
        let mut blocks = vec![100, UNSET_BLOCK, 5];
        blocks.sort_by_key(|b| start_block_sort_key(*b));
        assert_eq!(blocks, vec![5, 100, UNSET_BLOCK]);
    }
}
