//! Ownership-bound handle to one managed file.

use crate::error::{FsError, FsResult};
use crate::posix::{FileRecord, PosixFs, inode_of};
use coldstore_core::{FileState, FileUid, TapeAttr};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;

/// Stat result for a managed file.
#[derive(Debug, Clone, Copy)]
pub struct FileMeta {
    /// Logical size in bytes; preserved across stubbing.
    pub size: u64,
    /// Allocated 512-byte blocks; a stub occupies none.
    pub blocks: u64,
    pub mtime_sec: i64,
    pub mtime_nsec: i64,
    pub mode: u32,
    pub is_regular: bool,
}

/// Handle to one managed file, addressed by path or by stable identity.
///
/// The advisory exclusive lock is reentrant per handle: nested `lock` calls
/// on the same handle succeed immediately and must be balanced by the same
/// number of `unlock` calls. Across handles the lock is exclusive per file
/// identity.
pub struct FileHandle {
    fs: Arc<PosixFs>,
    uid: FileUid,
    path: PathBuf,
    guard: Option<OwnedMutexGuard<()>>,
    lock_depth: u32,
}

impl std::fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileHandle")
            .field("uid", &self.uid)
            .field("path", &self.path)
            .field("lock_depth", &self.lock_depth)
            .finish()
    }
}

impl FileHandle {
    /// Open by path. Registers the file's bookkeeping record on first
    /// contact.
    pub fn open(fs: &Arc<PosixFs>, path: &Path) -> FsResult<Self> {
        let path = path
            .canonicalize()
            .map_err(|e| FsError::NotFound(format!("{}: {e}", path.display())))?;
        let (fsid, _) = fs.filesystem_for_path(&path)?;
        let ino = inode_of(&path)?;

        let record = match fs.load_record(fsid, ino)? {
            Some(record) => record,
            None => {
                let record = FileRecord {
                    igen: 1,
                    path: path.clone(),
                    state: FileState::Resident,
                    attr: None,
                };
                fs.store_record(fsid, ino, &record)?;
                record
            }
        };

        Ok(Self {
            fs: fs.clone(),
            uid: FileUid::new(fsid, record.igen, ino),
            path,
            guard: None,
            lock_depth: 0,
        })
    }

    /// Open by stable identity. Fails `NotFound` when the identity no longer
    /// resolves.
    pub fn by_uid(fs: &Arc<PosixFs>, uid: FileUid) -> FsResult<Self> {
        let record = fs
            .load_record(uid.fsid, uid.ino)?
            .ok_or_else(|| FsError::NotFound(format!("file identity {uid}")))?;
        if record.igen != uid.igen {
            return Err(FsError::NotFound(format!("file identity {uid}")));
        }
        Ok(Self {
            fs: fs.clone(),
            uid,
            path: record.path,
            guard: None,
            lock_depth: 0,
        })
    }

    pub fn uid(&self) -> FileUid {
        self.uid
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size, allocation, times, and mode of the file.
    pub fn stat(&self) -> FsResult<FileMeta> {
        use std::os::unix::fs::MetadataExt;
        let meta = std::fs::metadata(&self.path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                FsError::NotFound(self.path.display().to_string())
            } else {
                FsError::Io(e)
            }
        })?;
        Ok(FileMeta {
            size: meta.len(),
            blocks: meta.blocks(),
            mtime_sec: meta.mtime(),
            mtime_nsec: meta.mtime_nsec(),
            mode: meta.mode(),
            is_regular: meta.is_file(),
        })
    }

    fn record(&self) -> FsResult<FileRecord> {
        self.fs
            .load_record(self.uid.fsid, self.uid.ino)?
            .ok_or_else(|| FsError::NotFound(format!("file identity {}", self.uid)))
    }

    fn update_record(&self, f: impl FnOnce(&mut FileRecord)) -> FsResult<()> {
        let mut record = self.record()?;
        f(&mut record);
        self.fs.store_record(self.uid.fsid, self.uid.ino, &record)
    }

    /// Current residency state from the region map.
    pub fn migration_state(&self) -> FsResult<FileState> {
        Ok(self.record()?.state)
    }

    /// Read the tape attribute. Returns the default (empty) attribute when
    /// none is set; a type-tag mismatch is `CorruptAttr`.
    pub fn get_attr(&self) -> FsResult<TapeAttr> {
        match self.record()?.attr {
            None => Ok(TapeAttr::default()),
            Some(bytes) => {
                TapeAttr::from_bytes(&bytes).map_err(|e| FsError::CorruptAttr(e.to_string()))
            }
        }
    }

    pub fn set_attr(&self, attr: &TapeAttr) -> FsResult<()> {
        let bytes = attr
            .to_bytes()
            .map_err(|e| FsError::Internal(e.to_string()))?;
        self.update_record(|r| r.attr = Some(bytes))
    }

    pub fn remove_attr(&self) -> FsResult<()> {
        self.update_record(|r| r.attr = None)
    }

    /// Read file data without generating data events.
    pub async fn read_invisible(&self, offset: u64, len: usize) -> FsResult<Vec<u8>> {
        let path = self.path.clone();
        let buf = tokio::task::spawn_blocking(move || -> std::io::Result<Vec<u8>> {
            use std::os::unix::fs::FileExt;
            let file = std::fs::File::open(&path)?;
            let mut buf = vec![0u8; len];
            let mut filled = 0;
            while filled < len {
                let n = file.read_at(&mut buf[filled..], offset + filled as u64)?;
                if n == 0 {
                    break;
                }
                filled += n;
            }
            buf.truncate(filled);
            Ok(buf)
        })
        .await
        .map_err(|e| FsError::Internal(format!("blocking read: {e}")))??;
        Ok(buf)
    }

    /// Write file data without generating data events. Returns the number of
    /// bytes written.
    pub async fn write_invisible(&self, offset: u64, data: Vec<u8>) -> FsResult<usize> {
        let path = self.path.clone();
        let len = data.len();
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            use std::os::unix::fs::FileExt;
            let file = std::fs::OpenOptions::new().write(true).open(&path)?;
            file.write_all_at(&data, offset)
        })
        .await
        .map_err(|e| FsError::Internal(format!("blocking write: {e}")))??;
        Ok(len)
    }

    fn mark_state(&self, to: FileState) -> FsResult<()> {
        let record = self.record()?;
        if !record.state.can_transition_to(to) {
            return Err(FsError::InvalidTransition {
                from: record.state,
                to,
            });
        }
        self.update_record(|r| r.state = to)
    }

    /// Declare that regions `[0, inf)` now have a tape copy; subsequent
    /// write/truncate events on the file will fire.
    pub fn mark_premigrated(&self) -> FsResult<()> {
        self.mark_state(FileState::Premigrated)
    }

    /// Flag all regions off-line. Combined with `punch_hole` this completes
    /// the migration.
    pub fn mark_migrated(&self) -> FsResult<()> {
        self.mark_state(FileState::Migrated)
    }

    /// Drop all region flags.
    pub fn mark_resident(&self) -> FsResult<()> {
        self.mark_state(FileState::Resident)
    }

    /// Release the primary-storage blocks, keeping the logical size.
    /// Precondition: the file is premigrated and the tape copy is durable.
    pub fn punch_hole(&self) -> FsResult<()> {
        let state = self.migration_state()?;
        if state != FileState::Premigrated {
            return Err(FsError::InvalidTransition {
                from: state,
                to: FileState::Migrated,
            });
        }
        let size = self.stat()?.size;
        let file = std::fs::OpenOptions::new().write(true).open(&self.path)?;
        file.set_len(0)?;
        file.set_len(size)?;
        Ok(())
    }

    /// Acquire the advisory exclusive right on this file identity. Blocks
    /// while another handle holds it; nested acquires on this handle return
    /// immediately.
    pub async fn lock(&mut self) {
        if self.lock_depth > 0 {
            self.lock_depth += 1;
            return;
        }
        let guard = self.fs.acquire_lock(self.uid).await;
        self.guard = Some(guard);
        self.lock_depth = 1;
    }

    /// Release one level of the advisory lock. Unlocking without a matching
    /// lock is a programming error.
    pub fn unlock(&mut self) -> FsResult<()> {
        if self.lock_depth == 0 {
            return Err(FsError::LockViolation(format!(
                "unlock without matching lock on {}",
                self.uid
            )));
        }
        self.lock_depth -= 1;
        if self.lock_depth == 0 {
            self.guard = None;
            self.fs.release_lock_entry(self.uid);
        }
        Ok(())
    }
}
