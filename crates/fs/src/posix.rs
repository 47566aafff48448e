//! User-space implementation of the managed-filesystem contract.
//!
//! Each managed filesystem is a directory tree registered with
//! [`PosixFs::register_filesystem`]. Per-file bookkeeping (identity
//! generation, region state, the tape attribute) lives in a shadow directory
//! `.coldstore` under the filesystem root, which stands in for the
//! kernel-side region map and extended-attribute channel. Data events are
//! delivered through an in-process channel with the same answer-exactly-once
//! discipline the kernel interface has.

use crate::error::{FsError, FsResult};
use crate::events::{DataEvent, EventKind, EventResponse, EventToken, FileEvents};
use async_trait::async_trait;
use coldstore_core::{FileState, FileUid};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};

/// Name of the shadow directory holding per-file records.
const SHADOW_DIR: &str = ".coldstore";

/// Per-file bookkeeping record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct FileRecord {
    pub igen: u32,
    pub path: PathBuf,
    pub state: FileState,
    /// Raw attribute bytes; validated against the type tag on every read.
    pub attr: Option<Vec<u8>>,
}

struct Registry {
    roots: HashMap<u64, PathBuf>,
    dispositions: std::collections::HashSet<u64>,
}

/// The managed-filesystem session.
pub struct PosixFs {
    registry: Mutex<Registry>,
    /// Serializes shadow-record reads and writes.
    records: Mutex<()>,
    /// Advisory exclusive rights per file identity.
    locks: Mutex<HashMap<FileUid, Arc<tokio::sync::Mutex<()>>>>,
    events_tx: mpsc::UnboundedSender<DataEvent>,
    events_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<DataEvent>>,
    pending: Mutex<HashMap<EventToken, Option<oneshot::Sender<EventResponse>>>>,
}

impl PosixFs {
    pub fn new() -> Arc<Self> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            registry: Mutex::new(Registry {
                roots: HashMap::new(),
                dispositions: std::collections::HashSet::new(),
            }),
            records: Mutex::new(()),
            locks: Mutex::new(HashMap::new()),
            events_tx,
            events_rx: tokio::sync::Mutex::new(events_rx),
            pending: Mutex::new(HashMap::new()),
        })
    }

    /// Bring a filesystem under management and announce it on the event
    /// channel. Registering the same root again returns the existing id
    /// without a new mount event.
    pub fn register_filesystem(&self, root: impl AsRef<Path>) -> FsResult<u64> {
        let root = root
            .as_ref()
            .canonicalize()
            .map_err(|e| FsError::NotFound(format!("{}: {e}", root.as_ref().display())))?;
        let fsid = fsid_of(&root);

        {
            let mut registry = self.registry.lock().expect("registry mutex poisoned");
            if registry.roots.contains_key(&fsid) {
                return Ok(fsid);
            }
            std::fs::create_dir_all(root.join(SHADOW_DIR))?;
            registry.roots.insert(fsid, root.clone());
        }

        tracing::info!(fsid, root = %root.display(), "Filesystem registered");
        self.post_event(EventKind::Mount, None, fsid, Some(root), None);
        Ok(fsid)
    }

    /// Root directory of a managed filesystem.
    pub fn root_of(&self, fsid: u64) -> FsResult<PathBuf> {
        let registry = self.registry.lock().expect("registry mutex poisoned");
        registry
            .roots
            .get(&fsid)
            .cloned()
            .ok_or_else(|| FsError::NotManaged(format!("fsid {fsid}")))
    }

    /// The managed filesystem containing `path`, by longest matching root.
    pub fn filesystem_for_path(&self, path: &Path) -> FsResult<(u64, PathBuf)> {
        let registry = self.registry.lock().expect("registry mutex poisoned");
        registry
            .roots
            .iter()
            .filter(|(_, root)| path.starts_with(root))
            .max_by_key(|(_, root)| root.components().count())
            .map(|(fsid, root)| (*fsid, root.clone()))
            .ok_or_else(|| FsError::NotManaged(path.display().to_string()))
    }

    fn record_path(&self, fsid: u64, ino: u64) -> FsResult<PathBuf> {
        Ok(self.root_of(fsid)?.join(SHADOW_DIR).join(format!("{ino}.json")))
    }

    pub(crate) fn load_record(&self, fsid: u64, ino: u64) -> FsResult<Option<FileRecord>> {
        let path = self.record_path(fsid, ino)?;
        let _guard = self.records.lock().expect("record mutex poisoned");
        match std::fs::read(&path) {
            Ok(bytes) => {
                let record = serde_json::from_slice(&bytes)
                    .map_err(|e| FsError::Internal(format!("record {}: {e}", path.display())))?;
                Ok(Some(record))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub(crate) fn store_record(&self, fsid: u64, ino: u64, record: &FileRecord) -> FsResult<()> {
        let path = self.record_path(fsid, ino)?;
        let _guard = self.records.lock().expect("record mutex poisoned");
        let bytes = serde_json::to_vec(record)
            .map_err(|e| FsError::Internal(format!("record {}: {e}", path.display())))?;
        std::fs::write(&path, bytes)?;
        Ok(())
    }

    /// Overwrite the raw attribute bytes of a file, bypassing validation.
    ///
    /// This is the write side of the extended-attribute channel; readers
    /// always re-validate the type tag.
    pub fn write_raw_attr(&self, path: &Path, bytes: Vec<u8>) -> FsResult<()> {
        let path = path
            .canonicalize()
            .map_err(|e| FsError::NotFound(format!("{}: {e}", path.display())))?;
        let (fsid, _) = self.filesystem_for_path(&path)?;
        let ino = inode_of(&path)?;
        let mut record = self
            .load_record(fsid, ino)?
            .ok_or_else(|| FsError::NotFound(path.display().to_string()))?;
        record.attr = Some(bytes);
        self.store_record(fsid, ino, &record)
    }

    pub(crate) async fn acquire_lock(&self, uid: FileUid) -> tokio::sync::OwnedMutexGuard<()> {
        let entry = {
            let mut locks = self.locks.lock().expect("lock map poisoned");
            locks
                .entry(uid)
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        entry.lock_owned().await
    }

    pub(crate) fn release_lock_entry(&self, uid: FileUid) {
        let mut locks = self.locks.lock().expect("lock map poisoned");
        if let Some(entry) = locks.get(&uid) {
            // Only the map still references the mutex once all guards and
            // waiters are gone.
            if Arc::strong_count(entry) == 1 {
                locks.remove(&uid);
            }
        }
    }

    fn post_event(
        &self,
        kind: EventKind,
        uid: Option<FileUid>,
        fsid: u64,
        fs_root: Option<PathBuf>,
        waiter: Option<oneshot::Sender<EventResponse>>,
    ) -> EventToken {
        let token = EventToken::new();
        self.pending
            .lock()
            .expect("pending map poisoned")
            .insert(token, waiter);
        let event = DataEvent {
            kind,
            token,
            uid,
            fsid,
            fs_root,
        };
        // Receiver living shorter than the session only happens at shutdown;
        // the pending entry is then answered by nobody, which is fine.
        let _ = self.events_tx.send(event);
        token
    }

    /// Simulate an external access to `path`. If the file's region flags
    /// route this access to the event channel, the call blocks until the
    /// recall machinery answers; otherwise it returns `Continue` at once,
    /// like an unmanaged access would.
    pub async fn trigger_data_event(
        &self,
        path: &Path,
        kind: EventKind,
    ) -> FsResult<EventResponse> {
        let path = path
            .canonicalize()
            .map_err(|e| FsError::NotFound(format!("{}: {e}", path.display())))?;
        let (fsid, _) = self.filesystem_for_path(&path)?;
        let ino = inode_of(&path)?;
        let record = self.load_record(fsid, ino)?;

        let state = record
            .as_ref()
            .map(|r| r.state)
            .unwrap_or(FileState::Resident);
        let fires = {
            let registry = self.registry.lock().expect("registry mutex poisoned");
            registry.dispositions.contains(&fsid)
        } && match kind {
            EventKind::Read => state == FileState::Migrated,
            EventKind::Write | EventKind::Truncate => state != FileState::Resident,
            EventKind::Mount => false,
        };

        if !fires {
            return Ok(EventResponse::Continue);
        }

        let igen = record.map(|r| r.igen).unwrap_or(1);
        let uid = FileUid::new(fsid, igen, ino);
        let (tx, rx) = oneshot::channel();
        self.post_event(kind, Some(uid), fsid, None, Some(tx));
        rx.await
            .map_err(|_| FsError::Internal("event channel closed before response".into()))
    }
}

#[async_trait]
impl FileEvents for PosixFs {
    async fn next_event(&self) -> FsResult<DataEvent> {
        let mut rx = self.events_rx.lock().await;
        rx.recv()
            .await
            .ok_or_else(|| FsError::Internal("event channel closed".into()))
    }

    fn respond(&self, token: EventToken, response: EventResponse) -> FsResult<()> {
        let waiter = self
            .pending
            .lock()
            .expect("pending map poisoned")
            .remove(&token)
            .ok_or_else(|| {
                FsError::EventProtocol(format!("token {token} already answered or unknown"))
            })?;
        if let Some(tx) = waiter {
            // The triggering side may have given up waiting; the event is
            // still consumed.
            let _ = tx.send(response);
        }
        Ok(())
    }

    fn install_dispositions(&self, fsid: u64) -> FsResult<()> {
        let mut registry = self.registry.lock().expect("registry mutex poisoned");
        if !registry.roots.contains_key(&fsid) {
            return Err(FsError::NotManaged(format!("fsid {fsid}")));
        }
        registry.dispositions.insert(fsid);
        Ok(())
    }

    fn mounted_filesystems(&self) -> FsResult<Vec<u64>> {
        let registry = self.registry.lock().expect("registry mutex poisoned");
        Ok(registry.roots.keys().copied().collect())
    }
}

/// Stable filesystem id derived from the canonical root path.
fn fsid_of(root: &Path) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    root.hash(&mut hasher);
    hasher.finish()
}

pub(crate) fn inode_of(path: &Path) -> FsResult<u64> {
    use std::os::unix::fs::MetadataExt;
    let meta = std::fs::metadata(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            FsError::NotFound(path.display().to_string())
        } else {
            FsError::Io(e)
        }
    })?;
    Ok(meta.ino())
}
