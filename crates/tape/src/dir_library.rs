//! Directory-backed tape library.
//!
//! Each subdirectory of the library root is one cartridge; mounting exposes
//! it as a symlink under the mount point, the way a tape filesystem would
//! appear once loaded. A configurable delay stands in for the robot, and
//! busy conditions can be injected per cartridge to exercise the retry
//! paths.

use crate::error::{TapeError, TapeResult};
use crate::library::{CartridgeInfo, DriveInfo, LibraryControl};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

/// Directory-backed library.
pub struct DirLibrary {
    root: PathBuf,
    mount_point: PathBuf,
    drive_count: u32,
    mount_delay: Duration,
    busy: Mutex<HashMap<String, u32>>,
}

impl DirLibrary {
    /// Open a library rooted at `root`, mounting cartridges under
    /// `mount_point`, with `drives` simulated drives.
    pub fn new(
        root: impl AsRef<Path>,
        mount_point: impl AsRef<Path>,
        drives: u32,
    ) -> TapeResult<Self> {
        let root = root.as_ref().to_path_buf();
        let mount_point = mount_point.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        std::fs::create_dir_all(&mount_point)?;
        Ok(Self {
            root,
            mount_point,
            drive_count: drives,
            mount_delay: Duration::from_millis(20),
            busy: Mutex::new(HashMap::new()),
        })
    }

    /// Override the simulated robot delay.
    pub fn with_mount_delay(mut self, delay: Duration) -> Self {
        self.mount_delay = delay;
        self
    }

    /// Add a cartridge to the library.
    pub fn add_cartridge(&self, tape_id: &str) -> TapeResult<()> {
        std::fs::create_dir_all(self.root.join(tape_id))?;
        Ok(())
    }

    /// Remove a cartridge from the library.
    pub fn remove_cartridge(&self, tape_id: &str) -> TapeResult<()> {
        std::fs::remove_dir_all(self.root.join(tape_id))?;
        Ok(())
    }

    /// Make the next `count` busy probes against `tape_id` report busy.
    pub fn fail_busy(&self, tape_id: &str, count: u32) {
        self.busy
            .lock()
            .expect("busy map poisoned")
            .insert(tape_id.to_string(), count);
    }

    fn cartridge_dir(&self, tape_id: &str) -> TapeResult<PathBuf> {
        let dir = self.root.join(tape_id);
        if !dir.is_dir() {
            return Err(TapeError::NotFound(format!("cartridge {tape_id}")));
        }
        Ok(dir)
    }

    fn mount_path(&self, tape_id: &str) -> PathBuf {
        self.mount_point.join(tape_id)
    }
}

#[async_trait]
impl LibraryControl for DirLibrary {
    async fn inventory_drives(&self) -> TapeResult<Vec<DriveInfo>> {
        Ok((0..self.drive_count)
            .map(|slot| DriveInfo {
                id: format!("D{slot:02}"),
                slot,
            })
            .collect())
    }

    async fn inventory_cartridges(&self) -> TapeResult<Vec<CartridgeInfo>> {
        let mut names: Vec<String> = std::fs::read_dir(&self.root)?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        Ok(names
            .into_iter()
            .enumerate()
            .map(|(slot, id)| CartridgeInfo {
                id,
                slot: slot as u32,
            })
            .collect())
    }

    async fn mount(&self, drive_id: &str, tape_id: &str) -> TapeResult<()> {
        let cartridge = self.cartridge_dir(tape_id)?;
        tokio::time::sleep(self.mount_delay).await;

        let target = self.mount_path(tape_id);
        match std::fs::symlink_metadata(&target) {
            Ok(_) => {
                return Err(TapeError::InvalidState(format!(
                    "cartridge {tape_id} is already mounted"
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        std::os::unix::fs::symlink(&cartridge, &target)?;
        tracing::debug!(tape_id, drive_id, "Cartridge mounted");
        Ok(())
    }

    async fn unmount(&self, drive_id: &str, tape_id: &str) -> TapeResult<()> {
        tokio::time::sleep(self.mount_delay).await;
        let target = self.mount_path(tape_id);
        std::fs::remove_file(&target)
            .map_err(|e| TapeError::Internal(format!("unmount {tape_id}: {e}")))?;
        tracing::debug!(tape_id, drive_id, "Cartridge unmounted");
        Ok(())
    }

    async fn update(&self, tape_id: &str) -> TapeResult<CartridgeInfo> {
        let cartridges = self.inventory_cartridges().await?;
        cartridges
            .into_iter()
            .find(|c| c.id == tape_id)
            .ok_or_else(|| TapeError::NotFound(format!("cartridge {tape_id}")))
    }

    fn is_busy(&self, tape_id: &str) -> bool {
        let mut busy = self.busy.lock().expect("busy map poisoned");
        match busy.get_mut(tape_id) {
            Some(count) if *count > 0 => {
                *count -= 1;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn enumerates_drives_and_cartridges() {
        let dir = tempfile::tempdir().unwrap();
        let lib = DirLibrary::new(dir.path().join("lib"), dir.path().join("mnt"), 3).unwrap();
        lib.add_cartridge("T2").unwrap();
        lib.add_cartridge("T1").unwrap();

        let drives = lib.inventory_drives().await.unwrap();
        assert_eq!(drives.len(), 3);
        assert_eq!(drives[0].id, "D00");

        let cartridges = lib.inventory_cartridges().await.unwrap();
        let ids: Vec<&str> = cartridges.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["T1", "T2"]);
    }

    #[tokio::test]
    async fn mount_exposes_cartridge_under_mount_point() {
        let dir = tempfile::tempdir().unwrap();
        let mnt = dir.path().join("mnt");
        let lib = DirLibrary::new(dir.path().join("lib"), &mnt, 1).unwrap();
        lib.add_cartridge("T1").unwrap();

        lib.mount("D00", "T1").await.unwrap();
        assert!(mnt.join("T1").is_dir());
        assert!(matches!(
            lib.mount("D00", "T1").await.unwrap_err(),
            TapeError::InvalidState(_)
        ));

        lib.unmount("D00", "T1").await.unwrap();
        assert!(!mnt.join("T1").exists());
    }

    #[tokio::test]
    async fn busy_injection_is_consumed_per_probe() {
        let dir = tempfile::tempdir().unwrap();
        let lib = DirLibrary::new(dir.path().join("lib"), dir.path().join("mnt"), 1).unwrap();
        lib.add_cartridge("T1").unwrap();

        lib.fail_busy("T1", 2);
        assert!(lib.is_busy("T1"));
        assert!(lib.is_busy("T1"));
        assert!(!lib.is_busy("T1"));
    }
}
