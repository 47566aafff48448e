//! The authoritative drive and cartridge inventory.

use crate::error::{TapeError, TapeResult};
use crate::library::LibraryControl;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Observable state of a cartridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CartridgeState {
    /// No longer reported by the library.
    Unknown,
    Unmounted,
    /// The robot is moving the cartridge; transient between the others.
    Moving,
    Mounted,
    /// Mounted and claimed by a request.
    InUse,
    Error,
}

impl CartridgeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CartridgeState::Unknown => "unknown",
            CartridgeState::Unmounted => "unmounted",
            CartridgeState::Moving => "moving",
            CartridgeState::Mounted => "mounted",
            CartridgeState::InUse => "in_use",
            CartridgeState::Error => "error",
        }
    }
}

impl std::fmt::Display for CartridgeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One drive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Drive {
    pub id: String,
    pub slot: u32,
    /// Set while the robot moves a cartridge into or out of this drive.
    pub busy: bool,
    pub mounted_tape: Option<String>,
}

/// One cartridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cartridge {
    pub id: String,
    pub slot: u32,
    pub state: CartridgeState,
    pub drive_id: Option<String>,
}

struct Inner {
    drives: Vec<Drive>,
    cartridges: Vec<Cartridge>,
}

impl Inner {
    fn cartridge_mut(&mut self, tape_id: &str) -> TapeResult<&mut Cartridge> {
        self.cartridges
            .iter_mut()
            .find(|c| c.id == tape_id)
            .ok_or_else(|| TapeError::NotFound(format!("cartridge {tape_id}")))
    }

    fn drive_mut(&mut self, drive_id: &str) -> TapeResult<&mut Drive> {
        self.drives
            .iter_mut()
            .find(|d| d.id == drive_id)
            .ok_or_else(|| TapeError::NotFound(format!("drive {drive_id}")))
    }
}

/// Authoritative collection of drives and cartridges. Only the inventory
/// mutates their states; the mutex is never held across a physical library
/// call.
pub struct Inventory {
    library: Arc<dyn LibraryControl>,
    inner: Mutex<Inner>,
}

impl Inventory {
    /// Enumerate the library and build the inventory. A library without
    /// drives or without cartridges is unusable.
    pub async fn new(library: Arc<dyn LibraryControl>) -> TapeResult<Self> {
        let drive_infos = library.inventory_drives().await?;
        if drive_infos.is_empty() {
            return Err(TapeError::Internal("library reports no drives".into()));
        }
        let cartridge_infos = library.inventory_cartridges().await?;
        if cartridge_infos.is_empty() {
            return Err(TapeError::Internal("library reports no cartridges".into()));
        }

        let drives = drive_infos
            .into_iter()
            .map(|d| {
                tracing::info!(drive_id = %d.id, slot = d.slot, "Drive found");
                Drive {
                    id: d.id,
                    slot: d.slot,
                    busy: false,
                    mounted_tape: None,
                }
            })
            .collect();
        let cartridges = cartridge_infos
            .into_iter()
            .map(|c| {
                tracing::info!(tape_id = %c.id, slot = c.slot, "Cartridge found");
                Cartridge {
                    id: c.id,
                    slot: c.slot,
                    state: CartridgeState::Unmounted,
                    drive_id: None,
                }
            })
            .collect();

        Ok(Self {
            library,
            inner: Mutex::new(Inner { drives, cartridges }),
        })
    }

    pub fn library(&self) -> &Arc<dyn LibraryControl> {
        &self.library
    }

    /// Snapshot of all drives.
    pub fn drives(&self) -> Vec<Drive> {
        self.inner.lock().expect("inventory mutex poisoned").drives.clone()
    }

    /// Snapshot of all cartridges.
    pub fn cartridges(&self) -> Vec<Cartridge> {
        self.inner
            .lock()
            .expect("inventory mutex poisoned")
            .cartridges
            .clone()
    }

    /// Snapshot of one cartridge.
    pub fn cartridge(&self, tape_id: &str) -> Option<Cartridge> {
        self.inner
            .lock()
            .expect("inventory mutex poisoned")
            .cartridges
            .iter()
            .find(|c| c.id == tape_id)
            .cloned()
    }

    /// Mount a cartridge into a drive.
    ///
    /// Validates that the cartridge is unmounted and the drive free, flags
    /// the transient `Moving` state, performs the physical mount outside the
    /// lock, then publishes the result. On failure both states roll back.
    pub async fn mount(&self, drive_id: &str, tape_id: &str) -> TapeResult<()> {
        {
            let mut inner = self.inner.lock().expect("inventory mutex poisoned");

            let cartridge_state = inner.cartridge_mut(tape_id)?.state;
            if cartridge_state != CartridgeState::Unmounted {
                return Err(TapeError::InvalidState(format!(
                    "cartridge {tape_id} is {cartridge_state}, expected unmounted"
                )));
            }
            {
                let drive = inner.drive_mut(drive_id)?;
                if drive.busy || drive.mounted_tape.is_some() {
                    return Err(TapeError::InvalidState(format!(
                        "drive {drive_id} is not free"
                    )));
                }
                drive.busy = true;
            }
            inner.cartridge_mut(tape_id)?.state = CartridgeState::Moving;
        }

        let result = self.library.mount(drive_id, tape_id).await;

        let mut inner = self.inner.lock().expect("inventory mutex poisoned");
        match result {
            Ok(()) => {
                let cartridge = inner.cartridge_mut(tape_id)?;
                cartridge.state = CartridgeState::Mounted;
                cartridge.drive_id = Some(drive_id.to_string());
                let drive = inner.drive_mut(drive_id)?;
                drive.busy = false;
                drive.mounted_tape = Some(tape_id.to_string());
                tracing::info!(tape_id, drive_id, "Mount complete");
                Ok(())
            }
            Err(e) => {
                inner.cartridge_mut(tape_id)?.state = CartridgeState::Unmounted;
                inner.drive_mut(drive_id)?.busy = false;
                tracing::error!(tape_id, drive_id, error = %e, "Mount failed");
                Err(e)
            }
        }
    }

    /// Unmount a cartridge. Requires the cartridge mounted and idle.
    pub async fn unmount(&self, tape_id: &str) -> TapeResult<()> {
        let drive_id = {
            let mut inner = self.inner.lock().expect("inventory mutex poisoned");

            let (cartridge_state, drive_id) = {
                let cartridge = inner.cartridge_mut(tape_id)?;
                (cartridge.state, cartridge.drive_id.clone())
            };
            if cartridge_state != CartridgeState::Mounted {
                return Err(TapeError::InvalidState(format!(
                    "cartridge {tape_id} is {cartridge_state}, expected mounted"
                )));
            }
            let drive_id = drive_id.ok_or_else(|| {
                TapeError::Internal(format!("mounted cartridge {tape_id} has no drive"))
            })?;
            {
                let drive = inner.drive_mut(&drive_id)?;
                if drive.busy {
                    return Err(TapeError::InvalidState(format!(
                        "drive {drive_id} is busy"
                    )));
                }
                drive.busy = true;
            }
            inner.cartridge_mut(tape_id)?.state = CartridgeState::Moving;
            drive_id
        };

        let result = self.library.unmount(&drive_id, tape_id).await;

        let mut inner = self.inner.lock().expect("inventory mutex poisoned");
        match result {
            Ok(()) => {
                let cartridge = inner.cartridge_mut(tape_id)?;
                cartridge.state = CartridgeState::Unmounted;
                cartridge.drive_id = None;
                let drive = inner.drive_mut(&drive_id)?;
                drive.busy = false;
                drive.mounted_tape = None;
                tracing::info!(tape_id, drive_id = %drive_id, "Unmount complete");
                Ok(())
            }
            Err(e) => {
                inner.cartridge_mut(tape_id)?.state = CartridgeState::Mounted;
                inner.drive_mut(&drive_id)?.busy = false;
                tracing::error!(tape_id, drive_id = %drive_id, error = %e, "Unmount failed");
                Err(e)
            }
        }
    }

    /// Refresh library-side attributes of one cartridge after it reported
    /// busy.
    pub async fn update(&self, tape_id: &str) -> TapeResult<()> {
        let info = self.library.update(tape_id).await?;
        let mut inner = self.inner.lock().expect("inventory mutex poisoned");
        let cartridge = inner.cartridge_mut(tape_id)?;
        cartridge.slot = info.slot;
        Ok(())
    }

    /// Re-enumerate the library and reconcile. Cartridges that disappeared
    /// become `Unknown`; new ones join as `Unmounted`.
    pub async fn reinventorize(&self) -> TapeResult<()> {
        let infos = self.library.inventory_cartridges().await?;
        let mut inner = self.inner.lock().expect("inventory mutex poisoned");

        for cartridge in &mut inner.cartridges {
            match infos.iter().find(|i| i.id == cartridge.id) {
                Some(info) => cartridge.slot = info.slot,
                None => {
                    tracing::warn!(tape_id = %cartridge.id, "Cartridge disappeared from library");
                    cartridge.state = CartridgeState::Unknown;
                    cartridge.drive_id = None;
                }
            }
        }
        for info in infos {
            if !inner.cartridges.iter().any(|c| c.id == info.id) {
                tracing::info!(tape_id = %info.id, "New cartridge found");
                inner.cartridges.push(Cartridge {
                    id: info.id,
                    slot: info.slot,
                    state: CartridgeState::Unmounted,
                    drive_id: None,
                });
            }
        }
        Ok(())
    }

    /// Claim or release a mounted cartridge for request execution.
    pub fn set_in_use(&self, tape_id: &str, in_use: bool) -> TapeResult<()> {
        let mut inner = self.inner.lock().expect("inventory mutex poisoned");
        let cartridge = inner.cartridge_mut(tape_id)?;
        match (cartridge.state, in_use) {
            (CartridgeState::Mounted, true) => {
                cartridge.state = CartridgeState::InUse;
                Ok(())
            }
            (CartridgeState::InUse, false) => {
                cartridge.state = CartridgeState::Mounted;
                Ok(())
            }
            (state, _) => Err(TapeError::InvalidState(format!(
                "cartridge {tape_id} is {state}"
            ))),
        }
    }

    /// Drive currently holding the given tape.
    pub fn drive_holding(&self, tape_id: &str) -> Option<String> {
        self.inner
            .lock()
            .expect("inventory mutex poisoned")
            .drives
            .iter()
            .find(|d| d.mounted_tape.as_deref() == Some(tape_id))
            .map(|d| d.id.clone())
    }

    /// A drive with nothing mounted.
    pub fn free_drive(&self) -> Option<String> {
        self.inner
            .lock()
            .expect("inventory mutex poisoned")
            .drives
            .iter()
            .find(|d| !d.busy && d.mounted_tape.is_none())
            .map(|d| d.id.clone())
    }

    /// A drive whose mounted cartridge is idle and could be evicted.
    pub fn evictable_drive(&self) -> Option<(String, String)> {
        let inner = self.inner.lock().expect("inventory mutex poisoned");
        inner.drives.iter().find_map(|d| {
            let tape = d.mounted_tape.as_deref()?;
            if d.busy {
                return None;
            }
            let cartridge = inner.cartridges.iter().find(|c| c.id == tape)?;
            if cartridge.state == CartridgeState::Mounted {
                Some((d.id.clone(), tape.to_string()))
            } else {
                None
            }
        })
    }

    /// Wait out transient busy conditions on a tape: up to `retries` sleeps
    /// of `interval` between probes. When the tape stays busy, refresh its
    /// library attributes and fail with `Busy`.
    pub async fn wait_tape_ready(
        &self,
        tape_id: &str,
        retries: u32,
        interval: Duration,
    ) -> TapeResult<()> {
        for attempt in 0..=retries {
            if !self.library.is_busy(tape_id) {
                return Ok(());
            }
            tracing::debug!(tape_id, attempt, "Tape busy, retrying");
            if attempt < retries {
                tokio::time::sleep(interval).await;
            }
        }
        if let Err(e) = self.update(tape_id).await {
            tracing::warn!(tape_id, error = %e, "Cartridge refresh after busy failed");
        }
        Err(TapeError::Busy(format!("tape {tape_id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dir_library::DirLibrary;

    async fn setup(drives: u32, tapes: &[&str]) -> (tempfile::TempDir, Arc<DirLibrary>, Inventory) {
        let dir = tempfile::tempdir().unwrap();
        let lib = DirLibrary::new(dir.path().join("lib"), dir.path().join("mnt"), drives).unwrap();
        for tape in tapes {
            lib.add_cartridge(tape).unwrap();
        }
        let lib = Arc::new(lib);
        let inventory = Inventory::new(lib.clone()).await.unwrap();
        (dir, lib, inventory)
    }

    #[tokio::test]
    async fn mount_binds_cartridge_and_drive() {
        let (_dir, _lib, inventory) = setup(2, &["T1", "T2"]).await;

        inventory.mount("D00", "T1").await.unwrap();
        let cartridge = inventory.cartridge("T1").unwrap();
        assert_eq!(cartridge.state, CartridgeState::Mounted);
        assert_eq!(cartridge.drive_id.as_deref(), Some("D00"));
        assert_eq!(inventory.drive_holding("T1").as_deref(), Some("D00"));
        assert_eq!(inventory.free_drive().as_deref(), Some("D01"));

        // A mounted cartridge cannot mount again, nor can its drive take
        // another cartridge.
        assert!(matches!(
            inventory.mount("D01", "T1").await.unwrap_err(),
            TapeError::InvalidState(_)
        ));
        assert!(matches!(
            inventory.mount("D00", "T2").await.unwrap_err(),
            TapeError::InvalidState(_)
        ));
    }

    #[tokio::test]
    async fn mount_passes_through_moving() {
        let dir = tempfile::tempdir().unwrap();
        let lib = DirLibrary::new(dir.path().join("lib"), dir.path().join("mnt"), 1)
            .unwrap()
            .with_mount_delay(Duration::from_millis(100));
        lib.add_cartridge("T1").unwrap();
        let inventory = Arc::new(Inventory::new(Arc::new(lib)).await.unwrap());

        let mounting = {
            let inventory = inventory.clone();
            tokio::spawn(async move { inventory.mount("D00", "T1").await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(
            inventory.cartridge("T1").unwrap().state,
            CartridgeState::Moving
        );
        mounting.await.unwrap().unwrap();
        assert_eq!(
            inventory.cartridge("T1").unwrap().state,
            CartridgeState::Mounted
        );
    }

    #[tokio::test]
    async fn in_use_cartridge_cannot_unmount() {
        let (_dir, _lib, inventory) = setup(1, &["T1"]).await;
        inventory.mount("D00", "T1").await.unwrap();
        inventory.set_in_use("T1", true).unwrap();

        assert!(matches!(
            inventory.unmount("T1").await.unwrap_err(),
            TapeError::InvalidState(_)
        ));

        inventory.set_in_use("T1", false).unwrap();
        inventory.unmount("T1").await.unwrap();
        assert_eq!(
            inventory.cartridge("T1").unwrap().state,
            CartridgeState::Unmounted
        );
        assert_eq!(inventory.free_drive().as_deref(), Some("D00"));
    }

    #[tokio::test]
    async fn reinventorize_reconciles() {
        let (_dir, lib, inventory) = setup(1, &["T1", "T2"]).await;

        lib.remove_cartridge("T2").unwrap();
        lib.add_cartridge("T3").unwrap();
        inventory.reinventorize().await.unwrap();

        assert_eq!(
            inventory.cartridge("T2").unwrap().state,
            CartridgeState::Unknown
        );
        assert_eq!(
            inventory.cartridge("T3").unwrap().state,
            CartridgeState::Unmounted
        );
        assert_eq!(
            inventory.cartridge("T1").unwrap().state,
            CartridgeState::Unmounted
        );
    }

    #[tokio::test]
    async fn busy_retries_then_fails() {
        let (_dir, lib, inventory) = setup(1, &["T1"]).await;
        let interval = Duration::from_millis(1);

        // Busy exactly `retries` times: the last probe succeeds.
        lib.fail_busy("T1", 3);
        inventory.wait_tape_ready("T1", 3, interval).await.unwrap();

        // One more busy than retries: the operation fails.
        lib.fail_busy("T1", 4);
        assert!(matches!(
            inventory.wait_tape_ready("T1", 3, interval).await.unwrap_err(),
            TapeError::Busy(_)
        ));
    }

    #[tokio::test]
    async fn evictable_drive_skips_in_use_cartridges() {
        let (_dir, _lib, inventory) = setup(1, &["T1"]).await;
        inventory.mount("D00", "T1").await.unwrap();

        assert_eq!(
            inventory.evictable_drive(),
            Some(("D00".to_string(), "T1".to_string()))
        );
        inventory.set_in_use("T1", true).unwrap();
        assert_eq!(inventory.evictable_drive(), None);
    }
}
