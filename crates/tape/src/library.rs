//! The tape library control contract.

use crate::error::TapeResult;
use async_trait::async_trait;

/// One drive as reported by the library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriveInfo {
    pub id: String,
    pub slot: u32,
}

/// One cartridge as reported by the library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartridgeInfo {
    pub id: String,
    pub slot: u32,
}

/// Control interface to the physical tape library.
///
/// Implementations perform the slow robot and filesystem work; all state
/// tracking stays in [`crate::Inventory`], which never calls these methods
/// while holding its own lock.
#[async_trait]
pub trait LibraryControl: Send + Sync {
    /// Enumerate drives.
    async fn inventory_drives(&self) -> TapeResult<Vec<DriveInfo>>;

    /// Enumerate cartridges.
    async fn inventory_cartridges(&self) -> TapeResult<Vec<CartridgeInfo>>;

    /// Physically mount a cartridge into a drive and expose its filesystem
    /// under the mount point.
    async fn mount(&self, drive_id: &str, tape_id: &str) -> TapeResult<()>;

    /// Physically unmount a cartridge from its drive.
    async fn unmount(&self, drive_id: &str, tape_id: &str) -> TapeResult<()>;

    /// Refresh library-side attributes of one cartridge.
    async fn update(&self, tape_id: &str) -> TapeResult<CartridgeInfo>;

    /// Probe whether the cartridge is momentarily busy for file operations.
    /// Each probe observes (and consumes) one busy condition.
    fn is_busy(&self, tape_id: &str) -> bool;
}
