//! Tape library control and the drive/cartridge inventory.
//!
//! [`LibraryControl`] is the contract to the physical library; the
//! directory-backed [`DirLibrary`] implements it for test and development
//! deployments. [`Inventory`] is the authoritative in-process view of drives
//! and cartridges and the only component that moves them between states.
//! The `layout` and `startblock` modules define how file data is arranged on
//! a mounted cartridge.

pub mod dir_library;
pub mod error;
pub mod inventory;
pub mod layout;
pub mod library;
pub mod startblock;

pub use dir_library::DirLibrary;
pub use error::{TapeError, TapeResult};
pub use inventory::{Cartridge, CartridgeState, Drive, Inventory};
pub use library::{CartridgeInfo, DriveInfo, LibraryControl};
