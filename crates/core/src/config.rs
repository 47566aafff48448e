//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Trace verbosity; seeds the tracing env filter (e.g. "info", "debug").
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Size of the engine worker pool; caps concurrent migration/recall work.
    #[serde(default = "default_max_migration_threads")]
    pub max_migration_threads: usize,
    /// Base path under which cartridges are mounted.
    #[serde(default = "default_mount_point")]
    pub mount_point: PathBuf,
    /// Owner name registered for filesystem event dispositions.
    #[serde(default = "default_session_name")]
    pub dmapi_session_name: String,
    /// Directory holding the catalog database, lock file, key file, and
    /// client socket.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_migration_threads() -> usize {
    4
}

fn default_mount_point() -> PathBuf {
    PathBuf::from("/ltfs")
}

fn default_session_name() -> String {
    "coldstore".to_string()
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("/var/lib/coldstore")
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            max_migration_threads: default_max_migration_threads(),
            mount_point: default_mount_point(),
            dmapi_session_name: default_session_name(),
            state_dir: default_state_dir(),
        }
    }
}

impl ServerConfig {
    pub fn db_path(&self) -> PathBuf {
        self.state_dir.join("catalog.db")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.state_dir.join("coldstored.lock")
    }

    pub fn key_path(&self) -> PathBuf {
        self.state_dir.join("coldstored.key")
    }

    pub fn socket_path(&self) -> PathBuf {
        self.state_dir.join("coldstored.sock")
    }

    /// Validate configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_migration_threads == 0 {
            return Err("server.max_migration_threads must be at least 1".to_string());
        }
        if self.dmapi_session_name.is_empty() {
            return Err("server.dmapi_session_name must not be empty".to_string());
        }
        Ok(())
    }
}

/// Tape library backend configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LibraryConfig {
    /// Directory-backed library: each subdirectory of `path` is a cartridge,
    /// served by `drives` simulated drives.
    Directory {
        path: PathBuf,
        #[serde(default = "default_drive_count")]
        drives: u32,
    },
}

fn default_drive_count() -> u32 {
    2
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self::Directory {
            path: PathBuf::from("/var/lib/coldstore/library"),
            drives: default_drive_count(),
        }
    }
}

impl LibraryConfig {
    /// Validate library configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            LibraryConfig::Directory { drives, .. } => {
                if *drives == 0 {
                    return Err("library.drives must be at least 1".to_string());
                }
                Ok(())
            }
        }
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub library: LibraryConfig,
}

impl AppConfig {
    /// Configuration rooted in a scratch directory.
    ///
    /// **For testing only.**
    pub fn for_testing(base: &std::path::Path) -> Self {
        Self {
            server: ServerConfig {
                log_level: "debug".to_string(),
                max_migration_threads: 2,
                mount_point: base.join("ltfs"),
                dmapi_session_name: "coldstore-test".to_string(),
                state_dir: base.join("state"),
            },
            library: LibraryConfig::Directory {
                path: base.join("library"),
                drives: 2,
            },
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        self.server.validate()?;
        self.library.validate()?;
        Ok(())
    }
}
