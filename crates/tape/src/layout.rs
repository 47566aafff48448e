//! On-tape data layout.
//!
//! Under `<mount>/<tape_id>/` a cartridge carries a `data/` directory with
//! one file per managed file, plus a mirror of the primary namespace made of
//! relative symlinks into `data/`.

use crate::error::TapeResult;
use coldstore_core::{FileUid, TAPE_DATA_DIR};
use std::path::{Path, PathBuf};

/// Root of a mounted cartridge.
pub fn tape_dir(mount_point: &Path, tape_id: &str) -> PathBuf {
    mount_point.join(tape_id)
}

/// The cartridge's data directory.
pub fn data_dir(mount_point: &Path, tape_id: &str) -> PathBuf {
    tape_dir(mount_point, tape_id).join(TAPE_DATA_DIR)
}

/// Path of one managed file's data on the cartridge.
pub fn data_file(mount_point: &Path, tape_id: &str, uid: &FileUid) -> PathBuf {
    data_dir(mount_point, tape_id).join(uid.tape_file_name())
}

/// Create the cartridge's data directory if missing.
pub fn create_data_dir(mount_point: &Path, tape_id: &str) -> TapeResult<()> {
    std::fs::create_dir_all(data_dir(mount_point, tape_id))?;
    Ok(())
}

/// Mirror the primary path of a file as a relative symlink into `data/`,
/// replacing any stale link.
pub fn create_mirror_link(
    mount_point: &Path,
    tape_id: &str,
    orig_path: &Path,
    uid: &FileUid,
) -> TapeResult<()> {
    let tape_root = tape_dir(mount_point, tape_id);
    let rel_orig = orig_path.strip_prefix("/").unwrap_or(orig_path);
    let link_path = tape_root.join(rel_orig);

    if let Some(parent) = link_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // One ".." per directory level between the link and the tape root.
    let depth = link_path
        .strip_prefix(&tape_root)
        .map(|p| p.components().count())
        .unwrap_or(1)
        .saturating_sub(1);
    let mut target = PathBuf::new();
    for _ in 0..depth {
        target.push("..");
    }
    target.push(TAPE_DATA_DIR);
    target.push(uid.tape_file_name());

    match std::fs::remove_file(&link_path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    std::os::unix::fs::symlink(&target, &link_path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mirror_link_resolves_to_data_file() {
        let dir = tempfile::tempdir().unwrap();
        let mount = dir.path();
        let uid = FileUid::new(1, 1, 42);

        create_data_dir(mount, "T1").unwrap();
        let data = data_file(mount, "T1", &uid);
        std::fs::write(&data, b"payload").unwrap();

        let orig = Path::new("/fs/projects/report.txt");
        create_mirror_link(mount, "T1", orig, &uid).unwrap();

        let link = tape_dir(mount, "T1").join("fs/projects/report.txt");
        assert_eq!(std::fs::read(&link).unwrap(), b"payload");
        let target = std::fs::read_link(&link).unwrap();
        assert_eq!(target, PathBuf::from("../../data").join(uid.tape_file_name()));
    }

    #[test]
    fn mirror_link_replaces_stale_link() {
        let dir = tempfile::tempdir().unwrap();
        let mount = dir.path();
        let uid = FileUid::new(1, 1, 7);
        create_data_dir(mount, "T1").unwrap();
        std::fs::write(data_file(mount, "T1", &uid), b"new").unwrap();

        let orig = Path::new("/fs/file");
        create_mirror_link(mount, "T1", orig, &FileUid::new(1, 1, 9)).unwrap();
        create_mirror_link(mount, "T1", orig, &uid).unwrap();

        let link = tape_dir(mount, "T1").join("fs/file");
        assert_eq!(std::fs::read(&link).unwrap(), b"new");
    }
}
