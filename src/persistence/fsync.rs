//! fsync helpers.
//!
//! A journal file that was just created is only durable once its directory
//! entry is synced as well, so opening a fresh journal syncs both.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::Path;

/// Syncs a file's contents and metadata to disk.
pub fn fsync_file(file: &File) -> io::Result<()> {
    file.sync_all()
}

/// Syncs a directory so newly created entries survive a power loss.
pub fn fsync_dir(dir_path: &Path) -> io::Result<()> {
    OpenOptions::new().read(true).open(dir_path)?.sync_all()
}

/// Creates the parent directory of `path` if needed and syncs it.
///
/// Returns whether the file at `path` already existed.
pub fn prepare_file(path: &Path) -> io::Result<bool> {
    let existed = path.exists();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
        if !existed {
            fsync_dir(parent)?;
        }
    }
    Ok(existed)
}
