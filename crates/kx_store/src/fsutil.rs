//! Crash-safe file replacement for the JSON-backed stores.

use std::fs;
use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;

use crate::error::StoreError;

/// Write `bytes` to a staging file beside `dest`, fsync, then rename over it.
/// Readers see either the old or the new document, never a torn one.
pub fn write_atomic(dest: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let parent = match dest.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;

    let mut staging = NamedTempFile::new_in(parent)?;
    staging.write_all(bytes)?;
    staging.as_file().sync_all()?;
    staging.persist(dest).map_err(|e| StoreError::Io(e.error))?;
    fsync_dir(parent);
    Ok(())
}

/// Read a whole file, treating a missing file as `None`.
pub fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, StoreError> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn fsync_dir(path: &Path) {
    #[cfg(unix)]
    {
        match fs::File::open(path) {
            Ok(dir) => {
                if let Err(e) = dir.sync_all() {
                    tracing::warn!(path = %path.display(), "directory fsync failed: {e}");
                }
            }
            Err(e) => tracing::warn!(path = %path.display(), "cannot open directory for fsync: {e}"),
        }
    }
    #[cfg(not(unix))]
    let _ = path;
}
