//! Atomic file replacement for the file backend
//!
//! 1. Write to a sibling `.tmp` file
//! 2. `sync_all()` it
//! 3. Rename over the destination
//!
//! A crash leaves either the old file or the new one, never a torn write.

use std::fs::{self, File};
use std::io;
use std::path::Path;

use tracing::debug;

/// Atomically replace `path` with whatever `write_fn` writes.
///
/// The parent directory must already exist.
pub fn atomic_write_with<P, F>(path: P, write_fn: F) -> io::Result<()>
where
    P: AsRef<Path>,
    F: FnOnce(&mut File) -> io::Result<()>,
{
    let path = path.as_ref();
    let temp_path = path.with_extension("tmp");

    let mut file = File::create(&temp_path)?;
    write_fn(&mut file)?;
    file.sync_all()?;

    fs::rename(&temp_path, path)
}

/// Remove `.tmp` files left behind by an interrupted write.
///
/// Returns how many were removed.
pub fn cleanup_temp_files<P: AsRef<Path>>(dir: P) -> io::Result<usize> {
    let dir = dir.as_ref();
    if !dir.exists() {
        return Ok(0);
    }

    let mut cleaned = 0;
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().map(|e| e == "tmp").unwrap_or(false) {
            fs::remove_file(&path)?;
            debug!(path = %path.display(), "removed stale temp file");
            cleaned += 1;
        }
    }

    Ok(cleaned)
}
