//! Crash-safe file replacement.
//!
//! Write a uniquely named temp file next to the target, `sync_all`, then
//! rename it into place. Where rename-over-existing is not atomic the old
//! file is moved aside first, and readers recover from the aside copy if
//! a crash left no primary.

use std::ffi::OsString;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use uuid::Uuid;

/// Atomically replaces `path` with `bytes`, creating parent directories.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| io::Error::other(format!("{} has no parent", path.display())))?;
    fs::create_dir_all(dir)?;

    let tmp = sibling(path, &format!(".{}.tmp", Uuid::new_v4().simple()));
    let written = (|| {
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        replace(&tmp, path)
    })();
    if written.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    written
}

#[cfg(unix)]
fn replace(from: &Path, to: &Path) -> io::Result<()> {
    fs::rename(from, to)
}

#[cfg(not(unix))]
fn replace(from: &Path, to: &Path) -> io::Result<()> {
    let aside = aside_path(to);
    match fs::rename(to, &aside) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    fs::rename(from, to)?;
    match fs::remove_file(&aside) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Reads `path`, falling back to (and restoring) the aside copy left by
/// an interrupted replacement. A file that exists in neither place is `None`.
pub fn read_recovering(path: &Path) -> io::Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => return Ok(Some(bytes)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    let aside = aside_path(path);
    match fs::rename(&aside, path) {
        Ok(()) => {
            tracing::warn!(path = %path.display(), "recovered file from interrupted write");
            fs::read(path).map(Some)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

fn aside_path(path: &Path) -> PathBuf {
    sibling(path, ".old")
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::TempDir;

    #[test]
    fn writes_and_replaces() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("state.json");
        write_atomic(&path, b"one").unwrap();
        write_atomic(&path, b"two").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"two");

        // No temp files left behind.
        let leftovers: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .flatten()
            .filter(|e| e.file_name() != "state.json")
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn recovers_from_the_aside_copy() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        fs::write(aside_path(&path), b"previous").unwrap();

        assert_eq!(read_recovering(&path).unwrap().unwrap(), b"previous");
        assert!(path.exists());
        assert!(!aside_path(&path).exists());
    }

    #[test]
    fn missing_everywhere_is_none() {
        let dir = TempDir::new().unwrap();
        assert!(read_recovering(&dir.path().join("nope.json")).unwrap().is_none());
    }
}
