//! Cross-process exclusive lock on the pipeline state.
//!
//! The lock is a JSON file created with `create_new`, so exactly one
//! process can hold it. Waiters poll until `wait` runs out. A lock older
//! than `stale` is reclaimed by renaming it aside; rename is atomic, so
//! only one reclaimer wins. A holder that expects to run longer than
//! `stale` renews a lease before each long step. Release happens on drop,
//! and only if the file still carries our token.

use std::ffi::OsString;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::thread;
use std::time::{Duration, Instant};

use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Result, StorageError, write_atomic};

const POLL: Duration = Duration::from_millis(20);

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LockRecord {
    pid: u32,
    token: Uuid,
    acquired_at_ms: i64,

    /// Set by `renew`: the holder is alive for this long past `acquired_at_ms`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    lease_ms: Option<i64>,
}

/// A held lock. Dropping it releases the lock.
#[derive(Debug)]
pub struct StateLock {
    path: PathBuf,
    token: Uuid,
}

impl StateLock {
    pub fn acquire(path: &Path, wait: Duration, stale: Duration) -> Result<Self> {
        let started = Instant::now();
        loop {
            match Self::try_create(path) {
                Ok(lock) => {
                    tracing::debug!(path = %path.display(), "acquired state lock");
                    return Ok(lock);
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
                Err(e) => return Err(e.into()),
            }

            if is_stale(path, stale) {
                reclaim(path);
                continue;
            }

            if started.elapsed() >= wait {
                tracing::warn!(path = %path.display(), "gave up waiting for state lock");
                return Err(StorageError::LockTimeout {
                    path: path.to_path_buf(),
                    waited_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
                });
            }
            thread::sleep(POLL);
        }
    }

    fn try_create(path: &Path) -> io::Result<Self> {
        let token = Uuid::new_v4();
        let record = LockRecord {
            pid: process::id(),
            token,
            acquired_at_ms: Timestamp::now().as_millisecond(),
            lease_ms: None,
        };
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)?;
        let json = serde_json::to_vec(&record).map_err(io::Error::other)?;
        file.write_all(&json)?;
        file.sync_all()?;
        Ok(Self {
            path: path.to_path_buf(),
            token,
        })
    }
}

impl StateLock {
    /// Marks the lock as alive for at least `lease` from now.
    ///
    /// A lock that was reclaimed underneath us is left alone.
    pub fn renew(&self, lease: Duration) -> Result<()> {
        match read_record(&self.path) {
            Some(mut record) if record.token == self.token => {
                record.acquired_at_ms = Timestamp::now().as_millisecond();
                record.lease_ms = Some(i64::try_from(lease.as_millis()).unwrap_or(i64::MAX));
                write_atomic(&self.path, &serde_json::to_vec(&record)?)?;
                Ok(())
            }
            _ => {
                tracing::warn!(path = %self.path.display(), "state lock was reclaimed while held");
                Ok(())
            }
        }
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        match read_record(&self.path) {
            Some(record) if record.token == self.token => {
                if let Err(e) = fs::remove_file(&self.path) {
                    tracing::warn!(path = %self.path.display(), error = %e, "failed to release state lock");
                }
            }
            _ => {
                tracing::warn!(path = %self.path.display(), "state lock was reclaimed while held");
            }
        }
    }
}

fn read_record(path: &Path) -> Option<LockRecord> {
    let bytes = fs::read(path).ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Age comes from the record; a half-written record falls back to mtime.
/// A renewed lease extends the threshold.
fn is_stale(path: &Path, stale: Duration) -> bool {
    let stale_ms = i64::try_from(stale.as_millis()).unwrap_or(i64::MAX);
    if let Some(record) = read_record(path) {
        let limit = record.lease_ms.map_or(stale_ms, |lease| lease.max(stale_ms));
        return Timestamp::now().as_millisecond() - record.acquired_at_ms > limit;
    }
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| modified.elapsed().ok())
        .is_some_and(|age| age > stale)
}

fn reclaim(path: &Path) {
    let mut name: OsString = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(format!(".stale-{}", Uuid::new_v4().simple()));
    let aside = path.with_file_name(name);
    if fs::rename(path, &aside).is_ok() {
        tracing::warn!(path = %path.display(), "reclaimed stale state lock");
        let _ = fs::remove_file(&aside);
    }
}
