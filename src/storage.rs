//! Local persistence for the pipeline.
//!
//! Everything lives under the state directory of one working directory:
//!
//! ```text
//! <dir>/.waymark/
//!   pipeline-state.json     # PipelineState, written atomically under the lock
//!   pipeline-state.lock     # present only while a mutation runs
//!   analysis.json           # analysis snapshot
//!   plan.json               # IR programs + table/KB versions
//!   results/<id>.json       # ExecutionResult per Journey
//!   sessions/<id>.json      # RefinementSession per artifact
//!   evidence/<id>/<n>.log.zst
//!   learning-events.jsonl   # append-only reports to the knowledge base
//!   cancel                  # refine cancellation marker
//! ```
//!
//! Every JSON file is replaced atomically; see [`write_atomic`].

mod artifacts;
mod atomic;
mod lock;
mod session;
mod state;

use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{fs, io};

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::config::StateConfig;
use crate::journey::file_stem;

pub use artifacts::{ANALYSIS_FILE, PLAN_FILE};
pub use atomic::write_atomic;
pub use lock::StateLock;
pub use state::STATE_FILE;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Someone else saved first. Reload and retry.
    #[error("concurrent modification: expected revision {expected}, found {found}")]
    ConcurrencyConflict { expected: u64, found: u64 },

    #[error("timed out after {waited_ms}ms waiting for lock {path}")]
    LockTimeout { path: PathBuf, waited_ms: u64 },

    #[error("corrupt file {path}: {message}")]
    Corrupt { path: PathBuf, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StorageError {
    /// Conflicts and lock timeouts clear up on their own.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConcurrencyConflict { .. } | Self::LockTimeout { .. }
        )
    }
}

pub type Result<T> = core::result::Result<T, StorageError>;

/// File-based storage rooted at a state directory.
pub struct Storage {
    root: PathBuf,
    history_limit: usize,
    lock_wait: Duration,
    lock_stale: Duration,
}

impl Storage {
    /// Opens storage rooted at `root`, creating the directory if needed.
    pub fn open(root: impl Into<PathBuf>, settings: &StateConfig) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            history_limit: settings.history_limit,
            lock_wait: Duration::from_millis(settings.lock_wait_ms),
            lock_stale: Duration::from_secs(settings.lock_stale_secs),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn history_limit(&self) -> usize {
        self.history_limit
    }

    /// Serializes `value` as pretty JSON to `relative`, atomically.
    fn save_json<T: Serialize>(&self, relative: impl AsRef<Path>, value: &T) -> Result<()> {
        let mut json = serde_json::to_string_pretty(value)?;
        json.push('\n');
        write_atomic(&self.root.join(relative), json.as_bytes())?;
        Ok(())
    }

    /// Loads JSON from `relative`. A missing file is `None`.
    fn load_json<T: DeserializeOwned>(&self, relative: impl AsRef<Path>) -> Result<Option<T>> {
        let path = self.root.join(relative);
        let Some(bytes) = atomic::read_recovering(&path)? else {
            return Ok(None);
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| StorageError::Corrupt {
                path,
                message: e.to_string(),
            })
    }
}
