//! Pipeline-state persistence: optimistic concurrency under a file lock.

use jiff::Timestamp;

use crate::model::PipelineState;

use super::{Result, StateLock, Storage, StorageError};

pub const STATE_FILE: &str = "pipeline-state.json";
pub const LOCK_FILE: &str = "pipeline-state.lock";

impl Storage {
    /// Loads the pipeline state. A missing file is a fresh `initial` state.
    pub fn load_state(&self) -> Result<PipelineState> {
        Ok(self.load_json(STATE_FILE)?.unwrap_or_default())
    }

    /// Saves `state` if the on-disk revision is still `expected_revision`.
    ///
    /// Takes the state lock for the check and the write. On success the
    /// written state carries `revision = expected_revision + 1` and is
    /// returned.
    pub fn save_state(
        &self,
        state: &PipelineState,
        expected_revision: u64,
    ) -> Result<PipelineState> {
        let lock = self.lock_state()?;
        self.save_state_locked(&lock, state, expected_revision)
    }

    /// [`Storage::save_state`] for a caller that already holds the lock.
    pub fn save_state_locked(
        &self,
        _lock: &StateLock,
        state: &PipelineState,
        expected_revision: u64,
    ) -> Result<PipelineState> {
        let found = self.load_state()?.revision;
        if found != expected_revision {
            tracing::warn!(
                expected = expected_revision,
                found,
                "pipeline state changed underneath us"
            );
            return Err(StorageError::ConcurrencyConflict {
                expected: expected_revision,
                found,
            });
        }

        let mut next = state.clone();
        next.revision = expected_revision + 1;
        next.updated_at = Some(Timestamp::now());
        self.save_json(STATE_FILE, &next)?;
        tracing::debug!(revision = next.revision, stage = %next.stage, "saved pipeline state");
        Ok(next)
    }

    /// Takes the state lock with the configured wait and staleness bounds.
    pub fn lock_state(&self) -> Result<StateLock> {
        StateLock::acquire(&self.root.join(LOCK_FILE), self.lock_wait, self.lock_stale)
    }
}
