//! Refinement sessions and the learning-event log.

use std::path::{Path, PathBuf};

use crate::model::RefinementSession;

use super::{Result, Storage, file_stem};

pub(super) const SESSIONS_DIR: &str = "sessions";

const LEARNING_FILE: &str = "learning-events.jsonl";

impl Storage {
    /// Checkpoints a session. The latest session per Journey wins.
    pub fn save_session(&self, session: &RefinementSession) -> Result<()> {
        self.save_json(session_path(&session.journey_id), session)
    }

    pub fn load_session(&self, journey_id: &str) -> Result<Option<RefinementSession>> {
        self.load_json(session_path(journey_id))
    }

    /// All stored sessions, sorted by Journey id.
    pub fn load_sessions(&self) -> Result<Vec<RefinementSession>> {
        let mut sessions: Vec<RefinementSession> = self.load_dir(SESSIONS_DIR)?;
        sessions.sort_by(|a, b| a.journey_id.cmp(&b.journey_id));
        Ok(sessions)
    }

    /// Where learning events are appended.
    pub fn learning_events_path(&self) -> PathBuf {
        self.root.join(LEARNING_FILE)
    }
}

fn session_path(journey_id: &str) -> PathBuf {
    Path::new(SESSIONS_DIR).join(format!("{}.json", file_stem(journey_id)))
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::storage::tests::test_storage;

    #[test]
    fn latest_session_per_journey_wins() {
        let (_dir, storage) = test_storage();
        let first = RefinementSession::new("J", "boom".into(), "aaaa".into());
        let second = RefinementSession::new("J", "bang".into(), "bbbb".into());
        storage.save_session(&first).unwrap();
        storage.save_session(&second).unwrap();

        let loaded = storage.load_session("J").unwrap().unwrap();
        assert_eq!(loaded.id, second.id);
        assert_eq!(storage.load_sessions().unwrap().len(), 1);
    }
}
