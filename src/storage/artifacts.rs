//! Stage artifacts: analysis and plan snapshots, execution results,
//! runner evidence, and the cancellation marker.

use std::path::{Path, PathBuf};
use std::{fs, io};

use crate::model::{Analysis, ExecutionResult, Plan};

use super::{Result, Storage, file_stem, write_atomic};

pub const ANALYSIS_FILE: &str = "analysis.json";
pub const PLAN_FILE: &str = "plan.json";
pub const CANCEL_FILE: &str = "cancel";

const RESULTS_DIR: &str = "results";
const EVIDENCE_DIR: &str = "evidence";

/// What `clean` removes. Config, the KB export, learning events, and the
/// pipeline state (reset in place, so its revision keeps counting) stay.
const GENERATED: &[&str] = &[
    ANALYSIS_FILE,
    PLAN_FILE,
    CANCEL_FILE,
    RESULTS_DIR,
    EVIDENCE_DIR,
    super::session::SESSIONS_DIR,
];

impl Storage {
    // ── Snapshots ──

    pub fn save_analysis(&self, analysis: &Analysis) -> Result<()> {
        self.save_json(ANALYSIS_FILE, analysis)
    }

    pub fn load_analysis(&self) -> Result<Option<Analysis>> {
        self.load_json(ANALYSIS_FILE)
    }

    pub fn save_plan(&self, plan: &Plan) -> Result<()> {
        self.save_json(PLAN_FILE, plan)
    }

    pub fn load_plan(&self) -> Result<Option<Plan>> {
        self.load_json(PLAN_FILE)
    }

    // ── Results ──

    /// Checkpoints one execution result.
    pub fn save_result(&self, result: &ExecutionResult) -> Result<()> {
        self.save_json(result_path(&result.journey_id), result)
    }

    pub fn load_result(&self, journey_id: &str) -> Result<Option<ExecutionResult>> {
        self.load_json(result_path(journey_id))
    }

    /// All stored results, sorted by Journey id.
    pub fn load_results(&self) -> Result<Vec<ExecutionResult>> {
        let mut results: Vec<ExecutionResult> = self.load_dir(RESULTS_DIR)?;
        results.sort_by(|a, b| a.journey_id.cmp(&b.journey_id));
        Ok(results)
    }

    // ── Evidence ──

    /// Stores compressed runner output for one run. Returns the path
    /// relative to the state directory.
    pub fn write_evidence(&self, journey_id: &str, run: u32, compressed: &[u8]) -> Result<PathBuf> {
        let relative = Path::new(EVIDENCE_DIR)
            .join(file_stem(journey_id))
            .join(format!("{run}.log.zst"));
        write_atomic(&self.root.join(&relative), compressed)?;
        Ok(relative)
    }

    /// Scratch directory for a run in progress.
    pub fn evidence_dir(&self, journey_id: &str) -> PathBuf {
        self.root.join(EVIDENCE_DIR).join(file_stem(journey_id))
    }

    /// Next free evidence number for a Journey, starting at 1.
    pub fn next_evidence_number(&self, journey_id: &str) -> Result<u32> {
        let entries = match fs::read_dir(self.evidence_dir(journey_id)) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(1),
            Err(e) => return Err(e.into()),
        };
        let mut highest = 0;
        for entry in entries {
            let name = entry?.file_name();
            if let Some(n) = name
                .to_str()
                .and_then(|n| n.strip_suffix(".log.zst"))
                .and_then(|n| n.parse::<u32>().ok())
            {
                highest = highest.max(n);
            }
        }
        Ok(highest + 1)
    }

    // ── Cancellation ──

    /// Drops the marker a running `refine` checks before each attempt.
    pub fn request_cancel(&self) -> Result<()> {
        write_atomic(&self.root.join(CANCEL_FILE), b"")?;
        Ok(())
    }

    pub fn cancel_requested(&self) -> bool {
        self.root.join(CANCEL_FILE).exists()
    }

    pub fn clear_cancel(&self) -> Result<()> {
        remove_if_exists(&self.root.join(CANCEL_FILE))
    }

    // ── Reset ──

    /// Removes every generated artifact.
    pub fn clean(&self) -> Result<()> {
        for name in GENERATED {
            let path = self.root.join(name);
            if path.is_dir() {
                fs::remove_dir_all(&path)?;
            } else {
                remove_if_exists(&path)?;
            }
        }
        Ok(())
    }

    /// Loads every `*.json` file in a subdirectory. A missing directory is empty.
    pub(super) fn load_dir<T: serde::de::DeserializeOwned>(&self, relative: &str) -> Result<Vec<T>> {
        let entries = match fs::read_dir(self.root.join(relative)) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut paths = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut items = Vec::with_capacity(paths.len());
        for path in paths {
            let relative = path.strip_prefix(&self.root).unwrap_or(&path).to_path_buf();
            if let Some(item) = self.load_json(relative)? {
                items.push(item);
            }
        }
        Ok(items)
    }
}

fn result_path(journey_id: &str) -> PathBuf {
    Path::new(RESULTS_DIR).join(format!("{}.json", file_stem(journey_id)))
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
