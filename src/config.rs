//! Waymark configuration.
//!
//! Layered, later layers win key by key:
//!
//! 1. built-in defaults
//! 2. the user file, `<config dir>/waymark/config.toml`
//! 3. the project file, `<dir>/.waymark/config.toml`
//!
//! Every layer is optional. Relative paths resolve against the working
//! directory passed to [`Config::load`].

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::matcher::{DEFAULT_CONFIDENCE_THRESHOLD, PolicyKind};

/// Name of the state directory inside a working directory.
pub const STATE_DIR: &str = ".waymark";

const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("invalid config at {path}: {message}")]
    Invalid { path: PathBuf, message: String },
}

/// Waymark configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct Config {
    /// Where Journeys are discovered.
    pub journeys_dir: PathBuf,

    /// Where generated tests are written.
    pub output_dir: PathBuf,

    /// Optional knowledge-base export. A missing file means an empty base.
    pub knowledge_base: PathBuf,

    pub confidence_threshold: f64,
    pub confidence_policy: PolicyKind,

    pub runner: RunnerConfig,
    pub healing: HealingConfig,
    pub state: StateConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            journeys_dir: PathBuf::from("journeys"),
            output_dir: PathBuf::from("tests/journeys"),
            knowledge_base: Path::new(STATE_DIR).join("kb-export.json"),
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            confidence_policy: PolicyKind::Raw,
            runner: RunnerConfig::default(),
            healing: HealingConfig::default(),
            state: StateConfig::default(),
        }
    }
}

/// How generated tests are executed.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct RunnerConfig {
    /// Program and leading arguments. The spec file is appended, then `args`.
    pub command: Vec<String>,
    pub args: Vec<String>,

    /// Hard limit per run. The process is killed when it expires.
    pub timeout_secs: u64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            command: vec!["npx".into(), "playwright".into(), "test".into()],
            args: vec!["--reporter=json".into()],
            timeout_secs: 300,
        }
    }
}

/// Bounds on the healing loop.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct HealingConfig {
    pub max_attempts: u32,

    /// Wall-clock budget for one session.
    pub time_budget_secs: u64,

    /// Cumulative runner time budget for one session.
    pub cost_budget_ms: u64,

    /// Ceiling for `increase-timeout`.
    pub max_timeout_ms: u64,
}

impl Default for HealingConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            time_budget_secs: 1800,
            cost_budget_ms: 900_000,
            max_timeout_ms: 60_000,
        }
    }
}

/// Pipeline-state persistence.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct StateConfig {
    pub history_limit: usize,

    /// A lock older than this is considered abandoned and reclaimed.
    pub lock_stale_secs: u64,

    /// How long to wait for the lock before giving up.
    pub lock_wait_ms: u64,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            history_limit: 100,
            lock_stale_secs: 30,
            lock_wait_ms: 5000,
        }
    }
}

impl Config {
    /// Load the layered config for a working directory.
    pub fn load(dir: &Path) -> Result<Self, ConfigError> {
        let user = Self::user_path();
        let project = Self::project_path(dir);
        let mut config = Self::load_layers(user.as_deref(), &project)?;
        config.resolve_paths(dir);
        Ok(config)
    }

    /// The user config file: `<config dir>/waymark/config.toml`.
    pub fn user_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("waymark").join(CONFIG_FILE))
    }

    /// The project config file: `<dir>/.waymark/config.toml`.
    pub fn project_path(dir: &Path) -> PathBuf {
        dir.join(STATE_DIR).join(CONFIG_FILE)
    }

    /// Merge the given files over the defaults. Missing files are skipped.
    ///
    /// Each layer is validated as it lands, so an error names the file
    /// that introduced the bad value.
    fn load_layers(user: Option<&Path>, project: &Path) -> Result<Self, ConfigError> {
        let mut merged = toml::Table::new();
        let mut config = Self::default();

        for path in user.into_iter().chain([project]) {
            let contents = match fs::read_to_string(path) {
                Ok(s) => s,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(source) => {
                    return Err(ConfigError::Read {
                        path: path.to_path_buf(),
                        source,
                    });
                }
            };
            let invalid = |message: String| ConfigError::Invalid {
                path: path.to_path_buf(),
                message,
            };

            let layer: toml::Table = toml::from_str(&contents).map_err(|e| invalid(e.to_string()))?;
            merge_tables(&mut merged, layer);

            config = toml::Value::Table(merged.clone())
                .try_into()
                .map_err(|e: toml::de::Error| invalid(e.to_string()))?;
            config.validate().map_err(invalid)?;
        }

        Ok(config)
    }

    fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(format!(
                "confidence-threshold must be within [0, 1], got {}",
                self.confidence_threshold
            ));
        }
        if self.runner.command.is_empty() || self.runner.command[0].trim().is_empty() {
            return Err("runner.command must name a program".into());
        }
        if self.runner.timeout_secs == 0 {
            return Err("runner.timeout-secs must be at least 1".into());
        }
        if self.healing.max_attempts == 0 {
            return Err("healing.max-attempts must be at least 1".into());
        }
        if self.state.history_limit == 0 {
            return Err("state.history-limit must be at least 1".into());
        }
        Ok(())
    }

    /// Defaults rooted at `dir`, ignoring every config file.
    #[cfg(test)]
    pub fn rooted(dir: &Path) -> Self {
        let mut config = Self::default();
        config.resolve_paths(dir);
        config
    }

    fn resolve_paths(&mut self, dir: &Path) {
        for path in [
            &mut self.journeys_dir,
            &mut self.output_dir,
            &mut self.knowledge_base,
        ] {
            if path.is_relative() {
                *path = dir.join(&*path);
            }
        }
    }
}

/// Deep-merge `overlay` into `base`: nested tables merge, everything
/// else is replaced.
fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn missing_files_give_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::load_layers(None, &dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.healing.max_attempts, 3);
        assert_eq!(config.state.history_limit, 100);
    }

    #[test]
    fn project_overrides_user_key_by_key() {
        let dir = TempDir::new().unwrap();
        let user = write(
            dir.path(),
            "user.toml",
            "confidence-threshold = 0.8\n[healing]\nmax-attempts = 5\ncost-budget-ms = 1000\n",
        );
        let project = write(dir.path(), "project.toml", "[healing]\nmax-attempts = 2\n");

        let config = Config::load_layers(Some(&user), &project).unwrap();
        assert!((config.confidence_threshold - 0.8).abs() < f64::EPSILON);
        assert_eq!(config.healing.max_attempts, 2);
        assert_eq!(config.healing.cost_budget_ms, 1000);
        assert_eq!(config.healing.time_budget_secs, 1800);
    }

    #[test]
    fn policy_is_kebab_case() {
        let dir = TempDir::new().unwrap();
        let project = write(
            dir.path(),
            "project.toml",
            "confidence-policy = \"recency-weighted\"\n",
        );
        let config = Config::load_layers(None, &project).unwrap();
        assert_eq!(config.confidence_policy, PolicyKind::RecencyWeighted);
    }

    #[test]
    fn invalid_values_name_the_file() {
        let dir = TempDir::new().unwrap();
        let cases = [
            "confidence-threshold = 1.5\n",
            "[healing]\nmax-attempts = 0\n",
            "[runner]\ncommand = []\n",
            "unknown-key = true\n",
        ];
        for contents in cases {
            let project = write(dir.path(), "project.toml", contents);
            let err = Config::load_layers(None, &project).unwrap_err();
            assert!(
                err.to_string().contains("project.toml"),
                "for {contents:?}: {err}"
            );
        }
    }

    #[test]
    fn relative_paths_resolve_against_the_working_directory() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join(STATE_DIR)).unwrap();
        write(
            &dir.path().join(STATE_DIR),
            CONFIG_FILE,
            "journeys-dir = \"specs\"\noutput-dir = \"/abs/out\"\n",
        );
        let mut config = Config::load_layers(None, &Config::project_path(dir.path())).unwrap();
        config.resolve_paths(dir.path());
        assert_eq!(config.journeys_dir, dir.path().join("specs"));
        assert_eq!(config.output_dir, PathBuf::from("/abs/out"));
        assert_eq!(
            config.knowledge_base,
            dir.path().join(STATE_DIR).join("kb-export.json")
        );
    }
}
