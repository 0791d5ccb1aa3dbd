//! Build-run configuration.
//!
//! Options come from three layers, later layers winning: built-in
//! defaults, an optional `rafter.toml` in the build root's parent
//! directory, and `RAFTER_*` environment variables. The worker count
//! defaults to the machine's core count.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::Result;

/// Options for a build run.
///
/// # Examples
///
/// ```rust
/// use rafter::config::BuildConfig;
///
/// let config = BuildConfig::default();
/// assert_eq!(config.db_file, "rafter.db");
/// assert!(config.jobs >= 1);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Directory receiving build artifacts, the database, and the log.
    pub buildroot: PathBuf,
    /// Database filename, relative to the build root.
    pub db_file: String,
    /// Log filename, relative to the build root.
    pub log_file: String,
    /// Worker thread count for the scheduler.
    pub jobs: usize,
    /// Console verbosity; higher shows more.
    pub verbose: u8,
    /// Disable colored console output.
    pub nocolor: bool,
    /// Prefix console lines with the emitting worker thread.
    pub show_threads: bool,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            buildroot: PathBuf::from("build"),
            db_file: "rafter.db".to_string(),
            log_file: "rafter.log".to_string(),
            jobs: num_cpus::get().max(1),
            verbose: 0,
            nocolor: false,
            show_threads: false,
        }
    }
}

impl BuildConfig {
    /// Load configuration for a project rooted at `project_dir`.
    ///
    /// Reads `<project_dir>/rafter.toml` when present, then applies
    /// `RAFTER_*` environment overrides (`RAFTER_JOBS=1`,
    /// `RAFTER_NOCOLOR=true`, ...).
    pub fn load(project_dir: &Path) -> Result<Self> {
        let defaults = Self::default();
        let settings = config::Config::builder()
            .set_default("buildroot", defaults.buildroot.to_string_lossy().as_ref())?
            .set_default("db_file", defaults.db_file.as_str())?
            .set_default("log_file", defaults.log_file.as_str())?
            .set_default("jobs", defaults.jobs as i64)?
            .set_default("verbose", defaults.verbose as i64)?
            .set_default("nocolor", defaults.nocolor)?
            .set_default("show_threads", defaults.show_threads)?
            .add_source(
                config::File::from(project_dir.join("rafter.toml")).required(false),
            )
            .add_source(config::Environment::with_prefix("RAFTER"))
            .build()?;
        let mut loaded: Self = settings.try_deserialize()?;
        loaded.jobs = loaded.jobs.max(1);
        Ok(loaded)
    }

    /// Absolute-ish path of the database file.
    pub fn db_path(&self) -> PathBuf {
        self.buildroot.join(&self.db_file)
    }

    /// Absolute-ish path of the log file.
    pub fn log_path(&self) -> PathBuf {
        self.buildroot.join(&self.log_file)
    }
}
