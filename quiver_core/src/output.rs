use chrono::Local;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Prefix shared by every per-run output directory.
pub const RUN_DIR_PREFIX: &str = "fuzzing_results_";
/// Name of the failure file inside a run directory.
pub const FAILURE_FILE_NAME: &str = "failures.json";

/// Directory holding the artifacts of one campaign run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputDir {
    path: PathBuf,
}

impl OutputDir {
    /// Creates `<base_dir>/fuzzing_results_<YYYYmmdd_HHMMSS>` for a run starting now.
    pub fn init(base_dir: &Path) -> io::Result<Self> {
        let stamp = Local::now().format("%Y%m%d_%H%M%S");
        Self::at(base_dir.join(format!("{RUN_DIR_PREFIX}{stamp}")))
    }

    /// Uses `path` as the run directory, creating it if needed.
    pub fn at(path: PathBuf) -> io::Result<Self> {
        fs::create_dir_all(&path)?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn failure_file(&self) -> PathBuf {
        self.path.join(FAILURE_FILE_NAME)
    }
}

/// Finds the most recent run directory under `base_dir`.
///
/// Timestamps sort lexically, so the greatest name is the latest run.
pub fn latest_run_dir(base_dir: &Path) -> io::Result<Option<PathBuf>> {
    let mut latest: Option<(String, PathBuf)> = None;
    for entry in fs::read_dir(base_dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.starts_with(RUN_DIR_PREFIX) || !entry.file_type()?.is_dir() {
            continue;
        }
        if latest.as_ref().is_none_or(|(best, _)| name > *best) {
            latest = Some((name, entry.path()));
        }
    }
    Ok(latest.map(|(_, path)| path))
}
