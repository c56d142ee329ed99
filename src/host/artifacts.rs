//! Temporary file namespace shared by the host and the bridge
//!
//! Every artifact of a run lives in one directory under the `__seg__` prefix,
//! so a single glob sweep removes leftovers from crashed or cancelled runs.

use crate::error::{Result, SegmentError};
use std::path::{Path, PathBuf};

pub const ARTIFACT_PREFIX: &str = "__seg__";
const SELECTION_FILE: &str = "__seg__sel__.txt";
const MASK_STEM: &str = "__seg__mask__";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TempArtifacts {
    dir: PathBuf,
}

impl TempArtifacts {
    #[must_use]
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    /// Namespace in the system temp directory
    #[must_use]
    pub fn in_system_temp() -> Self {
        Self::new(std::env::temp_dir())
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn selection_file(&self) -> PathBuf {
        self.dir.join(SELECTION_FILE)
    }

    /// Stem the bridge appends `<index>.seg` to
    #[must_use]
    pub fn mask_stem(&self) -> String {
        self.dir.join(MASK_STEM).display().to_string()
    }

    /// Fresh, unique path for the exported input image
    #[must_use]
    pub fn input_image(&self) -> PathBuf {
        self.dir
            .join(format!("{ARTIFACT_PREFIX}{}.png", uuid::Uuid::new_v4().simple()))
    }

    /// Remove every file under the prefix; returns how many were removed
    pub fn sweep(&self) -> Result<usize> {
        let pattern = format!(
            "{}/{}*",
            glob::Pattern::escape(&self.dir.display().to_string()),
            ARTIFACT_PREFIX
        );
        let entries = glob::glob(&pattern)
            .map_err(|e| SegmentError::invalid_input(format!("invalid sweep pattern '{pattern}': {e}")))?;

        let mut removed = 0;
        for entry in entries {
            let path = match entry {
                Ok(path) => path,
                Err(e) => {
                    tracing::warn!(error = %e, "skipping unreadable artifact");
                    continue;
                },
            };
            if !path.is_file() {
                continue;
            }
            std::fs::remove_file(&path).map_err(|e| SegmentError::file_io_error("remove artifact", &path, e))?;
            removed += 1;
        }

        if removed > 0 {
            tracing::debug!(removed, dir = %self.dir.display(), "swept temporary artifacts");
        }
        Ok(removed)
    }
}

/// Sweeps the namespace when dropped
#[derive(Debug)]
pub struct SweepGuard<'a> {
    artifacts: &'a TempArtifacts,
}

impl<'a> SweepGuard<'a> {
    #[must_use]
    pub fn new(artifacts: &'a TempArtifacts) -> Self {
        Self { artifacts }
    }
}

impl Drop for SweepGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.artifacts.sweep() {
            tracing::warn!(error = %e, "failed to sweep temporary artifacts");
        }
    }
}
