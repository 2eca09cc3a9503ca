// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Media root layout and the atomic file lifecycle.
//!
//! Each job exclusively owns `{root}/incomplete/{id}/` while it runs;
//! finished outputs move atomically into `{root}/complete/`. The id
//! namespace is disjoint per job, so no locking is needed.

use rd_core::{JobId, Media};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

const INCOMPLETE_DIR: &str = "incomplete";
const COMPLETE_DIR: &str = "complete";
const COOKIES_FILE: &str = "cookies.txt";

/// Filesystem layout under the media root.
#[derive(Debug, Clone)]
pub struct MediaLayout {
    root: PathBuf,
}

impl MediaLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create `incomplete/` and `complete/` under the root.
    pub fn ensure_dirs(&self) -> io::Result<()> {
        fs::create_dir_all(self.root.join(INCOMPLETE_DIR))?;
        fs::create_dir_all(self.root.join(COMPLETE_DIR))?;
        Ok(())
    }

    /// The job's work-in-progress directory.
    pub fn incomplete_dir(&self, id: &JobId) -> PathBuf {
        self.root.join(INCOMPLETE_DIR).join(id.as_str())
    }

    pub fn create_incomplete_dir(&self, id: &JobId) -> io::Result<PathBuf> {
        let dir = self.incomplete_dir(id);
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Final output location: `complete/{id}.{container}`.
    pub fn final_path(&self, id: &JobId, container: &str) -> PathBuf {
        self.root
            .join(COMPLETE_DIR)
            .join(format!("{}.{}", id.as_str(), container))
    }

    pub fn cookies_path(&self, id: &JobId) -> PathBuf {
        self.incomplete_dir(id).join(COOKIES_FILE)
    }

    /// Write the creation request's cookies into the job's temp dir.
    pub fn write_cookies(&self, id: &JobId, contents: &str) -> io::Result<PathBuf> {
        self.create_incomplete_dir(id)?;
        let path = self.cookies_path(id);
        fs::write(&path, contents)?;
        Ok(path)
    }

    /// Atomically move a finished file into place. Rename is atomic because
    /// temp and final live on the same filesystem under the media root.
    pub fn finalize(&self, temp_file: &Path, final_path: &Path) -> io::Result<()> {
        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(temp_file, final_path)
    }

    /// Remove the job's temp dir and every output path recorded on its
    /// media row. Missing files are not an error — cleanup may run after a
    /// worker already moved or never produced them.
    pub fn cleanup(&self, media: &Media) -> io::Result<()> {
        for path in [
            media.video_path.as_deref(),
            media.audio_original_path.as_deref(),
            media.audio_dubbed_path.as_deref(),
            media.audio_mixed_path.as_deref(),
        ]
        .into_iter()
        .flatten()
        {
            match fs::remove_file(path) {
                Ok(()) => debug!(path = %path.display(), "removed output file"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
        }

        let temp = self.incomplete_dir(&media.job_id);
        match fs::remove_dir_all(&temp) {
            Ok(()) => debug!(path = %temp.display(), "removed temp dir"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "fs_layout_tests.rs"]
mod tests;
