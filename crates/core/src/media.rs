// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Media row: file locations and probe/source metadata for a job.
//!
//! Created empty alongside the job and filled incrementally by worker
//! metadata events. At most one per job; dies with it.

use crate::job::JobId;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Media metadata for a job. All fields except `job_id` start unset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Media {
    pub job_id: JobId,
    /// Set only after a successful download.
    pub video_path: Option<PathBuf>,
    pub audio_original_path: Option<PathBuf>,
    /// Set only after a successful dub.
    pub audio_dubbed_path: Option<PathBuf>,
    pub audio_mixed_path: Option<PathBuf>,
    pub temp_dir: Option<PathBuf>,
    pub duration_secs: Option<f64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fps: Option<f64>,
    pub video_codec: Option<String>,
    pub audio_codec: Option<String>,
    pub file_size: Option<u64>,
    pub source_id: Option<String>,
    pub title: Option<String>,
    pub uploader: Option<String>,
    pub upload_date: Option<String>,
    pub description: Option<String>,
    pub thumbnail_url: Option<String>,
}

impl Media {
    /// Empty media row for a freshly created job.
    pub fn empty(job_id: JobId) -> Self {
        Self {
            job_id,
            ..Self::default()
        }
    }
}

/// Partial update carried by a metadata event. Only set fields are applied.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_original_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_dubbed_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_mixed_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fps: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_codec: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_codec: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploader: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
}

macro_rules! apply_field {
    ($self:ident, $media:ident, $($field:ident),+ $(,)?) => {
        $(
            if let Some(v) = &$self.$field {
                $media.$field = Some(v.clone());
            }
        )+
    };
}

impl MediaPatch {
    /// Apply the set fields onto a media row, leaving the rest untouched.
    pub fn apply(&self, media: &mut Media) {
        apply_field!(
            self,
            media,
            video_path,
            audio_original_path,
            audio_dubbed_path,
            audio_mixed_path,
            temp_dir,
            duration_secs,
            width,
            height,
            fps,
            video_codec,
            audio_codec,
            file_size,
            source_id,
            title,
            uploader,
            upload_date,
            description,
            thumbnail_url,
        );
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

#[cfg(test)]
#[path = "media_tests.rs"]
mod tests;
