// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Job entity and pipeline state machine.

use serde::{Deserialize, Serialize};
use std::fmt;

crate::define_id! {
    /// Unique identifier for a job.
    ///
    /// Minted by [`crate::MonotonicIdGen`], so ids sort lexicographically
    /// in creation order.
    #[derive(Default)]
    pub struct JobId;
}

/// Highest accepted job priority. Priorities range 0..=10; higher
/// dispatches earlier.
pub const MAX_PRIORITY: u8 = 10;

/// Pipeline state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Downloading,
    Downloaded,
    Dubbing,
    Dubbed,
    Muxing,
    Complete,
    Failed,
    Canceled,
}

impl JobState {
    /// Terminal states can only be exited through a retry/resume lineage.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Complete | JobState::Failed | JobState::Canceled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Downloading => "downloading",
            JobState::Downloaded => "downloaded",
            JobState::Dubbing => "dubbing",
            JobState::Dubbed => "dubbed",
            JobState::Muxing => "muxing",
            JobState::Complete => "complete",
            JobState::Failed => "failed",
            JobState::Canceled => "canceled",
        }
    }

    /// Parse a state name as serialized in events and API payloads.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(JobState::Queued),
            "downloading" => Some(JobState::Downloading),
            "downloaded" => Some(JobState::Downloaded),
            "dubbing" => Some(JobState::Dubbing),
            "dubbed" => Some(JobState::Dubbed),
            "muxing" => Some(JobState::Muxing),
            "complete" => Some(JobState::Complete),
            "failed" => Some(JobState::Failed),
            "canceled" => Some(JobState::Canceled),
            _ => None,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Whether `from → to` is an edge of the pipeline state machine.
///
/// Terminal states have no outgoing edges here: retry/resume exit them by
/// starting a new queued lineage, which is recorded as a `retry` event
/// rather than a state change.
pub fn is_legal_transition(from: JobState, to: JobState) -> bool {
    use JobState::*;
    matches!(
        (from, to),
        (Queued, Downloading)
            | (Queued, Canceled)
            | (Queued, Failed)
            | (Downloading, Downloaded)
            | (Downloading, Failed)
            | (Downloading, Canceled)
            | (Downloaded, Dubbing)
            | (Downloaded, Muxing)
            | (Downloaded, Failed)
            | (Downloaded, Canceled)
            | (Dubbing, Dubbed)
            | (Dubbing, Failed)
            | (Dubbing, Canceled)
            | (Dubbed, Muxing)
            | (Dubbed, Failed)
            | (Dubbed, Canceled)
            | (Muxing, Complete)
            | (Muxing, Failed)
            | (Muxing, Canceled)
    )
}

/// Per-job processing options, defaulted at creation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOptions {
    /// Run the dub stage between download and mux.
    pub dubbing: bool,
    /// Target language for the voice-over translation.
    pub target_lang: String,
    /// Use the higher-quality "lively" voice model.
    pub lively_voice: bool,
    /// Downloader format preset.
    pub format_preset: String,
    /// Output container (e.g. "mp4", "mkv").
    pub container: String,
    /// Also fetch subtitles.
    pub subtitles: bool,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            dubbing: false,
            target_lang: "ru".to_string(),
            lively_voice: false,
            format_preset: "best".to_string(),
            container: "mp4".to_string(),
            subtitles: false,
        }
    }
}

/// A download/dub/mux job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub url: String,
    pub options: JobOptions,
    /// 0..=10, higher dispatches earlier.
    pub priority: u8,
    pub state: JobState,
    /// Set iff the most recent transition entered `failed` with an error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Count of user-initiated retries/resumes. Monotonically non-decreasing.
    #[serde(default)]
    pub retry_count: u32,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at_ms: Option<u64>,
}

impl Job {
    /// Create a new queued job.
    pub fn new(id: JobId, url: impl Into<String>, options: JobOptions, priority: u8, epoch_ms: u64) -> Self {
        Self {
            id,
            url: url.into(),
            options,
            priority,
            state: JobState::Queued,
            error: None,
            retry_count: 0,
            created_at_ms: epoch_ms,
            updated_at_ms: epoch_ms,
            completed_at_ms: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

#[cfg(test)]
#[path = "job_tests.rs"]
mod tests;
