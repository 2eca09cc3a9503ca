// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Resume planner: decide which stage a failed job can restart at.
//!
//! Evidence is the job's event history (did a `state_change` ever reach
//! `downloaded` / `dubbed`?) and the filesystem (do the recorded video and
//! dubbed-audio files still exist?). First matching rule wins; when none
//! matches the caller must fall back to retry.

use rd_core::{Job, JobEvent, JobEventKind, JobState, Media};
use serde::Serialize;
use std::fmt;

/// Stage a resumed job re-enters the pipeline at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResumeStage {
    Dubbing,
    Muxing,
}

impl fmt::Display for ResumeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResumeStage::Dubbing => write!(f, "dubbing"),
            ResumeStage::Muxing => write!(f, "muxing"),
        }
    }
}

/// A successful resume decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResumePlan {
    /// State the job is reset to.
    pub state: JobState,
    /// Queue the next payload goes to.
    pub resume_from: ResumeStage,
}

/// Why resume was rejected; returned to the caller as diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeDiagnostic {
    pub download_completed: bool,
    pub dubbing_completed: bool,
    pub has_video: bool,
    pub has_dubbed_audio: bool,
    pub requested_dubbing: bool,
}

/// Did any state_change event reach `state`?
fn reached(events: &[JobEvent], state: JobState) -> bool {
    events.iter().any(|e| {
        e.kind == JobEventKind::StateChange
            && e.payload
                .get("to")
                .and_then(|v| v.as_str())
                .and_then(JobState::parse)
                == Some(state)
    })
}

/// Apply the decision table. `events` may be in any order.
pub fn plan_resume(
    job: &Job,
    media: &Media,
    events: &[JobEvent],
) -> Result<ResumePlan, ResumeDiagnostic> {
    let has_video = media
        .video_path
        .as_deref()
        .is_some_and(|p| p.exists());
    let has_dubbed_audio = media
        .audio_dubbed_path
        .as_deref()
        .is_some_and(|p| p.exists());
    let download_completed = reached(events, JobState::Downloaded);
    let dubbing_completed = reached(events, JobState::Dubbed);

    if dubbing_completed && has_video && has_dubbed_audio {
        return Ok(ResumePlan {
            state: JobState::Dubbed,
            resume_from: ResumeStage::Muxing,
        });
    }

    if download_completed && has_video && job.options.dubbing {
        return Ok(ResumePlan {
            state: JobState::Downloaded,
            resume_from: ResumeStage::Dubbing,
        });
    }

    Err(ResumeDiagnostic {
        download_completed,
        dubbing_completed,
        has_video,
        has_dubbed_audio,
        requested_dubbing: job.options.dubbing,
    })
}

#[cfg(test)]
#[path = "resume_tests.rs"]
mod tests;
