// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Queue names, per-queue dispatch settings, and typed worker payloads.

use crate::job::JobId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Completed queue entries are reaped after 24 hours.
pub const COMPLETED_RETENTION_MS: u64 = 24 * 60 * 60 * 1000;

/// Failed queue entries are kept 7 days for dead-letter inspection.
pub const FAILED_RETENTION_MS: u64 = 7 * 24 * 60 * 60 * 1000;

/// The three worker pools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueName {
    Download,
    Dub,
    Mux,
}

impl QueueName {
    pub const ALL: [QueueName; 3] = [QueueName::Download, QueueName::Dub, QueueName::Mux];

    pub fn as_str(self) -> &'static str {
        match self {
            QueueName::Download => "download",
            QueueName::Dub => "dub",
            QueueName::Mux => "mux",
        }
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Dispatch parameters for one queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSettings {
    /// Maximum in-flight entries.
    pub concurrency: u32,
    /// Total attempts before an entry moves to failed.
    pub attempts: u32,
    /// Exponential backoff base: delay = base * 2^(attempt-1).
    pub backoff_base_ms: u64,
    /// An attempt exceeding this is treated as a transient failure.
    pub timeout_ms: u64,
}

impl QueueSettings {
    /// Defaults for a queue. Download is strict-FIFO at concurrency 1;
    /// dub/mux concurrency is raised from configuration.
    pub fn defaults(queue: QueueName) -> Self {
        match queue {
            QueueName::Download => Self {
                concurrency: 1,
                attempts: 3,
                backoff_base_ms: 1_000,
                timeout_ms: 60 * 60 * 1000,
            },
            QueueName::Dub => Self {
                concurrency: 2,
                attempts: 3,
                backoff_base_ms: 2_000,
                timeout_ms: 30 * 60 * 1000,
            },
            QueueName::Mux => Self {
                concurrency: 1,
                attempts: 3,
                backoff_base_ms: 2_000,
                timeout_ms: 30 * 60 * 1000,
            },
        }
    }

    pub fn with_concurrency(mut self, concurrency: u32) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Backoff delay before re-dispatching attempt `attempt + 1`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.backoff_base_ms.saturating_mul(1u64 << exp))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Payload consumed by download workers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadParams {
    pub job_id: JobId,
    pub url: String,
    pub format_preset: String,
    pub container: String,
    pub dubbing: bool,
    pub target_lang: String,
    pub lively_voice: bool,
    pub subtitles: bool,
    pub temp_dir: PathBuf,
    pub final_path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cookies_file: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
    /// Downloader rate limit, bytes per second.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<u64>,
}

/// Payload consumed by dub workers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DubParams {
    pub job_id: JobId,
    /// Source URL, used by the translation service.
    pub source_url: String,
    pub video_path: PathBuf,
    pub target_lang: String,
    pub lively_voice: bool,
    pub temp_dir: PathBuf,
    pub output_path: PathBuf,
    pub final_path: PathBuf,
    pub container: String,
}

/// Payload consumed by mux workers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MuxParams {
    pub job_id: JobId,
    pub video_path: PathBuf,
    pub dubbed_audio_path: Option<PathBuf>,
    pub target_lang: String,
    pub container: String,
    /// Attenuation of the original track under the dub, 0–1.
    pub ducking_level: f64,
    /// Loudness target for the dubbed track.
    pub normalization_lufs: f64,
    pub temp_dir: PathBuf,
    pub final_path: PathBuf,
}

/// Typed payload of a queue entry.
///
/// Serializes with `{"queue": "download", ...params}` format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "queue", rename_all = "lowercase")]
pub enum QueuePayload {
    Download(DownloadParams),
    Dub(DubParams),
    Mux(MuxParams),
}

impl QueuePayload {
    pub fn queue(&self) -> QueueName {
        match self {
            QueuePayload::Download(_) => QueueName::Download,
            QueuePayload::Dub(_) => QueueName::Dub,
            QueuePayload::Mux(_) => QueueName::Mux,
        }
    }

    pub fn job_id(&self) -> &JobId {
        match self {
            QueuePayload::Download(p) => &p.job_id,
            QueuePayload::Dub(p) => &p.job_id,
            QueuePayload::Mux(p) => &p.job_id,
        }
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
