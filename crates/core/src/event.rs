// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event types: live bus messages, persisted audit rows, and the
//! server→client push frames.
//!
//! Workers publish [`BusMessage`]s on the in-process bus. The aggregator
//! persists a subset as [`JobEvent`] audit rows and forwards a subset to
//! subscribers as [`ServerMessage`] frames. Progress is forwarded but never
//! persisted.

use crate::job::{JobId, JobState};
use crate::media::MediaPatch;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Pipeline stage reported by progress events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStage {
    Downloading,
    Extracting,
    Dubbing,
    Mixing,
    Muxing,
}

/// Log severity carried on the log channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

/// Payload of a bus message: the tagged sum of the five channels.
///
/// Serializes with `{"kind": "progress", ...fields}` format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ChannelPayload {
    Progress {
        stage: ProgressStage,
        percent: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        downloaded_bytes: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        total_bytes: Option<u64>,
        /// Bytes per second.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        speed: Option<f64>,
        /// Seconds remaining.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        eta: Option<u64>,
    },
    State {
        from: JobState,
        to: JobState,
    },
    Log {
        level: LogLevel,
        message: String,
    },
    Error {
        code: String,
        message: String,
        retryable: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stack: Option<String>,
    },
    Metadata {
        #[serde(flatten)]
        patch: MediaPatch,
    },
}

/// A message published on the event bus, keyed by job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusMessage {
    pub job_id: JobId,
    pub timestamp_ms: u64,
    #[serde(flatten)]
    pub payload: ChannelPayload,
}

impl BusMessage {
    pub fn new(job_id: JobId, timestamp_ms: u64, payload: ChannelPayload) -> Self {
        Self {
            job_id,
            timestamp_ms,
            payload,
        }
    }
}

/// Kind tag of a persisted audit row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobEventKind {
    Progress,
    StateChange,
    Log,
    Error,
    Started,
    Finished,
    Retry,
}

impl fmt::Display for JobEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobEventKind::Progress => write!(f, "progress"),
            JobEventKind::StateChange => write!(f, "state_change"),
            JobEventKind::Log => write!(f, "log"),
            JobEventKind::Error => write!(f, "error"),
            JobEventKind::Started => write!(f, "started"),
            JobEventKind::Finished => write!(f, "finished"),
            JobEventKind::Retry => write!(f, "retry"),
        }
    }
}

/// Append-only audit row. Immutable once written; removed only by the
/// job delete cascade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEvent {
    /// Store-assigned sequence, unique per store.
    pub id: u64,
    pub job_id: JobId,
    pub timestamp_ms: u64,
    pub kind: JobEventKind,
    /// Opaque structured payload; shape depends on `kind`.
    pub payload: serde_json::Value,
}

/// Frame type of a server→client push message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerMessageKind {
    Progress,
    StateChange,
    Log,
    Error,
    Notification,
    JobAdded,
    JobRemoved,
}

/// A push frame delivered to subscribed clients.
///
/// `job_id` is absent for global broadcasts (`notification`, `job_added`,
/// `job_removed` reach every connected client).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
    #[serde(rename = "type")]
    pub kind: ServerMessageKind,
    pub timestamp_ms: u64,
    pub payload: serde_json::Value,
}

impl ServerMessage {
    /// Frame scoped to one job's fan-out room.
    pub fn for_job(
        job_id: JobId,
        kind: ServerMessageKind,
        timestamp_ms: u64,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            job_id: Some(job_id),
            kind,
            timestamp_ms,
            payload,
        }
    }

    /// Frame broadcast to every connected client.
    pub fn global(kind: ServerMessageKind, timestamp_ms: u64, payload: serde_json::Value) -> Self {
        Self {
            job_id: None,
            kind,
            timestamp_ms,
            payload,
        }
    }
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
