// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Journaled mutation records.
//!
//! Every store write is one record; one record is one atomic unit of
//! recovery. Records carry concrete ids and timestamps so that replay is
//! deterministic.
//!
//! Serializes with `{"type": "job:created", ...fields}` format.

use rd_core::{
    Job, JobEvent, JobId, JobState, Media, MediaPatch, Session, SessionId, User,
};
use serde::{Deserialize, Serialize};

use crate::state::QueueEntry;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Record {
    // -- job --
    /// Atomic creation: job row + empty media row + `started` audit row.
    #[serde(rename = "job:created")]
    JobCreated {
        job: Job,
        media: Media,
        event: JobEvent,
    },

    /// State transition: `state_change` audit row + state update in one step.
    #[serde(rename = "job:transitioned")]
    JobTransitioned {
        id: JobId,
        from: JobState,
        to: JobState,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        at_ms: u64,
        event: JobEvent,
    },

    /// Retry/resume lineage: `retry` audit row + state reset. Not a state
    /// transition — terminal states are exited only through this record.
    #[serde(rename = "job:requeued")]
    JobRequeued {
        id: JobId,
        state: JobState,
        at_ms: u64,
        event: JobEvent,
    },

    #[serde(rename = "job:prioritized")]
    JobPrioritized { id: JobId, priority: u8, at_ms: u64 },

    /// Cascade delete: media, events and queue entries die with the job.
    #[serde(rename = "job:deleted")]
    JobDeleted { id: JobId },

    // -- audit log --
    #[serde(rename = "event:appended")]
    EventAppended { event: JobEvent },

    // -- media --
    #[serde(rename = "media:patched")]
    MediaPatched { id: JobId, patch: MediaPatch },

    // -- users / sessions --
    #[serde(rename = "user:created")]
    UserCreated { user: User },

    #[serde(rename = "session:created")]
    SessionCreated { session: Session },

    #[serde(rename = "session:revoked")]
    SessionRevoked { id: SessionId },

    /// Drop sessions that expired before `now_ms`.
    #[serde(rename = "session:purged")]
    SessionsPurged { now_ms: u64 },

    // -- queue --
    /// Idempotent enqueue: replaces any live entry for the same job id.
    #[serde(rename = "queue:enqueued")]
    QueueEnqueued { entry: QueueEntry },

    /// Entry handed to a worker; increments the attempt counter.
    #[serde(rename = "queue:taken")]
    QueueTaken {
        queue: String,
        job_id: JobId,
        at_ms: u64,
    },

    #[serde(rename = "queue:completed")]
    QueueCompleted {
        queue: String,
        job_id: JobId,
        at_ms: u64,
    },

    #[serde(rename = "queue:failed")]
    QueueFailed {
        queue: String,
        job_id: JobId,
        error: String,
        at_ms: u64,
    },

    /// Transient failure: entry parked until `until_ms`, then dispatchable again.
    #[serde(rename = "queue:delayed")]
    QueueDelayed {
        queue: String,
        job_id: JobId,
        until_ms: u64,
        error: String,
    },

    /// Active entry returned to waiting (crash recovery).
    #[serde(rename = "queue:requeued")]
    QueueRequeued { queue: String, job_id: JobId },

    #[serde(rename = "queue:removed")]
    QueueRemoved { queue: String, job_id: JobId },

    /// Reap terminal entries past their retention window.
    #[serde(rename = "queue:reaped")]
    QueueReaped { queue: String, now_ms: u64 },
}

#[cfg(test)]
#[path = "record_tests.rs"]
mod tests;
