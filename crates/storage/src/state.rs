// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Materialized state from journal replay.
//!
//! All mutation goes through [`StoreState::apply`]; the status triggers
//! (updated_at refresh, completed_at on first terminal entry, error
//! set/clear) live here so replay reproduces them exactly.

use rd_core::{
    Job, JobEvent, JobState, Media, QueuePayload, Session, User, COMPLETED_RETENTION_MS,
    FAILED_RETENTION_MS,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::record::Record;

/// Status of a queue entry through its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum QueueEntryStatus {
    Waiting,
    /// Parked for retry backoff; dispatchable once `until_ms` passes.
    Delayed { until_ms: u64 },
    Active,
    Completed,
    Failed,
}

impl QueueEntryStatus {
    /// Completed and failed entries are terminal: a fresh enqueue for the
    /// same job id leaves them in place for inspection.
    pub fn is_terminal(self) -> bool {
        matches!(self, QueueEntryStatus::Completed | QueueEntryStatus::Failed)
    }

    /// Dispatchable right now?
    pub fn is_ready(self, now_ms: u64) -> bool {
        match self {
            QueueEntryStatus::Waiting => true,
            QueueEntryStatus::Delayed { until_ms } => now_ms >= until_ms,
            _ => false,
        }
    }
}

/// A single entry in a persisted queue, keyed by job id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub job_id: rd_core::JobId,
    pub payload: QueuePayload,
    /// Mirrors the job's priority; higher dispatches earlier.
    pub priority: u8,
    /// Store-assigned, monotonic; FIFO order within equal priority.
    pub seq: u64,
    #[serde(flatten)]
    pub status: QueueEntryStatus,
    /// Attempts started so far (incremented when taken).
    #[serde(default)]
    pub attempt: u32,
    pub enqueued_at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Counts per queue, by entry status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub waiting: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
    pub delayed: usize,
}

/// Filter for job listings.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub status: Option<JobState>,
    /// Substring match on url or id.
    pub search: Option<String>,
    pub limit: usize,
    pub offset: usize,
}

/// Materialized tables, rebuilt from snapshot + journal replay.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreState {
    pub jobs: HashMap<String, Job>,
    pub media: HashMap<String, Media>,
    /// Per-job audit rows in insertion order.
    pub events: HashMap<String, Vec<JobEvent>>,
    pub users: HashMap<String, User>,
    pub sessions: HashMap<String, Session>,
    /// Queue entries keyed by queue name.
    pub queues: HashMap<String, Vec<QueueEntry>>,
}

impl StoreState {
    pub fn get_job(&self, id: &str) -> Option<&Job> {
        self.jobs.get(id)
    }

    pub fn get_media(&self, id: &str) -> Option<&Media> {
        self.media.get(id)
    }

    pub fn find_user(&self, username: &str) -> Option<&User> {
        self.users.values().find(|u| u.username == username)
    }

    pub fn get_session(&self, id: &str) -> Option<&Session> {
        self.sessions.get(id)
    }

    /// Highest audit-row id in the state (for counter recovery).
    pub fn max_event_id(&self) -> u64 {
        self.events
            .values()
            .flat_map(|rows| rows.iter().map(|e| e.id))
            .max()
            .unwrap_or(0)
    }

    /// Highest queue entry seq in the state (for counter recovery).
    pub fn max_queue_seq(&self) -> u64 {
        self.queues
            .values()
            .flat_map(|entries| entries.iter().map(|e| e.seq))
            .max()
            .unwrap_or(0)
    }

    /// Jobs matching the filter, ordered priority desc then created_at asc.
    /// Returns the page and the total match count.
    pub fn list_jobs(&self, filter: &JobFilter) -> (Vec<Job>, usize) {
        let mut matched: Vec<&Job> = self
            .jobs
            .values()
            .filter(|j| filter.status.is_none_or(|s| j.state == s))
            .filter(|j| {
                filter.search.as_deref().is_none_or(|needle| {
                    j.url.contains(needle) || j.id.as_str().contains(needle)
                })
            })
            .collect();

        matched.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.created_at_ms.cmp(&b.created_at_ms))
                .then(a.id.as_str().cmp(b.id.as_str()))
        });

        let total = matched.len();
        let page = matched
            .into_iter()
            .skip(filter.offset)
            .take(if filter.limit == 0 { usize::MAX } else { filter.limit })
            .cloned()
            .collect();
        (page, total)
    }

    /// Audit rows for a job, newest first. Returns the page and total count.
    pub fn list_events(&self, job_id: &str, limit: usize, offset: usize) -> (Vec<JobEvent>, usize) {
        let Some(rows) = self.events.get(job_id) else {
            return (Vec::new(), 0);
        };
        let total = rows.len();
        let page = rows
            .iter()
            .rev()
            .skip(offset)
            .take(if limit == 0 { usize::MAX } else { limit })
            .cloned()
            .collect();
        (page, total)
    }

    /// The job's entry in a queue: the live one when present, otherwise
    /// the most recent retained terminal one.
    pub fn queue_entry(&self, queue: &str, job_id: &str) -> Option<&QueueEntry> {
        let entries = self.queues.get(queue)?;
        entries
            .iter()
            .find(|e| e.job_id.as_str() == job_id && !e.status.is_terminal())
            .or_else(|| {
                entries
                    .iter()
                    .filter(|e| e.job_id.as_str() == job_id)
                    .max_by_key(|e| e.seq)
            })
    }

    pub fn queue_stats(&self, queue: &str) -> QueueStats {
        let mut stats = QueueStats::default();
        let Some(entries) = self.queues.get(queue) else {
            return stats;
        };
        for entry in entries {
            match entry.status {
                QueueEntryStatus::Waiting => stats.waiting += 1,
                QueueEntryStatus::Delayed { .. } => stats.delayed += 1,
                QueueEntryStatus::Active => stats.active += 1,
                QueueEntryStatus::Completed => stats.completed += 1,
                QueueEntryStatus::Failed => stats.failed += 1,
            }
        }
        stats
    }

    /// Number of active entries in a queue.
    pub fn active_count(&self, queue: &str) -> usize {
        self.queues
            .get(queue)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|e| e.status == QueueEntryStatus::Active)
                    .count()
            })
            .unwrap_or(0)
    }

    /// The entry that would dispatch next: ready, highest priority,
    /// FIFO within equal priority.
    pub fn next_ready(&self, queue: &str, now_ms: u64) -> Option<&QueueEntry> {
        self.queues
            .get(queue)?
            .iter()
            .filter(|e| e.status.is_ready(now_ms))
            .min_by_key(|e| (std::cmp::Reverse(e.priority), e.seq))
    }

    /// Earliest wake-up among delayed entries, if any.
    pub fn next_delay(&self, queue: &str) -> Option<u64> {
        self.queues
            .get(queue)?
            .iter()
            .filter_map(|e| match e.status {
                QueueEntryStatus::Delayed { until_ms } => Some(until_ms),
                _ => None,
            })
            .min()
    }

    /// Apply a journaled record. Idempotence is not required — the journal
    /// is replayed exactly once from the snapshot seq.
    pub fn apply(&mut self, record: &Record) {
        match record {
            Record::JobCreated { job, media, event } => {
                self.jobs.insert(job.id.as_str().to_string(), job.clone());
                self.media
                    .insert(media.job_id.as_str().to_string(), media.clone());
                self.events
                    .entry(job.id.as_str().to_string())
                    .or_default()
                    .push(event.clone());
            }

            Record::JobTransitioned {
                id,
                to,
                error,
                at_ms,
                event,
                ..
            } => {
                if let Some(job) = self.jobs.get_mut(id.as_str()) {
                    job.state = *to;
                    job.updated_at_ms = *at_ms;
                    if *to == JobState::Failed {
                        job.error = error.clone();
                    } else {
                        job.error = None;
                    }
                    if to.is_terminal() {
                        if job.completed_at_ms.is_none() {
                            job.completed_at_ms = Some(*at_ms);
                        }
                    } else {
                        job.completed_at_ms = None;
                    }
                    self.events
                        .entry(id.as_str().to_string())
                        .or_default()
                        .push(event.clone());
                }
            }

            Record::JobRequeued {
                id,
                state,
                at_ms,
                event,
            } => {
                if let Some(job) = self.jobs.get_mut(id.as_str()) {
                    job.state = *state;
                    job.error = None;
                    job.retry_count += 1;
                    job.updated_at_ms = *at_ms;
                    // New lineage: the job is live again
                    job.completed_at_ms = None;
                    self.events
                        .entry(id.as_str().to_string())
                        .or_default()
                        .push(event.clone());
                }
            }

            Record::JobPrioritized { id, priority, at_ms } => {
                if let Some(job) = self.jobs.get_mut(id.as_str()) {
                    job.priority = *priority;
                    job.updated_at_ms = *at_ms;
                }
                for entries in self.queues.values_mut() {
                    for entry in entries.iter_mut() {
                        if entry.job_id == *id && !entry.status.is_terminal() {
                            entry.priority = *priority;
                        }
                    }
                }
            }

            Record::JobDeleted { id } => {
                self.jobs.remove(id.as_str());
                self.media.remove(id.as_str());
                self.events.remove(id.as_str());
                for entries in self.queues.values_mut() {
                    entries.retain(|e| e.job_id != *id);
                }
            }

            Record::EventAppended { event } => {
                self.events
                    .entry(event.job_id.as_str().to_string())
                    .or_default()
                    .push(event.clone());
            }

            Record::MediaPatched { id, patch } => {
                if let Some(media) = self.media.get_mut(id.as_str()) {
                    patch.apply(media);
                }
            }

            Record::UserCreated { user } => {
                self.users.insert(user.id.as_str().to_string(), user.clone());
            }

            Record::SessionCreated { session } => {
                self.sessions
                    .insert(session.id.as_str().to_string(), session.clone());
            }

            Record::SessionRevoked { id } => {
                if let Some(session) = self.sessions.get_mut(id.as_str()) {
                    session.revoked = true;
                }
            }

            Record::SessionsPurged { now_ms } => {
                self.sessions
                    .retain(|_, s| !s.revoked && s.expires_at_ms > *now_ms);
            }

            Record::QueueEnqueued { entry } => {
                let entries = self.queues.entry(entry.payload.queue().as_str().to_string()).or_default();
                // Idempotent enqueue: at most one live entry per job id
                entries.retain(|e| e.job_id != entry.job_id || e.status.is_terminal());
                entries.push(entry.clone());
            }

            Record::QueueTaken { queue, job_id, .. } => {
                if let Some(entry) = entry_mut(&mut self.queues, queue, job_id) {
                    entry.status = QueueEntryStatus::Active;
                    entry.attempt += 1;
                }
            }

            Record::QueueCompleted { queue, job_id, at_ms } => {
                if let Some(entry) = entry_mut(&mut self.queues, queue, job_id) {
                    entry.status = QueueEntryStatus::Completed;
                    entry.finished_at_ms = Some(*at_ms);
                }
            }

            Record::QueueFailed {
                queue,
                job_id,
                error,
                at_ms,
            } => {
                if let Some(entry) = entry_mut(&mut self.queues, queue, job_id) {
                    entry.status = QueueEntryStatus::Failed;
                    entry.last_error = Some(error.clone());
                    entry.finished_at_ms = Some(*at_ms);
                }
            }

            Record::QueueDelayed {
                queue,
                job_id,
                until_ms,
                error,
            } => {
                if let Some(entry) = entry_mut(&mut self.queues, queue, job_id) {
                    entry.status = QueueEntryStatus::Delayed { until_ms: *until_ms };
                    entry.last_error = Some(error.clone());
                }
            }

            Record::QueueRequeued { queue, job_id } => {
                if let Some(entry) = entry_mut(&mut self.queues, queue, job_id) {
                    entry.status = QueueEntryStatus::Waiting;
                }
            }

            Record::QueueRemoved { queue, job_id } => {
                if let Some(entries) = self.queues.get_mut(queue) {
                    entries.retain(|e| {
                        e.job_id.as_str() != job_id.as_str() || e.status.is_terminal()
                    });
                }
            }

            Record::QueueReaped { queue, now_ms } => {
                if let Some(entries) = self.queues.get_mut(queue) {
                    entries.retain(|e| match (e.status, e.finished_at_ms) {
                        (QueueEntryStatus::Completed, Some(done)) => {
                            now_ms.saturating_sub(done) < COMPLETED_RETENTION_MS
                        }
                        (QueueEntryStatus::Failed, Some(done)) => {
                            now_ms.saturating_sub(done) < FAILED_RETENTION_MS
                        }
                        _ => true,
                    });
                }
            }
        }
    }
}

fn entry_mut<'a>(
    queues: &'a mut HashMap<String, Vec<QueueEntry>>,
    queue: &str,
    job_id: &rd_core::JobId,
) -> Option<&'a mut QueueEntry> {
    queues
        .get_mut(queue)?
        .iter_mut()
        .filter(|e| !e.status.is_terminal())
        .find(|e| e.job_id == *job_id)
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
