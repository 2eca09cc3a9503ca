// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Store facade: journal + materialized state behind one handle.
//!
//! Writers serialize on the journal mutex; each mutation appends one
//! [`Record`] and applies it to the state under a brief write lock.
//! Readers take the state read lock and proceed during journal I/O.
//! Read-modify-write operations (state transitions, queue pops) hold the
//! journal mutex across the read so concurrent writers cannot interleave.

use parking_lot::{Mutex, RwLock};
use rd_core::{
    Job, JobEvent, JobEventKind, JobId, JobState, Media, MediaPatch, QueueName, QueuePayload,
    Session, SessionId, User,
};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tracing::info;

use crate::record::Record;
use crate::snapshot::SnapshotError;
use crate::state::{JobFilter, QueueEntry, QueueEntryStatus, QueueStats, StoreState};
use crate::wal::{Journal, WalError};

/// Journal file name under the state directory.
const JOURNAL_FILE: &str = "store.wal";

/// Snapshot file name under the state directory.
const SNAPSHOT_FILE: &str = "snapshot.zst";

/// Errors from store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{what} not found: {id}")]
    NotFound { what: &'static str, id: String },

    #[error("journal error: {0}")]
    Wal(#[from] WalError),

    #[error("snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),
}

impl StoreError {
    fn job_not_found(id: &JobId) -> Self {
        StoreError::NotFound {
            what: "job",
            id: id.as_str().to_string(),
        }
    }
}

/// Durable store for every persisted row in the system.
pub struct Store {
    journal: Mutex<Journal>,
    state: RwLock<StoreState>,
    snapshot_path: PathBuf,
    next_event_id: AtomicU64,
    next_queue_seq: AtomicU64,
}

impl Store {
    /// Open the store under `state_dir`: load the snapshot if one exists,
    /// replay the journal tail, and recover the id counters.
    pub fn open(state_dir: &Path) -> Result<Self, StoreError> {
        let journal_path = state_dir.join(JOURNAL_FILE);
        let snapshot_path = state_dir.join(SNAPSHOT_FILE);

        let (mut state, snapshot_seq) = match crate::checkpoint::load_snapshot(&snapshot_path)? {
            Some(snapshot) => {
                info!(
                    seq = snapshot.seq,
                    jobs = snapshot.state.jobs.len(),
                    "loaded snapshot"
                );
                (snapshot.state, snapshot.seq)
            }
            None => (StoreState::default(), 0),
        };

        let mut journal = Journal::open(&journal_path)?;
        let replay = journal.entries_after(snapshot_seq)?;
        let replay_count = replay.len();
        for entry in replay {
            state.apply(&entry.record);
        }
        if replay_count > 0 {
            info!(count = replay_count, after_seq = snapshot_seq, "replayed journal entries");
        }

        let next_event_id = AtomicU64::new(state.max_event_id() + 1);
        let next_queue_seq = AtomicU64::new(state.max_queue_seq() + 1);

        Ok(Self {
            journal: Mutex::new(journal),
            state: RwLock::new(state),
            snapshot_path,
            next_event_id,
            next_queue_seq,
        })
    }

    /// Run a closure against the materialized state under the read lock.
    pub fn with_state<R>(&self, f: impl FnOnce(&StoreState) -> R) -> R {
        f(&self.state.read())
    }

    /// Append a record and apply it, keeping journal order equal to apply
    /// order. Callers needing read-modify-write atomicity lock the journal
    /// themselves and go through [`Self::commit`].
    fn write(&self, record: Record) -> Result<(), StoreError> {
        let mut journal = self.journal.lock();
        self.commit(&mut journal, record)
    }

    fn commit(&self, journal: &mut Journal, record: Record) -> Result<(), StoreError> {
        journal.append(&record)?;
        self.state.write().apply(&record);
        Ok(())
    }

    fn new_event(
        &self,
        job_id: JobId,
        kind: JobEventKind,
        payload: serde_json::Value,
        now_ms: u64,
    ) -> JobEvent {
        JobEvent {
            id: self.next_event_id.fetch_add(1, Ordering::SeqCst),
            job_id,
            timestamp_ms: now_ms,
            kind,
            payload,
        }
    }

    // ── jobs ─────────────────────────────────────────────────────────────

    /// Atomically insert a job, its empty media row, and a `started` event.
    pub fn create_job(&self, job: Job, media: Media, now_ms: u64) -> Result<Job, StoreError> {
        let event = self.new_event(
            job.id.clone(),
            JobEventKind::Started,
            json!({ "url": job.url }),
            now_ms,
        );
        self.write(Record::JobCreated {
            job: job.clone(),
            media,
            event,
        })?;
        Ok(job)
    }

    pub fn get_job(&self, id: &JobId) -> Result<Job, StoreError> {
        self.state
            .read()
            .get_job(id.as_str())
            .cloned()
            .ok_or_else(|| StoreError::job_not_found(id))
    }

    pub fn get_media(&self, id: &JobId) -> Result<Media, StoreError> {
        self.state
            .read()
            .get_media(id.as_str())
            .cloned()
            .ok_or_else(|| StoreError::job_not_found(id))
    }

    pub fn list_jobs(&self, filter: &JobFilter) -> (Vec<Job>, usize) {
        self.state.read().list_jobs(filter)
    }

    /// Transition a job: one record carries both the `state_change` audit
    /// row and the state update. Status triggers (updated_at, completed_at,
    /// error set/clear) fire in apply. No legality check — workers are
    /// trusted to emit monotonic transitions.
    pub fn transition_job(
        &self,
        id: &JobId,
        to: JobState,
        error: Option<&str>,
        now_ms: u64,
    ) -> Result<Job, StoreError> {
        let mut journal = self.journal.lock();
        let from = {
            let state = self.state.read();
            state
                .get_job(id.as_str())
                .map(|j| j.state)
                .ok_or_else(|| StoreError::job_not_found(id))?
        };

        let mut payload = json!({ "from": from, "to": to });
        if let (Some(err), JobState::Failed) = (error, to) {
            payload["error"] = json!(err);
        }
        let event = self.new_event(id.clone(), JobEventKind::StateChange, payload, now_ms);

        self.commit(
            &mut journal,
            Record::JobTransitioned {
                id: id.clone(),
                from,
                to,
                error: error.filter(|_| to == JobState::Failed).map(String::from),
                at_ms: now_ms,
                event,
            },
        )?;
        drop(journal);
        self.get_job(id)
    }

    /// Start a new lineage on the same id (retry/resume): `retry` audit row,
    /// state reset, error cleared, retry count incremented. Deliberately
    /// not a state_change — terminal states have no outgoing edges.
    pub fn requeue_job(
        &self,
        id: &JobId,
        state: JobState,
        payload: serde_json::Value,
        now_ms: u64,
    ) -> Result<Job, StoreError> {
        let mut journal = self.journal.lock();
        if self.state.read().get_job(id.as_str()).is_none() {
            return Err(StoreError::job_not_found(id));
        }

        let event = self.new_event(id.clone(), JobEventKind::Retry, payload, now_ms);
        self.commit(
            &mut journal,
            Record::JobRequeued {
                id: id.clone(),
                state,
                at_ms: now_ms,
                event,
            },
        )?;
        drop(journal);
        self.get_job(id)
    }

    pub fn set_priority(&self, id: &JobId, priority: u8, now_ms: u64) -> Result<Job, StoreError> {
        let mut journal = self.journal.lock();
        if self.state.read().get_job(id.as_str()).is_none() {
            return Err(StoreError::job_not_found(id));
        }
        self.commit(
            &mut journal,
            Record::JobPrioritized {
                id: id.clone(),
                priority,
                at_ms: now_ms,
            },
        )?;
        drop(journal);
        self.get_job(id)
    }

    /// Cascade delete. Filesystem cleanup is the caller's job and must
    /// happen before this.
    pub fn delete_job(&self, id: &JobId) -> Result<(), StoreError> {
        let mut journal = self.journal.lock();
        if self.state.read().get_job(id.as_str()).is_none() {
            return Err(StoreError::job_not_found(id));
        }
        self.commit(&mut journal, Record::JobDeleted { id: id.clone() })
    }

    // ── audit log ────────────────────────────────────────────────────────

    pub fn append_event(
        &self,
        id: &JobId,
        kind: JobEventKind,
        payload: serde_json::Value,
        now_ms: u64,
    ) -> Result<JobEvent, StoreError> {
        let mut journal = self.journal.lock();
        if self.state.read().get_job(id.as_str()).is_none() {
            return Err(StoreError::job_not_found(id));
        }
        let event = self.new_event(id.clone(), kind, payload, now_ms);
        self.commit(
            &mut journal,
            Record::EventAppended {
                event: event.clone(),
            },
        )?;
        Ok(event)
    }

    pub fn list_events(
        &self,
        id: &JobId,
        limit: usize,
        offset: usize,
    ) -> Result<(Vec<JobEvent>, usize), StoreError> {
        let state = self.state.read();
        if state.get_job(id.as_str()).is_none() {
            return Err(StoreError::job_not_found(id));
        }
        Ok(state.list_events(id.as_str(), limit, offset))
    }

    // ── media ────────────────────────────────────────────────────────────

    pub fn update_media(&self, id: &JobId, patch: &MediaPatch) -> Result<Media, StoreError> {
        let mut journal = self.journal.lock();
        if self.state.read().get_media(id.as_str()).is_none() {
            return Err(StoreError::job_not_found(id));
        }
        self.commit(
            &mut journal,
            Record::MediaPatched {
                id: id.clone(),
                patch: patch.clone(),
            },
        )?;
        drop(journal);
        self.get_media(id)
    }

    // ── users / sessions ─────────────────────────────────────────────────

    pub fn create_user(&self, user: User) -> Result<(), StoreError> {
        self.write(Record::UserCreated { user })
    }

    pub fn find_user(&self, username: &str) -> Option<User> {
        self.state.read().find_user(username).cloned()
    }

    pub fn get_user(&self, id: &str) -> Option<User> {
        self.state.read().users.get(id).cloned()
    }

    pub fn create_session(&self, session: Session) -> Result<(), StoreError> {
        self.write(Record::SessionCreated { session })
    }

    pub fn get_session(&self, id: &str) -> Option<Session> {
        self.state.read().get_session(id).cloned()
    }

    pub fn revoke_session(&self, id: &SessionId) -> Result<(), StoreError> {
        self.write(Record::SessionRevoked { id: id.clone() })
    }

    pub fn purge_expired_sessions(&self, now_ms: u64) -> Result<(), StoreError> {
        self.write(Record::SessionsPurged { now_ms })
    }

    // ── queues ───────────────────────────────────────────────────────────

    /// Idempotent enqueue: any live entry for the same job id in this queue
    /// is replaced; terminal entries stay for inspection.
    pub fn enqueue(
        &self,
        payload: QueuePayload,
        priority: u8,
        now_ms: u64,
    ) -> Result<QueueEntry, StoreError> {
        let entry = QueueEntry {
            job_id: payload.job_id().clone(),
            priority,
            seq: self.next_queue_seq.fetch_add(1, Ordering::SeqCst),
            status: QueueEntryStatus::Waiting,
            attempt: 0,
            enqueued_at_ms: now_ms,
            finished_at_ms: None,
            last_error: None,
            payload,
        };
        self.write(Record::QueueEnqueued {
            entry: entry.clone(),
        })?;
        Ok(entry)
    }

    /// Pop the next dispatchable entry: marks it active and increments its
    /// attempt counter. Atomic under the journal mutex, so concurrent
    /// dispatchers never take the same entry twice.
    pub fn take_next(
        &self,
        queue: QueueName,
        now_ms: u64,
    ) -> Result<Option<QueueEntry>, StoreError> {
        let mut journal = self.journal.lock();
        let job_id = {
            let state = self.state.read();
            match state.next_ready(queue.as_str(), now_ms) {
                Some(entry) => entry.job_id.clone(),
                None => return Ok(None),
            }
        };
        self.commit(
            &mut journal,
            Record::QueueTaken {
                queue: queue.as_str().to_string(),
                job_id: job_id.clone(),
                at_ms: now_ms,
            },
        )?;
        drop(journal);
        Ok(self.queue_entry(queue, &job_id))
    }

    pub fn complete_entry(
        &self,
        queue: QueueName,
        job_id: &JobId,
        now_ms: u64,
    ) -> Result<(), StoreError> {
        self.write(Record::QueueCompleted {
            queue: queue.as_str().to_string(),
            job_id: job_id.clone(),
            at_ms: now_ms,
        })
    }

    pub fn fail_entry(
        &self,
        queue: QueueName,
        job_id: &JobId,
        error: &str,
        now_ms: u64,
    ) -> Result<(), StoreError> {
        self.write(Record::QueueFailed {
            queue: queue.as_str().to_string(),
            job_id: job_id.clone(),
            error: error.to_string(),
            at_ms: now_ms,
        })
    }

    pub fn delay_entry(
        &self,
        queue: QueueName,
        job_id: &JobId,
        until_ms: u64,
        error: &str,
    ) -> Result<(), StoreError> {
        self.write(Record::QueueDelayed {
            queue: queue.as_str().to_string(),
            job_id: job_id.clone(),
            until_ms,
            error: error.to_string(),
        })
    }

    /// Return entries left active by a crash to waiting (restart recovery).
    pub fn requeue_active(&self, queue: QueueName) -> Result<Vec<QueueEntry>, StoreError> {
        let mut journal = self.journal.lock();
        let stranded: Vec<JobId> = {
            let state = self.state.read();
            state
                .queues
                .get(queue.as_str())
                .map(|entries| {
                    entries
                        .iter()
                        .filter(|e| e.status == QueueEntryStatus::Active)
                        .map(|e| e.job_id.clone())
                        .collect()
                })
                .unwrap_or_default()
        };
        for job_id in &stranded {
            self.commit(
                &mut journal,
                Record::QueueRequeued {
                    queue: queue.as_str().to_string(),
                    job_id: job_id.clone(),
                },
            )?;
        }
        drop(journal);
        Ok(stranded
            .iter()
            .filter_map(|id| self.queue_entry(queue, id))
            .collect())
    }

    /// Fail entries left active by a crash (alternative restart policy).
    /// Returns the affected job ids so callers can surface error events.
    pub fn fail_active(
        &self,
        queue: QueueName,
        error: &str,
        now_ms: u64,
    ) -> Result<Vec<JobId>, StoreError> {
        let mut journal = self.journal.lock();
        let stranded: Vec<JobId> = {
            let state = self.state.read();
            state
                .queues
                .get(queue.as_str())
                .map(|entries| {
                    entries
                        .iter()
                        .filter(|e| e.status == QueueEntryStatus::Active)
                        .map(|e| e.job_id.clone())
                        .collect()
                })
                .unwrap_or_default()
        };
        for job_id in &stranded {
            self.commit(
                &mut journal,
                Record::QueueFailed {
                    queue: queue.as_str().to_string(),
                    job_id: job_id.clone(),
                    error: error.to_string(),
                    at_ms: now_ms,
                },
            )?;
        }
        Ok(stranded)
    }

    /// Best-effort removal: succeeds whether or not a live entry exists.
    pub fn remove_entry(&self, queue: QueueName, job_id: &JobId) -> Result<(), StoreError> {
        self.write(Record::QueueRemoved {
            queue: queue.as_str().to_string(),
            job_id: job_id.clone(),
        })
    }

    /// Drop terminal entries past their retention window.
    pub fn reap_queue(&self, queue: QueueName, now_ms: u64) -> Result<(), StoreError> {
        self.write(Record::QueueReaped {
            queue: queue.as_str().to_string(),
            now_ms,
        })
    }

    pub fn queue_stats(&self, queue: QueueName) -> QueueStats {
        self.state.read().queue_stats(queue.as_str())
    }

    pub fn queue_entry(&self, queue: QueueName, job_id: &JobId) -> Option<QueueEntry> {
        self.state
            .read()
            .queue_entry(queue.as_str(), job_id.as_str())
            .cloned()
    }

    pub fn active_count(&self, queue: QueueName) -> usize {
        self.state.read().active_count(queue.as_str())
    }

    pub fn next_delay(&self, queue: QueueName) -> Option<u64> {
        self.state.read().next_delay(queue.as_str())
    }

    // ── durability ───────────────────────────────────────────────────────

    pub fn needs_flush(&self) -> bool {
        self.journal.lock().needs_flush()
    }

    pub fn flush(&self) -> Result<(), StoreError> {
        Ok(self.journal.lock().flush()?)
    }

    pub fn snapshot_path(&self) -> &Path {
        &self.snapshot_path
    }

    /// Consistent (state, seq) pair for checkpointing. Holds the journal
    /// mutex across the state clone so no write lands in between.
    pub fn checkpoint_data(&self) -> (StoreState, u64) {
        let journal = self.journal.lock();
        let state = self.state.read().clone();
        (state, journal.seq())
    }

    /// Truncate journal entries below `seq` after a durable checkpoint.
    pub fn truncate_journal(&self, seq: u64) -> Result<(), StoreError> {
        Ok(self.journal.lock().truncate_before(seq)?)
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
