// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker contract.
//!
//! A worker consumes one typed payload at a time, publishes events keyed
//! by job id, and returns a [`WorkerError`] whose `retryable` flag drives
//! the queue's retry policy. There is no push cancellation channel:
//! workers notice cancellation by checking the persisted job state
//! between suspension points.

use crate::bus::EventBus;
use crate::fs_layout::MediaLayout;
use async_trait::async_trait;
use rd_core::{
    BusMessage, ChannelPayload, Clock, JobId, JobState, LogLevel, MediaPatch, ProgressStage,
    QueuePayload, SystemClock, WorkerError,
};
use rd_storage::Store;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// A queue worker. One implementation per pool.
#[async_trait]
pub trait Worker: Send + Sync {
    async fn run(&self, payload: &QueuePayload, ctx: &WorkerContext) -> Result<(), WorkerError>;
}

/// Shared handles available to a running worker.
#[derive(Clone)]
pub struct WorkerContext {
    bus: EventBus,
    store: Arc<Store>,
    pub layout: MediaLayout,
}

impl WorkerContext {
    pub fn new(bus: EventBus, store: Arc<Store>, layout: MediaLayout) -> Self {
        Self { bus, store, layout }
    }

    fn now_ms(&self) -> u64 {
        SystemClock.epoch_ms()
    }

    /// The job's persisted state right now, if it still exists.
    pub fn job_state(&self, id: &JobId) -> Option<JobState> {
        self.store.get_job(id).ok().map(|j| j.state)
    }

    /// Cancellation probe: true when the job was canceled or deleted while
    /// the worker ran.
    pub fn is_canceled(&self, id: &JobId) -> bool {
        !matches!(self.job_state(id), Some(state) if state != JobState::Canceled)
    }

    pub fn publish(&self, id: &JobId, payload: ChannelPayload) {
        self.bus
            .publish(BusMessage::new(id.clone(), self.now_ms(), payload));
    }

    /// Publish a transition from the job's current persisted state.
    pub fn publish_state(&self, id: &JobId, to: JobState) {
        let from = self.job_state(id).unwrap_or(JobState::Queued);
        self.publish(id, ChannelPayload::State { from, to });
    }

    pub fn publish_progress(&self, id: &JobId, stage: ProgressStage, percent: f64) {
        self.publish(
            id,
            ChannelPayload::Progress {
                stage,
                percent,
                downloaded_bytes: None,
                total_bytes: None,
                speed: None,
                eta: None,
            },
        );
    }

    pub fn publish_log(&self, id: &JobId, level: LogLevel, message: impl Into<String>) {
        self.publish(
            id,
            ChannelPayload::Log {
                level,
                message: message.into(),
            },
        );
    }

    pub fn publish_error(&self, id: &JobId, error: &WorkerError) {
        self.publish(
            id,
            ChannelPayload::Error {
                code: error.code.clone(),
                message: error.message.clone(),
                retryable: error.retryable,
                stack: error.stack.clone(),
            },
        );
    }

    /// Record media metadata. The patch lands in the store synchronously
    /// so the next stage's payload can be built the moment this worker
    /// returns; the bus copy re-applies idempotently at the aggregator.
    pub fn publish_metadata(&self, id: &JobId, patch: MediaPatch) {
        if let Err(e) = self.store.update_media(id, &patch) {
            warn!(job = %id, error = %e, "media patch not applied");
        }
        self.publish(id, ChannelPayload::Metadata { patch });
    }
}

/// Poll `condition` every `poll` until it reports true or `deadline`
/// elapses. Readiness polling for external services (e.g. translation
/// completion) goes through this so the pipeline stays independent of
/// each tool's notification style.
pub async fn wait_for<F, Fut>(
    mut condition: F,
    poll: Duration,
    deadline: Duration,
) -> Result<(), WorkerError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, WorkerError>>,
{
    let started = tokio::time::Instant::now();
    loop {
        if condition().await? {
            return Ok(());
        }
        if started.elapsed() >= deadline {
            return Err(WorkerError::transient(
                rd_core::codes::TIMEOUT,
                format!("condition not met within {}s", deadline.as_secs()),
            ));
        }
        tokio::time::sleep(poll).await;
    }
}

#[cfg(test)]
#[path = "worker_tests.rs"]
mod tests;
