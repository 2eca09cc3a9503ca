// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Queue coordinator: priority dispatch over the three worker pools.
//!
//! Entries live in the store (the queue's durable handle shares the
//! journal with the rest of persistence). Each queue gets a dispatcher
//! task with semaphore-bounded concurrency: at any instant the number of
//! in-flight entries never exceeds the queue's limit. Transient worker
//! errors are re-dispatched with exponential backoff; when attempts run
//! out the coordinator publishes a non-retryable error event and the
//! aggregator fails the job.

use crate::bus::EventBus;
use crate::service::JobService;
use crate::worker::{Worker, WorkerContext};
use rd_core::{codes, Clock, JobId, JobState, QueueName, QueueSettings, WorkerError};
use rd_storage::{QueueEntry, QueueStats, Store, StoreError};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, Semaphore};
use tracing::{debug, error, info, warn};

/// Idle poll cap: delayed entries become visible within this window even
/// without a wake signal.
const IDLE_POLL: Duration = Duration::from_millis(500);

/// Pause after a store error in the dispatch loop.
const ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Reap cadence for terminal entries past retention.
const REAP_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// What to do with entries left `active` by a crash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecoverPolicy {
    /// Re-dispatch (default).
    #[default]
    Requeue,
    /// Fail them and let the aggregator fail the jobs.
    Fail,
}

/// Per-queue settings plus restart policy.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    settings: HashMap<QueueName, QueueSettings>,
    pub recover: RecoverPolicy,
    pub reap_interval: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            settings: QueueName::ALL
                .into_iter()
                .map(|q| (q, QueueSettings::defaults(q)))
                .collect(),
            recover: RecoverPolicy::default(),
            reap_interval: REAP_INTERVAL,
        }
    }
}

impl CoordinatorConfig {
    pub fn settings(&self, queue: QueueName) -> QueueSettings {
        self.settings
            .get(&queue)
            .cloned()
            .unwrap_or_else(|| QueueSettings::defaults(queue))
    }

    pub fn set_settings(&mut self, queue: QueueName, settings: QueueSettings) {
        self.settings.insert(queue, settings);
    }

    /// Apply configured concurrency to one queue.
    pub fn with_concurrency(mut self, queue: QueueName, concurrency: u32) -> Self {
        let settings = self.settings(queue).with_concurrency(concurrency);
        self.settings.insert(queue, settings);
        self
    }
}

/// Lightweight enqueue/remove/wake handle shared by the job service and
/// the coordinator. Cloning is cheap.
#[derive(Clone)]
pub struct QueueHandle {
    store: Arc<Store>,
    wakes: Arc<HashMap<QueueName, Arc<Notify>>>,
}

impl QueueHandle {
    pub fn new(store: Arc<Store>) -> Self {
        let wakes = QueueName::ALL
            .into_iter()
            .map(|q| (q, Arc::new(Notify::new())))
            .collect();
        Self {
            store,
            wakes: Arc::new(wakes),
        }
    }

    /// Idempotent enqueue, then wake the queue's dispatcher.
    pub fn enqueue(
        &self,
        payload: rd_core::QueuePayload,
        priority: u8,
        now_ms: u64,
    ) -> Result<QueueEntry, StoreError> {
        let queue = payload.queue();
        let entry = self.store.enqueue(payload, priority, now_ms)?;
        self.wake(queue).notify_one();
        Ok(entry)
    }

    /// Best-effort removal of a live entry.
    pub fn remove(&self, queue: QueueName, job_id: &JobId) -> Result<(), StoreError> {
        self.store.remove_entry(queue, job_id)
    }

    pub fn wake(&self, queue: QueueName) -> Arc<Notify> {
        Arc::clone(&self.wakes[&queue])
    }

    pub fn wake_all(&self) {
        for wake in self.wakes.values() {
            wake.notify_one();
        }
    }
}

/// Drives the three queues.
pub struct QueueCoordinator<C: Clock> {
    store: Arc<Store>,
    queue: QueueHandle,
    service: Arc<JobService<C>>,
    workers: HashMap<QueueName, Arc<dyn Worker>>,
    config: CoordinatorConfig,
    ctx: WorkerContext,
    clock: C,
}

impl<C: Clock + 'static> QueueCoordinator<C> {
    pub fn new(
        store: Arc<Store>,
        bus: EventBus,
        queue: QueueHandle,
        service: Arc<JobService<C>>,
        workers: HashMap<QueueName, Arc<dyn Worker>>,
        config: CoordinatorConfig,
        clock: C,
    ) -> Self {
        let ctx = WorkerContext::new(bus, Arc::clone(&store), service.layout().clone());
        Self {
            store,
            queue,
            service,
            workers,
            config,
            ctx,
            clock,
        }
    }

    pub fn stats(&self, queue: QueueName) -> QueueStats {
        self.store.queue_stats(queue)
    }

    /// Restart recovery: entries left `active` without a live worker are
    /// re-dispatched or failed, per policy.
    pub fn recover(&self) -> Result<(), StoreError> {
        for queue in QueueName::ALL {
            match self.config.recover {
                RecoverPolicy::Requeue => {
                    let restored = self.store.requeue_active(queue)?;
                    if !restored.is_empty() {
                        info!(queue = %queue, count = restored.len(), "re-dispatching stranded entries");
                    }
                }
                RecoverPolicy::Fail => {
                    let now = self.clock.epoch_ms();
                    let stranded = self.store.fail_active(queue, "worker lost at restart", now)?;
                    for job_id in stranded {
                        let err =
                            WorkerError::permanent(codes::TOOL_FAILED, "worker lost at restart");
                        self.ctx.publish_error(&job_id, &err);
                    }
                }
            }
        }
        self.queue.wake_all();
        Ok(())
    }

    /// Spawn the per-queue dispatchers and the reaper. Detached tasks;
    /// they stop when the runtime shuts down.
    pub fn start(self: &Arc<Self>) {
        for queue in QueueName::ALL {
            let this = Arc::clone(self);
            tokio::spawn(async move { this.dispatch_loop(queue).await });
        }
        let this = Arc::clone(self);
        tokio::spawn(async move { this.reap_loop().await });
    }

    async fn dispatch_loop(self: Arc<Self>, queue: QueueName) {
        let settings = self.config.settings(queue);
        let semaphore = Arc::new(Semaphore::new(settings.concurrency.max(1) as usize));
        debug!(queue = %queue, concurrency = settings.concurrency, "dispatcher started");

        loop {
            let permit = match Arc::clone(&semaphore).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };

            let entry = loop {
                let now = self.clock.epoch_ms();
                match self.store.take_next(queue, now) {
                    Ok(Some(entry)) => break entry,
                    Ok(None) => {
                        let wake = self.queue.wake(queue);
                        let until_due = self
                            .store
                            .next_delay(queue)
                            .map(|until| Duration::from_millis(until.saturating_sub(now)))
                            .unwrap_or(IDLE_POLL);
                        tokio::select! {
                            _ = wake.notified() => {}
                            _ = tokio::time::sleep(until_due.min(IDLE_POLL)) => {}
                        }
                    }
                    Err(e) => {
                        error!(queue = %queue, error = %e, "take_next failed");
                        tokio::time::sleep(ERROR_BACKOFF).await;
                    }
                }
            };

            let this = Arc::clone(&self);
            tokio::spawn(async move {
                this.run_entry(queue, entry).await;
                drop(permit);
            });
        }
    }

    /// Run one attempt of one entry, then settle it.
    async fn run_entry(&self, queue: QueueName, entry: QueueEntry) {
        let job_id = entry.job_id.clone();
        let settings = self.config.settings(queue);

        // Canceled or deleted while waiting: drop the entry quietly
        match self.store.get_job(&job_id) {
            Ok(job) if job.state != JobState::Canceled => {}
            _ => {
                let _ = self.store.remove_entry(queue, &job_id);
                return;
            }
        }

        let Some(worker) = self.workers.get(&queue).map(Arc::clone) else {
            warn!(queue = %queue, "no worker registered");
            let now = self.clock.epoch_ms();
            let _ = self
                .store
                .fail_entry(queue, &job_id, "no worker registered", now);
            return;
        };

        debug!(queue = %queue, job = %job_id, attempt = entry.attempt, "dispatching");
        let result = tokio::time::timeout(settings.timeout(), worker.run(&entry.payload, &self.ctx)).await;
        let now = self.clock.epoch_ms();

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(_) => Err(WorkerError::transient(
                codes::TIMEOUT,
                format!("attempt exceeded {}s", settings.timeout().as_secs()),
            )),
        };

        // A cancel+retry while the worker ran replaces the entry with a
        // fresh lineage (new seq); this attempt must not settle that one.
        let entry_is_current = || {
            self.store
                .queue_entry(queue, &job_id)
                .map(|current| current.seq)
                == Some(entry.seq)
        };
        if !entry_is_current() {
            debug!(queue = %queue, job = %job_id, "entry replaced mid-run, dropping outcome");
            return;
        }

        match outcome {
            Ok(()) => {
                if let Err(e) = self.store.complete_entry(queue, &job_id, now) {
                    warn!(queue = %queue, job = %job_id, error = %e, "complete_entry failed");
                }
                match self.service.enqueue_next_stage(&job_id, queue) {
                    Ok(Some(next)) => debug!(job = %job_id, next = %next, "stage chained"),
                    Ok(None) => {}
                    Err(e) => {
                        // Chaining needs artifacts the worker should have
                        // recorded; surface the gap as a permanent failure.
                        let err = WorkerError::permanent(codes::MISSING_INPUT, e.to_string());
                        self.ctx.publish_error(&job_id, &err);
                    }
                }
            }

            Err(err) if err.code == codes::CANCELED => {
                let _ = self.store.remove_entry(queue, &job_id);
            }

            Err(err) if err.retryable && entry.attempt < settings.attempts => {
                let delay = settings.backoff_delay(entry.attempt);
                let until = now + delay.as_millis() as u64;
                debug!(
                    queue = %queue, job = %job_id, attempt = entry.attempt,
                    delay_ms = delay.as_millis() as u64, "transient failure, backing off"
                );
                let _ = self
                    .store
                    .delay_entry(queue, &job_id, until, &err.to_string());
                if err.code == codes::TIMEOUT {
                    // The worker was cut off and could not publish its own error
                    self.ctx.publish_error(&job_id, &err);
                }
                let wake = self.queue.wake(queue);
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    wake.notify_one();
                });
            }

            Err(err) => {
                // Permanent, or transient with attempts exhausted. Workers
                // publish their own permanent errors; the give-up after
                // retries is ours to report.
                let _ = self.store.fail_entry(queue, &job_id, &err.to_string(), now);
                if err.retryable || err.code == codes::TIMEOUT {
                    let give_up = WorkerError {
                        retryable: false,
                        ..err
                    };
                    self.ctx.publish_error(&job_id, &give_up);
                }
            }
        }
    }

    async fn reap_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.config.reap_interval);
        loop {
            interval.tick().await;
            let now = self.clock.epoch_ms();
            for queue in QueueName::ALL {
                if let Err(e) = self.store.reap_queue(queue, now) {
                    warn!(queue = %queue, error = %e, "reap failed");
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "coordinator_tests.rs"]
mod tests;
