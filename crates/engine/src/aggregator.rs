// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event aggregator: the single long-lived bus subscriber.
//!
//! Messages are handled strictly in arrival order. Per channel:
//! progress is forwarded only; state changes and logs are persisted and
//! forwarded; errors are persisted and fail the job when non-retryable;
//! metadata patches the media row silently. Store writes never depend on
//! whether any client is connected.

use crate::bus::{EventBus, Forward};
use rd_core::{
    BusMessage, ChannelPayload, Clock, JobEventKind, JobState, ServerMessage, ServerMessageKind,
};
use rd_storage::{Store, StoreError};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, warn};

/// The single consumer multiplexing worker events into the store and out
/// to per-job subscription rooms.
pub struct EventAggregator<C: Clock> {
    store: Arc<Store>,
    forwarder: Arc<dyn Forward>,
    clock: C,
}

impl<C: Clock> EventAggregator<C> {
    pub fn new(store: Arc<Store>, forwarder: Arc<dyn Forward>, clock: C) -> Self {
        Self {
            store,
            forwarder,
            clock,
        }
    }

    /// Consume the bus until it closes. Run as a dedicated task.
    pub async fn run(self, bus: &EventBus) {
        let mut rx = bus.subscribe();
        loop {
            match rx.recv().await {
                Ok(msg) => self.handle(&msg),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "aggregator lagged behind the bus");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("bus closed, aggregator stopping");
                    return;
                }
            }
        }
    }

    /// Apply one message. Public so tests can drive the aggregator
    /// without a live bus.
    pub fn handle(&self, msg: &BusMessage) {
        let now = self.clock.epoch_ms();

        // A worker outliving cancel/delete may still emit; its final
        // transition is ignored because terminal states have no exits.
        let current = match &msg.payload {
            ChannelPayload::State { .. } | ChannelPayload::Error { .. } => {
                match self.store.get_job(&msg.job_id) {
                    Ok(job) if job.is_terminal() => {
                        debug!(job = %msg.job_id, "dropping event for terminal job");
                        return;
                    }
                    Ok(job) => Some(job.state),
                    Err(_) => None,
                }
            }
            _ => None,
        };

        let result = match &msg.payload {
            ChannelPayload::Progress { .. } => {
                // Never persisted; live subscribers only
                self.forward(msg, ServerMessageKind::Progress);
                Ok(())
            }

            ChannelPayload::State { to, .. } => {
                // Redelivered transition (a retried attempt re-enters its
                // stage): already applied, nothing to record
                if current == Some(*to) {
                    return;
                }
                let applied = self
                    .store
                    .transition_job(&msg.job_id, *to, None, now)
                    .map(|_| ());
                if applied.is_ok() {
                    if *to == JobState::Complete {
                        let _ = self.store.append_event(
                            &msg.job_id,
                            JobEventKind::Finished,
                            json!({}),
                            now,
                        );
                    }
                    self.forward(msg, ServerMessageKind::StateChange);
                }
                applied
            }

            ChannelPayload::Log { level, message } => {
                let applied = self
                    .store
                    .append_event(
                        &msg.job_id,
                        JobEventKind::Log,
                        json!({ "level": level, "message": message }),
                        now,
                    )
                    .map(|_| ());
                if applied.is_ok() {
                    self.forward(msg, ServerMessageKind::Log);
                }
                applied
            }

            ChannelPayload::Error {
                code,
                message,
                retryable,
                stack,
            } => {
                let mut payload = json!({
                    "code": code,
                    "message": message,
                    "retryable": retryable,
                });
                if let Some(stack) = stack {
                    payload["stack"] = json!(stack);
                }
                let applied = self
                    .store
                    .append_event(&msg.job_id, JobEventKind::Error, payload, now)
                    .map(|_| ());
                if applied.is_ok() {
                    if !retryable {
                        if let Err(e) = self.store.transition_job(
                            &msg.job_id,
                            JobState::Failed,
                            Some(message),
                            now,
                        ) {
                            error!(job = %msg.job_id, error = %e, "failed to mark job failed");
                        }
                    }
                    self.forward(msg, ServerMessageKind::Error);
                }
                applied
            }

            ChannelPayload::Metadata { patch } => {
                // Media update only: no audit row, no forward
                self.store.update_media(&msg.job_id, patch).map(|_| ())
            }
        };

        match result {
            Ok(()) => {}
            // The job was deleted while events were in flight
            Err(StoreError::NotFound { .. }) => {
                debug!(job = %msg.job_id, "dropping event for unknown job");
            }
            Err(e) => {
                error!(job = %msg.job_id, error = %e, "aggregator store write failed");
            }
        }
    }

    fn forward(&self, msg: &BusMessage, kind: ServerMessageKind) {
        let mut payload = serde_json::to_value(&msg.payload).unwrap_or_else(|_| json!({}));
        if let Some(obj) = payload.as_object_mut() {
            obj.remove("kind");
        }
        self.forwarder.forward(ServerMessage::for_job(
            msg.job_id.clone(),
            kind,
            msg.timestamp_ms,
            payload,
        ));
    }
}

#[cfg(test)]
#[path = "aggregator_tests.rs"]
mod tests;
