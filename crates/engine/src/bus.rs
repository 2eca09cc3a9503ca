// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process event bus: fan-out of worker events to the aggregator.
//!
//! Delivery is at-most-once to subscribers alive at publish time;
//! durability comes from the aggregator writing the store, never from the
//! bus itself. Progress messages in particular exist only here.

use rd_core::{BusMessage, ServerMessage};
use tokio::sync::broadcast;

/// Default channel capacity. Slow subscribers past this lag are skipped
/// (best-effort delivery).
const BUS_CAPACITY: usize = 1024;

/// Broadcast bus carrying every channel as a tagged sum.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<BusMessage>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(BUS_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish a message to all live subscribers. Messages published with
    /// no subscriber are dropped, by design.
    pub fn publish(&self, msg: BusMessage) {
        let _ = self.tx.send(msg);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BusMessage> {
        self.tx.subscribe()
    }

    /// Number of live subscribers (for health reporting).
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Push seam toward subscribed clients.
///
/// The aggregator forwards worker events through this; the job service
/// forwards control-op transitions (cancel) the same way. The daemon's
/// subscription gateway is the production implementation.
pub trait Forward: Send + Sync + 'static {
    fn forward(&self, msg: ServerMessage);
}

/// Discards every frame. For tests and headless operation.
#[derive(Clone, Default)]
pub struct NullForward;

impl Forward for NullForward {
    fn forward(&self, _msg: ServerMessage) {}
}

#[cfg(test)]
#[path = "bus_tests.rs"]
mod tests;
