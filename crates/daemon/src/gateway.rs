// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Subscription gateway: ref-counted per-client job subscriptions fanned
//! out through per-job rooms.
//!
//! A client subscribed to a job at the moment a frame is forwarded
//! receives exactly one copy; an unsubscribed client receives none.
//! Global frames (job_added, job_removed, notification) reach every
//! connected client. Disconnect clears all of the client's refs.

use parking_lot::Mutex;
use rd_core::{JobId, ServerMessage};
use rd_engine::Forward;
use std::collections::{HashMap, HashSet};
use tokio::sync::mpsc;
use tracing::debug;

rd_core::define_id! {
    /// Identifier for one connected subscription client.
    pub struct ClientId;
}

struct Client {
    tx: mpsc::UnboundedSender<ServerMessage>,
    /// Reference counts per subscribed job id.
    refs: HashMap<String, usize>,
}

#[derive(Default)]
struct GatewayInner {
    clients: HashMap<ClientId, Client>,
    /// Job id → clients in its fan-out room.
    rooms: HashMap<String, HashSet<ClientId>>,
}

/// Registry of connected clients and their fan-out rooms.
#[derive(Default)]
pub struct SubscriptionGateway {
    inner: Mutex<GatewayInner>,
}

impl SubscriptionGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection; frames for the client flow through `tx`.
    pub fn connect(&self, id: ClientId, tx: mpsc::UnboundedSender<ServerMessage>) {
        let mut inner = self.inner.lock();
        inner.clients.insert(
            id.clone(),
            Client {
                tx,
                refs: HashMap::new(),
            },
        );
        debug!(client = %id, "client connected");
    }

    /// Drop the client and leave every room it was in.
    pub fn disconnect(&self, id: &ClientId) {
        let mut inner = self.inner.lock();
        if let Some(client) = inner.clients.remove(id) {
            for job in client.refs.keys() {
                if let Some(room) = inner.rooms.get_mut(job) {
                    room.remove(id);
                    if room.is_empty() {
                        inner.rooms.remove(job);
                    }
                }
            }
        }
        debug!(client = %id, "client disconnected");
    }

    /// Increment refs; the 0→1 edge joins the room.
    pub fn subscribe(&self, id: &ClientId, jobs: &[JobId]) {
        let mut inner = self.inner.lock();
        let GatewayInner { clients, rooms } = &mut *inner;
        let Some(client) = clients.get_mut(id) else {
            return;
        };
        for job in jobs {
            let count = client.refs.entry(job.as_str().to_string()).or_insert(0);
            *count += 1;
            if *count == 1 {
                rooms
                    .entry(job.as_str().to_string())
                    .or_default()
                    .insert(id.clone());
            }
        }
    }

    /// Decrement refs; the 1→0 edge leaves the room.
    pub fn unsubscribe(&self, id: &ClientId, jobs: &[JobId]) {
        let mut inner = self.inner.lock();
        let GatewayInner { clients, rooms } = &mut *inner;
        let Some(client) = clients.get_mut(id) else {
            return;
        };
        for job in jobs {
            let Some(count) = client.refs.get_mut(job.as_str()) else {
                continue;
            };
            *count -= 1;
            if *count == 0 {
                client.refs.remove(job.as_str());
                if let Some(room) = rooms.get_mut(job.as_str()) {
                    room.remove(id);
                    if room.is_empty() {
                        rooms.remove(job.as_str());
                    }
                }
            }
        }
    }

    /// Number of connected clients (for health reporting).
    pub fn client_count(&self) -> usize {
        self.inner.lock().clients.len()
    }
}

impl Forward for SubscriptionGateway {
    fn forward(&self, msg: ServerMessage) {
        let inner = self.inner.lock();
        match &msg.job_id {
            Some(job) => {
                let Some(room) = inner.rooms.get(job.as_str()) else {
                    return;
                };
                for client_id in room {
                    if let Some(client) = inner.clients.get(client_id) {
                        let _ = client.tx.send(msg.clone());
                    }
                }
            }
            None => {
                for client in inner.clients.values() {
                    let _ = client.tx.send(msg.clone());
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "gateway_tests.rs"]
mod tests;
