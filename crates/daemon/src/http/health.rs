// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `/healthz`: liveness plus dependency probes. Unauthenticated.

use super::AppState;
use axum::extract::State;
use axum::Json;
use rd_core::{Clock, QueueName, SystemClock};
use serde_json::{json, Value};
use std::sync::Arc;

pub(crate) async fn healthz(State(state): State<Arc<AppState>>) -> Json<Value> {
    // A readable materialized state answers for the db probe
    let job_count = state.store.with_state(|s| s.jobs.len());
    let db = "ok";

    // Queue tables live in the same store; counting entries proves the
    // coordinator's durable handle is reachable
    let queues: Value = QueueName::ALL
        .into_iter()
        .map(|q| (q.as_str().to_string(), json!(state.store.queue_stats(q))))
        .collect::<serde_json::Map<_, _>>()
        .into();
    let queue = "ok";

    let (filesystem, degraded) = match fs2::available_space(state.layout.root()) {
        Ok(bytes) => {
            let free_gb = bytes as f64 / 1_000_000_000.0;
            if free_gb < state.min_free_space_gb {
                ("low_space", true)
            } else {
                ("ok", false)
            }
        }
        Err(_) => ("error", true),
    };

    let status = if filesystem == "error" {
        "unhealthy"
    } else if degraded {
        "degraded"
    } else {
        "ok"
    };

    Json(json!({
        "status": status,
        "uptime": state.start_time.elapsed().as_secs(),
        "timestamp": SystemClock.epoch_ms(),
        "dependencies": {
            "queue": queue,
            "db": db,
            "filesystem": filesystem,
        },
        "jobs": job_count,
        "queues": queues,
    }))
}
