// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `/ws`: the real-time subscription endpoint.
//!
//! Clients authenticate with `?token=` on the upgrade request, then send
//! `{action: subscribe|unsubscribe, jobIds: [...]}` frames. Server frames
//! are the aggregator's `{jobId, type, timestamp, payload}` messages.
//! Closing the connection is the sole cancellation mechanism.

use super::{ApiError, AppState};
use crate::gateway::ClientId;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use rd_core::{IdGen, JobId, UuidIdGen};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
pub(crate) struct WsQuery {
    token: Option<String>,
}

/// Client→server frame.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClientFrame {
    action: ClientAction,
    #[serde(default)]
    job_ids: Vec<String>,
}

#[derive(Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
enum ClientAction {
    Subscribe,
    Unsubscribe,
}

pub(crate) async fn subscribe(
    State(state): State<Arc<AppState>>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let token = query
        .token
        .as_deref()
        .ok_or_else(|| ApiError::unauthorized("missing token"))?;
    state.auth.authenticate(token)?;

    Ok(ws.on_upgrade(move |socket| client_loop(state, socket)))
}

async fn client_loop(state: Arc<AppState>, mut socket: WebSocket) {
    let client = ClientId::new(UuidIdGen.next());
    let (tx, mut rx) = mpsc::unbounded_channel();
    state.gateway.connect(client.clone(), tx);

    loop {
        tokio::select! {
            frame = socket.recv() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        handle_client_frame(&state.gateway, &client, text.as_str());
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(client = %client, error = %e, "socket error");
                        break;
                    }
                }
            }
            outbound = rx.recv() => {
                let Some(msg) = outbound else { break };
                let Ok(text) = serde_json::to_string(&msg) else { continue };
                if socket.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
        }
    }

    state.gateway.disconnect(&client);
}

fn handle_client_frame(gateway: &crate::gateway::SubscriptionGateway, client: &ClientId, text: &str) {
    let frame: ClientFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(client = %client, error = %e, "unparseable client frame");
            return;
        }
    };
    let ids: Vec<JobId> = frame.job_ids.into_iter().map(JobId::new).collect();
    match frame.action {
        ClientAction::Subscribe => gateway.subscribe(client, &ids),
        ClientAction::Unsubscribe => gateway.unsubscribe(client, &ids),
    }
}

#[cfg(test)]
#[path = "ws_tests.rs"]
mod tests;
