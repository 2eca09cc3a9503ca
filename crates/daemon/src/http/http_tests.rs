// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::gateway::SubscriptionGateway;
use axum::http::StatusCode;
use axum_test::TestServer;
use rd_core::{JobId, JobState};
use rd_engine::{JobDefaults, QueueHandle};
use serde_json::{json, Value};
use tempfile::TempDir;

struct Fixture {
    _dir: TempDir,
    server: TestServer,
    state: Arc<AppState>,
}

fn fixture() -> Fixture {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(Store::open(&dir.path().join("state")).unwrap());
    let layout = MediaLayout::new(dir.path().join("media"));
    layout.ensure_dirs().unwrap();

    let gateway = Arc::new(SubscriptionGateway::new());
    let service = Arc::new(JobService::new(
        Arc::clone(&store),
        QueueHandle::new(Arc::clone(&store)),
        layout.clone(),
        Arc::clone(&gateway) as Arc<dyn rd_engine::Forward>,
        JobDefaults {
            min_free_space_gb: 0.0,
            ..JobDefaults::default()
        },
        SystemClock,
    ));

    let auth = Auth::new(Arc::clone(&store), "test-secret", 3600);
    auth.bootstrap_admin("admin", "hunter2").unwrap();

    let state = Arc::new(AppState {
        service,
        store,
        auth,
        gateway,
        layout,
        min_free_space_gb: 0.0,
        start_time: Instant::now(),
    });
    let server = TestServer::new(router(Arc::clone(&state))).unwrap();
    Fixture {
        _dir: dir,
        server,
        state,
    }
}

async fn login(f: &Fixture) -> String {
    let response = f
        .server
        .post("/auth/login")
        .json(&json!({ "username": "admin", "password": "hunter2" }))
        .await;
    response.assert_status_ok();
    response.json::<Value>()["token"]
        .as_str()
        .unwrap()
        .to_string()
}

fn bearer(token: &str) -> String {
    format!("Bearer {token}")
}

async fn create_job(f: &Fixture, token: &str, url: &str, dubbing: bool) -> Value {
    let response = f
        .server
        .post("/jobs")
        .add_header("authorization", bearer(token))
        .json(&json!({ "url": url, "requestedDubbing": dubbing }))
        .await;
    response.assert_status(StatusCode::CREATED);
    response.json::<Value>()
}

// ── auth ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn login_logout_me_flow() {
    let f = fixture();
    let token = login(&f).await;

    let me = f
        .server
        .get("/auth/me")
        .add_header("authorization", bearer(&token))
        .await;
    me.assert_status_ok();
    assert_eq!(me.json::<Value>()["username"], "admin");
    assert_eq!(me.json::<Value>()["role"], "admin");

    let logout = f
        .server
        .post("/auth/logout")
        .add_header("authorization", bearer(&token))
        .await;
    logout.assert_status(StatusCode::NO_CONTENT);

    let me_again = f
        .server
        .get("/auth/me")
        .add_header("authorization", bearer(&token))
        .await;
    me_again.assert_status(StatusCode::UNAUTHORIZED);
    assert_eq!(me_again.json::<Value>()["code"], "session_expired");
}

#[tokio::test]
async fn bad_credentials_get_401() {
    let f = fixture();
    let response = f
        .server
        .post("/auth/login")
        .json(&json!({ "username": "admin", "password": "wrong" }))
        .await;
    response.assert_status(StatusCode::UNAUTHORIZED);
    assert_eq!(response.json::<Value>()["code"], "unauthorized");
}

#[tokio::test]
async fn job_endpoints_require_a_token() {
    let f = fixture();
    let response = f
        .server
        .post("/jobs")
        .json(&json!({ "url": "https://example.test/v1" }))
        .await;
    response.assert_status(StatusCode::UNAUTHORIZED);
}

// ── jobs ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn create_then_get_and_list() {
    let f = fixture();
    let token = login(&f).await;
    let job = create_job(&f, &token, "https://example.test/v1", false).await;
    assert_eq!(job["state"], "queued");
    let id = job["id"].as_str().unwrap();

    let detail = f
        .server
        .get(&format!("/jobs/{id}"))
        .add_header("authorization", bearer(&token))
        .await;
    detail.assert_status_ok();
    let detail = detail.json::<Value>();
    assert_eq!(detail["job"]["id"], id);
    assert_eq!(detail["media"]["job_id"], id);
    assert_eq!(detail["events"][0]["kind"], "started");

    let list = f
        .server
        .get("/jobs")
        .add_header("authorization", bearer(&token))
        .await;
    list.assert_status_ok();
    let list = list.json::<Value>();
    assert_eq!(list["total"], 1);
    assert_eq!(list["jobs"][0]["id"], id);

    let filtered = f
        .server
        .get("/jobs?status=complete")
        .add_header("authorization", bearer(&token))
        .await;
    assert_eq!(filtered.json::<Value>()["total"], 0);

    let searched = f
        .server
        .get("/jobs?search=example.test")
        .add_header("authorization", bearer(&token))
        .await;
    assert_eq!(searched.json::<Value>()["total"], 1);
}

#[tokio::test]
async fn create_rejects_invalid_urls() {
    let f = fixture();
    let token = login(&f).await;
    let response = f
        .server
        .post("/jobs")
        .add_header("authorization", bearer(&token))
        .json(&json!({ "url": "ftp://example.test/v1" }))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(response.json::<Value>()["code"], "validation");
}

#[tokio::test]
async fn unknown_status_filter_is_rejected() {
    let f = fixture();
    let token = login(&f).await;
    let response = f
        .server
        .get("/jobs?status=paused")
        .add_header("authorization", bearer(&token))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn cancel_delete_get_lifecycle() {
    let f = fixture();
    let token = login(&f).await;
    let job = create_job(&f, &token, "https://example.test/v1", false).await;
    let id = job["id"].as_str().unwrap();

    let canceled = f
        .server
        .post(&format!("/jobs/{id}/cancel"))
        .add_header("authorization", bearer(&token))
        .await;
    canceled.assert_status_ok();
    assert_eq!(canceled.json::<Value>()["state"], "canceled");

    let deleted = f
        .server
        .delete(&format!("/jobs/{id}"))
        .add_header("authorization", bearer(&token))
        .await;
    deleted.assert_status(StatusCode::NO_CONTENT);

    let gone = f
        .server
        .get(&format!("/jobs/{id}"))
        .add_header("authorization", bearer(&token))
        .await;
    gone.assert_status(StatusCode::NOT_FOUND);
    assert_eq!(gone.json::<Value>()["code"], "not_found");
}

#[tokio::test]
async fn retry_needs_a_terminal_job() {
    let f = fixture();
    let token = login(&f).await;
    let job = create_job(&f, &token, "https://example.test/v1", false).await;
    let id = job["id"].as_str().unwrap();

    let early = f
        .server
        .post(&format!("/jobs/{id}/retry"))
        .add_header("authorization", bearer(&token))
        .await;
    early.assert_status(StatusCode::BAD_REQUEST);
    assert_eq!(early.json::<Value>()["code"], "invalid_state");

    f.state
        .store
        .transition_job(&JobId::new(id), JobState::Failed, Some("boom"), 2_000)
        .unwrap();

    let retried = f
        .server
        .post(&format!("/jobs/{id}/retry"))
        .add_header("authorization", bearer(&token))
        .await;
    retried.assert_status_ok();
    let retried = retried.json::<Value>();
    assert_eq!(retried["state"], "queued");
    assert_eq!(retried["retry_count"], 1);
}

#[tokio::test]
async fn resume_without_evidence_is_cannot_resume() {
    let f = fixture();
    let token = login(&f).await;
    let job = create_job(&f, &token, "https://example.test/v1", true).await;
    let id = job["id"].as_str().unwrap();
    f.state
        .store
        .transition_job(&JobId::new(id), JobState::Failed, Some("boom"), 2_000)
        .unwrap();

    let response = f
        .server
        .post(&format!("/jobs/{id}/resume"))
        .add_header("authorization", bearer(&token))
        .await;
    response.assert_status(StatusCode::BAD_REQUEST);
    let body = response.json::<Value>();
    assert_eq!(body["code"], "cannot_resume");
    assert_eq!(body["details"]["downloadCompleted"], false);
    assert_eq!(body["details"]["hasVideo"], false);
    assert_eq!(body["details"]["requestedDubbing"], true);
}

#[tokio::test]
async fn control_prioritize_and_reserved_actions() {
    let f = fixture();
    let token = login(&f).await;
    let job = create_job(&f, &token, "https://example.test/v1", false).await;
    let id = job["id"].as_str().unwrap();

    let prioritized = f
        .server
        .post(&format!("/jobs/{id}/control"))
        .add_header("authorization", bearer(&token))
        .json(&json!({ "action": "prioritize", "priority": 9 }))
        .await;
    prioritized.assert_status_ok();
    assert_eq!(prioritized.json::<Value>()["priority"], 9);

    let paused = f
        .server
        .post(&format!("/jobs/{id}/control"))
        .add_header("authorization", bearer(&token))
        .json(&json!({ "action": "pause" }))
        .await;
    paused.assert_status(StatusCode::NOT_IMPLEMENTED);

    let unknown = f
        .server
        .post(&format!("/jobs/{id}/control"))
        .add_header("authorization", bearer(&token))
        .json(&json!({ "action": "shuffle" }))
        .await;
    unknown.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn logs_paginate_newest_first() {
    let f = fixture();
    let token = login(&f).await;
    let job = create_job(&f, &token, "https://example.test/v1", false).await;
    let id = JobId::new(job["id"].as_str().unwrap());

    f.state
        .store
        .transition_job(&id, JobState::Downloading, None, 2_000)
        .unwrap();
    f.state
        .store
        .transition_job(&id, JobState::Downloaded, None, 3_000)
        .unwrap();

    let logs = f
        .server
        .get(&format!("/jobs/{id}/logs?limit=2"))
        .add_header("authorization", bearer(&token))
        .await;
    logs.assert_status_ok();
    let body = logs.json::<Value>();
    assert_eq!(body["total"], 3);
    assert_eq!(body["limit"], 2);
    assert_eq!(body["events"][0]["payload"]["to"], "downloaded");
    assert_eq!(body["events"][1]["payload"]["to"], "downloading");
}

// ── health ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn healthz_is_public_and_reports_dependencies() {
    let f = fixture();
    let response = f.server.get("/healthz").await;
    response.assert_status_ok();
    let body = response.json::<Value>();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["dependencies"]["db"], "ok");
    assert_eq!(body["dependencies"]["queue"], "ok");
    assert_eq!(body["dependencies"]["filesystem"], "ok");
}
