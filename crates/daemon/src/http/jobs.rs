// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `/jobs` endpoints.

use super::{require_auth, ApiError, AppState};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use rd_core::{JobId, JobState};
use rd_engine::CreateJobRequest;
use rd_storage::JobFilter;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

/// Recent events included in the job detail response.
const DETAIL_EVENT_COUNT: usize = 20;

/// Default page size for logs.
const DEFAULT_LOG_LIMIT: usize = 50;

/// Wire shape of the creation request (camelCase per the API contract).
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct CreateRequest {
    url: String,
    requested_dubbing: Option<bool>,
    target_lang: Option<String>,
    use_lively_voice: Option<bool>,
    format_preset: Option<String>,
    output_container: Option<String>,
    download_subtitles: Option<bool>,
    priority: Option<u8>,
    cookies: Option<String>,
}

impl From<CreateRequest> for CreateJobRequest {
    fn from(req: CreateRequest) -> Self {
        CreateJobRequest {
            url: req.url,
            dubbing: req.requested_dubbing,
            target_lang: req.target_lang,
            lively_voice: req.use_lively_voice,
            format_preset: req.format_preset,
            container: req.output_container,
            subtitles: req.download_subtitles,
            priority: req.priority,
            cookies: req.cookies,
        }
    }
}

/// `POST /jobs` → 201 job.
pub(crate) async fn create(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CreateRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    require_auth(&state, &headers)?;
    let job = state.service.create_job(&req.into())?;
    Ok((StatusCode::CREATED, Json(json!(job))))
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ListQuery {
    status: Option<String>,
    search: Option<String>,
    limit: Option<usize>,
    offset: Option<usize>,
}

/// `GET /jobs` → `{jobs, total, limit, offset}`.
pub(crate) async fn list(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> Result<Json<Value>, ApiError> {
    require_auth(&state, &headers)?;

    let status = match &query.status {
        Some(raw) => Some(JobState::parse(raw).ok_or_else(|| {
            ApiError::validation(format!("unknown status filter: {raw}"))
        })?),
        None => None,
    };
    let limit = query.limit.unwrap_or(50);
    let offset = query.offset.unwrap_or(0);

    let (jobs, total) = state.store.list_jobs(&JobFilter {
        status,
        search: query.search.clone(),
        limit,
        offset,
    });
    Ok(Json(json!({
        "jobs": jobs,
        "total": total,
        "limit": limit,
        "offset": offset,
    })))
}

/// `GET /jobs/{id}` → job + media + recent events.
pub(crate) async fn get(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    require_auth(&state, &headers)?;
    let detail = state.service.get_detail(&JobId::new(id), DETAIL_EVENT_COUNT)?;
    Ok(Json(json!({
        "job": detail.job,
        "media": detail.media,
        "events": detail.events,
    })))
}

/// `POST /jobs/{id}/cancel` → job.
pub(crate) async fn cancel(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    require_auth(&state, &headers)?;
    let job = state.service.cancel(&JobId::new(id))?;
    Ok(Json(json!(job)))
}

/// `POST /jobs/{id}/retry` → job.
pub(crate) async fn retry(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    require_auth(&state, &headers)?;
    let job = state.service.retry(&JobId::new(id))?;
    Ok(Json(json!(job)))
}

/// `POST /jobs/{id}/resume` → job + `resumedFrom`, or 400 `cannot_resume`.
pub(crate) async fn resume(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    require_auth(&state, &headers)?;
    let (job, resumed_from) = state.service.resume(&JobId::new(id))?;
    let mut body = json!(job);
    body["resumedFrom"] = json!(resumed_from);
    Ok(Json(body))
}

#[derive(Debug, Deserialize)]
pub(crate) struct ControlRequest {
    action: String,
    priority: Option<u8>,
}

/// `POST /jobs/{id}/control` → job.
pub(crate) async fn control(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(req): Json<ControlRequest>,
) -> Result<Json<Value>, ApiError> {
    require_auth(&state, &headers)?;
    let id = JobId::new(id);
    let job = match req.action.as_str() {
        "cancel" => state.service.cancel(&id)?,
        "prioritize" => {
            let priority = req
                .priority
                .ok_or_else(|| ApiError::validation("prioritize requires a priority"))?;
            state.service.prioritize(&id, priority)?
        }
        "pause" => state.service.pause(&id)?,
        "resume" => state.service.resume_control(&id)?,
        other => {
            return Err(ApiError::validation(format!("unknown action: {other}")));
        }
    };
    Ok(Json(json!(job)))
}

/// `DELETE /jobs/{id}` → 204.
pub(crate) async fn remove(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    require_auth(&state, &headers)?;
    state.service.delete(&JobId::new(id))?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct LogsQuery {
    limit: Option<usize>,
    offset: Option<usize>,
}

/// `GET /jobs/{id}/logs` → `{events, total, limit, offset}`, newest first.
pub(crate) async fn logs(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(query): Query<LogsQuery>,
) -> Result<Json<Value>, ApiError> {
    require_auth(&state, &headers)?;
    let limit = query.limit.unwrap_or(DEFAULT_LOG_LIMIT);
    let offset = query.offset.unwrap_or(0);
    let (events, total) = state.store.list_events(&JobId::new(id), limit, offset)?;
    Ok(Json(json!({
        "events": events,
        "total": total,
        "limit": limit,
        "offset": offset,
    })))
}
