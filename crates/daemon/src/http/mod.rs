// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Control API over HTTP.
//!
//! One module per resource, a shared [`AppState`] context, and a single
//! error type mapping the service/auth taxonomy onto status codes and
//! `{error, code, details?}` bodies.

mod auth_routes;
mod health;
mod jobs;
mod ws;

use crate::auth::{Auth, AuthError};
use crate::gateway::SubscriptionGateway;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use rd_core::{SystemClock, User};
use rd_engine::{JobService, MediaLayout, ServiceError};
use rd_storage::{Store, StoreError};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::error;

/// The daemon's concrete service type.
pub type Service = JobService<SystemClock>;

/// Shared context for all request handlers.
pub struct AppState {
    pub service: Arc<Service>,
    pub store: Arc<Store>,
    pub auth: Auth,
    pub gateway: Arc<SubscriptionGateway>,
    pub layout: MediaLayout,
    pub min_free_space_gb: f64,
    pub start_time: Instant,
}

/// Build the Control API router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/auth/login", post(auth_routes::login))
        .route("/auth/logout", post(auth_routes::logout))
        .route("/auth/me", get(auth_routes::me))
        .route("/jobs", post(jobs::create).get(jobs::list))
        .route("/jobs/{id}", get(jobs::get).delete(jobs::remove))
        .route("/jobs/{id}/cancel", post(jobs::cancel))
        .route("/jobs/{id}/retry", post(jobs::retry))
        .route("/jobs/{id}/resume", post(jobs::resume))
        .route("/jobs/{id}/control", post(jobs::control))
        .route("/jobs/{id}/logs", get(jobs::logs))
        .route("/ws", get(ws::subscribe))
        .route("/healthz", get(health::healthz))
        .with_state(state)
}

/// API error body: `{error, code, details?}`.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
    pub details: Option<Value>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized", message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "validation", message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut body = json!({
            "error": self.message,
            "code": self.code,
        });
        if let Some(details) = self.details {
            body["details"] = details;
        }
        (self.status, Json(body)).into_response()
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        match &err {
            ServiceError::Validation { .. } => Self::validation(err.to_string()),
            ServiceError::InvalidState { state, .. } => {
                Self::new(StatusCode::BAD_REQUEST, "invalid_state", err.to_string())
                    .with_details(json!({ "state": state }))
            }
            ServiceError::CannotResume(diag) => {
                Self::new(StatusCode::BAD_REQUEST, "cannot_resume", err.to_string())
                    .with_details(json!(diag))
            }
            ServiceError::InsufficientSpace { .. } => Self::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "insufficient_space",
                err.to_string(),
            ),
            ServiceError::NotImplemented(_) => Self::new(
                StatusCode::NOT_IMPLEMENTED,
                "not_implemented",
                err.to_string(),
            ),
            ServiceError::Store(store_err) => store_error(store_err, err.to_string()),
            ServiceError::MissingArtifact { .. } | ServiceError::Io(_) => {
                error!(error = %err, "internal service error");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", err.to_string())
            }
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        let message = err.to_string();
        store_error(&err, message)
    }
}

fn store_error(err: &StoreError, message: String) -> ApiError {
    match err {
        StoreError::NotFound { .. } => ApiError::new(StatusCode::NOT_FOUND, "not_found", message),
        _ => {
            error!(error = %err, "store error");
            ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::SessionExpired => Self::new(
                StatusCode::UNAUTHORIZED,
                "session_expired",
                err.to_string(),
            ),
            AuthError::InvalidCredentials
            | AuthError::MissingToken
            | AuthError::InvalidToken => Self::unauthorized(err.to_string()),
            AuthError::Hash(_) | AuthError::Store(_) => {
                error!(error = %err, "auth internal error");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", "internal error")
            }
        }
    }
}

/// Extract and validate the bearer token on a request.
pub(crate) fn require_auth(state: &AppState, headers: &HeaderMap) -> Result<User, ApiError> {
    let token = bearer_token(headers).ok_or_else(|| ApiError::from(AuthError::MissingToken))?;
    let (user, _session) = state.auth.authenticate(token)?;
    Ok(user)
}

pub(crate) fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

#[cfg(test)]
#[path = "http_tests.rs"]
mod tests;
