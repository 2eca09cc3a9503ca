// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `/auth` endpoints.

use super::{bearer_token, require_auth, ApiError, AppState};
use crate::auth::AuthError;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub(crate) struct LoginRequest {
    username: String,
    password: String,
}

/// `POST /auth/login` → `{token, user}`.
pub(crate) async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<Value>, ApiError> {
    let (token, user) = state.auth.login(&req.username, &req.password)?;
    Ok(Json(json!({
        "token": token,
        "user": {
            "id": user.id,
            "username": user.username,
            "role": user.role,
        },
    })))
}

/// `POST /auth/logout` → 204.
pub(crate) async fn logout(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let token = bearer_token(&headers).ok_or_else(|| ApiError::from(AuthError::MissingToken))?;
    state.auth.logout(token)?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /auth/me` → current user.
pub(crate) async fn me(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let user = require_auth(&state, &headers)?;
    Ok(Json(json!({
        "id": user.id,
        "username": user.username,
        "role": user.role,
    })))
}
