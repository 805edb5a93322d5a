//! HTTP surface over [`IndexManager`], used by the daemon.

use std::fs;
use std::path::{Path, PathBuf};

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::services::search::{IndexManager, IndexStatus, SearchResponse};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RootParams {
    pub root: String,
    pub key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchParams {
    pub root: String,
    pub key: Option<String>,
    #[serde(default)]
    pub q: String,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct IndexAccepted {
    pub key: String,
}

pub fn router(manager: IndexManager) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/index", post(ensure_index))
        .route("/refresh", post(refresh))
        .route("/search", get(search))
        .route("/status", get(status))
        .with_state(manager)
}

/// Canonicalises `root` and derives the working-directory key from it when
/// the caller did not supply one.
pub fn resolve_root(root: &str, key: Option<&str>) -> Result<(String, PathBuf), ApiError> {
    let path = Path::new(root);
    if !path.is_absolute() {
        return Err(ApiError::BadRequest(format!("root must be absolute: {root}")));
    }
    let canonical = fs::canonicalize(path)
        .map_err(|e| ApiError::BadRequest(format!("cannot access {root}: {e}")))?;
    if !canonical.is_dir() {
        return Err(ApiError::BadRequest(format!("not a directory: {root}")));
    }

    let key = match key.map(str::trim).filter(|k| !k.is_empty()) {
        Some(key) => key.to_string(),
        None => canonical.to_string_lossy().into_owned(),
    };
    Ok((key, canonical))
}

pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn ensure_index(
    State(manager): State<IndexManager>,
    Json(params): Json<RootParams>,
) -> Result<(StatusCode, Json<IndexAccepted>), ApiError> {
    let (key, root) = resolve_root(&params.root, params.key.as_deref())?;
    manager.ensure_index(&key, &root);
    Ok((StatusCode::ACCEPTED, Json(IndexAccepted { key })))
}

pub async fn refresh(
    State(manager): State<IndexManager>,
    Json(params): Json<RootParams>,
) -> Result<(StatusCode, Json<IndexAccepted>), ApiError> {
    let (key, root) = resolve_root(&params.root, params.key.as_deref())?;
    if !manager.refresh(&key) {
        manager.ensure_index(&key, &root);
    }
    Ok((StatusCode::ACCEPTED, Json(IndexAccepted { key })))
}

pub async fn search(
    State(manager): State<IndexManager>,
    Query(params): Query<SearchParams>,
) -> Result<Json<SearchResponse>, ApiError> {
    let (key, root) = resolve_root(&params.root, params.key.as_deref())?;
    let response = tokio::task::spawn_blocking(move || {
        manager.search(&key, &root, &params.q, params.limit)
    })
    .await
    .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(response))
}

pub async fn status(
    State(manager): State<IndexManager>,
    Query(params): Query<RootParams>,
) -> Result<Json<IndexStatus>, ApiError> {
    let (key, _) = resolve_root(&params.root, params.key.as_deref())?;
    manager
        .status(&key)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("no index for {key}")))
}
