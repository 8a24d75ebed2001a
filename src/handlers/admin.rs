// src/handlers/admin.rs

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};

use crate::{error::AppError, state::AppState};

/// Re-runs scoring on a submitted session. Human grades are kept.
/// Admin only.
pub async fn rescore_session(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let report = state.sessions().rescore(id).await?;
    Ok(Json(report))
}

/// Deletes a session with its answers and review tasks.
/// Admin only.
pub async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    state.sessions().delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
