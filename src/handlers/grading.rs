// src/handlers/grading.rs

use axum::{
    Json,
    extract::{Extension, Path, Query, State},
    response::IntoResponse,
};

use crate::{
    error::AppError,
    models::grading_task::{AssignTaskRequest, ResolveTaskRequest, TaskFilter},
    state::AppState,
    utils::jwt::Claims,
};

/// Lists review tasks, optionally filtered by assignee and status.
/// Staff only.
pub async fn list_tasks(
    State(state): State<AppState>,
    Query(filter): Query<TaskFilter>,
) -> Result<impl IntoResponse, AppError> {
    let tasks = state.grading().list(&filter).await?;
    Ok(Json(tasks))
}

/// Assigns a task. Without a body or `teacher_id` the caller takes it.
pub async fn assign_task(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
    payload: Option<Json<AssignTaskRequest>>,
) -> Result<impl IntoResponse, AppError> {
    let requested = payload.and_then(|Json(p)| p.teacher_id);
    let teacher_id = match requested {
        Some(teacher_id) => teacher_id,
        None => claims.user_id()?,
    };

    let task = state.grading().assign(id, teacher_id).await?;
    Ok(Json(task))
}

/// Approves or overrides the answer. The response carries the exam result
/// when this was the last item awaiting review.
pub async fn resolve_task(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
    Json(payload): Json<ResolveTaskRequest>,
) -> Result<impl IntoResponse, AppError> {
    let reviewer_id = claims.user_id()?;
    let outcome = state.grading().resolve(id, payload, reviewer_id).await?;

    Ok(Json(outcome))
}
