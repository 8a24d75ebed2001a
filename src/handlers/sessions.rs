// src/handlers/sessions.rs

use axum::{
    Json,
    extract::{Extension, Path, State},
    http::StatusCode,
    response::IntoResponse,
};

use crate::{
    error::AppError,
    models::{
        answer::{AnswerPayload, SaveAnswerRequest},
        session::ProgressUpdate,
    },
    state::AppState,
    utils::jwt::Claims,
};

/// Starts the caller's attempt at an exam, or returns the open one.
/// 201 when a session was created, 200 when resumed.
pub async fn start_session(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(exam_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let student_id = claims.user_id()?;
    let started = state.sessions().start_or_resume(exam_id, student_id).await?;

    let status = if started.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(started)))
}

/// Owner or staff.
pub async fn get_session(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let session = state.sessions().get(id).await?;
    claims.ensure_owner_or_staff(session.student_id)?;

    Ok(Json(session))
}

/// Heartbeat from the exam client: remaining time and current question.
pub async fn update_progress(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
    Json(payload): Json<ProgressUpdate>,
) -> Result<impl IntoResponse, AppError> {
    let sessions = state.sessions();
    let session = sessions.get(id).await?;
    claims.ensure_owner(session.student_id)?;

    let session = sessions.update_progress(id, &payload).await?;
    Ok(Json(session))
}

pub async fn save_answer(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path((id, question_id)): Path<(i64, i64)>,
    Json(payload): Json<SaveAnswerRequest>,
) -> Result<impl IntoResponse, AppError> {
    let session = state.sessions().get(id).await?;
    claims.ensure_owner(session.student_id)?;

    let payload = AnswerPayload::try_from(payload)?;
    let answer = state.answers().save_answer(id, question_id, &payload).await?;

    Ok(Json(answer))
}

/// Closes the attempt and returns the score breakdown.
pub async fn submit_session(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let sessions = state.sessions();
    let session = sessions.get(id).await?;
    claims.ensure_owner(session.student_id)?;

    let report = sessions.submit(id).await?;
    Ok(Json(report))
}

pub async fn get_result(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let sessions = state.sessions();
    let session = sessions.get(id).await?;
    claims.ensure_owner_or_staff(session.student_id)?;

    let result = sessions.result(&session).await?;
    Ok(Json(result))
}
