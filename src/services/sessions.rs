// src/services/sessions.rs

use std::sync::Arc;

use chrono::{DateTime, Utc};
use validator::Validate;

use crate::{
    config::ScoringPolicy,
    error::AppError,
    models::{
        exam_result::ExamResult,
        scoring::ScoreReport,
        session::{ExamSession, NewSession, ProgressUpdate, SessionMetadata, StartSessionResponse},
    },
    services::scoring::ScoringEngine,
    store::ExamStore,
};

/// Creates, advances and closes exam attempts.
#[derive(Clone)]
pub struct SessionManager {
    store: Arc<dyn ExamStore>,
    scoring: ScoringEngine,
}

impl SessionManager {
    pub fn new(store: Arc<dyn ExamStore>, policy: ScoringPolicy) -> Self {
        let scoring = ScoringEngine::new(store.clone(), policy);
        Self { store, scoring }
    }

    /// Returns the student's open attempt, creating it if there is none.
    ///
    /// The insert is a no-op when an open row already exists, in which case
    /// that row is read back. Two racing requests therefore end up with the
    /// same session.
    pub async fn start_or_resume(
        &self,
        exam_id: i64,
        student_id: i64,
    ) -> Result<StartSessionResponse, AppError> {
        let exam = self
            .store
            .find_exam(exam_id)
            .await?
            .ok_or(AppError::NotFound("Exam not found".to_string()))?;

        if !exam.is_published {
            return Err(AppError::BadRequest("Exam is not open yet".to_string()));
        }

        let new = NewSession {
            exam_id,
            student_id,
            started_at: Utc::now(),
            time_remaining: exam.duration_minutes.max(0).saturating_mul(60),
            metadata: SessionMetadata {
                current_question_index: Some(0),
                force_submitted: false,
            },
        };

        // A second round covers an open row that was submitted between our
        // insert and the read.
        for _ in 0..2 {
            if let Some(session) = self.store.insert_session_if_absent(&new).await? {
                tracing::info!(
                    "Student {} started session {} for exam {}",
                    student_id,
                    session.id,
                    exam_id
                );
                return Ok(StartSessionResponse {
                    session,
                    created: true,
                });
            }

            if let Some(session) = self.store.find_active_session(exam_id, student_id).await? {
                return Ok(StartSessionResponse {
                    session,
                    created: false,
                });
            }
        }

        Err(AppError::Conflict(
            "Could not open a session for this exam, please retry".to_string(),
        ))
    }

    pub async fn get(&self, session_id: i64) -> Result<ExamSession, AppError> {
        self.store
            .find_session(session_id)
            .await?
            .ok_or(AppError::NotFound("Session not found".to_string()))
    }

    /// Last write wins.
    pub async fn update_progress(
        &self,
        session_id: i64,
        update: &ProgressUpdate,
    ) -> Result<ExamSession, AppError> {
        update.validate()?;
        if update.is_empty() {
            return self.get(session_id).await;
        }

        self.store
            .update_progress(session_id, update)
            .await?
            .ok_or(AppError::NotFound("Session not found".to_string()))
    }

    /// Closes the attempt and scores it.
    pub async fn submit(&self, session_id: i64) -> Result<ScoreReport, AppError> {
        let closed = self
            .store
            .complete_session(session_id, Utc::now(), false)
            .await?;

        if closed.is_none() {
            return match self.store.find_session(session_id).await? {
                Some(_) => Err(AppError::Conflict(
                    "Session has already been submitted".to_string(),
                )),
                None => Err(AppError::NotFound("Session not found".to_string())),
            };
        }

        tracing::info!("Session {} submitted", session_id);
        self.scoring.score(session_id).await
    }

    /// Closes an expired attempt on the student's behalf.
    /// `None` when someone else closed it first.
    pub async fn force_submit(
        &self,
        session_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<ScoreReport>, AppError> {
        if self
            .store
            .complete_session(session_id, now, true)
            .await?
            .is_none()
        {
            return Ok(None);
        }

        tracing::info!("Session {} force-submitted after its deadline", session_id);
        self.scoring.score(session_id).await.map(Some)
    }

    /// Runs the scoring pass again on a submitted attempt.
    pub async fn rescore(&self, session_id: i64) -> Result<ScoreReport, AppError> {
        let session = self.get(session_id).await?;
        if !session.is_completed {
            return Err(AppError::Conflict(
                "Session is still in progress".to_string(),
            ));
        }
        self.scoring.score(session_id).await
    }

    pub async fn delete(&self, session_id: i64) -> Result<(), AppError> {
        if !self.store.delete_session(session_id).await? {
            return Err(AppError::NotFound("Session not found".to_string()));
        }
        tracing::warn!("Session {} deleted by an administrator", session_id);
        Ok(())
    }

    /// The exam result recorded for the session's (exam, student), which
    /// always reflects the student's latest attempt.
    pub async fn result(&self, session: &ExamSession) -> Result<ExamResult, AppError> {
        self.store
            .find_result(session.exam_id, session.student_id)
            .await?
            .ok_or(AppError::NotFound("No result recorded yet".to_string()))
    }
}
