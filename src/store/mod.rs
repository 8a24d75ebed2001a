// src/store/mod.rs

//! Persistence seam for the exam engine.
//!
//! Services only talk to [`ExamStore`]. `PgStore` backs production, while
//! `MemoryStore` keeps everything in-process for tests and local runs.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    error::AppError,
    models::{
        answer::{AnswerPayload, StudentAnswer},
        exam::Exam,
        exam_result::{ExamResult, ResultWrite},
        grading_task::{GradingTask, Resolution, TaskFilter},
        question::{ExamQuestion, QuestionOption},
        scoring::{ScoringSnapshot, ScoringWrite},
        session::{ExamSession, NewSession, ProgressUpdate},
        user::Role,
    },
};

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[async_trait]
pub trait ExamStore: Send + Sync {
    // Users

    /// Lowest id among active users holding `role`.
    async fn first_active_user_with_role(&self, role: Role) -> Result<Option<i64>, AppError>;

    async fn is_active_user(&self, user_id: i64) -> Result<bool, AppError>;

    /// Role of an active user, `None` for unknown or deactivated accounts.
    async fn active_user_role(&self, user_id: i64) -> Result<Option<Role>, AppError>;

    /// Lowest id among all active users.
    async fn first_active_user(&self) -> Result<Option<i64>, AppError>;

    // Exams

    async fn find_exam(&self, exam_id: i64) -> Result<Option<Exam>, AppError>;

    /// Publishes global-timer exams whose start time is at or before `now`.
    /// Returns the ids that changed.
    async fn publish_due_exams(&self, now: DateTime<Utc>) -> Result<Vec<i64>, AppError>;

    // Sessions

    /// Inserts the session unless an open one already exists for the same
    /// (exam, student). Returns `None` when the insert was a no-op.
    async fn insert_session_if_absent(
        &self,
        new: &NewSession,
    ) -> Result<Option<ExamSession>, AppError>;

    async fn find_active_session(
        &self,
        exam_id: i64,
        student_id: i64,
    ) -> Result<Option<ExamSession>, AppError>;

    async fn find_session(&self, session_id: i64) -> Result<Option<ExamSession>, AppError>;

    async fn update_progress(
        &self,
        session_id: i64,
        update: &ProgressUpdate,
    ) -> Result<Option<ExamSession>, AppError>;

    /// Closes the session if it is still open. `None` when it was already
    /// completed or does not exist.
    async fn complete_session(
        &self,
        session_id: i64,
        now: DateTime<Utc>,
        forced: bool,
    ) -> Result<Option<ExamSession>, AppError>;

    /// Open sessions whose `started_at + exam duration` is at or before `now`,
    /// oldest first.
    async fn expired_sessions(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<ExamSession>, AppError>;

    async fn delete_session(&self, session_id: i64) -> Result<bool, AppError>;

    // Questions

    async fn find_question(&self, question_id: i64) -> Result<Option<ExamQuestion>, AppError>;

    async fn find_option(&self, option_id: i64) -> Result<Option<QuestionOption>, AppError>;

    // Answers

    /// Insert or overwrite the answer for (session, question).
    async fn upsert_answer(
        &self,
        session_id: i64,
        question_id: i64,
        payload: &AnswerPayload,
    ) -> Result<StudentAnswer, AppError>;

    // Scoring

    async fn load_scoring_snapshot(
        &self,
        session_id: i64,
    ) -> Result<Option<ScoringSnapshot>, AppError>;

    /// Applies answer scores, opens review tasks, stores the session totals and
    /// upserts the exam result, all or nothing.
    ///
    /// The result row belongs to the student's latest attempt at the exam.
    /// When a newer session exists the result is left alone and `None` is returned.
    async fn record_scoring(&self, write: &ScoringWrite)
    -> Result<Option<ExamResult>, AppError>;

    async fn find_result(
        &self,
        exam_id: i64,
        student_id: i64,
    ) -> Result<Option<ExamResult>, AppError>;

    // Grading tasks

    async fn list_grading_tasks(&self, filter: &TaskFilter) -> Result<Vec<GradingTask>, AppError>;

    async fn find_grading_task(&self, task_id: i64) -> Result<Option<GradingTask>, AppError>;

    /// Assigns an open task. `Conflict` when the task is already completed.
    async fn assign_grading_task(
        &self,
        task_id: i64,
        teacher_id: i64,
    ) -> Result<GradingTask, AppError>;

    /// Updates the answer and completes the task in one transaction.
    /// `Conflict` when the task was already completed.
    async fn resolve_grading_task(
        &self,
        task_id: i64,
        resolution: &Resolution,
        reviewer_id: i64,
    ) -> Result<StudentAnswer, AppError>;
}
