// src/models/grading_task.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

use crate::{
    error::AppError,
    models::{UnknownVariant, answer::StudentAnswer, exam_result::ExamResult},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
        }
    }
}

impl TryFrom<String> for TaskStatus {
    type Error = UnknownVariant;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "pending" => Ok(TaskStatus::Pending),
            "in_progress" => Ok(TaskStatus::InProgress),
            "completed" => Ok(TaskStatus::Completed),
            _ => Err(UnknownVariant::new("task status", value)),
        }
    }
}

/// Represents the 'grading_tasks' table: one free-text answer awaiting a human.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct GradingTask {
    pub id: i64,
    pub session_id: i64,
    pub answer_id: i64,
    pub question_id: i64,
    pub assigned_teacher_id: Option<i64>,
    #[sqlx(try_from = "String")]
    pub status: TaskStatus,
    /// Higher is reviewed first.
    pub priority: i32,
    /// What the heuristic would have awarded.
    pub suggested_points: Option<f64>,
    pub confidence: Option<f64>,
    pub resolved_by: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Review item raised by a scoring pass.
#[derive(Debug, Clone, PartialEq)]
pub struct NewGradingTask {
    pub session_id: i64,
    pub answer_id: i64,
    pub question_id: i64,
    pub priority: i32,
    pub suggested_points: Option<f64>,
    pub confidence: Option<f64>,
}

/// Query parameters for listing the queue.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskFilter {
    pub teacher_id: Option<i64>,
    pub status: Option<TaskStatus>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AssignTaskRequest {
    /// Defaults to the caller.
    pub teacher_id: Option<i64>,
}

/// DTO for resolving a task: either approve the stored score or override it.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct ResolveTaskRequest {
    #[serde(default)]
    pub approve: bool,
    #[validate(range(min = 0.0))]
    #[serde(alias = "overrideScore")]
    pub override_score: Option<f64>,
    #[validate(length(max = 5000))]
    pub feedback: Option<String>,
}

/// What the reviewer decided.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Keep the answer's current points and mark it auto-scored.
    Approve,
    Override {
        points: f64,
        feedback: Option<String>,
    },
}

impl TryFrom<ResolveTaskRequest> for Resolution {
    type Error = AppError;

    fn try_from(req: ResolveTaskRequest) -> Result<Self, Self::Error> {
        req.validate()?;
        match (req.approve, req.override_score) {
            (true, None) => Ok(Resolution::Approve),
            (false, Some(points)) => Ok(Resolution::Override {
                points,
                feedback: req.feedback,
            }),
            (true, Some(_)) => Err(AppError::BadRequest(
                "Cannot approve and override in the same request".to_string(),
            )),
            (false, None) => Err(AppError::BadRequest(
                "Either approve or provide override_score".to_string(),
            )),
        }
    }
}

/// DTO returned after resolving a task.
#[derive(Debug, Serialize)]
pub struct ResolveOutcome {
    pub answer: StudentAnswer,
    /// Present when this resolution finalized the exam result.
    pub result: Option<ExamResult>,
}
