// src/models/session.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, types::Json};
use validator::Validate;

use crate::models::{UnknownVariant, exam::Exam};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    InProgress,
    Submitted,
    /// Submitted and every item has a final score.
    Graded,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::InProgress => "in_progress",
            SessionStatus::Submitted => "submitted",
            SessionStatus::Graded => "graded",
        }
    }
}

impl TryFrom<String> for SessionStatus {
    type Error = UnknownVariant;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "in_progress" => Ok(SessionStatus::InProgress),
            "submitted" => Ok(SessionStatus::Submitted),
            "graded" => Ok(SessionStatus::Graded),
            _ => Err(UnknownVariant::new("session status", value)),
        }
    }
}

/// Free-form progress the client keeps on the session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionMetadata {
    #[serde(default, alias = "currentQuestionIndex")]
    pub current_question_index: Option<i32>,
    /// Set when the sweeper closed the session after its deadline.
    #[serde(default)]
    pub force_submitted: bool,
}

/// Represents the 'exam_sessions' table: one student's timed attempt.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ExamSession {
    pub id: i64,
    pub exam_id: i64,
    pub student_id: i64,
    pub started_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    /// Seconds left as last reported by the client.
    pub time_remaining: i32,
    pub is_completed: bool,
    #[sqlx(try_from = "String")]
    pub status: SessionStatus,
    pub score: f64,
    pub max_score: f64,
    pub metadata: Json<SessionMetadata>,
}

impl ExamSession {
    pub fn deadline(&self, exam: &Exam) -> DateTime<Utc> {
        self.started_at + exam.duration()
    }
}

/// Values for a freshly opened attempt.
#[derive(Debug, Clone)]
pub struct NewSession {
    pub exam_id: i64,
    pub student_id: i64,
    pub started_at: DateTime<Utc>,
    pub time_remaining: i32,
    pub metadata: SessionMetadata,
}

/// DTO for the frequent progress heartbeat. Absent fields are left alone.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct ProgressUpdate {
    #[validate(range(min = 0))]
    #[serde(alias = "timeRemaining")]
    pub time_remaining: Option<i32>,
    #[validate(range(min = 0))]
    #[serde(alias = "currentQuestionIndex")]
    pub current_question_index: Option<i32>,
}

impl ProgressUpdate {
    pub fn is_empty(&self) -> bool {
        self.time_remaining.is_none() && self.current_question_index.is_none()
    }
}

/// DTO returned by start-or-resume.
#[derive(Debug, Serialize)]
pub struct StartSessionResponse {
    pub session: ExamSession,
    /// False when an already-open attempt was returned.
    pub created: bool,
}
