// src/models/answer.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

use crate::error::AppError;

/// Represents the 'student_answers' table. One row per (session, question).
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct StudentAnswer {
    pub id: i64,
    pub session_id: i64,
    pub question_id: i64,
    pub selected_option_id: Option<i64>,
    pub text_answer: Option<String>,
    pub is_correct: Option<bool>,
    pub points_earned: f64,
    pub auto_scored: bool,
    pub manual_override: bool,
    pub feedback_text: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl StudentAnswer {
    /// Either the engine accepted its own score or a human settled it.
    pub fn is_graded(&self) -> bool {
        self.auto_scored || self.manual_override
    }
}

/// A validated answer: exactly one of option or text.
#[derive(Debug, Clone, PartialEq)]
pub enum AnswerPayload {
    Choice(i64),
    Text(String),
}

impl AnswerPayload {
    pub fn selected_option_id(&self) -> Option<i64> {
        match self {
            AnswerPayload::Choice(id) => Some(*id),
            AnswerPayload::Text(_) => None,
        }
    }

    pub fn text_answer(&self) -> Option<&str> {
        match self {
            AnswerPayload::Choice(_) => None,
            AnswerPayload::Text(text) => Some(text),
        }
    }
}

/// DTO for saving an answer.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SaveAnswerRequest {
    #[serde(alias = "selectedOptionId")]
    pub selected_option_id: Option<i64>,
    #[validate(length(max = 20000, message = "Answers are limited to 20000 characters."))]
    #[serde(alias = "textAnswer")]
    pub text_answer: Option<String>,
}

impl TryFrom<SaveAnswerRequest> for AnswerPayload {
    type Error = AppError;

    fn try_from(req: SaveAnswerRequest) -> Result<Self, Self::Error> {
        req.validate()?;
        match (req.selected_option_id, req.text_answer) {
            (Some(option_id), None) => Ok(AnswerPayload::Choice(option_id)),
            (None, Some(text)) => Ok(AnswerPayload::Text(text)),
            (Some(_), Some(_)) => Err(AppError::BadRequest(
                "Provide either selected_option_id or text_answer, not both".to_string(),
            )),
            (None, None) => Err(AppError::BadRequest(
                "Answer must contain selected_option_id or text_answer".to_string(),
            )),
        }
    }
}
