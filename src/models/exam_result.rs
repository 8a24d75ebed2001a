// src/models/exam_result.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Represents the 'exam_results' table. One row per (exam, student), upserted
/// from the student's latest attempt.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ExamResult {
    pub id: i64,
    pub exam_id: i64,
    pub student_id: i64,
    pub score: f64,
    pub max_score: f64,
    /// True only while no human judgment is part of the score and nothing is pending.
    pub auto_scored: bool,
    /// No answer in the attempt is waiting for review.
    pub is_final: bool,
    pub pending_review: i32,
    /// An existing user the result is attributed to.
    pub recorded_by: i64,
    pub updated_at: DateTime<Utc>,
}

/// Values to upsert into 'exam_results'.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultWrite {
    pub exam_id: i64,
    pub student_id: i64,
    pub score: f64,
    pub max_score: f64,
    pub auto_scored: bool,
    pub is_final: bool,
    pub pending_review: i32,
    pub recorded_by: i64,
}
