// src/models/scoring.rs

use serde::Serialize;

use crate::models::{
    answer::StudentAnswer,
    exam_result::ResultWrite,
    grading_task::NewGradingTask,
    question::{ExamQuestion, QuestionType},
    session::{ExamSession, SessionStatus},
};

/// One question of the exam together with everything needed to score it.
#[derive(Debug, Clone)]
pub struct SnapshotItem {
    pub question: ExamQuestion,
    /// The option flagged `is_correct` for choice questions.
    pub correct_option_id: Option<i64>,
    pub answer: Option<StudentAnswer>,
    /// Partial credit value of the option the student picked.
    pub selected_partial_credit: Option<f64>,
    /// A grading task for this answer has been completed by a reviewer.
    pub reviewed: bool,
}

impl SnapshotItem {
    /// Settled by a human; re-scoring must keep these values.
    pub fn is_human_settled(&self) -> bool {
        self.answer
            .as_ref()
            .is_some_and(|a| a.manual_override || self.reviewed)
    }
}

/// Consolidated read for one session: the session and all exam questions in order.
#[derive(Debug, Clone)]
pub struct ScoringSnapshot {
    pub session: ExamSession,
    pub items: Vec<SnapshotItem>,
}

/// Per-question result of a scoring pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuestionOutcome {
    pub question_id: i64,
    pub question_type: QuestionType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer_id: Option<i64>,
    pub points_possible: f64,
    pub points_earned: f64,
    pub is_correct: Option<bool>,
    pub auto_scored: bool,
    pub needs_review: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_points: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
    /// The stored human score was kept instead of being recomputed.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub preserved: bool,
}

/// Scores written back to one 'student_answers' row.
#[derive(Debug, Clone, PartialEq)]
pub struct AnswerScoreUpdate {
    pub answer_id: i64,
    pub points_earned: f64,
    pub is_correct: Option<bool>,
    pub auto_scored: bool,
    pub feedback_text: Option<String>,
}

/// Everything a scoring pass persists. Applied atomically by the store.
#[derive(Debug, Clone)]
pub struct ScoringWrite {
    pub session_id: i64,
    pub session_status: SessionStatus,
    pub answer_updates: Vec<AnswerScoreUpdate>,
    pub review_tasks: Vec<NewGradingTask>,
    pub result: ResultWrite,
}

/// DTO returned by submit and rescore.
#[derive(Debug, Clone, Serialize)]
pub struct ScoreReport {
    pub session_id: i64,
    pub score: f64,
    pub max_score: f64,
    pub auto_scored_count: usize,
    pub pending_review_count: usize,
    pub is_final: bool,
    pub breakdown: Vec<QuestionOutcome>,
}
