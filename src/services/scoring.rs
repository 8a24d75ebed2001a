// src/services/scoring.rs

use std::{sync::Arc, time::Instant};

use crate::{
    config::ScoringPolicy,
    error::AppError,
    models::{
        exam_result::ResultWrite,
        grading_task::NewGradingTask,
        question::{ExamQuestion, PartialCreditRules, QuestionType},
        scoring::{
            AnswerScoreUpdate, QuestionOutcome, ScoreReport, ScoringSnapshot, ScoringWrite,
            SnapshotItem,
        },
        session::SessionStatus,
    },
    services::{
        identity::SystemIdentity,
        text::{keyword_score, normalize, round2, semantic_score, similarity},
    },
    store::ExamStore,
};

/// Scores a submitted session and persists the outcome.
#[derive(Clone)]
pub struct ScoringEngine {
    store: Arc<dyn ExamStore>,
    policy: ScoringPolicy,
    identity: SystemIdentity,
}

impl ScoringEngine {
    pub fn new(store: Arc<dyn ExamStore>, policy: ScoringPolicy) -> Self {
        let identity = SystemIdentity::new(store.clone());
        Self {
            store,
            policy,
            identity,
        }
    }

    /// Runs a full scoring pass.
    ///
    /// * Reads questions, answers and option data in one consolidated load.
    /// * Scores every question; human-settled answers keep their points.
    /// * Writes answer scores, review tasks and the exam result atomically.
    pub async fn score(&self, session_id: i64) -> Result<ScoreReport, AppError> {
        let started = Instant::now();

        let snapshot = self
            .store
            .load_scoring_snapshot(session_id)
            .await?
            .ok_or(AppError::NotFound("Session not found".to_string()))?;

        let evaluation = evaluate(&snapshot.items, &self.policy);

        // Resolved before writing anything so a missing identity aborts the pass.
        let recorded_by = self.identity.resolve(snapshot.session.student_id).await?;

        let write = evaluation.to_write(&snapshot, recorded_by);
        let result = self.store.record_scoring(&write).await?;
        if result.is_none() {
            tracing::info!(
                "Session {} is not the latest attempt; exam result left unchanged",
                session_id
            );
        }

        let elapsed = started.elapsed();
        tracing::info!(
            session_id,
            score = write.result.score,
            max_score = write.result.max_score,
            auto_scored = evaluation.auto_scored_count,
            pending_review = evaluation.pending_review_count,
            elapsed_ms = elapsed.as_millis() as u64,
            "Scoring pass finished"
        );
        if elapsed > self.policy.time_budget {
            tracing::warn!(
                "Scoring session {} took {:?}, over the {:?} budget",
                session_id,
                elapsed,
                self.policy.time_budget
            );
        }

        Ok(ScoreReport {
            session_id,
            score: write.result.score,
            max_score: write.result.max_score,
            auto_scored_count: evaluation.auto_scored_count,
            pending_review_count: evaluation.pending_review_count,
            is_final: write.result.is_final,
            breakdown: evaluation.outcomes,
        })
    }
}

/// Result of scoring every question of a session in memory.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub outcomes: Vec<QuestionOutcome>,
    pub total: f64,
    pub max_score: f64,
    pub auto_scored_count: usize,
    pub pending_review_count: usize,
    /// At least one score came from a reviewer.
    pub includes_human_grade: bool,
}

impl Evaluation {
    fn to_write(&self, snapshot: &ScoringSnapshot, recorded_by: i64) -> ScoringWrite {
        let session = &snapshot.session;
        let settled = self.pending_review_count == 0;

        let answer_updates = self
            .outcomes
            .iter()
            .filter(|o| !o.preserved)
            .filter_map(|o| {
                o.answer_id.map(|answer_id| AnswerScoreUpdate {
                    answer_id,
                    points_earned: o.points_earned,
                    is_correct: o.is_correct,
                    auto_scored: o.auto_scored,
                    feedback_text: o.feedback.clone(),
                })
            })
            .collect();

        let review_tasks = self
            .outcomes
            .iter()
            .filter(|o| o.needs_review)
            .filter_map(|o| {
                o.answer_id.map(|answer_id| NewGradingTask {
                    session_id: session.id,
                    answer_id,
                    question_id: o.question_id,
                    priority: o.points_possible.round() as i32,
                    suggested_points: o.suggested_points,
                    confidence: o.confidence,
                })
            })
            .collect();

        ScoringWrite {
            session_id: session.id,
            session_status: if settled {
                SessionStatus::Graded
            } else {
                SessionStatus::Submitted
            },
            answer_updates,
            review_tasks,
            result: ResultWrite {
                exam_id: session.exam_id,
                student_id: session.student_id,
                score: self.total,
                max_score: self.max_score,
                auto_scored: settled && !self.includes_human_grade,
                is_final: settled,
                pending_review: self.pending_review_count as i32,
                recorded_by,
            },
        }
    }
}

/// Scores all items. Pure and deterministic.
pub fn evaluate(items: &[SnapshotItem], policy: &ScoringPolicy) -> Evaluation {
    let outcomes: Vec<QuestionOutcome> = items.iter().map(|item| score_item(item, policy)).collect();

    let total = round2(outcomes.iter().map(|o| o.points_earned).sum());
    let max_score = round2(items.iter().map(|i| i.question.points).sum());
    let auto_scored_count = outcomes.iter().filter(|o| o.auto_scored).count();
    let pending_review_count = outcomes.iter().filter(|o| o.needs_review).count();
    let includes_human_grade = outcomes.iter().any(|o| o.preserved);

    Evaluation {
        outcomes,
        total,
        max_score,
        auto_scored_count,
        pending_review_count,
        includes_human_grade,
    }
}

/// Scores one question against the student's answer (or lack of one).
pub fn score_item(item: &SnapshotItem, policy: &ScoringPolicy) -> QuestionOutcome {
    let question = &item.question;
    let answer_id = item.answer.as_ref().map(|a| a.id);

    if let Some(answer) = item.answer.as_ref().filter(|_| item.is_human_settled()) {
        return QuestionOutcome {
            question_id: question.id,
            question_type: question.question_type,
            answer_id,
            points_possible: question.points,
            points_earned: answer.points_earned,
            is_correct: answer.is_correct,
            auto_scored: answer.auto_scored,
            needs_review: false,
            confidence: None,
            suggested_points: None,
            feedback: answer.feedback_text.clone(),
            preserved: true,
        };
    }

    let mut outcome = QuestionOutcome {
        question_id: question.id,
        question_type: question.question_type,
        answer_id,
        points_possible: question.points,
        points_earned: 0.0,
        is_correct: None,
        auto_scored: true,
        needs_review: false,
        confidence: None,
        suggested_points: None,
        feedback: None,
        preserved: false,
    };

    match question.question_type {
        QuestionType::MultipleChoice | QuestionType::TrueFalse => score_choice(item, &mut outcome),
        QuestionType::Text | QuestionType::FillBlank if has_expected_answers(question) => {
            let response = item
                .answer
                .as_ref()
                .and_then(|a| a.text_answer.as_deref())
                .unwrap_or("");
            score_text(question, response, policy, &mut outcome)
        }
        QuestionType::Text | QuestionType::FillBlank | QuestionType::Essay => {
            let response = item
                .answer
                .as_ref()
                .and_then(|a| a.text_answer.as_deref())
                .unwrap_or("");
            score_free_text(question, response, policy, &mut outcome)
        }
    }

    outcome
}

fn has_expected_answers(question: &ExamQuestion) -> bool {
    question.expected_answers.iter().any(|e| !e.trim().is_empty())
}

/// Correct iff the picked option is the question's correct one. A wrong pick
/// may still earn its own partial credit, never more than the question is worth.
fn score_choice(item: &SnapshotItem, outcome: &mut QuestionOutcome) {
    let question = &item.question;
    let selected = item.answer.as_ref().and_then(|a| a.selected_option_id);

    let Some(selected) = selected else {
        outcome.is_correct = Some(false);
        outcome.feedback = Some("No option selected.".to_string());
        return;
    };

    if item.correct_option_id == Some(selected) {
        outcome.is_correct = Some(true);
        outcome.points_earned = question.points;
        return;
    }

    outcome.is_correct = Some(false);
    if question.allow_partial_credit {
        let partial = item
            .selected_partial_credit
            .unwrap_or(0.0)
            .clamp(0.0, question.points.max(0.0));
        if partial > 0.0 {
            outcome.points_earned = partial;
            outcome.feedback = Some(format!("Partial credit: {} of {} points.", partial, question.points));
        }
    }
}

/// Exact match against any expected answer, otherwise a fuzzy partial award.
fn score_text(
    question: &ExamQuestion,
    response: &str,
    policy: &ScoringPolicy,
    outcome: &mut QuestionOutcome,
) {
    let response = normalize(response, question.case_sensitive);
    let expected: Vec<String> = question
        .expected_answers
        .iter()
        .map(|e| normalize(e, question.case_sensitive))
        .filter(|e| !e.is_empty())
        .collect();

    if expected.iter().any(|e| *e == response) {
        outcome.is_correct = Some(true);
        outcome.points_earned = question.points;
        return;
    }

    outcome.is_correct = Some(false);
    if !question.allow_partial_credit || response.is_empty() {
        return;
    }

    let min_similarity = PartialCreditRules::min_similarity(question.rules(), policy);
    let percentage = PartialCreditRules::partial_percentage(question.rules(), policy);

    for candidate in &expected {
        let score = similarity(&response, candidate);
        if score >= min_similarity {
            // Rounded to cents first so float noise cannot ceil a whole point up.
            let awarded = round2(question.points * percentage)
                .ceil()
                .min(question.points);
            outcome.points_earned = awarded;
            outcome.feedback = Some(format!(
                "Close match (similarity {:.2}); partial credit awarded.",
                score
            ));
            return;
        }
    }
}

/// What the essay heuristic thinks of a response.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EssayGrade {
    pub keyword_score: f64,
    pub semantic_score: f64,
    pub hybrid_score: f64,
    pub candidate_points: f64,
    pub confidence: f64,
    pub accepted: bool,
}

/// Keyword coverage blended with overlap against the sample answer.
pub fn grade_essay(response: &str, question: &ExamQuestion, policy: &ScoringPolicy) -> EssayGrade {
    let keyword = keyword_score(response, &question.expected_answers);
    let semantic = question
        .sample_answer
        .as_deref()
        .and_then(|sample| semantic_score(response, sample, policy.content_word_min_len))
        .unwrap_or(keyword);

    let hybrid = policy.keyword_weight * keyword + policy.semantic_weight * semantic;
    let candidate_points = round2(hybrid * question.points).min(question.points);

    let confidence = if keyword > policy.high_keyword_threshold {
        policy.high_confidence
    } else if keyword >= policy.medium_keyword_threshold {
        policy.medium_confidence
    } else {
        policy.base_confidence
    }
    .min(1.0);

    EssayGrade {
        keyword_score: keyword,
        semantic_score: semantic,
        hybrid_score: hybrid,
        candidate_points,
        confidence,
        accepted: confidence >= policy.auto_accept_confidence
            && hybrid >= policy.auto_accept_min_score,
    }
}

/// Essays and open text: accept the heuristic when it is confident,
/// otherwise hand the answer to a reviewer.
fn score_free_text(
    question: &ExamQuestion,
    response: &str,
    policy: &ScoringPolicy,
    outcome: &mut QuestionOutcome,
) {
    if response.trim().is_empty() {
        outcome.confidence = Some(1.0);
        outcome.feedback = Some("No response submitted.".to_string());
        return;
    }

    if !question.auto_gradable {
        outcome.auto_scored = false;
        outcome.needs_review = true;
        outcome.feedback = Some("Requires manual grading.".to_string());
        return;
    }

    let grade = grade_essay(response, question, policy);
    outcome.confidence = Some(grade.confidence);
    outcome.suggested_points = Some(grade.candidate_points);

    if grade.accepted {
        outcome.points_earned = grade.candidate_points;
        outcome.feedback = Some(format!(
            "Auto-graded: keyword coverage {:.0}%, content overlap {:.0}% (confidence {:.2}).",
            grade.keyword_score * 100.0,
            grade.semantic_score * 100.0,
            grade.confidence
        ));
    } else {
        outcome.auto_scored = false;
        outcome.needs_review = true;
        outcome.feedback = Some(format!(
            "Queued for manual review: confidence {:.2}, match score {:.2}. Suggested {:.2} of {} points.",
            grade.confidence, grade.hybrid_score, grade.candidate_points, question.points
        ));
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use sqlx::types::Json;

    use super::*;
    use crate::models::{
        answer::StudentAnswer,
        question::NewQuestion,
        session::{ExamSession, SessionMetadata},
    };

    fn answer(id: i64, question_id: i64) -> StudentAnswer {
        StudentAnswer {
            id,
            session_id: 1,
            question_id,
            selected_option_id: None,
            text_answer: None,
            is_correct: None,
            points_earned: 0.0,
            auto_scored: false,
            manual_override: false,
            feedback_text: None,
            updated_at: Utc::now(),
        }
    }

    fn text_answer(id: i64, question_id: i64, text: &str) -> StudentAnswer {
        StudentAnswer {
            text_answer: Some(text.to_string()),
            ..answer(id, question_id)
        }
    }

    fn item(question: ExamQuestion, answer: Option<StudentAnswer>) -> SnapshotItem {
        SnapshotItem {
            question,
            correct_option_id: None,
            answer,
            selected_partial_credit: None,
            reviewed: false,
        }
    }

    fn choice_item(points: f64, partial: bool, picked: i64, partial_value: f64) -> SnapshotItem {
        let mut new = NewQuestion::new(1, QuestionType::MultipleChoice, points);
        new.allow_partial_credit = partial;
        let question = new.into_question(10);
        SnapshotItem {
            correct_option_id: Some(100),
            selected_partial_credit: Some(partial_value),
            ..item(
                question,
                Some(StudentAnswer {
                    selected_option_id: Some(picked),
                    ..answer(50, 10)
                }),
            )
        }
    }

    fn essay(points: f64, keywords: &[&str]) -> ExamQuestion {
        NewQuestion::new(1, QuestionType::Essay, points)
            .expecting(keywords.iter().copied())
            .into_question(20)
    }

    #[test]
    fn test_correct_option_gets_full_points() {
        let outcome = score_item(&choice_item(4.0, false, 100, 0.0), &ScoringPolicy::default());
        assert_eq!(outcome.points_earned, 4.0);
        assert_eq!(outcome.is_correct, Some(true));
        assert!(outcome.auto_scored);
    }

    #[test]
    fn test_wrong_option_without_partial_credit_gets_zero() {
        let outcome = score_item(&choice_item(4.0, false, 101, 2.0), &ScoringPolicy::default());
        assert_eq!(outcome.points_earned, 0.0);
        assert_eq!(outcome.is_correct, Some(false));
    }

    #[test]
    fn test_wrong_option_partial_credit_is_capped_at_question_points() {
        let policy = ScoringPolicy::default();
        let outcome = score_item(&choice_item(4.0, true, 101, 1.5), &policy);
        assert_eq!(outcome.points_earned, 1.5);

        let outcome = score_item(&choice_item(4.0, true, 101, 9.0), &policy);
        assert_eq!(outcome.points_earned, 4.0);
        assert_eq!(outcome.is_correct, Some(false));
    }

    #[test]
    fn test_case_insensitive_text_match() {
        let question = NewQuestion::new(1, QuestionType::Text, 2.0)
            .expecting(["paris"])
            .into_question(30);
        let outcome = score_item(
            &item(question, Some(text_answer(60, 30, "Paris"))),
            &ScoringPolicy::default(),
        );
        assert_eq!(outcome.points_earned, 2.0);
        assert_eq!(outcome.is_correct, Some(true));
    }

    #[test]
    fn test_case_sensitive_text_rejects_wrong_case() {
        let mut new = NewQuestion::new(1, QuestionType::FillBlank, 2.0).expecting(["NaCl"]);
        new.case_sensitive = true;
        let outcome = score_item(
            &item(new.into_question(30), Some(text_answer(60, 30, "nacl"))),
            &ScoringPolicy::default(),
        );
        assert_eq!(outcome.points_earned, 0.0);
        assert_eq!(outcome.is_correct, Some(false));
    }

    #[test]
    fn test_fuzzy_text_match_awards_rounded_up_partial_credit() {
        let question = NewQuestion::new(1, QuestionType::Text, 3.0)
            .expecting(["photosynthesis"])
            .with_partial_credit(None)
            .into_question(30);
        let outcome = score_item(
            &item(question, Some(text_answer(60, 30, "photosynthesys"))),
            &ScoringPolicy::default(),
        );
        // ceil(3 * 0.5)
        assert_eq!(outcome.points_earned, 2.0);
        assert_eq!(outcome.is_correct, Some(false));
        assert!(outcome.auto_scored);
    }

    #[test]
    fn test_fuzzy_partial_credit_ignores_float_noise() {
        // 100 * 0.07 evaluates to 7.000000000000001.
        let question = NewQuestion::new(1, QuestionType::FillBlank, 100.0)
            .expecting(["photosynthesis"])
            .with_partial_credit(Some(PartialCreditRules {
                min_similarity: None,
                partial_percentage: Some(0.07),
            }))
            .into_question(30);
        let outcome = score_item(
            &item(question, Some(text_answer(60, 30, "photosynthesys"))),
            &ScoringPolicy::default(),
        );
        assert_eq!(outcome.points_earned, 7.0);
    }

    #[test]
    fn test_true_false_scores_like_a_choice_question() {
        let question = NewQuestion::new(1, QuestionType::TrueFalse, 1.0).into_question(11);
        let pick = |option_id: i64| SnapshotItem {
            correct_option_id: Some(200),
            ..item(
                question.clone(),
                Some(StudentAnswer {
                    selected_option_id: Some(option_id),
                    ..answer(51, 11)
                }),
            )
        };
        let policy = ScoringPolicy::default();

        let right = score_item(&pick(200), &policy);
        assert_eq!(right.points_earned, 1.0);
        assert_eq!(right.is_correct, Some(true));

        let wrong = score_item(&pick(201), &policy);
        assert_eq!(wrong.points_earned, 0.0);
        assert_eq!(wrong.is_correct, Some(false));
    }

    #[test]
    fn test_fuzzy_text_below_threshold_gets_zero() {
        let question = NewQuestion::new(1, QuestionType::Text, 3.0)
            .expecting(["mitochondria"])
            .with_partial_credit(Some(PartialCreditRules {
                min_similarity: Some(0.95),
                partial_percentage: Some(0.5),
            }))
            .into_question(30);
        let outcome = score_item(
            &item(question, Some(text_answer(60, 30, "mitochondira"))),
            &ScoringPolicy::default(),
        );
        assert_eq!(outcome.points_earned, 0.0);
    }

    #[test]
    fn test_essay_half_keyword_coverage_is_auto_accepted() {
        let question = essay(10.0, &["photosynthesis", "chlorophyll"]);
        let grade = grade_essay(
            "Plants make food through photosynthesis.",
            &question,
            &ScoringPolicy::default(),
        );
        assert_eq!(grade.keyword_score, 0.5);
        assert!((grade.hybrid_score - 0.5).abs() < 1e-9);
        assert_eq!(grade.confidence, 0.7);
        assert!(grade.accepted);

        let outcome = score_item(
            &item(question, Some(text_answer(70, 20, "Plants make food through photosynthesis."))),
            &ScoringPolicy::default(),
        );
        assert_eq!(outcome.points_earned, 5.0);
        assert!(outcome.auto_scored);
        assert!(!outcome.needs_review);
    }

    #[test]
    fn test_essay_empty_response_needs_no_review() {
        let question = essay(10.0, &["photosynthesis"]);
        let outcome = score_item(
            &item(question, Some(text_answer(70, 20, "   "))),
            &ScoringPolicy::default(),
        );
        assert_eq!(outcome.points_earned, 0.0);
        assert_eq!(outcome.confidence, Some(1.0));
        assert!(outcome.auto_scored);
        assert!(!outcome.needs_review);
    }

    #[test]
    fn test_essay_low_coverage_goes_to_review() {
        let question = essay(10.0, &["photosynthesis", "chlorophyll", "glucose"]);
        let outcome = score_item(
            &item(question, Some(text_answer(70, 20, "Plants need glucose"))),
            &ScoringPolicy::default(),
        );
        assert_eq!(outcome.points_earned, 0.0);
        assert!(!outcome.auto_scored);
        assert!(outcome.needs_review);
        assert_eq!(outcome.confidence, Some(0.5));
        assert_eq!(outcome.suggested_points, Some(3.33));
    }

    #[test]
    fn test_essay_uses_sample_answer_overlap() {
        let question = NewQuestion::new(1, QuestionType::Essay, 10.0)
            .expecting(["photosynthesis", "chlorophyll"])
            .with_sample_answer("Chlorophyll absorbs sunlight during photosynthesis")
            .into_question(20);
        let grade = grade_essay(
            "chlorophyll and photosynthesis need sunlight",
            &question,
            &ScoringPolicy::default(),
        );
        // chlorophyll, absorbs, sunlight, during, photosynthesis -> 3 of 5 present.
        assert_eq!(grade.keyword_score, 1.0);
        assert!((grade.semantic_score - 0.6).abs() < 1e-9);
        assert_eq!(grade.confidence, 0.9);
        assert_eq!(grade.candidate_points, 8.4);
    }

    #[test]
    fn test_non_auto_gradable_essay_always_reviewed() {
        let mut new = NewQuestion::new(1, QuestionType::Essay, 5.0).expecting(["anything"]);
        new.auto_gradable = false;
        let outcome = score_item(
            &item(new.into_question(20), Some(text_answer(70, 20, "anything at all"))),
            &ScoringPolicy::default(),
        );
        assert!(outcome.needs_review);
        assert_eq!(outcome.suggested_points, None);
    }

    #[test]
    fn test_manual_override_is_preserved() {
        let question = essay(10.0, &["photosynthesis", "chlorophyll", "glucose"]);
        let settled = StudentAnswer {
            points_earned: 7.0,
            manual_override: true,
            feedback_text: Some("Well argued".to_string()),
            ..text_answer(70, 20, "Plants need glucose")
        };
        let outcome = score_item(&item(question, Some(settled)), &ScoringPolicy::default());
        assert!(outcome.preserved);
        assert_eq!(outcome.points_earned, 7.0);
        assert!(!outcome.needs_review);
    }

    #[test]
    fn test_evaluation_is_deterministic_and_totals_points() {
        let policy = ScoringPolicy::default();
        let items = vec![
            choice_item(4.0, false, 100, 0.0),
            item(
                essay(10.0, &["photosynthesis", "chlorophyll"]),
                Some(text_answer(70, 20, "photosynthesis")),
            ),
            item(essay(6.0, &["osmosis"]), None),
        ];

        let first = evaluate(&items, &policy);
        let second = evaluate(&items, &policy);
        assert_eq!(first, second);
        assert_eq!(first.total, 9.0);
        assert_eq!(first.max_score, 20.0);
        assert_eq!(first.auto_scored_count, 3);
        assert_eq!(first.pending_review_count, 0);
    }

    #[test]
    fn test_write_marks_result_unfinal_while_review_pending() {
        let policy = ScoringPolicy::default();
        let items = vec![item(
            essay(10.0, &["photosynthesis", "chlorophyll", "glucose"]),
            Some(text_answer(70, 20, "glucose")),
        )];
        let evaluation = evaluate(&items, &policy);
        let snapshot = ScoringSnapshot {
            session: ExamSession {
                id: 1,
                exam_id: 2,
                student_id: 3,
                started_at: Utc::now(),
                submitted_at: Some(Utc::now()),
                time_remaining: 0,
                is_completed: true,
                status: SessionStatus::Submitted,
                score: 0.0,
                max_score: 0.0,
                metadata: Json(SessionMetadata::default()),
            },
            items,
        };

        let write = evaluation.to_write(&snapshot, 9);
        assert_eq!(write.session_status, SessionStatus::Submitted);
        assert!(!write.result.is_final);
        assert!(!write.result.auto_scored);
        assert_eq!(write.result.pending_review, 1);
        assert_eq!(write.result.recorded_by, 9);
        assert_eq!(write.review_tasks.len(), 1);
        assert_eq!(write.review_tasks[0].answer_id, 70);
        assert_eq!(write.review_tasks[0].priority, 10);
    }
}
