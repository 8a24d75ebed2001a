// src/services/merger.rs

use std::sync::Arc;

use crate::{
    error::AppError,
    models::{
        exam_result::{ExamResult, ResultWrite},
        scoring::{ScoringWrite, SnapshotItem},
        session::SessionStatus,
    },
    services::{identity::SystemIdentity, text::round2},
    store::ExamStore,
};

/// Folds manual grades back into the session's exam result.
#[derive(Clone)]
pub struct ResultMerger {
    store: Arc<dyn ExamStore>,
    identity: SystemIdentity,
}

impl ResultMerger {
    pub fn new(store: Arc<dyn ExamStore>) -> Self {
        let identity = SystemIdentity::new(store.clone());
        Self { store, identity }
    }

    /// Finalizes the result once every free-text answer is graded.
    /// Returns `None`, leaving the stored result untouched, while any remain
    /// or when a newer attempt owns the result.
    pub async fn merge(&self, session_id: i64) -> Result<Option<ExamResult>, AppError> {
        let snapshot = self
            .store
            .load_scoring_snapshot(session_id)
            .await?
            .ok_or(AppError::NotFound("Session not found".to_string()))?;

        let pending = pending_items(&snapshot.items);
        if pending > 0 {
            tracing::debug!(
                "Session {} still has {} answers awaiting review; result left as is",
                session_id,
                pending
            );
            return Ok(None);
        }

        let score = round2(
            snapshot
                .items
                .iter()
                .filter_map(|item| item.answer.as_ref())
                .map(|a| a.points_earned)
                .sum(),
        );
        let max_score = round2(snapshot.items.iter().map(|i| i.question.points).sum());

        let session = &snapshot.session;
        let recorded_by = self.identity.resolve(session.student_id).await?;

        let write = ScoringWrite {
            session_id,
            session_status: SessionStatus::Graded,
            answer_updates: Vec::new(),
            review_tasks: Vec::new(),
            result: ResultWrite {
                exam_id: session.exam_id,
                student_id: session.student_id,
                score,
                max_score,
                auto_scored: false,
                is_final: true,
                pending_review: 0,
                recorded_by,
            },
        };
        let Some(result) = self.store.record_scoring(&write).await? else {
            tracing::info!(
                "Session {} graded at {}/{}; a newer attempt owns the exam result",
                session_id,
                score,
                max_score
            );
            return Ok(None);
        };

        tracing::info!(
            "Finalized result for session {}: {}/{}",
            session_id,
            result.score,
            result.max_score
        );
        Ok(Some(result))
    }
}

/// Free-text answers that neither the engine nor a reviewer has settled.
fn pending_items(items: &[SnapshotItem]) -> usize {
    items
        .iter()
        .filter(|item| item.question.question_type.is_free_text())
        .filter_map(|item| item.answer.as_ref())
        .filter(|answer| !answer.is_graded())
        .count()
}
