// src/services/grading.rs

use std::sync::Arc;

use crate::{
    error::AppError,
    models::grading_task::{
        GradingTask, Resolution, ResolveOutcome, ResolveTaskRequest, TaskFilter, TaskStatus,
    },
    services::merger::ResultMerger,
    store::ExamStore,
    utils::html::clean_feedback,
};

/// Review queue for free-text answers the heuristic would not decide.
#[derive(Clone)]
pub struct GradingQueue {
    store: Arc<dyn ExamStore>,
    merger: ResultMerger,
}

impl GradingQueue {
    pub fn new(store: Arc<dyn ExamStore>) -> Self {
        let merger = ResultMerger::new(store.clone());
        Self { store, merger }
    }

    /// Highest priority first, then oldest.
    pub async fn list(&self, filter: &TaskFilter) -> Result<Vec<GradingTask>, AppError> {
        self.store.list_grading_tasks(filter).await
    }

    /// The assignee must be an active teacher or admin.
    pub async fn assign(&self, task_id: i64, teacher_id: i64) -> Result<GradingTask, AppError> {
        let role = self.store.active_user_role(teacher_id).await?;
        if !role.is_some_and(|r| r.is_staff()) {
            return Err(AppError::BadRequest(format!(
                "User {} cannot be assigned grading work",
                teacher_id
            )));
        }

        let task = self.store.assign_grading_task(task_id, teacher_id).await?;
        tracing::info!("Grading task {} assigned to user {}", task_id, teacher_id);
        Ok(task)
    }

    /// Approves or overrides the answer's score, then lets the merger
    /// finalize the exam result if this was the last open item.
    pub async fn resolve(
        &self,
        task_id: i64,
        request: ResolveTaskRequest,
        reviewer_id: i64,
    ) -> Result<ResolveOutcome, AppError> {
        let resolution = Resolution::try_from(request)?;

        let task = self
            .store
            .find_grading_task(task_id)
            .await?
            .ok_or(AppError::NotFound("Grading task not found".to_string()))?;

        if task.status == TaskStatus::Completed {
            return Err(AppError::Conflict(format!(
                "Grading task {} is already completed",
                task_id
            )));
        }

        let resolution = match resolution {
            Resolution::Approve => Resolution::Approve,
            Resolution::Override { points, feedback } => {
                let question = self
                    .store
                    .find_question(task.question_id)
                    .await?
                    .ok_or(AppError::NotFound("Question not found".to_string()))?;

                if points > question.points {
                    return Err(AppError::BadRequest(format!(
                        "Override score {} exceeds the question's {} points",
                        points, question.points
                    )));
                }

                Resolution::Override {
                    points,
                    feedback: feedback.as_deref().and_then(clean_feedback),
                }
            }
        };

        let answer = self
            .store
            .resolve_grading_task(task_id, &resolution, reviewer_id)
            .await?;
        tracing::info!(
            "Grading task {} resolved by user {} ({} points)",
            task_id,
            reviewer_id,
            answer.points_earned
        );

        let result = self.merger.merge(task.session_id).await?;
        Ok(ResolveOutcome { answer, result })
    }
}
