// src/store/postgres.rs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder, types::Json};

use crate::{
    error::AppError,
    models::{
        answer::{AnswerPayload, StudentAnswer},
        exam::Exam,
        exam_result::ExamResult,
        grading_task::{GradingTask, Resolution, TaskFilter, TaskStatus},
        question::{ExamQuestion, QuestionOption},
        scoring::{ScoringSnapshot, ScoringWrite, SnapshotItem},
        session::{ExamSession, NewSession, ProgressUpdate},
        user::Role,
    },
    store::ExamStore,
};

const EXAM_COLUMNS: &str =
    "id, title, duration_minutes, timer_mode, start_time, is_published, created_at";

const SESSION_COLUMNS: &str = "id, exam_id, student_id, started_at, submitted_at, \
    time_remaining, is_completed, status, score, max_score, metadata";

const QUESTION_COLUMNS: &str = "id, exam_id, question_type, points, auto_gradable, \
    expected_answers, case_sensitive, allow_partial_credit, partial_credit_rules, \
    sample_answer, order_number";

const ANSWER_COLUMNS: &str = "id, session_id, question_id, selected_option_id, text_answer, \
    is_correct, points_earned, auto_scored, manual_override, feedback_text, updated_at";

const RESULT_COLUMNS: &str = "id, exam_id, student_id, score, max_score, auto_scored, \
    is_final, pending_review, recorded_by, updated_at";

const TASK_COLUMNS: &str = "id, session_id, answer_id, question_id, assigned_teacher_id, \
    status, priority, suggested_points, confidence, resolved_by, created_at, updated_at, \
    completed_at";

/// One row of the consolidated scoring read: a question, its correct option,
/// the student's answer (if any) and the picked option's partial credit.
#[derive(FromRow)]
struct SnapshotRow {
    #[sqlx(flatten)]
    question: ExamQuestion,
    correct_option_id: Option<i64>,
    answer_id: Option<i64>,
    selected_option_id: Option<i64>,
    text_answer: Option<String>,
    is_correct: Option<bool>,
    points_earned: Option<f64>,
    auto_scored: Option<bool>,
    manual_override: Option<bool>,
    feedback_text: Option<String>,
    answer_updated_at: Option<DateTime<Utc>>,
    selected_partial_credit: Option<f64>,
    reviewed: bool,
}

impl SnapshotRow {
    fn into_item(self, session_id: i64) -> SnapshotItem {
        let answer = match (self.answer_id, self.answer_updated_at) {
            (Some(id), Some(updated_at)) => Some(StudentAnswer {
                id,
                session_id,
                question_id: self.question.id,
                selected_option_id: self.selected_option_id,
                text_answer: self.text_answer,
                is_correct: self.is_correct,
                points_earned: self.points_earned.unwrap_or(0.0),
                auto_scored: self.auto_scored.unwrap_or(false),
                manual_override: self.manual_override.unwrap_or(false),
                feedback_text: self.feedback_text,
                updated_at,
            }),
            _ => None,
        };

        SnapshotItem {
            question: self.question,
            correct_option_id: self.correct_option_id,
            answer,
            selected_partial_credit: self.selected_partial_credit,
            reviewed: self.reviewed,
        }
    }
}

/// `ExamStore` backed by Postgres.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl ExamStore for PgStore {
    async fn first_active_user_with_role(&self, role: Role) -> Result<Option<i64>, AppError> {
        let id = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM users WHERE role = $1 AND is_active = TRUE ORDER BY id LIMIT 1",
        )
        .bind(role.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(id)
    }

    async fn is_active_user(&self, user_id: i64) -> Result<bool, AppError> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM users WHERE id = $1 AND is_active = TRUE)",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn active_user_role(&self, user_id: i64) -> Result<Option<Role>, AppError> {
        let role = sqlx::query_scalar::<_, String>(
            "SELECT role FROM users WHERE id = $1 AND is_active = TRUE",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        role.map(Role::try_from)
            .transpose()
            .map_err(|e| AppError::InternalServerError(e.to_string()))
    }

    async fn first_active_user(&self) -> Result<Option<i64>, AppError> {
        let id = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM users WHERE is_active = TRUE ORDER BY id LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(id)
    }

    async fn find_exam(&self, exam_id: i64) -> Result<Option<Exam>, AppError> {
        let exam = sqlx::query_as::<_, Exam>(&format!(
            "SELECT {EXAM_COLUMNS} FROM exams WHERE id = $1"
        ))
        .bind(exam_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(exam)
    }

    async fn publish_due_exams(&self, now: DateTime<Utc>) -> Result<Vec<i64>, AppError> {
        let ids = sqlx::query_scalar::<_, i64>(
            r#"
            UPDATE exams
            SET is_published = TRUE
            WHERE is_published = FALSE
              AND timer_mode = 'global'
              AND start_time IS NOT NULL
              AND start_time <= $1
            RETURNING id
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to publish due exams: {:?}", e);
            AppError::InternalServerError(e.to_string())
        })?;

        Ok(ids)
    }

    async fn insert_session_if_absent(
        &self,
        new: &NewSession,
    ) -> Result<Option<ExamSession>, AppError> {
        // The partial unique index turns a concurrent second insert into a no-op.
        let session = sqlx::query_as::<_, ExamSession>(&format!(
            r#"
            INSERT INTO exam_sessions
                (exam_id, student_id, started_at, time_remaining, is_completed, status, metadata)
            VALUES ($1, $2, $3, $4, FALSE, 'in_progress', $5)
            ON CONFLICT (exam_id, student_id) WHERE is_completed = FALSE DO NOTHING
            RETURNING {SESSION_COLUMNS}
            "#
        ))
        .bind(new.exam_id)
        .bind(new.student_id)
        .bind(new.started_at)
        .bind(new.time_remaining)
        .bind(Json(&new.metadata))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to insert exam session: {:?}", e);
            AppError::InternalServerError(e.to_string())
        })?;

        Ok(session)
    }

    async fn find_active_session(
        &self,
        exam_id: i64,
        student_id: i64,
    ) -> Result<Option<ExamSession>, AppError> {
        let session = sqlx::query_as::<_, ExamSession>(&format!(
            "SELECT {SESSION_COLUMNS} FROM exam_sessions
             WHERE exam_id = $1 AND student_id = $2 AND is_completed = FALSE"
        ))
        .bind(exam_id)
        .bind(student_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(session)
    }

    async fn find_session(&self, session_id: i64) -> Result<Option<ExamSession>, AppError> {
        let session = sqlx::query_as::<_, ExamSession>(&format!(
            "SELECT {SESSION_COLUMNS} FROM exam_sessions WHERE id = $1"
        ))
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(session)
    }

    async fn update_progress(
        &self,
        session_id: i64,
        update: &ProgressUpdate,
    ) -> Result<Option<ExamSession>, AppError> {
        let session = sqlx::query_as::<_, ExamSession>(&format!(
            r#"
            UPDATE exam_sessions SET
                time_remaining = COALESCE($2, time_remaining),
                metadata = CASE
                    WHEN $3::INTEGER IS NULL THEN metadata
                    ELSE jsonb_set(metadata, '{{current_question_index}}', to_jsonb($3::INTEGER))
                END
            WHERE id = $1
            RETURNING {SESSION_COLUMNS}
            "#
        ))
        .bind(session_id)
        .bind(update.time_remaining)
        .bind(update.current_question_index)
        .fetch_optional(&self.pool)
        .await?;

        Ok(session)
    }

    async fn complete_session(
        &self,
        session_id: i64,
        now: DateTime<Utc>,
        forced: bool,
    ) -> Result<Option<ExamSession>, AppError> {
        let session = sqlx::query_as::<_, ExamSession>(&format!(
            r#"
            UPDATE exam_sessions SET
                is_completed = TRUE,
                submitted_at = $2,
                status = 'submitted',
                metadata = CASE
                    WHEN $3::BOOLEAN THEN jsonb_set(metadata, '{{force_submitted}}', 'true'::jsonb)
                    ELSE metadata
                END
            WHERE id = $1 AND is_completed = FALSE
            RETURNING {SESSION_COLUMNS}
            "#
        ))
        .bind(session_id)
        .bind(now)
        .bind(forced)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to complete session {}: {:?}", session_id, e);
            AppError::InternalServerError(e.to_string())
        })?;

        Ok(session)
    }

    async fn expired_sessions(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<ExamSession>, AppError> {
        let sessions = sqlx::query_as::<_, ExamSession>(
            r#"
            SELECT s.id, s.exam_id, s.student_id, s.started_at, s.submitted_at,
                   s.time_remaining, s.is_completed, s.status, s.score, s.max_score, s.metadata
            FROM exam_sessions s
            JOIN exams e ON e.id = s.exam_id
            WHERE s.is_completed = FALSE
              AND s.started_at + make_interval(mins => e.duration_minutes) <= $1
            ORDER BY s.started_at, s.id
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(sessions)
    }

    async fn delete_session(&self, session_id: i64) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM exam_sessions WHERE id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!("Failed to delete session: {:?}", e);
                AppError::InternalServerError(e.to_string())
            })?;

        Ok(result.rows_affected() > 0)
    }

    async fn find_question(&self, question_id: i64) -> Result<Option<ExamQuestion>, AppError> {
        let question = sqlx::query_as::<_, ExamQuestion>(&format!(
            "SELECT {QUESTION_COLUMNS} FROM exam_questions WHERE id = $1"
        ))
        .bind(question_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(question)
    }

    async fn find_option(&self, option_id: i64) -> Result<Option<QuestionOption>, AppError> {
        let option = sqlx::query_as::<_, QuestionOption>(
            "SELECT id, question_id, is_correct, partial_credit_value, order_number
             FROM question_options WHERE id = $1",
        )
        .bind(option_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(option)
    }

    async fn upsert_answer(
        &self,
        session_id: i64,
        question_id: i64,
        payload: &AnswerPayload,
    ) -> Result<StudentAnswer, AppError> {
        let answer = sqlx::query_as::<_, StudentAnswer>(&format!(
            r#"
            INSERT INTO student_answers (session_id, question_id, selected_option_id, text_answer, updated_at)
            VALUES ($1, $2, $3, $4, NOW())
            ON CONFLICT (session_id, question_id) DO UPDATE SET
                selected_option_id = EXCLUDED.selected_option_id,
                text_answer = EXCLUDED.text_answer,
                updated_at = NOW()
            RETURNING {ANSWER_COLUMNS}
            "#
        ))
        .bind(session_id)
        .bind(question_id)
        .bind(payload.selected_option_id())
        .bind(payload.text_answer())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to upsert answer: {:?}", e);
            AppError::InternalServerError(e.to_string())
        })?;

        Ok(answer)
    }

    async fn load_scoring_snapshot(
        &self,
        session_id: i64,
    ) -> Result<Option<ScoringSnapshot>, AppError> {
        let Some(session) = self.find_session(session_id).await? else {
            return Ok(None);
        };

        // One round trip for questions, answers, correct options and the
        // partial credit of whatever option the student picked.
        let rows = sqlx::query_as::<_, SnapshotRow>(
            r#"
            SELECT
                q.id, q.exam_id, q.question_type, q.points, q.auto_gradable,
                q.expected_answers, q.case_sensitive, q.allow_partial_credit,
                q.partial_credit_rules, q.sample_answer, q.order_number,
                co.id AS correct_option_id,
                a.id AS answer_id,
                a.selected_option_id,
                a.text_answer,
                a.is_correct,
                a.points_earned,
                a.auto_scored,
                a.manual_override,
                a.feedback_text,
                a.updated_at AS answer_updated_at,
                so.partial_credit_value AS selected_partial_credit,
                EXISTS (
                    SELECT 1 FROM grading_tasks t
                    WHERE t.answer_id = a.id AND t.status = 'completed'
                ) AS reviewed
            FROM exam_questions q
            LEFT JOIN LATERAL (
                SELECT o.id FROM question_options o
                WHERE o.question_id = q.id AND o.is_correct = TRUE
                ORDER BY o.order_number, o.id
                LIMIT 1
            ) co ON TRUE
            LEFT JOIN student_answers a ON a.question_id = q.id AND a.session_id = $1
            LEFT JOIN question_options so ON so.id = a.selected_option_id
            WHERE q.exam_id = $2
            ORDER BY q.order_number, q.id
            "#,
        )
        .bind(session.id)
        .bind(session.exam_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to load scoring snapshot: {:?}", e);
            AppError::InternalServerError(e.to_string())
        })?;

        let items = rows.into_iter().map(|r| r.into_item(session_id)).collect();

        Ok(Some(ScoringSnapshot { session, items }))
    }

    async fn record_scoring(
        &self,
        write: &ScoringWrite,
    ) -> Result<Option<ExamResult>, AppError> {
        let mut tx = self.pool.begin().await?;

        for update in &write.answer_updates {
            sqlx::query(
                r#"
                UPDATE student_answers SET
                    points_earned = $2,
                    is_correct = $3,
                    auto_scored = $4,
                    feedback_text = $5,
                    updated_at = NOW()
                WHERE id = $1
                "#,
            )
            .bind(update.answer_id)
            .bind(update.points_earned)
            .bind(update.is_correct)
            .bind(update.auto_scored)
            .bind(&update.feedback_text)
            .execute(&mut *tx)
            .await?;
        }

        for task in &write.review_tasks {
            sqlx::query(
                r#"
                INSERT INTO grading_tasks
                    (session_id, answer_id, question_id, status, priority, suggested_points, confidence)
                VALUES ($1, $2, $3, 'pending', $4, $5, $6)
                ON CONFLICT (answer_id) DO UPDATE SET
                    priority = EXCLUDED.priority,
                    suggested_points = EXCLUDED.suggested_points,
                    confidence = EXCLUDED.confidence,
                    updated_at = NOW()
                WHERE grading_tasks.status <> 'completed'
                "#,
            )
            .bind(task.session_id)
            .bind(task.answer_id)
            .bind(task.question_id)
            .bind(task.priority)
            .bind(task.suggested_points)
            .bind(task.confidence)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query("UPDATE exam_sessions SET score = $2, max_score = $3, status = $4 WHERE id = $1")
            .bind(write.session_id)
            .bind(write.result.score)
            .bind(write.result.max_score)
            .bind(write.session_status.as_str())
            .execute(&mut *tx)
            .await?;

        let r = &write.result;
        let result = sqlx::query_as::<_, ExamResult>(&format!(
            r#"
            INSERT INTO exam_results
                (exam_id, student_id, score, max_score, auto_scored, is_final, pending_review, recorded_by, updated_at)
            SELECT $1, $2, $3, $4, $5, $6, $7, $8, NOW()
            WHERE NOT EXISTS (
                SELECT 1 FROM exam_sessions
                WHERE exam_id = $1 AND student_id = $2 AND id > $9
            )
            ON CONFLICT (exam_id, student_id) DO UPDATE SET
                score = EXCLUDED.score,
                max_score = EXCLUDED.max_score,
                auto_scored = EXCLUDED.auto_scored,
                is_final = EXCLUDED.is_final,
                pending_review = EXCLUDED.pending_review,
                recorded_by = EXCLUDED.recorded_by,
                updated_at = NOW()
            RETURNING {RESULT_COLUMNS}
            "#
        ))
        .bind(r.exam_id)
        .bind(r.student_id)
        .bind(r.score)
        .bind(r.max_score)
        .bind(r.auto_scored)
        .bind(r.is_final)
        .bind(r.pending_review)
        .bind(r.recorded_by)
        .bind(write.session_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| {
            tracing::error!("Failed to upsert exam result: {:?}", e);
            AppError::InternalServerError(e.to_string())
        })?;

        tx.commit().await?;

        Ok(result)
    }

    async fn find_result(
        &self,
        exam_id: i64,
        student_id: i64,
    ) -> Result<Option<ExamResult>, AppError> {
        let result = sqlx::query_as::<_, ExamResult>(&format!(
            "SELECT {RESULT_COLUMNS} FROM exam_results WHERE exam_id = $1 AND student_id = $2"
        ))
        .bind(exam_id)
        .bind(student_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(result)
    }

    async fn list_grading_tasks(&self, filter: &TaskFilter) -> Result<Vec<GradingTask>, AppError> {
        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {TASK_COLUMNS} FROM grading_tasks WHERE TRUE"));

        if let Some(teacher_id) = filter.teacher_id {
            builder.push(" AND assigned_teacher_id = ");
            builder.push_bind(teacher_id);
        }

        if let Some(status) = filter.status {
            builder.push(" AND status = ");
            builder.push_bind(status.as_str());
        }

        builder.push(" ORDER BY priority DESC, created_at, id");

        let tasks = builder
            .build_query_as::<GradingTask>()
            .fetch_all(&self.pool)
            .await?;

        Ok(tasks)
    }

    async fn find_grading_task(&self, task_id: i64) -> Result<Option<GradingTask>, AppError> {
        let task = sqlx::query_as::<_, GradingTask>(&format!(
            "SELECT {TASK_COLUMNS} FROM grading_tasks WHERE id = $1"
        ))
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(task)
    }

    async fn assign_grading_task(
        &self,
        task_id: i64,
        teacher_id: i64,
    ) -> Result<GradingTask, AppError> {
        let assigned = sqlx::query_as::<_, GradingTask>(&format!(
            r#"
            UPDATE grading_tasks SET
                assigned_teacher_id = $2,
                status = 'in_progress',
                updated_at = NOW()
            WHERE id = $1 AND status <> 'completed'
            RETURNING {TASK_COLUMNS}
            "#
        ))
        .bind(task_id)
        .bind(teacher_id)
        .fetch_optional(&self.pool)
        .await?;

        match assigned {
            Some(task) => Ok(task),
            None => match self.find_grading_task(task_id).await? {
                Some(_) => Err(AppError::Conflict(format!(
                    "Grading task {} is already completed",
                    task_id
                ))),
                None => Err(AppError::NotFound("Grading task not found".to_string())),
            },
        }
    }

    async fn resolve_grading_task(
        &self,
        task_id: i64,
        resolution: &Resolution,
        reviewer_id: i64,
    ) -> Result<StudentAnswer, AppError> {
        let mut tx = self.pool.begin().await?;

        // Row lock so two reviewers cannot both complete the same task.
        let task = sqlx::query_as::<_, GradingTask>(&format!(
            "SELECT {TASK_COLUMNS} FROM grading_tasks WHERE id = $1 FOR UPDATE"
        ))
        .bind(task_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(AppError::NotFound("Grading task not found".to_string()))?;

        if task.status == TaskStatus::Completed {
            return Err(AppError::Conflict(format!(
                "Grading task {} is already completed",
                task_id
            )));
        }

        let answer = match resolution {
            Resolution::Approve => {
                sqlx::query_as::<_, StudentAnswer>(&format!(
                    r#"
                    UPDATE student_answers SET auto_scored = TRUE, updated_at = NOW()
                    WHERE id = $1
                    RETURNING {ANSWER_COLUMNS}
                    "#
                ))
                .bind(task.answer_id)
                .fetch_optional(&mut *tx)
                .await?
            }
            Resolution::Override { points, feedback } => {
                sqlx::query_as::<_, StudentAnswer>(&format!(
                    r#"
                    UPDATE student_answers SET
                        manual_override = TRUE,
                        auto_scored = FALSE,
                        points_earned = $2,
                        feedback_text = COALESCE($3, feedback_text),
                        updated_at = NOW()
                    WHERE id = $1
                    RETURNING {ANSWER_COLUMNS}
                    "#
                ))
                .bind(task.answer_id)
                .bind(points)
                .bind(feedback)
                .fetch_optional(&mut *tx)
                .await?
            }
        }
        .ok_or(AppError::NotFound("Answer not found".to_string()))?;

        sqlx::query(
            r#"
            UPDATE grading_tasks SET
                status = 'completed',
                resolved_by = $2,
                assigned_teacher_id = COALESCE(assigned_teacher_id, $2),
                completed_at = NOW(),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(task_id)
        .bind(reviewer_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await.map_err(|e| {
            tracing::error!("Failed to commit grading task {}: {:?}", task_id, e);
            AppError::InternalServerError(e.to_string())
        })?;

        Ok(answer)
    }
}
