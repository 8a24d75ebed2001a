// src/store/memory.rs

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use tokio::sync::Mutex;

use crate::{
    error::AppError,
    models::{
        answer::{AnswerPayload, StudentAnswer},
        exam::{Exam, NewExam},
        exam_result::ExamResult,
        grading_task::{GradingTask, Resolution, TaskFilter, TaskStatus},
        question::{ExamQuestion, NewOption, NewQuestion, QuestionOption},
        scoring::{ScoringSnapshot, ScoringWrite, SnapshotItem},
        session::{ExamSession, NewSession, ProgressUpdate, SessionStatus},
        user::{Role, User},
    },
    store::ExamStore,
};

#[derive(Default)]
struct Tables {
    next_id: i64,
    users: BTreeMap<i64, User>,
    exams: BTreeMap<i64, Exam>,
    questions: BTreeMap<i64, ExamQuestion>,
    options: BTreeMap<i64, QuestionOption>,
    sessions: BTreeMap<i64, ExamSession>,
    answers: BTreeMap<i64, StudentAnswer>,
    results: BTreeMap<i64, ExamResult>,
    tasks: BTreeMap<i64, GradingTask>,
    failing_writes: BTreeSet<i64>,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn active_session(&self, exam_id: i64, student_id: i64) -> Option<&ExamSession> {
        self.sessions
            .values()
            .find(|s| s.exam_id == exam_id && s.student_id == student_id && !s.is_completed)
    }
}

/// In-process `ExamStore`. Every call takes one lock over all tables, which
/// gives each operation the atomicity the Postgres store gets from its
/// statements and transactions.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_user(&self, username: &str, role: Role) -> User {
        let mut t = self.tables.lock().await;
        let id = t.next_id();
        let user = User {
            id,
            username: username.to_string(),
            password: String::new(),
            role,
            is_active: true,
            created_at: Some(Utc::now()),
        };
        t.users.insert(id, user.clone());
        user
    }

    pub async fn deactivate_user(&self, user_id: i64) {
        let mut t = self.tables.lock().await;
        if let Some(user) = t.users.get_mut(&user_id) {
            user.is_active = false;
        }
    }

    pub async fn add_exam(&self, new: NewExam) -> Exam {
        let mut t = self.tables.lock().await;
        let id = t.next_id();
        let exam = Exam {
            id,
            title: new.title,
            duration_minutes: new.duration_minutes,
            timer_mode: new.timer_mode,
            start_time: new.start_time,
            is_published: new.is_published,
            created_at: Utc::now(),
        };
        t.exams.insert(id, exam.clone());
        exam
    }

    pub async fn add_question(&self, new: NewQuestion) -> ExamQuestion {
        let mut t = self.tables.lock().await;
        let id = t.next_id();
        let question = new.into_question(id);
        t.questions.insert(id, question.clone());
        question
    }

    pub async fn add_option(&self, new: NewOption) -> QuestionOption {
        let mut t = self.tables.lock().await;
        let id = t.next_id();
        let option = QuestionOption {
            id,
            question_id: new.question_id,
            is_correct: new.is_correct,
            partial_credit_value: new.partial_credit_value,
            order_number: new.order_number,
        };
        t.options.insert(id, option.clone());
        option
    }

    /// Moves a session's start time, e.g. to put it past its deadline.
    pub async fn backdate_session(&self, session_id: i64, started_at: DateTime<Utc>) {
        let mut t = self.tables.lock().await;
        if let Some(session) = t.sessions.get_mut(&session_id) {
            session.started_at = started_at;
        }
    }

    /// Makes every later scoring write for the session fail.
    pub async fn fail_scoring_writes(&self, session_id: i64) {
        let mut t = self.tables.lock().await;
        t.failing_writes.insert(session_id);
    }

    pub async fn count_sessions(&self, exam_id: i64, student_id: i64) -> usize {
        let t = self.tables.lock().await;
        t.sessions
            .values()
            .filter(|s| s.exam_id == exam_id && s.student_id == student_id)
            .count()
    }
}

#[async_trait]
impl ExamStore for MemoryStore {
    async fn first_active_user_with_role(&self, role: Role) -> Result<Option<i64>, AppError> {
        let t = self.tables.lock().await;
        Ok(t.users
            .values()
            .find(|u| u.is_active && u.role == role)
            .map(|u| u.id))
    }

    async fn is_active_user(&self, user_id: i64) -> Result<bool, AppError> {
        let t = self.tables.lock().await;
        Ok(t.users.get(&user_id).is_some_and(|u| u.is_active))
    }

    async fn active_user_role(&self, user_id: i64) -> Result<Option<Role>, AppError> {
        let t = self.tables.lock().await;
        Ok(t.users
            .get(&user_id)
            .filter(|u| u.is_active)
            .map(|u| u.role))
    }

    async fn first_active_user(&self) -> Result<Option<i64>, AppError> {
        let t = self.tables.lock().await;
        Ok(t.users.values().find(|u| u.is_active).map(|u| u.id))
    }

    async fn find_exam(&self, exam_id: i64) -> Result<Option<Exam>, AppError> {
        let t = self.tables.lock().await;
        Ok(t.exams.get(&exam_id).cloned())
    }

    async fn publish_due_exams(&self, now: DateTime<Utc>) -> Result<Vec<i64>, AppError> {
        let mut t = self.tables.lock().await;
        let mut published = Vec::new();
        for exam in t.exams.values_mut() {
            if exam.is_due_for_publish(now) {
                exam.is_published = true;
                published.push(exam.id);
            }
        }
        Ok(published)
    }

    async fn insert_session_if_absent(
        &self,
        new: &NewSession,
    ) -> Result<Option<ExamSession>, AppError> {
        let mut t = self.tables.lock().await;
        if t.active_session(new.exam_id, new.student_id).is_some() {
            return Ok(None);
        }

        let id = t.next_id();
        let session = ExamSession {
            id,
            exam_id: new.exam_id,
            student_id: new.student_id,
            started_at: new.started_at,
            submitted_at: None,
            time_remaining: new.time_remaining,
            is_completed: false,
            status: SessionStatus::InProgress,
            score: 0.0,
            max_score: 0.0,
            metadata: Json(new.metadata.clone()),
        };
        t.sessions.insert(id, session.clone());
        Ok(Some(session))
    }

    async fn find_active_session(
        &self,
        exam_id: i64,
        student_id: i64,
    ) -> Result<Option<ExamSession>, AppError> {
        let t = self.tables.lock().await;
        Ok(t.active_session(exam_id, student_id).cloned())
    }

    async fn find_session(&self, session_id: i64) -> Result<Option<ExamSession>, AppError> {
        let t = self.tables.lock().await;
        Ok(t.sessions.get(&session_id).cloned())
    }

    async fn update_progress(
        &self,
        session_id: i64,
        update: &ProgressUpdate,
    ) -> Result<Option<ExamSession>, AppError> {
        let mut t = self.tables.lock().await;
        let Some(session) = t.sessions.get_mut(&session_id) else {
            return Ok(None);
        };
        if let Some(time_remaining) = update.time_remaining {
            session.time_remaining = time_remaining;
        }
        if let Some(index) = update.current_question_index {
            session.metadata.current_question_index = Some(index);
        }
        Ok(Some(session.clone()))
    }

    async fn complete_session(
        &self,
        session_id: i64,
        now: DateTime<Utc>,
        forced: bool,
    ) -> Result<Option<ExamSession>, AppError> {
        let mut t = self.tables.lock().await;
        match t.sessions.get_mut(&session_id) {
            Some(session) if !session.is_completed => {
                session.is_completed = true;
                session.submitted_at = Some(now);
                session.status = SessionStatus::Submitted;
                if forced {
                    session.metadata.force_submitted = true;
                }
                Ok(Some(session.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn expired_sessions(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<ExamSession>, AppError> {
        let t = self.tables.lock().await;
        let mut expired: Vec<ExamSession> = t
            .sessions
            .values()
            .filter(|s| !s.is_completed)
            .filter(|s| {
                t.exams
                    .get(&s.exam_id)
                    .is_some_and(|exam| s.deadline(exam) <= now)
            })
            .cloned()
            .collect();
        expired.sort_by_key(|s| (s.started_at, s.id));
        expired.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(expired)
    }

    async fn delete_session(&self, session_id: i64) -> Result<bool, AppError> {
        let mut t = self.tables.lock().await;
        if t.sessions.remove(&session_id).is_none() {
            return Ok(false);
        }
        let answer_ids: Vec<i64> = t
            .answers
            .values()
            .filter(|a| a.session_id == session_id)
            .map(|a| a.id)
            .collect();
        for id in answer_ids {
            t.answers.remove(&id);
        }
        t.tasks.retain(|_, task| task.session_id != session_id);
        Ok(true)
    }

    async fn find_question(&self, question_id: i64) -> Result<Option<ExamQuestion>, AppError> {
        let t = self.tables.lock().await;
        Ok(t.questions.get(&question_id).cloned())
    }

    async fn find_option(&self, option_id: i64) -> Result<Option<QuestionOption>, AppError> {
        let t = self.tables.lock().await;
        Ok(t.options.get(&option_id).cloned())
    }

    async fn upsert_answer(
        &self,
        session_id: i64,
        question_id: i64,
        payload: &AnswerPayload,
    ) -> Result<StudentAnswer, AppError> {
        let mut t = self.tables.lock().await;
        let existing = t
            .answers
            .values_mut()
            .find(|a| a.session_id == session_id && a.question_id == question_id);

        if let Some(answer) = existing {
            answer.selected_option_id = payload.selected_option_id();
            answer.text_answer = payload.text_answer().map(str::to_string);
            answer.updated_at = Utc::now();
            return Ok(answer.clone());
        }

        let id = t.next_id();
        let answer = StudentAnswer {
            id,
            session_id,
            question_id,
            selected_option_id: payload.selected_option_id(),
            text_answer: payload.text_answer().map(str::to_string),
            is_correct: None,
            points_earned: 0.0,
            auto_scored: false,
            manual_override: false,
            feedback_text: None,
            updated_at: Utc::now(),
        };
        t.answers.insert(id, answer.clone());
        Ok(answer)
    }

    async fn load_scoring_snapshot(
        &self,
        session_id: i64,
    ) -> Result<Option<ScoringSnapshot>, AppError> {
        let t = self.tables.lock().await;
        let Some(session) = t.sessions.get(&session_id).cloned() else {
            return Ok(None);
        };

        let mut questions: Vec<&ExamQuestion> = t
            .questions
            .values()
            .filter(|q| q.exam_id == session.exam_id)
            .collect();
        questions.sort_by_key(|q| (q.order_number, q.id));

        let items = questions
            .into_iter()
            .map(|question| {
                let mut correct: Vec<&QuestionOption> = t
                    .options
                    .values()
                    .filter(|o| o.question_id == question.id && o.is_correct)
                    .collect();
                correct.sort_by_key(|o| (o.order_number, o.id));

                let answer = t
                    .answers
                    .values()
                    .find(|a| a.session_id == session_id && a.question_id == question.id)
                    .cloned();

                let selected_partial_credit = answer
                    .as_ref()
                    .and_then(|a| a.selected_option_id)
                    .and_then(|id| t.options.get(&id))
                    .map(|o| o.partial_credit_value);

                let reviewed = answer.as_ref().is_some_and(|a| {
                    t.tasks
                        .values()
                        .any(|task| task.answer_id == a.id && task.status == TaskStatus::Completed)
                });

                SnapshotItem {
                    question: question.clone(),
                    correct_option_id: correct.first().map(|o| o.id),
                    answer,
                    selected_partial_credit,
                    reviewed,
                }
            })
            .collect();

        Ok(Some(ScoringSnapshot { session, items }))
    }

    async fn record_scoring(
        &self,
        write: &ScoringWrite,
    ) -> Result<Option<ExamResult>, AppError> {
        let mut t = self.tables.lock().await;
        if t.failing_writes.contains(&write.session_id) {
            return Err(AppError::InternalServerError(format!(
                "Scoring write rejected for session {}",
                write.session_id
            )));
        }
        let now = Utc::now();

        for update in &write.answer_updates {
            if let Some(answer) = t.answers.get_mut(&update.answer_id) {
                answer.points_earned = update.points_earned;
                answer.is_correct = update.is_correct;
                answer.auto_scored = update.auto_scored;
                answer.feedback_text = update.feedback_text.clone();
                answer.updated_at = now;
            }
        }

        for review in &write.review_tasks {
            let existing = t.tasks.values_mut().find(|task| task.answer_id == review.answer_id);
            match existing {
                Some(task) if task.status != TaskStatus::Completed => {
                    task.priority = review.priority;
                    task.suggested_points = review.suggested_points;
                    task.confidence = review.confidence;
                    task.updated_at = now;
                }
                Some(_) => {}
                None => {
                    let id = t.next_id();
                    t.tasks.insert(
                        id,
                        GradingTask {
                            id,
                            session_id: review.session_id,
                            answer_id: review.answer_id,
                            question_id: review.question_id,
                            assigned_teacher_id: None,
                            status: TaskStatus::Pending,
                            priority: review.priority,
                            suggested_points: review.suggested_points,
                            confidence: review.confidence,
                            resolved_by: None,
                            created_at: now,
                            updated_at: now,
                            completed_at: None,
                        },
                    );
                }
            }
        }

        let r = &write.result;
        if let Some(session) = t.sessions.get_mut(&write.session_id) {
            session.score = r.score;
            session.max_score = r.max_score;
            session.status = write.session_status;
        }

        let superseded = t.sessions.values().any(|s| {
            s.exam_id == r.exam_id && s.student_id == r.student_id && s.id > write.session_id
        });
        if superseded {
            return Ok(None);
        }

        let existing = t
            .results
            .values()
            .find(|x| x.exam_id == r.exam_id && x.student_id == r.student_id)
            .map(|x| x.id);
        let id = match existing {
            Some(id) => id,
            None => t.next_id(),
        };
        let result = ExamResult {
            id,
            exam_id: r.exam_id,
            student_id: r.student_id,
            score: r.score,
            max_score: r.max_score,
            auto_scored: r.auto_scored,
            is_final: r.is_final,
            pending_review: r.pending_review,
            recorded_by: r.recorded_by,
            updated_at: now,
        };
        t.results.insert(id, result.clone());
        Ok(Some(result))
    }

    async fn find_result(
        &self,
        exam_id: i64,
        student_id: i64,
    ) -> Result<Option<ExamResult>, AppError> {
        let t = self.tables.lock().await;
        Ok(t.results
            .values()
            .find(|r| r.exam_id == exam_id && r.student_id == student_id)
            .cloned())
    }

    async fn list_grading_tasks(&self, filter: &TaskFilter) -> Result<Vec<GradingTask>, AppError> {
        let t = self.tables.lock().await;
        let mut tasks: Vec<GradingTask> = t
            .tasks
            .values()
            .filter(|task| {
                filter
                    .teacher_id
                    .is_none_or(|teacher| task.assigned_teacher_id == Some(teacher))
            })
            .filter(|task| filter.status.is_none_or(|status| task.status == status))
            .cloned()
            .collect();
        tasks.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.created_at.cmp(&b.created_at))
                .then(a.id.cmp(&b.id))
        });
        Ok(tasks)
    }

    async fn find_grading_task(&self, task_id: i64) -> Result<Option<GradingTask>, AppError> {
        let t = self.tables.lock().await;
        Ok(t.tasks.get(&task_id).cloned())
    }

    async fn assign_grading_task(
        &self,
        task_id: i64,
        teacher_id: i64,
    ) -> Result<GradingTask, AppError> {
        let mut t = self.tables.lock().await;
        let task = t
            .tasks
            .get_mut(&task_id)
            .ok_or(AppError::NotFound("Grading task not found".to_string()))?;

        if task.status == TaskStatus::Completed {
            return Err(AppError::Conflict(format!(
                "Grading task {} is already completed",
                task_id
            )));
        }

        task.assigned_teacher_id = Some(teacher_id);
        task.status = TaskStatus::InProgress;
        task.updated_at = Utc::now();
        Ok(task.clone())
    }

    async fn resolve_grading_task(
        &self,
        task_id: i64,
        resolution: &Resolution,
        reviewer_id: i64,
    ) -> Result<StudentAnswer, AppError> {
        let mut t = self.tables.lock().await;
        let now = Utc::now();

        let (answer_id, status) = t
            .tasks
            .get(&task_id)
            .map(|task| (task.answer_id, task.status))
            .ok_or(AppError::NotFound("Grading task not found".to_string()))?;

        if status == TaskStatus::Completed {
            return Err(AppError::Conflict(format!(
                "Grading task {} is already completed",
                task_id
            )));
        }

        let answer = t
            .answers
            .get_mut(&answer_id)
            .ok_or(AppError::NotFound("Answer not found".to_string()))?;

        match resolution {
            Resolution::Approve => {
                answer.auto_scored = true;
            }
            Resolution::Override { points, feedback } => {
                answer.manual_override = true;
                answer.auto_scored = false;
                answer.points_earned = *points;
                if let Some(feedback) = feedback {
                    answer.feedback_text = Some(feedback.clone());
                }
            }
        }
        answer.updated_at = now;
        let answer = answer.clone();

        if let Some(task) = t.tasks.get_mut(&task_id) {
            task.status = TaskStatus::Completed;
            task.resolved_by = Some(reviewer_id);
            task.assigned_teacher_id.get_or_insert(reviewer_id);
            task.completed_at = Some(now);
            task.updated_at = now;
        }

        Ok(answer)
    }
}
