// src/services/answers.rs

use std::sync::Arc;

use crate::{
    error::AppError,
    models::answer::{AnswerPayload, StudentAnswer},
    store::ExamStore,
};

/// Captures answers while an attempt is open.
#[derive(Clone)]
pub struct AnswerStore {
    store: Arc<dyn ExamStore>,
}

impl AnswerStore {
    pub fn new(store: Arc<dyn ExamStore>) -> Self {
        Self { store }
    }

    /// Validates the payload against the question and overwrites any previous
    /// answer for the same (session, question).
    pub async fn save_answer(
        &self,
        session_id: i64,
        question_id: i64,
        payload: &AnswerPayload,
    ) -> Result<StudentAnswer, AppError> {
        let session = self
            .store
            .find_session(session_id)
            .await?
            .ok_or(AppError::NotFound("Session not found".to_string()))?;

        if session.is_completed {
            return Err(AppError::Conflict(
                "Session has already been submitted".to_string(),
            ));
        }

        let question = self
            .store
            .find_question(question_id)
            .await?
            .ok_or(AppError::NotFound("Question not found".to_string()))?;

        if question.exam_id != session.exam_id {
            return Err(AppError::BadRequest(
                "Question does not belong to this exam".to_string(),
            ));
        }

        match payload {
            AnswerPayload::Choice(option_id) => {
                if !question.question_type.is_choice() {
                    return Err(AppError::BadRequest(format!(
                        "A {} question takes a text answer",
                        question.question_type
                    )));
                }
                let option = self
                    .store
                    .find_option(*option_id)
                    .await?
                    .ok_or(AppError::NotFound("Option not found".to_string()))?;
                if option.question_id != question.id {
                    return Err(AppError::BadRequest(
                        "Option does not belong to this question".to_string(),
                    ));
                }
            }
            AnswerPayload::Text(_) => {
                if question.question_type.is_choice() {
                    return Err(AppError::BadRequest(format!(
                        "A {} question takes a selected option",
                        question.question_type
                    )));
                }
            }
        }

        self.store
            .upsert_answer(session_id, question_id, payload)
            .await
    }
}
