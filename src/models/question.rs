// src/models/question.rs

use std::fmt;

use serde::{Deserialize, Serialize};
use sqlx::{prelude::FromRow, types::Json};
use validator::Validate;

use crate::{config::ScoringPolicy, models::UnknownVariant};

/// The five question shapes an exam can contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    MultipleChoice,
    TrueFalse,
    Text,
    FillBlank,
    Essay,
}

impl QuestionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuestionType::MultipleChoice => "multiple_choice",
            QuestionType::TrueFalse => "true_false",
            QuestionType::Text => "text",
            QuestionType::FillBlank => "fill_blank",
            QuestionType::Essay => "essay",
        }
    }

    /// Answered by picking one of the question's options.
    pub fn is_choice(&self) -> bool {
        matches!(self, QuestionType::MultipleChoice | QuestionType::TrueFalse)
    }

    /// Answered with free text; these are the items the result merger waits on.
    pub fn is_free_text(&self) -> bool {
        matches!(
            self,
            QuestionType::Text | QuestionType::FillBlank | QuestionType::Essay
        )
    }
}

impl fmt::Display for QuestionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for QuestionType {
    type Error = UnknownVariant;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "multiple_choice" => Ok(QuestionType::MultipleChoice),
            "true_false" => Ok(QuestionType::TrueFalse),
            "text" => Ok(QuestionType::Text),
            "fill_blank" => Ok(QuestionType::FillBlank),
            "essay" => Ok(QuestionType::Essay),
            _ => Err(UnknownVariant::new("question_type", value)),
        }
    }
}

/// Fuzzy-match settings for text questions that allow partial credit.
/// Stored as JSON; missing values fall back to the scoring policy.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PartialCreditRules {
    #[serde(default, alias = "minSimilarity")]
    pub min_similarity: Option<f64>,
    #[serde(default, alias = "partialPercentage")]
    pub partial_percentage: Option<f64>,
}

impl PartialCreditRules {
    pub fn min_similarity(rules: Option<&Self>, policy: &ScoringPolicy) -> f64 {
        rules
            .and_then(|r| r.min_similarity)
            .unwrap_or(policy.default_min_similarity)
            .clamp(0.0, 1.0)
    }

    pub fn partial_percentage(rules: Option<&Self>, policy: &ScoringPolicy) -> f64 {
        rules
            .and_then(|r| r.partial_percentage)
            .unwrap_or(policy.default_partial_percentage)
            .clamp(0.0, 1.0)
    }
}

/// Represents the 'exam_questions' table in the database.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ExamQuestion {
    pub id: i64,
    pub exam_id: i64,

    #[sqlx(try_from = "String")]
    pub question_type: QuestionType,

    /// Maximum points for this question.
    pub points: f64,

    /// When false, free-text answers always go to a human.
    pub auto_gradable: bool,

    /// Accepted answers for text questions, keywords for essays.
    pub expected_answers: Json<Vec<String>>,

    pub case_sensitive: bool,
    pub allow_partial_credit: bool,
    pub partial_credit_rules: Option<Json<PartialCreditRules>>,

    /// Model answer used by the essay heuristic.
    pub sample_answer: Option<String>,

    pub order_number: i32,
}

impl ExamQuestion {
    pub fn rules(&self) -> Option<&PartialCreditRules> {
        self.partial_credit_rules.as_ref().map(|r| &r.0)
    }
}

/// Represents the 'question_options' table in the database.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct QuestionOption {
    pub id: i64,
    pub question_id: i64,
    pub is_correct: bool,
    /// Points awarded for picking this option when it is wrong but close.
    pub partial_credit_value: f64,
    pub order_number: i32,
}

/// Question definition as handed over by the question bank.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewQuestion {
    pub exam_id: i64,
    pub question_type: QuestionType,
    #[validate(range(min = 0.0))]
    pub points: f64,
    pub auto_gradable: bool,
    pub expected_answers: Vec<String>,
    pub case_sensitive: bool,
    pub allow_partial_credit: bool,
    pub partial_credit_rules: Option<PartialCreditRules>,
    #[validate(length(max = 20000))]
    pub sample_answer: Option<String>,
    pub order_number: i32,
}

impl NewQuestion {
    pub fn new(exam_id: i64, question_type: QuestionType, points: f64) -> Self {
        Self {
            exam_id,
            question_type,
            points,
            auto_gradable: true,
            expected_answers: Vec::new(),
            case_sensitive: false,
            allow_partial_credit: false,
            partial_credit_rules: None,
            sample_answer: None,
            order_number: 0,
        }
    }

    pub fn expecting<I, S>(mut self, answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.expected_answers = answers.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_partial_credit(mut self, rules: Option<PartialCreditRules>) -> Self {
        self.allow_partial_credit = true;
        self.partial_credit_rules = rules;
        self
    }

    pub fn with_sample_answer(mut self, sample: impl Into<String>) -> Self {
        self.sample_answer = Some(sample.into());
        self
    }

    pub fn into_question(self, id: i64) -> ExamQuestion {
        ExamQuestion {
            id,
            exam_id: self.exam_id,
            question_type: self.question_type,
            points: self.points,
            auto_gradable: self.auto_gradable,
            expected_answers: Json(self.expected_answers),
            case_sensitive: self.case_sensitive,
            allow_partial_credit: self.allow_partial_credit,
            partial_credit_rules: self.partial_credit_rules.map(Json),
            sample_answer: self.sample_answer,
            order_number: self.order_number,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewOption {
    pub question_id: i64,
    pub is_correct: bool,
    pub partial_credit_value: f64,
    pub order_number: i32,
}
