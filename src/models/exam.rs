// src/models/exam.rs

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::models::UnknownVariant;

/// How an exam's clock is driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerMode {
    /// Each student's clock starts when they open the exam.
    PerStudent,
    /// The exam opens for everyone at `start_time`; eligible for auto-publishing.
    Global,
}

impl TimerMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimerMode::PerStudent => "per_student",
            TimerMode::Global => "global",
        }
    }
}

impl TryFrom<String> for TimerMode {
    type Error = UnknownVariant;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "per_student" => Ok(TimerMode::PerStudent),
            "global" => Ok(TimerMode::Global),
            _ => Err(UnknownVariant::new("timer_mode", value)),
        }
    }
}

/// Represents the 'exams' table. Only the scheduling fields are read here.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Exam {
    pub id: i64,
    pub title: String,
    pub duration_minutes: i32,
    #[sqlx(try_from = "String")]
    pub timer_mode: TimerMode,
    pub start_time: Option<DateTime<Utc>>,
    pub is_published: bool,
    pub created_at: DateTime<Utc>,
}

impl Exam {
    pub fn duration(&self) -> Duration {
        Duration::minutes(i64::from(self.duration_minutes.max(0)))
    }

    /// Global-timer exams whose start time has passed and are not yet visible.
    pub fn is_due_for_publish(&self, now: DateTime<Utc>) -> bool {
        !self.is_published
            && self.timer_mode == TimerMode::Global
            && self.start_time.is_some_and(|start| start <= now)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewExam {
    pub title: String,
    pub duration_minutes: i32,
    pub timer_mode: TimerMode,
    pub start_time: Option<DateTime<Utc>>,
    pub is_published: bool,
}

impl NewExam {
    pub fn published(title: impl Into<String>, duration_minutes: i32) -> Self {
        Self {
            title: title.into(),
            duration_minutes,
            timer_mode: TimerMode::PerStudent,
            start_time: None,
            is_published: true,
        }
    }
}
