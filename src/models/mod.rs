// src/models/mod.rs

pub mod answer;
pub mod exam;
pub mod exam_result;
pub mod grading_task;
pub mod question;
pub mod scoring;
pub mod session;
pub mod user;

/// Raised when a text column holds a value no enum variant matches.
#[derive(Debug, thiserror::Error)]
#[error("unknown {kind}: '{value}'")]
pub struct UnknownVariant {
    kind: &'static str,
    value: String,
}

impl UnknownVariant {
    pub fn new(kind: &'static str, value: String) -> Self {
        Self { kind, value }
    }
}
