// src/services/sweeper.rs

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::{error::AppError, services::sessions::SessionManager, store::ExamStore};

/// Outcome of one sweep run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub examined: usize,
    pub submitted: usize,
    /// Closed by someone else between the scan and our update.
    pub skipped: usize,
    pub failed: usize,
}

/// Force-submits attempts whose time ran out.
#[derive(Clone)]
pub struct Sweeper {
    store: Arc<dyn ExamStore>,
    sessions: SessionManager,
    batch_size: i64,
}

impl Sweeper {
    pub fn new(store: Arc<dyn ExamStore>, sessions: SessionManager, batch_size: i64) -> Self {
        Self {
            store,
            sessions,
            batch_size: batch_size.max(1),
        }
    }

    /// Handles one batch of expired sessions. A failing session is logged
    /// and counted; the rest of the batch still runs.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport, AppError> {
        let expired = self.store.expired_sessions(now, self.batch_size).await?;
        let mut report = SweepReport {
            examined: expired.len(),
            ..Default::default()
        };

        for session in expired {
            match self.sessions.force_submit(session.id, now).await {
                Ok(Some(_)) => report.submitted += 1,
                Ok(None) => report.skipped += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::error!("Failed to force-submit session {}: {:?}", session.id, e);
                }
            }
        }

        if report.examined > 0 {
            tracing::info!(
                examined = report.examined,
                submitted = report.submitted,
                skipped = report.skipped,
                failed = report.failed,
                "Sweep finished"
            );
        }
        Ok(report)
    }
}

/// Opens global-timer exams once their start time arrives.
#[derive(Clone)]
pub struct ExamPublisher {
    store: Arc<dyn ExamStore>,
}

impl ExamPublisher {
    pub fn new(store: Arc<dyn ExamStore>) -> Self {
        Self { store }
    }

    pub async fn publish_due(&self, now: DateTime<Utc>) -> Result<Vec<i64>, AppError> {
        let published = self.store.publish_due_exams(now).await?;
        for exam_id in &published {
            tracing::info!("Exam {} published at its scheduled start", exam_id);
        }
        Ok(published)
    }
}
