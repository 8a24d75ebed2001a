// src/state.rs

use std::sync::Arc;

use axum::extract::FromRef;

use crate::{
    config::Config,
    services::{
        answers::AnswerStore,
        grading::GradingQueue,
        sessions::SessionManager,
        sweeper::{ExamPublisher, Sweeper},
    },
    store::ExamStore,
};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ExamStore>,
    pub config: Config,
}

impl AppState {
    pub fn new(store: Arc<dyn ExamStore>, config: Config) -> Self {
        Self { store, config }
    }

    pub fn sessions(&self) -> SessionManager {
        SessionManager::new(self.store.clone(), self.config.scoring.clone())
    }

    pub fn answers(&self) -> AnswerStore {
        AnswerStore::new(self.store.clone())
    }

    pub fn grading(&self) -> GradingQueue {
        GradingQueue::new(self.store.clone())
    }

    pub fn sweeper(&self) -> Sweeper {
        Sweeper::new(
            self.store.clone(),
            self.sessions(),
            self.config.scheduler.sweep_batch_size,
        )
    }

    pub fn publisher(&self) -> ExamPublisher {
        ExamPublisher::new(self.store.clone())
    }
}

impl FromRef<AppState> for Config {
    fn from_ref(state: &AppState) -> Self {
        state.config.clone()
    }
}
