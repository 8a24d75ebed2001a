// src/services/mod.rs

//! The exam engine proper. Handlers and the scheduler only call into here.

pub mod answers;
pub mod grading;
pub mod identity;
pub mod merger;
pub mod scheduler;
pub mod scoring;
pub mod sessions;
pub mod sweeper;
pub mod text;
