// src/handlers/mod.rs

pub mod admin;
pub mod grading;
pub mod sessions;
