// src/routes.rs

use axum::{
    Router,
    http::{HeaderValue, Method, header},
    middleware,
    routing::{delete, get, patch, post, put},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    handlers::{admin, grading, sessions},
    state::AppState,
    utils::jwt::{admin_middleware, auth_middleware, staff_middleware},
};

/// Assembles the main application router.
///
/// * Every route requires a valid bearer token.
/// * Grading routes are limited to staff, session administration to admins.
/// * Applies global middleware (Trace, CORS).
pub fn create_router(state: AppState) -> Router {
    let origins = [
        HeaderValue::from_static("http://localhost:3000"),
        HeaderValue::from_static("http://127.0.0.1:3000"),
    ];

    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    let exam_routes = Router::new().route("/{exam_id}/sessions", post(sessions::start_session));

    let session_routes = Router::new()
        .route("/{id}", get(sessions::get_session))
        .route("/{id}/progress", patch(sessions::update_progress))
        .route("/{id}/answers/{question_id}", put(sessions::save_answer))
        .route("/{id}/submit", post(sessions::submit_session))
        .route("/{id}/result", get(sessions::get_result));

    let grading_routes = Router::new()
        .route("/tasks", get(grading::list_tasks))
        .route("/tasks/{id}/assign", post(grading::assign_task))
        .route("/tasks/{id}/resolve", post(grading::resolve_task))
        .layer(middleware::from_fn(staff_middleware));

    let admin_routes = Router::new()
        .route("/sessions/{id}/rescore", post(admin::rescore_session))
        .route("/sessions/{id}", delete(admin::delete_session))
        .layer(middleware::from_fn(admin_middleware));

    Router::new()
        .nest("/api/exams", exam_routes)
        .nest("/api/sessions", session_routes)
        .nest("/api/grading", grading_routes)
        .nest("/api/admin", admin_routes)
        // Role checks above rely on the claims this layer inserts.
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
        // Global Middleware (applied from outside in)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
