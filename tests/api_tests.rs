// tests/api_tests.rs

use std::sync::Arc;

use exam_engine::{
    config::Config,
    models::{
        exam::NewExam,
        question::{NewOption, NewQuestion, QuestionType},
        user::{Role, User},
    },
    routes,
    state::AppState,
    store::MemoryStore,
    utils::jwt::sign_jwt,
};
use serde_json::{Value, json};

const SECRET: &str = "test_secret_for_integration_tests";

struct TestApp {
    address: String,
    store: Arc<MemoryStore>,
    client: reqwest::Client,
}

impl TestApp {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.address, path)
    }
}

fn token_for(user: &User) -> String {
    sign_jwt(user.id, user.role, SECRET, 600).expect("Failed to sign token")
}

/// Helper function to spawn the app on a random port for testing.
/// Backed by the in-memory store, so no database is needed.
async fn spawn_app() -> TestApp {
    let store = Arc::new(MemoryStore::new());
    let state = AppState::new(store.clone(), Config::for_tests(SECRET));

    // Create the router with the app state
    let app = routes::create_router(state);

    // Bind to port 0 to get a random available port
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind random port");

    let port = listener.local_addr().unwrap().port();
    let address = format!("http://127.0.0.1:{}", port);

    // Spawn the server in the background
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestApp {
        address,
        store,
        client: reqwest::Client::new(),
    }
}

/// An exam with one 2-point multiple choice question and one 10-point essay.
struct Biology {
    exam_id: i64,
    mcq_id: i64,
    correct_option: i64,
    wrong_option: i64,
    essay_id: i64,
}

async fn seed_biology(store: &MemoryStore) -> Biology {
    let exam = store.add_exam(NewExam::published("Biology", 45)).await;
    let mcq = store
        .add_question(NewQuestion::new(exam.id, QuestionType::MultipleChoice, 2.0))
        .await;
    let correct = store
        .add_option(NewOption {
            question_id: mcq.id,
            is_correct: true,
            partial_credit_value: 0.0,
            order_number: 1,
        })
        .await;
    let wrong = store
        .add_option(NewOption {
            question_id: mcq.id,
            is_correct: false,
            partial_credit_value: 0.0,
            order_number: 2,
        })
        .await;
    let essay = store
        .add_question(
            NewQuestion::new(exam.id, QuestionType::Essay, 10.0)
                .expecting(["photosynthesis", "chlorophyll", "glucose"]),
        )
        .await;

    Biology {
        exam_id: exam.id,
        mcq_id: mcq.id,
        correct_option: correct.id,
        wrong_option: wrong.id,
        essay_id: essay.id,
    }
}

async fn start(app: &TestApp, token: &str, exam_id: i64) -> reqwest::Response {
    app.client
        .post(app.url(&format!("/api/exams/{}/sessions", exam_id)))
        .bearer_auth(token)
        .send()
        .await
        .expect("Failed to execute request")
}

#[tokio::test]
async fn requests_without_token_are_rejected() {
    // Arrange
    let app = spawn_app().await;

    // Act
    let response = app
        .client
        .post(app.url("/api/exams/1/sessions"))
        .send()
        .await
        .expect("Failed to execute request");

    // Assert
    assert_eq!(response.status().as_u16(), 401);
}

#[tokio::test]
async fn concurrent_starts_yield_one_session() {
    // Arrange
    let app = spawn_app().await;
    let student = app.store.add_user("ada", Role::Student).await;
    let exam = seed_biology(&app.store).await;
    let token = token_for(&student);

    // Act: two tabs opening the exam at the same time
    let (a, b) = tokio::join!(
        start(&app, &token, exam.exam_id),
        start(&app, &token, exam.exam_id)
    );

    // Assert
    let mut statuses = vec![a.status().as_u16(), b.status().as_u16()];
    statuses.sort();
    assert_eq!(statuses, vec![200, 201]);

    let a: Value = a.json().await.unwrap();
    let b: Value = b.json().await.unwrap();
    assert_eq!(a["session"]["id"], b["session"]["id"]);
    assert_eq!(app.store.count_sessions(exam.exam_id, student.id).await, 1);
}

#[tokio::test]
async fn answer_shape_and_ownership_are_validated() {
    // Arrange
    let app = spawn_app().await;
    let student = app.store.add_user("ada", Role::Student).await;
    let intruder = app.store.add_user("eve", Role::Student).await;
    let exam = seed_biology(&app.store).await;
    let token = token_for(&student);

    let session: Value = start(&app, &token, exam.exam_id).await.json().await.unwrap();
    let session_id = session["session"]["id"].as_i64().unwrap();
    let answer_url = |question_id: i64| {
        app.url(&format!("/api/sessions/{}/answers/{}", session_id, question_id))
    };

    // Act & Assert: text for a multiple choice question
    let response = app
        .client
        .put(answer_url(exam.mcq_id))
        .bearer_auth(&token)
        .json(&json!({ "text_answer": "B" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 400);

    // Both shapes at once
    let response = app
        .client
        .put(answer_url(exam.mcq_id))
        .bearer_auth(&token)
        .json(&json!({ "selected_option_id": exam.correct_option, "text_answer": "B" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 400);

    // Somebody else's session
    let response = app
        .client
        .put(answer_url(exam.mcq_id))
        .bearer_auth(token_for(&intruder))
        .json(&json!({ "selected_option_id": exam.correct_option }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 403);

    // A valid answer, then an overwrite
    for option in [exam.wrong_option, exam.correct_option] {
        let response = app
            .client
            .put(answer_url(exam.mcq_id))
            .bearer_auth(&token)
            .json(&json!({ "selected_option_id": option }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 200);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["selected_option_id"], option);
    }
}

#[tokio::test]
async fn full_grading_flow_finalizes_result() {
    // Arrange
    let app = spawn_app().await;
    app.store.add_user("admin", Role::Admin).await;
    let teacher = app.store.add_user("mr_brown", Role::Teacher).await;
    let student = app.store.add_user("ada", Role::Student).await;
    let exam = seed_biology(&app.store).await;
    let student_token = token_for(&student);
    let teacher_token = token_for(&teacher);

    let session: Value = start(&app, &student_token, exam.exam_id)
        .await
        .json()
        .await
        .unwrap();
    let session_id = session["session"]["id"].as_i64().unwrap();

    for (question_id, body) in [
        (exam.mcq_id, json!({ "selected_option_id": exam.correct_option })),
        (exam.essay_id, json!({ "text_answer": "Plants store glucose." })),
    ] {
        let response = app
            .client
            .put(app.url(&format!("/api/sessions/{}/answers/{}", session_id, question_id)))
            .bearer_auth(&student_token)
            .json(&body)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status().as_u16(), 200);
    }

    // Act: submit
    let response = app
        .client
        .post(app.url(&format!("/api/sessions/{}/submit", session_id)))
        .bearer_auth(&student_token)
        .send()
        .await
        .unwrap();

    // Assert: the essay waits for a human
    assert_eq!(response.status().as_u16(), 200);
    let report: Value = response.json().await.unwrap();
    assert_eq!(report["score"], 2.0);
    assert_eq!(report["max_score"], 12.0);
    assert_eq!(report["pending_review_count"], 1);
    assert_eq!(report["is_final"], false);

    // Re-submitting is a conflict
    let response = app
        .client
        .post(app.url(&format!("/api/sessions/{}/submit", session_id)))
        .bearer_auth(&student_token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 409);

    let result: Value = app
        .client
        .get(app.url(&format!("/api/sessions/{}/result", session_id)))
        .bearer_auth(&student_token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(result["is_final"], false);
    assert_eq!(result["pending_review"], 1);

    // Teacher picks up and resolves the task
    let tasks: Value = app
        .client
        .get(app.url("/api/grading/tasks?status=pending"))
        .bearer_auth(&teacher_token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let tasks = tasks.as_array().unwrap();
    assert_eq!(tasks.len(), 1);
    let task_id = tasks[0]["id"].as_i64().unwrap();

    let response = app
        .client
        .post(app.url(&format!("/api/grading/tasks/{}/assign", task_id)))
        .bearer_auth(&teacher_token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let assigned: Value = response.json().await.unwrap();
    assert_eq!(assigned["assigned_teacher_id"], teacher.id);
    assert_eq!(assigned["status"], "in_progress");

    let response = app
        .client
        .post(app.url(&format!("/api/grading/tasks/{}/resolve", task_id)))
        .bearer_auth(&teacher_token)
        .json(&json!({ "override_score": 6.0, "feedback": "Only glucose is covered." }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    let outcome: Value = response.json().await.unwrap();
    assert_eq!(outcome["answer"]["manual_override"], true);
    assert_eq!(outcome["result"]["is_final"], true);
    assert_eq!(outcome["result"]["score"], 8.0);

    // Resolving twice is a conflict
    let response = app
        .client
        .post(app.url(&format!("/api/grading/tasks/{}/resolve", task_id)))
        .bearer_auth(&teacher_token)
        .json(&json!({ "approve": true }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 409);
}

#[tokio::test]
async fn role_checks_guard_grading_and_admin_routes() {
    // Arrange
    let app = spawn_app().await;
    let admin = app.store.add_user("admin", Role::Admin).await;
    let student = app.store.add_user("ada", Role::Student).await;
    let exam = seed_biology(&app.store).await;
    let student_token = token_for(&student);
    let admin_token = token_for(&admin);

    let session: Value = start(&app, &student_token, exam.exam_id)
        .await
        .json()
        .await
        .unwrap();
    let session_id = session["session"]["id"].as_i64().unwrap();

    // Act & Assert: students cannot reach staff or admin routes
    let response = app
        .client
        .get(app.url("/api/grading/tasks"))
        .bearer_auth(&student_token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 403);

    let response = app
        .client
        .delete(app.url(&format!("/api/admin/sessions/{}", session_id)))
        .bearer_auth(&student_token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 403);

    // Rescoring an open session is a conflict
    let response = app
        .client
        .post(app.url(&format!("/api/admin/sessions/{}/rescore", session_id)))
        .bearer_auth(&admin_token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 409);

    // Admin deletes; the session is gone afterwards
    let response = app
        .client
        .delete(app.url(&format!("/api/admin/sessions/{}", session_id)))
        .bearer_auth(&admin_token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 204);

    let response = app
        .client
        .get(app.url(&format!("/api/sessions/{}", session_id)))
        .bearer_auth(&admin_token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 404);
}

#[tokio::test]
async fn progress_heartbeat_updates_session() {
    // Arrange
    let app = spawn_app().await;
    let student = app.store.add_user("ada", Role::Student).await;
    let exam = seed_biology(&app.store).await;
    let token = token_for(&student);

    let session: Value = start(&app, &token, exam.exam_id).await.json().await.unwrap();
    let session_id = session["session"]["id"].as_i64().unwrap();
    assert_eq!(session["session"]["time_remaining"], 2700);

    // Act
    let response = app
        .client
        .patch(app.url(&format!("/api/sessions/{}/progress", session_id)))
        .bearer_auth(&token)
        .json(&json!({ "timeRemaining": 2400, "currentQuestionIndex": 1 }))
        .send()
        .await
        .unwrap();

    // Assert
    assert_eq!(response.status().as_u16(), 200);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["time_remaining"], 2400);
    assert_eq!(body["metadata"]["current_question_index"], 1);

    // Negative values are rejected
    let response = app
        .client
        .patch(app.url(&format!("/api/sessions/{}/progress", session_id)))
        .bearer_auth(&token)
        .json(&json!({ "time_remaining": -5 }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 400);
}

#[tokio::test]
async fn submitting_unknown_session_is_not_found() {
    let app = spawn_app().await;
    let student = app.store.add_user("ada", Role::Student).await;

    let response = app
        .client
        .post(app.url("/api/sessions/987654/submit"))
        .bearer_auth(token_for(&student))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 404);
}
