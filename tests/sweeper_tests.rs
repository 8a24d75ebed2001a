// tests/sweeper_tests.rs

use std::{sync::Arc, time::Duration};

use chrono::{Duration as ChronoDuration, Utc};
use exam_engine::{
    config::{Config, SchedulerConfig},
    models::{
        answer::AnswerPayload,
        exam::{NewExam, TimerMode},
        question::{NewQuestion, QuestionType},
        session::SessionStatus,
        user::Role,
    },
    services::scheduler::Scheduler,
    state::AppState,
    store::{ExamStore, MemoryStore},
};

async fn state_with_store() -> (Arc<MemoryStore>, AppState) {
    let store = Arc::new(MemoryStore::new());
    store.add_user("admin", Role::Admin).await;
    let state = AppState::new(store.clone(), Config::for_tests("sweeper_secret"));
    (store, state)
}

#[tokio::test]
async fn expired_session_is_force_submitted_exactly_once() {
    // Arrange
    let (store, state) = state_with_store().await;
    let student = store.add_user("ada", Role::Student).await;
    let exam = store.add_exam(NewExam::published("Chemistry", 30)).await;
    let question = store
        .add_question(NewQuestion::new(exam.id, QuestionType::Text, 3.0).expecting(["NaCl"]))
        .await;

    let started = state
        .sessions()
        .start_or_resume(exam.id, student.id)
        .await
        .unwrap();
    let session_id = started.session.id;
    state
        .answers()
        .save_answer(session_id, question.id, &AnswerPayload::Text("nacl".to_string()))
        .await
        .unwrap();
    store
        .backdate_session(session_id, Utc::now() - ChronoDuration::minutes(31))
        .await;

    // Act
    let sweeper = state.sweeper();
    let first = sweeper.sweep(Utc::now()).await.unwrap();
    let second = sweeper.sweep(Utc::now()).await.unwrap();

    // Assert
    assert_eq!(first.examined, 1);
    assert_eq!(first.submitted, 1);
    assert_eq!(first.failed, 0);
    assert_eq!(second.examined, 0);
    assert_eq!(second.submitted, 0);

    let session = store.find_session(session_id).await.unwrap().unwrap();
    assert!(session.is_completed);
    assert!(session.metadata.force_submitted);
    assert_eq!(session.status, SessionStatus::Graded);
    assert_eq!(session.score, 3.0);

    let result = store.find_result(exam.id, student.id).await.unwrap().unwrap();
    assert!(result.is_final);
}

#[tokio::test]
async fn sessions_within_their_time_are_left_alone() {
    // Arrange
    let (store, state) = state_with_store().await;
    let student = store.add_user("ada", Role::Student).await;
    let exam = store.add_exam(NewExam::published("Chemistry", 30)).await;
    let started = state
        .sessions()
        .start_or_resume(exam.id, student.id)
        .await
        .unwrap();

    // Act
    let report = state.sweeper().sweep(Utc::now()).await.unwrap();

    // Assert
    assert_eq!(report.examined, 0);
    let session = store.find_session(started.session.id).await.unwrap().unwrap();
    assert!(!session.is_completed);
}

#[tokio::test]
async fn one_failing_session_does_not_block_the_batch() {
    // Arrange: no active user at all, so no result can be attributed.
    let store = Arc::new(MemoryStore::new());
    let state = AppState::new(store.clone(), Config::for_tests("sweeper_secret"));
    let exam = store.add_exam(NewExam::published("History", 10)).await;

    let orphan = state.sessions().start_or_resume(exam.id, 5000).await.unwrap();
    store
        .backdate_session(orphan.session.id, Utc::now() - ChronoDuration::minutes(20))
        .await;

    let student = store.add_user("ada", Role::Student).await;
    let ok = state
        .sessions()
        .start_or_resume(exam.id, student.id)
        .await
        .unwrap();
    store
        .backdate_session(ok.session.id, Utc::now() - ChronoDuration::minutes(15))
        .await;
    store.deactivate_user(student.id).await;

    // Act
    let report = state.sweeper().sweep(Utc::now()).await.unwrap();

    // Assert: both are examined and closed, both scoring passes fail
    // loudly rather than recording a made-up user.
    assert_eq!(report.examined, 2);
    assert_eq!(report.failed, 2);
    for id in [orphan.session.id, ok.session.id] {
        let session = store.find_session(id).await.unwrap().unwrap();
        assert!(session.is_completed);
    }
    assert!(store.find_result(exam.id, 5000).await.unwrap().is_none());
}

#[tokio::test]
async fn healthy_session_is_scored_after_a_failing_one() {
    // Arrange
    let (store, state) = state_with_store().await;
    let exam = store.add_exam(NewExam::published("Geography", 20)).await;
    let question = store
        .add_question(NewQuestion::new(exam.id, QuestionType::Text, 2.0).expecting(["Nile"]))
        .await;

    let broken_student = store.add_user("bo", Role::Student).await;
    let broken = state
        .sessions()
        .start_or_resume(exam.id, broken_student.id)
        .await
        .unwrap();
    store
        .backdate_session(broken.session.id, Utc::now() - ChronoDuration::minutes(40))
        .await;
    store.fail_scoring_writes(broken.session.id).await;

    let student = store.add_user("ada", Role::Student).await;
    let healthy = state
        .sessions()
        .start_or_resume(exam.id, student.id)
        .await
        .unwrap();
    state
        .answers()
        .save_answer(healthy.session.id, question.id, &AnswerPayload::Text("nile".to_string()))
        .await
        .unwrap();
    store
        .backdate_session(healthy.session.id, Utc::now() - ChronoDuration::minutes(25))
        .await;

    // Act
    let report = state.sweeper().sweep(Utc::now()).await.unwrap();

    // Assert: the older, failing session is handled first and does not stop the batch
    assert_eq!(report.examined, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.submitted, 1);

    let result = store.find_result(exam.id, student.id).await.unwrap().unwrap();
    assert_eq!(result.score, 2.0);
    assert!(result.is_final);
    assert!(store.find_result(exam.id, broken_student.id).await.unwrap().is_none());
}

#[tokio::test]
async fn publisher_opens_due_global_exams_only() {
    // Arrange
    let (store, state) = state_with_store().await;
    let now = Utc::now();
    let due = store
        .add_exam(NewExam {
            title: "Finals".to_string(),
            duration_minutes: 60,
            timer_mode: TimerMode::Global,
            start_time: Some(now - ChronoDuration::minutes(1)),
            is_published: false,
        })
        .await;
    let later = store
        .add_exam(NewExam {
            title: "Retake".to_string(),
            duration_minutes: 60,
            timer_mode: TimerMode::Global,
            start_time: Some(now + ChronoDuration::hours(2)),
            is_published: false,
        })
        .await;
    let per_student = store
        .add_exam(NewExam {
            title: "Quiz".to_string(),
            duration_minutes: 10,
            timer_mode: TimerMode::PerStudent,
            start_time: Some(now - ChronoDuration::minutes(5)),
            is_published: false,
        })
        .await;

    // Act
    let published = state.publisher().publish_due(now).await.unwrap();

    // Assert
    assert_eq!(published, vec![due.id]);
    assert!(store.find_exam(due.id).await.unwrap().unwrap().is_published);
    assert!(!store.find_exam(later.id).await.unwrap().unwrap().is_published);
    assert!(!store.find_exam(per_student.id).await.unwrap().unwrap().is_published);

    // A second run has nothing left to do
    assert!(state.publisher().publish_due(now).await.unwrap().is_empty());
}

#[tokio::test]
async fn scheduler_sweeps_in_background_and_stops() {
    // Arrange
    let store = Arc::new(MemoryStore::new());
    store.add_user("admin", Role::Admin).await;
    let mut config = Config::for_tests("sweeper_secret");
    config.scheduler = SchedulerConfig {
        sweep_interval: Duration::from_millis(20),
        sweep_batch_size: 10,
        max_startup_jitter: Duration::ZERO,
        publish_interval: Duration::from_millis(20),
    };
    let state = AppState::new(store.clone(), config);

    let student = store.add_user("ada", Role::Student).await;
    let exam = store.add_exam(NewExam::published("Physics", 5)).await;
    let started = state
        .sessions()
        .start_or_resume(exam.id, student.id)
        .await
        .unwrap();
    store
        .backdate_session(started.session.id, Utc::now() - ChronoDuration::minutes(6))
        .await;

    // Act
    let scheduler = Scheduler::start(&state);
    let mut closed = false;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        let session = store.find_session(started.session.id).await.unwrap().unwrap();
        if session.is_completed {
            closed = true;
            break;
        }
    }
    scheduler.stop().await;

    // Assert
    assert!(closed, "scheduler never swept the expired session");
}
