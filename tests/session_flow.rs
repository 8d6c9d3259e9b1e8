use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
    time::{Duration, SystemTime},
};

use live_poll_back::{
    bus::ChangeBus,
    config::AppConfig,
    dao::{
        models::{Filter, Patch, PollEntity, QuestionEntity, Record, ResponseEntity, Table},
        repository::SessionRepository,
        session_store::{MemorySessionStore, SessionStore},
        storage::StorageError,
    },
    dto::session::{InstanceRole, InstanceView, StudentView, TeacherView},
    error::ServiceError,
    services::{
        instance::InstanceHandle, lifecycle::QuestionDraft, session_code::CodeGenerator,
    },
    state::{AppState, SharedState},
};
use rand::{Rng, SeedableRng, rngs::StdRng};

/// Hands out a fixed sequence of codes, repeating the last one forever.
struct ScriptedCodes(Mutex<VecDeque<String>>);

impl ScriptedCodes {
    fn new(codes: &[&str]) -> Arc<Self> {
        Arc::new(Self(Mutex::new(
            codes.iter().map(|code| code.to_string()).collect(),
        )))
    }
}

impl CodeGenerator for ScriptedCodes {
    fn next_code(&self, _len: usize) -> String {
        let mut codes = self.0.lock().unwrap();
        if codes.len() > 1 {
            codes.pop_front().unwrap()
        } else {
            codes.front().cloned().unwrap()
        }
    }
}

fn app_with_codes(codes: &[&str]) -> (SharedState, MemorySessionStore) {
    let bus = ChangeBus::new();
    let store = MemorySessionStore::new(bus.clone());
    let state = AppState::with_code_generator(
        AppConfig::default(),
        Arc::new(store.clone()),
        bus,
        ScriptedCodes::new(codes),
    );
    (state, store)
}

async fn wait_for_teacher(
    handle: &InstanceHandle,
    predicate: impl Fn(&TeacherView) -> bool,
) -> TeacherView {
    let mut watch = handle.watch();
    let view = tokio::time::timeout(
        Duration::from_secs(5),
        watch.wait_for(|view| matches!(view, InstanceView::Teacher(teacher) if predicate(teacher))),
    )
    .await
    .expect("teacher view did not settle in time")
    .expect("teacher instance stopped")
    .clone();
    match view {
        InstanceView::Teacher(view) => view,
        InstanceView::Student(_) => unreachable!(),
    }
}

async fn wait_for_student(
    handle: &InstanceHandle,
    predicate: impl Fn(&StudentView) -> bool,
) -> StudentView {
    let mut watch = handle.watch();
    let view = tokio::time::timeout(
        Duration::from_secs(5),
        watch.wait_for(|view| matches!(view, InstanceView::Student(student) if predicate(student))),
    )
    .await
    .expect("student view did not settle in time")
    .expect("student instance stopped")
    .clone();
    match view {
        InstanceView::Student(view) => view,
        InstanceView::Teacher(_) => unreachable!(),
    }
}

async fn active_questions(store: &MemorySessionStore, poll_id: uuid::Uuid) -> usize {
    store
        .query_many(Table::Questions, Filter::ByPoll(poll_id))
        .await
        .unwrap()
        .into_iter()
        .filter_map(Record::into_question)
        .filter(|question| question.is_active)
        .count()
}

#[tokio::test(start_paused = true)]
async fn full_session_from_join_to_expiry() {
    let (state, _store) = app_with_codes(&["XYZ123"]);
    let teacher = state.open_instance(InstanceRole::Teacher);
    let student = state.open_instance(InstanceRole::Student);

    let created = teacher.create_poll().await.unwrap();
    assert_eq!(created.poll.as_ref().unwrap().code, "XYZ123");

    let joined = student.join_poll(" xyz123 ", "Ann").await.unwrap();
    assert_eq!(joined.participant_name.as_deref(), Some("Ann"));
    assert!(joined.question.is_none());

    let view = wait_for_teacher(&teacher, |view| view.participant_count == 1).await;
    assert_eq!(view.participants[0].name, "Ann");

    teacher
        .start_question(QuestionDraft::new("Color?", &["Red", "Blue"], 30))
        .await
        .unwrap();

    let shown = wait_for_student(&student, |view| view.question.is_some()).await;
    assert_eq!(shown.question.as_ref().unwrap().text, "Color?");
    assert!(!shown.has_answered);

    student.select_option(1).await.unwrap();
    let answered = student.submit_answer().await.unwrap();
    assert!(answered.has_answered);

    let view = wait_for_teacher(&teacher, |view| view.response_count == 1).await;
    assert_eq!(view.tally[0].count, 0);
    assert_eq!(view.tally[1].count, 1);
    assert_eq!(view.tally[1].percentage, 100.0);

    let again = student.submit_answer().await;
    assert!(matches!(again, Err(ServiceError::InvalidState(_))));

    tokio::time::sleep(Duration::from_secs(31)).await;
    let view = wait_for_teacher(&teacher, |view| {
        view.question.as_ref().is_some_and(|question| !question.is_active)
    })
    .await;
    assert_eq!(view.tally[1].count, 1);
    let student_view = wait_for_student(&student, |view| view.question.is_none()).await;
    assert!(student_view.selected_option.is_none());
}

#[tokio::test(start_paused = true)]
async fn submitting_after_the_countdown_fails() {
    let (state, _store) = app_with_codes(&["LATE01"]);
    let teacher = state.open_instance(InstanceRole::Teacher);
    let student = state.open_instance(InstanceRole::Student);

    teacher.create_poll().await.unwrap();
    student.join_poll("LATE01", "Bo").await.unwrap();
    teacher
        .start_question(QuestionDraft::new("Q?", &["Yes", "No"], 30))
        .await
        .unwrap();
    wait_for_student(&student, |view| view.question.is_some()).await;
    student.select_option(0).await.unwrap();

    tokio::time::sleep(Duration::from_secs(31)).await;

    let result = student.submit_answer().await;
    assert!(matches!(result, Err(ServiceError::InvalidState(_))));
}

#[tokio::test]
async fn late_joiner_catches_up_with_remaining_time() {
    let (state, store) = app_with_codes(&["UNUSED"]);
    let repo = SessionRepository::new(Arc::new(store.clone()));

    let poll = repo
        .insert_poll(PollEntity::new("CATCH1".into(), "Quiz".into()))
        .await
        .unwrap();
    let mut question = QuestionEntity::open(
        poll.id,
        "Capital?".into(),
        vec!["Paris".into(), "Rome".into()],
        60,
    );
    question.started_at = SystemTime::now() - Duration::from_secs(20);
    repo.insert_question(question).await.unwrap();

    let student = state.open_instance(InstanceRole::Student);
    let view = student.join_poll("catch1", "Cy").await.unwrap();

    assert_eq!(view.question.as_ref().unwrap().text, "Capital?");
    let remaining = view.remaining_seconds.unwrap();
    assert!((39..=41).contains(&remaining), "remaining was {remaining}");
    assert!(!view.has_answered);
}

#[tokio::test]
async fn blank_options_are_trimmed_before_persisting() {
    let (state, store) = app_with_codes(&["TRIM01"]);
    let teacher = state.open_instance(InstanceRole::Teacher);
    let view = teacher.create_poll().await.unwrap();
    let poll_id = view.poll.unwrap().id;

    teacher
        .start_question(QuestionDraft::new("Pick", &["A", "", "B", "  "], 60))
        .await
        .unwrap();

    let stored: Vec<QuestionEntity> = store
        .query_many(Table::Questions, Filter::ByPoll(poll_id))
        .await
        .unwrap()
        .into_iter()
        .filter_map(Record::into_question)
        .collect();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].options, vec!["A".to_string(), "B".to_string()]);
}

#[tokio::test]
async fn ending_twice_keeps_the_same_state() {
    let (state, _store) = app_with_codes(&["END001"]);
    let teacher = state.open_instance(InstanceRole::Teacher);
    teacher.create_poll().await.unwrap();
    teacher
        .start_question(QuestionDraft::new("Q", &["A", "B"], 60))
        .await
        .unwrap();

    let first = teacher.end_question_early().await.unwrap();
    let second = teacher.end_question_early().await.unwrap();

    let first_question = first.question.unwrap();
    assert!(!first_question.is_active);
    assert_eq!(Some(first_question), second.question);
}

#[tokio::test]
async fn at_most_one_question_is_active_under_random_interleaving() {
    let (state, store) = app_with_codes(&["RAND01"]);
    let teacher = state.open_instance(InstanceRole::Teacher);
    let poll_id = teacher.create_poll().await.unwrap().poll.unwrap().id;
    let mut rng = StdRng::seed_from_u64(7);

    for step in 0..40 {
        if rng.random_bool(0.6) {
            let draft = QuestionDraft::new(format!("Q{step}"), &["A", "B", "C"], 60);
            teacher.start_question(draft).await.unwrap();
        } else {
            let _ = teacher.end_question_early().await;
        }
        assert!(active_questions(&store, poll_id).await <= 1);
    }
}

#[tokio::test]
async fn code_collisions_are_retried() {
    let (state, _store) = app_with_codes(&["DUP001", "DUP001", "NEW002"]);
    let first = state.open_instance(InstanceRole::Teacher);
    let second = state.open_instance(InstanceRole::Teacher);

    let a = first.create_poll().await.unwrap().poll.unwrap();
    let b = second.create_poll().await.unwrap().poll.unwrap();

    assert_eq!(a.code, "DUP001");
    assert_eq!(b.code, "NEW002");
}

#[tokio::test]
async fn code_collisions_give_up_after_the_configured_attempts() {
    let (state, _store) = app_with_codes(&["SAME01"]);
    let first = state.open_instance(InstanceRole::Teacher);
    let second = state.open_instance(InstanceRole::Teacher);

    first.create_poll().await.unwrap();
    let result = second.create_poll().await;

    assert!(matches!(
        result,
        Err(ServiceError::Persistence(StorageError::Conflict { .. }))
    ));
    assert!(second.view().role() == InstanceRole::Teacher);
}

#[tokio::test]
async fn joining_an_unknown_code_is_not_found() {
    let (state, _store) = app_with_codes(&["REAL01"]);
    let student = state.open_instance(InstanceRole::Student);

    let result = student.join_poll("NOPE00", "Dee").await;

    assert!(matches!(result, Err(ServiceError::NotFound(_))));
}

#[tokio::test]
async fn offline_store_surfaces_persistence_errors() {
    let (state, store) = app_with_codes(&["DOWN01"]);
    let teacher = state.open_instance(InstanceRole::Teacher);
    store.set_online(false);

    let result = teacher.create_poll().await;

    assert!(matches!(result, Err(ServiceError::Persistence(_))));
    assert!(state.is_degraded().await);
}

#[tokio::test]
async fn closed_instances_reject_intents() {
    let (state, _store) = app_with_codes(&["GONE01"]);
    let teacher = state.open_instance(InstanceRole::Teacher);
    let id = teacher.id();

    state.close_instance(id).await.unwrap();
    let result = teacher.create_poll().await;

    assert!(matches!(result, Err(ServiceError::InstanceClosed)));
    assert!(matches!(state.instance(id), Err(ServiceError::NotFound(_))));
}

#[tokio::test]
async fn store_changes_from_other_writers_drive_the_teacher() {
    let (state, store) = app_with_codes(&["EXTR01"]);
    let repo = SessionRepository::new(Arc::new(store.clone()));
    let teacher = state.open_instance(InstanceRole::Teacher);
    let student = state.open_instance(InstanceRole::Student);

    let poll_id = teacher.create_poll().await.unwrap().poll.unwrap().id;
    student.join_poll("EXTR01", "Eve").await.unwrap();
    let question_id = teacher
        .start_question(QuestionDraft::new("Q1", &["A", "B"], 60))
        .await
        .unwrap()
        .question
        .unwrap()
        .id;
    wait_for_student(&student, |view| view.question.is_some()).await;
    student.select_option(0).await.unwrap();
    student.submit_answer().await.unwrap();
    wait_for_teacher(&teacher, |view| view.response_count == 1).await;

    // Closed by another writer with an end time before the answer landed.
    let ended_at = SystemTime::now() - Duration::from_secs(5);
    store
        .update(Table::Questions, question_id, Patch::CloseQuestion { ended_at })
        .await
        .unwrap();

    let closed = wait_for_teacher(&teacher, |view| {
        view.question.as_ref().is_some_and(|question| !question.is_active)
    })
    .await;
    assert_eq!(closed.remaining_seconds, None);
    assert_eq!(closed.response_count, 0);
    assert!(closed.tally.iter().all(|row| row.count == 0));

    let late = repo
        .insert_response(ResponseEntity::new(question_id, uuid::Uuid::new_v4(), 1))
        .await;
    assert!(matches!(late, Err(StorageError::Conflict { .. })));
    match teacher.view() {
        InstanceView::Teacher(view) => assert_eq!(view.response_count, 0),
        InstanceView::Student(_) => unreachable!(),
    }

    let next = teacher
        .start_question(QuestionDraft::new("Q2", &["Yes", "No"], 60))
        .await
        .unwrap();
    assert_eq!(next.question.as_ref().map(|q| q.text.as_str()), Some("Q2"));
    teacher.end_question_early().await.unwrap();

    let outside = QuestionEntity::open(poll_id, "Q3".into(), vec!["X".into(), "Y".into()], 60);
    repo.insert_question(outside).await.unwrap();

    let adopted = wait_for_teacher(&teacher, |view| {
        view.question
            .as_ref()
            .is_some_and(|question| question.text == "Q3" && question.is_active)
    })
    .await;
    assert!(adopted.remaining_seconds.is_some());
    assert_eq!(adopted.response_count, 0);
    assert_eq!(active_questions(&store, poll_id).await, 1);
}

#[tokio::test]
async fn answers_to_a_question_closed_in_the_store_are_refused() {
    let (state, store) = app_with_codes(&["RACE01"]);
    let teacher = state.open_instance(InstanceRole::Teacher);
    let student = state.open_instance(InstanceRole::Student);

    teacher.create_poll().await.unwrap();
    let joined = student.join_poll("RACE01", "Fay").await.unwrap();
    let question_id = teacher
        .start_question(QuestionDraft::new("Q", &["A", "B"], 60))
        .await
        .unwrap()
        .question
        .unwrap()
        .id;
    wait_for_student(&student, |view| view.question.is_some()).await;
    teacher.end_question_early().await.unwrap();

    let repo = SessionRepository::new(Arc::new(store.clone()));
    let result = live_poll_back::services::aggregator::submit_response(
        &repo,
        question_id,
        joined.participant_id.unwrap(),
        0,
    )
    .await;

    assert!(matches!(result, Err(ServiceError::InvalidState(_))));
    assert!(repo.list_responses(question_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn closing_the_teacher_closes_its_poll() {
    let (state, store) = app_with_codes(&["BYE001"]);
    let teacher = state.open_instance(InstanceRole::Teacher);
    let poll_id = teacher.create_poll().await.unwrap().poll.unwrap().id;
    teacher
        .start_question(QuestionDraft::new("Q", &["A", "B"], 60))
        .await
        .unwrap();

    state.close_instance(teacher.id()).await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), async {
        while !teacher.is_closed() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("teacher instance did not stop");

    assert_eq!(active_questions(&store, poll_id).await, 0);
    let student = state.open_instance(InstanceRole::Student);
    let result = student.join_poll("BYE001", "Gus").await;
    assert!(matches!(result, Err(ServiceError::NotFound(_))));

    let successor = state.open_instance(InstanceRole::Teacher);
    let reused = successor.create_poll().await.unwrap().poll.unwrap();
    assert_eq!(reused.code, "BYE001");
}
