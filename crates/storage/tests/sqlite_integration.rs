use std::collections::BTreeMap;

use chrono::Duration;
use exam_core::model::{
    AnswerValue, ConfidenceLevel, ExamId, ExamSession, LifecycleState, QuestionId,
    StudentIdentity, ViolationKind,
};
use exam_core::time::fixed_now;
use storage::repository::{
    PendingSubmission, PendingSubmissionStore, ProgressSnapshot, ProgressStore,
    SubmissionMarkStore, SubmissionReceipt,
};
use storage::sqlite::SqliteRepository;

fn build_session() -> ExamSession {
    let identity = StudentIdentity::from_fields(BTreeMap::from([
        ("name".to_string(), "Rana".to_string()),
        ("email".to_string(), "Rana@School.edu".to_string()),
    ]));
    let mut session = ExamSession::new(ExamId::new("physics-midterm"), identity);
    session.begin(fixed_now()).unwrap();
    session.set_answer(QuestionId::new("q1"), AnswerValue::text("9.8 m/s^2"));
    session.set_answer(
        QuestionId::new("q2"),
        AnswerValue::selections(vec!["a".to_string(), "c".to_string()]),
    );
    session.toggle_flag(QuestionId::new("q2"));
    session.set_confidence(QuestionId::new("q1"), ConfidenceLevel::High);
    session.set_position(2);
    session.set_scratchpad("check units on q2".to_string());
    session.record_violation(
        ViolationKind::TabSwitch,
        Some("blur".to_string()),
        fixed_now(),
        3,
    );
    session
}

#[tokio::test]
async fn sqlite_roundtrip_preserves_full_snapshot() {
    let repo = SqliteRepository::connect("sqlite:file:memdb_progress?mode=memory&cache=shared")
        .await
        .expect("connect");
    repo.migrate().await.expect("migrate");

    let session = build_session();
    let snapshot = ProgressSnapshot::capture(&session, Some(540), fixed_now());
    repo.save(&snapshot).await.unwrap();

    let loaded = repo
        .load(&ExamId::new("physics-midterm"), "rana@school.edu")
        .await
        .expect("load")
        .expect("snapshot present");

    assert_eq!(loaded.session_id, session.session_id());
    assert_eq!(loaded.answers.len(), 2);
    assert_eq!(
        loaded.answers.get(&QuestionId::new("q2")),
        Some(&AnswerValue::selections(vec![
            "a".to_string(),
            "c".to_string()
        ]))
    );
    assert!(loaded.flagged_question_ids.contains(&QuestionId::new("q2")));
    assert_eq!(
        loaded.confidence_levels.get(&QuestionId::new("q1")),
        Some(&ConfidenceLevel::High)
    );
    assert_eq!(loaded.current_position, 2);
    assert_eq!(loaded.scratchpad_text, "check units on q2");
    assert_eq!(loaded.violations.len(), 1);
    assert_eq!(loaded.violations[0].kind, ViolationKind::TabSwitch);
    assert_eq!(loaded.time_remaining_seconds, Some(540));
    assert_eq!(loaded.lifecycle_state, LifecycleState::Active);

    let (restored, remaining) = loaded.restore(5).expect("restore");
    assert_eq!(remaining, Some(540));
    assert_eq!(restored.answered_count(), 2);
    assert_eq!(restored.violation_count(), 1);
}

#[tokio::test]
async fn sqlite_upsert_replaces_earlier_snapshot() {
    let repo = SqliteRepository::connect("sqlite:file:memdb_upsert?mode=memory&cache=shared")
        .await
        .expect("connect");
    repo.migrate().await.expect("migrate");

    let mut session = build_session();
    let first = ProgressSnapshot::capture(&session, Some(540), fixed_now());
    repo.save(&first).await.unwrap();

    session.set_answer(QuestionId::new("q3"), AnswerValue::text("F = ma"));
    session.set_position(3);
    let second = ProgressSnapshot::capture(
        &session,
        Some(500),
        fixed_now() + Duration::seconds(40),
    );
    repo.save(&second).await.unwrap();

    let loaded = repo
        .load(&ExamId::new("physics-midterm"), "rana@school.edu")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(loaded.answers.len(), 3);
    assert_eq!(loaded.current_position, 3);
    assert_eq!(loaded.time_remaining_seconds, Some(500));
    assert_eq!(loaded.last_updated, fixed_now() + Duration::seconds(40));

    repo.clear(&ExamId::new("physics-midterm"), "rana@school.edu")
        .await
        .unwrap();
    assert!(
        repo.load(&ExamId::new("physics-midterm"), "rana@school.edu")
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn sqlite_marks_survive_and_replace() {
    let repo = SqliteRepository::connect("sqlite:file:memdb_marks?mode=memory&cache=shared")
        .await
        .expect("connect");
    repo.migrate().await.expect("migrate");

    let exam_id = ExamId::new("physics-midterm");
    assert!(
        repo.submitted_receipt(&exam_id, "rana@school.edu")
            .await
            .unwrap()
            .is_none()
    );

    let receipt = SubmissionReceipt {
        submission_id: None,
        score: None,
        max_score: None,
        percentage: None,
        recorded_at: fixed_now(),
    };
    repo.mark_submitted(&exam_id, "rana@school.edu", &receipt)
        .await
        .unwrap();

    // a graded replay upgrades the bare mark with the score
    let graded = SubmissionReceipt {
        submission_id: Some("sub-112".to_string()),
        score: Some(18.5),
        max_score: Some(20.0),
        percentage: Some(92.5),
        recorded_at: fixed_now() + Duration::seconds(90),
    };
    repo.mark_submitted(&exam_id, "rana@school.edu", &graded)
        .await
        .unwrap();

    let stored = repo
        .submitted_receipt(&exam_id, "rana@school.edu")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.submission_id.as_deref(), Some("sub-112"));
    assert_eq!(stored.score, Some(18.5));
    assert_eq!(stored.percentage, Some(92.5));
}

#[tokio::test]
async fn sqlite_pending_queue_is_fifo() {
    let repo = SqliteRepository::connect("sqlite:file:memdb_pending?mode=memory&cache=shared")
        .await
        .expect("connect");
    repo.migrate().await.expect("migrate");

    let mut ids = Vec::new();
    for n in 0..3_i64 {
        let submission = PendingSubmission {
            exam_id: ExamId::new("physics-midterm"),
            student_key: format!("student-{n}"),
            payload: serde_json::json!({ "answers": { "q1": "a" }, "attempt": n }),
            queued_at: fixed_now() + Duration::seconds(n),
        };
        ids.push(repo.enqueue(&submission).await.unwrap());
    }

    let queued = repo.list().await.unwrap();
    assert_eq!(queued.len(), 3);
    assert_eq!(queued[0].1.student_key, "student-0");
    assert_eq!(queued[2].1.student_key, "student-2");
    assert_eq!(queued[0].0, ids[0]);

    repo.remove(ids[0]).await.unwrap();
    let queued = repo.list().await.unwrap();
    assert_eq!(queued.len(), 2);
    assert_eq!(queued[0].1.student_key, "student-1");
    assert_eq!(queued[0].1.payload["answers"]["q1"], serde_json::json!("a"));
}
