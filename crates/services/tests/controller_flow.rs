use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use exam_core::model::{
    AnswerValue, AvailabilityWindow, ExamId, ExamManifest, ExamSession, IdentityDraft,
    LifecycleState, ProctorSettings, QuestionId, ViolationKind, ViolationRecord,
};
use exam_core::policy::SessionPolicy;
use exam_core::time::{fixed_clock, fixed_now};
use services::backend::{
    GradedSubmission, GradingClient, GradingOutcome, GradingRequest, HeartbeatReply,
    ProgressSummary, RemoteSessionStatus, SessionBackend, SessionOutcome, SessionToken,
    StartSessionRequest, StartedSession,
};
use services::session::RecoveryAction;
use services::{
    BackendError, Clock, ExamServices, ExamSessionController, OpenedSession, SessionEvent,
    SessionNotice, SyncReport,
};
use storage::repository::{
    InMemoryStore, PendingSubmissionStore, ProgressSnapshot, ProgressStore, Storage,
    SubmissionMarkStore,
};

const EXAM: &str = "algebra-final";

/// Records every backend call so tests can assert on traffic instead of
/// internals.
#[derive(Default)]
struct FakeBackend {
    started: AtomicUsize,
    heartbeats: AtomicUsize,
    violations: AtomicUsize,
    ended: Mutex<Vec<SessionOutcome>>,
}

#[async_trait]
impl SessionBackend for FakeBackend {
    async fn start(&self, _request: &StartSessionRequest) -> Result<StartedSession, BackendError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        Ok(StartedSession {
            token: SessionToken::new("tok-1"),
            resumed: false,
            time_remaining_seconds: None,
            saved_answers: None,
        })
    }

    async fn heartbeat(
        &self,
        _token: &SessionToken,
        _progress: &ProgressSummary,
    ) -> Result<HeartbeatReply, BackendError> {
        self.heartbeats.fetch_add(1, Ordering::SeqCst);
        Ok(HeartbeatReply {
            status: RemoteSessionStatus::Active,
            time_remaining_seconds: None,
        })
    }

    async fn report_violation(
        &self,
        _token: &SessionToken,
        _record: &ViolationRecord,
    ) -> Result<(), BackendError> {
        self.violations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn end(
        &self,
        _token: &SessionToken,
        outcome: SessionOutcome,
    ) -> Result<(), BackendError> {
        self.ended.lock().unwrap().push(outcome);
        Ok(())
    }
}

/// Grades everything as 2/3 unless primed to fail the next delivery.
#[derive(Default)]
struct RecordingGrader {
    calls: AtomicUsize,
    fail_next: AtomicBool,
}

impl RecordingGrader {
    fn failing_once() -> Self {
        let grader = Self::default();
        grader.fail_next.store(true, Ordering::SeqCst);
        grader
    }
}

#[async_trait]
impl GradingClient for RecordingGrader {
    async fn submit(&self, _request: &GradingRequest) -> Result<GradingOutcome, BackendError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(BackendError::Decode("connection reset".into()));
        }
        Ok(GradingOutcome::Accepted(GradedSubmission {
            submission_id: Some(format!("sub-{call}")),
            score: Some(2.0),
            max_score: Some(3.0),
            percentage: Some(66.7),
        }))
    }
}

fn manifest(settings: ProctorSettings, time_limit: Option<u32>) -> ExamManifest {
    ExamManifest::new(
        ExamId::new(EXAM),
        "Algebra Final",
        vec![
            QuestionId::new("q1"),
            QuestionId::new("q2"),
            QuestionId::new("q3"),
        ],
        time_limit,
        settings,
    )
    .unwrap()
}

fn draft() -> IdentityDraft {
    IdentityDraft::new()
        .with_field("name", "Dana Hart")
        .with_field("email", "dana@example.edu")
}

fn student_key() -> String {
    draft()
        .validate(&["name".to_string(), "email".to_string()], None)
        .unwrap()
        .storage_key()
}

fn wire(
    backend: &Arc<FakeBackend>,
    grader: &Arc<RecordingGrader>,
    storage: &Storage,
    remote: &InMemoryStore,
) -> ExamServices {
    ExamServices::new(
        fixed_clock(),
        storage.clone(),
        Arc::new(remote.clone()),
        Arc::clone(backend) as Arc<dyn SessionBackend>,
        Arc::clone(grader) as Arc<dyn GradingClient>,
    )
}

async fn ready(services: &ExamServices, manifest: ExamManifest) -> ExamSessionController {
    match services.open_session(manifest, draft()).await.unwrap() {
        OpenedSession::Ready(controller) => controller,
        other => panic!("expected a fresh attempt, got {other:?}"),
    }
}

async fn tick(controller: &mut ExamSessionController) -> Vec<SessionNotice> {
    controller.clock_mut().advance_secs(1);
    controller.apply(SessionEvent::TickElapsed).await.unwrap()
}

#[tokio::test]
async fn student_submission_round_trip() {
    let backend = Arc::new(FakeBackend::default());
    let grader = Arc::new(RecordingGrader::default());
    let storage = Storage::in_memory();
    let services = wire(&backend, &grader, &storage, &InMemoryStore::new());

    let mut controller = ready(&services, manifest(ProctorSettings::relaxed(), Some(600))).await;
    controller.start().await.expect("start attempt");
    assert_eq!(backend.started.load(Ordering::SeqCst), 1);

    controller
        .apply(SessionEvent::AnswerChanged {
            question_id: QuestionId::new("q1"),
            value: AnswerValue::text("x = 4"),
        })
        .await
        .expect("record answer");
    controller
        .apply(SessionEvent::AnswerChanged {
            question_id: QuestionId::new("q2"),
            value: AnswerValue::selection("b"),
        })
        .await
        .expect("record answer");

    let notices = controller
        .apply(SessionEvent::SubmitRequested)
        .await
        .expect("submit");
    assert!(
        notices
            .iter()
            .any(|n| matches!(n, SessionNotice::SubmissionAccepted { .. }))
    );
    assert_eq!(controller.state(), LifecycleState::Submitted);
    assert_eq!(grader.calls.load(Ordering::SeqCst), 1);

    let exam_id = ExamId::new(EXAM);
    let receipt = storage
        .marks
        .submitted_receipt(&exam_id, &student_key())
        .await
        .expect("read marks")
        .expect("receipt recorded");
    assert_eq!(receipt.submission_id.as_deref(), Some("sub-0"));
    assert!(
        storage
            .progress
            .load(&exam_id, &student_key())
            .await
            .expect("read progress")
            .is_none()
    );
    assert_eq!(*backend.ended.lock().unwrap(), vec![SessionOutcome::Submitted]);

    // further submit requests are dead after the terminal state
    let extra = controller
        .apply(SessionEvent::SubmitRequested)
        .await
        .expect("ignored submit");
    assert!(extra.is_empty());
    assert_eq!(grader.calls.load(Ordering::SeqCst), 1);

    // reopening shows the receipt instead of a blank attempt
    match services
        .open_session(manifest(ProctorSettings::relaxed(), Some(600)), draft())
        .await
        .expect("reopen")
    {
        OpenedSession::AlreadySubmitted { receipt } => {
            assert_eq!(receipt.submission_id.as_deref(), Some("sub-0"));
        }
        other => panic!("expected the recorded receipt, got {other:?}"),
    }
}

#[tokio::test]
async fn expiry_walks_through_grace_before_forced_submission() {
    let backend = Arc::new(FakeBackend::default());
    let grader = Arc::new(RecordingGrader::default());
    let storage = Storage::in_memory();
    let services = wire(&backend, &grader, &storage, &InMemoryStore::new())
        .with_policy(SessionPolicy::default().with_grace_secs(2));

    let mut controller = ready(&services, manifest(ProctorSettings::relaxed(), Some(3))).await;
    controller.start().await.expect("start attempt");

    for _ in 0..2 {
        let notices = tick(&mut controller).await;
        assert!(notices.is_empty());
    }

    let at_zero = tick(&mut controller).await;
    assert!(
        at_zero
            .iter()
            .any(|n| matches!(n, SessionNotice::GraceStarted { .. }))
    );
    assert_eq!(controller.overview().time_remaining_seconds, Some(0));
    assert_eq!(controller.state(), LifecycleState::Grace);

    let inside_grace = tick(&mut controller).await;
    assert!(inside_grace.is_empty());

    let at_deadline = tick(&mut controller).await;
    assert!(
        at_deadline
            .iter()
            .any(|n| matches!(n, SessionNotice::SubmissionAccepted { .. }))
    );
    assert_eq!(controller.state(), LifecycleState::Submitted);
    assert_eq!(*backend.ended.lock().unwrap(), vec![SessionOutcome::Expired]);
}

#[tokio::test]
async fn violation_budget_forces_submission() {
    let backend = Arc::new(FakeBackend::default());
    let grader = Arc::new(RecordingGrader::default());
    let storage = Storage::in_memory();
    let services = wire(&backend, &grader, &storage, &InMemoryStore::new());

    let mut controller = ready(&services, manifest(ProctorSettings::strict(), Some(600))).await;
    controller.start().await.expect("start attempt");

    let first = controller
        .apply(SessionEvent::ViolationDetected {
            kind: ViolationKind::TabSwitch,
            detail: None,
        })
        .await
        .expect("first violation");
    assert!(first.contains(&SessionNotice::ViolationWarning {
        kind: ViolationKind::TabSwitch,
        count: 1,
        remaining: 2,
    }));

    let second = controller
        .apply(SessionEvent::ViolationDetected {
            kind: ViolationKind::TabSwitch,
            detail: None,
        })
        .await
        .expect("second violation");
    assert!(second.contains(&SessionNotice::FinalViolationWarning {
        kind: ViolationKind::TabSwitch,
        count: 2,
    }));

    let third = controller
        .apply(SessionEvent::ViolationDetected {
            kind: ViolationKind::TabSwitch,
            detail: Some("switched to another window".to_string()),
        })
        .await
        .expect("third violation");
    assert!(third.contains(&SessionNotice::ViolationLimitReached { count: 3 }));
    assert!(
        third
            .iter()
            .any(|n| matches!(n, SessionNotice::SubmissionAccepted { .. }))
    );

    assert_eq!(backend.violations.load(Ordering::SeqCst), 3);
    assert_eq!(controller.state(), LifecycleState::Submitted);
    assert_eq!(*backend.ended.lock().unwrap(), vec![SessionOutcome::Submitted]);
}

#[tokio::test]
async fn failed_delivery_queues_and_replays_later() {
    let backend = Arc::new(FakeBackend::default());
    let grader = Arc::new(RecordingGrader::failing_once());
    let storage = Storage::sqlite("sqlite:file:memdb_controller_flow?mode=memory&cache=shared")
        .await
        .expect("connect sqlite");
    let services = wire(&backend, &grader, &storage, &InMemoryStore::new());

    let mut controller = ready(&services, manifest(ProctorSettings::relaxed(), Some(600))).await;
    controller.start().await.expect("start attempt");
    controller
        .apply(SessionEvent::AnswerChanged {
            question_id: QuestionId::new("q1"),
            value: AnswerValue::text("x = 4"),
        })
        .await
        .expect("record answer");

    let notices = controller
        .apply(SessionEvent::SubmitRequested)
        .await
        .expect("submit");
    assert!(notices.contains(&SessionNotice::SubmissionQueued {
        action: RecoveryAction::AutoRetry,
    }));
    // student trigger: the attempt stays workable while the queue drains
    assert_eq!(controller.state(), LifecycleState::Active);

    let exam_id = ExamId::new(EXAM);
    assert_eq!(storage.pending.list().await.expect("list queue").len(), 1);
    assert!(
        storage
            .marks
            .submitted_receipt(&exam_id, &student_key())
            .await
            .expect("read marks")
            .is_none()
    );

    let report = services
        .retry_service()
        .sync_once()
        .await
        .expect("replay queue");
    assert_eq!(report, SyncReport { attempted: 1, delivered: 1, remaining: 0 });
    assert_eq!(grader.calls.load(Ordering::SeqCst), 2);
    let receipt = storage
        .marks
        .submitted_receipt(&exam_id, &student_key())
        .await
        .expect("read marks")
        .expect("receipt recorded");
    assert_eq!(receipt.submission_id.as_deref(), Some("sub-1"));
    assert!(storage.pending.list().await.expect("list queue").is_empty());
    assert!(
        storage
            .progress
            .load(&exam_id, &student_key())
            .await
            .expect("read progress")
            .is_none()
    );
}

#[tokio::test]
async fn interrupted_attempt_restores_from_local_snapshot() {
    let backend = Arc::new(FakeBackend::default());
    let grader = Arc::new(RecordingGrader::default());
    let storage = Storage::in_memory();
    let services = wire(&backend, &grader, &storage, &InMemoryStore::new());

    let mut controller = ready(&services, manifest(ProctorSettings::relaxed(), Some(600))).await;
    controller.start().await.expect("start attempt");
    controller
        .apply(SessionEvent::AnswerChanged {
            question_id: QuestionId::new("q1"),
            value: AnswerValue::text("x = 4"),
        })
        .await
        .expect("record answer");
    drop(controller);

    match services
        .open_session(manifest(ProctorSettings::relaxed(), Some(600)), draft())
        .await
        .expect("reopen")
    {
        OpenedSession::Restored(mut restored) => {
            assert_eq!(restored.overview().answered_count, 1);
            assert_eq!(restored.overview().time_remaining_seconds, Some(600));
            restored.start().await.expect("re-arm attempt");
            assert_eq!(backend.started.load(Ordering::SeqCst), 2);
        }
        other => panic!("expected a restored attempt, got {other:?}"),
    }
}

#[tokio::test]
async fn fresher_remote_snapshot_wins_over_local() {
    let backend = Arc::new(FakeBackend::default());
    let grader = Arc::new(RecordingGrader::default());
    let storage = Storage::in_memory();
    let remote = InMemoryStore::new();
    let services = wire(&backend, &grader, &storage, &remote);

    let mut controller = ready(&services, manifest(ProctorSettings::relaxed(), Some(600))).await;
    controller.start().await.expect("start attempt");
    controller
        .apply(SessionEvent::AnswerChanged {
            question_id: QuestionId::new("q1"),
            value: AnswerValue::text("x = 4"),
        })
        .await
        .expect("record answer");
    drop(controller);

    // a later save from another device carries one more answer
    let identity = draft()
        .validate(&["name".to_string(), "email".to_string()], None)
        .expect("validate identity");
    let mut session = ExamSession::new(ExamId::new(EXAM), identity);
    session.begin(fixed_now()).expect("begin session");
    session.set_answer(QuestionId::new("q1"), AnswerValue::text("x = 4"));
    session.set_answer(QuestionId::new("q2"), AnswerValue::selection("b"));
    let snapshot = ProgressSnapshot::capture(
        &session,
        Some(480),
        fixed_now() + Duration::seconds(60),
    );
    remote.save(&snapshot).await.expect("seed remote");

    match services
        .open_session(manifest(ProctorSettings::relaxed(), Some(600)), draft())
        .await
        .expect("reopen")
    {
        OpenedSession::Restored(restored) => {
            assert_eq!(restored.overview().answered_count, 2);
            assert_eq!(restored.overview().time_remaining_seconds, Some(480));
        }
        other => panic!("expected the remote attempt, got {other:?}"),
    }
}

#[tokio::test]
async fn reconnect_deducts_offline_time_and_reregisters() {
    let backend = Arc::new(FakeBackend::default());
    let grader = Arc::new(RecordingGrader::default());
    let storage = Storage::in_memory();
    let services = wire(&backend, &grader, &storage, &InMemoryStore::new());

    let mut controller = ready(&services, manifest(ProctorSettings::relaxed(), Some(120))).await;
    controller.start().await.expect("start attempt");

    let dropped = controller
        .apply(SessionEvent::NetworkChanged { online: false })
        .await
        .expect("go offline");
    assert!(dropped.contains(&SessionNotice::ConnectionLost));

    controller.clock_mut().advance_secs(45);
    let restored = controller
        .apply(SessionEvent::NetworkChanged { online: true })
        .await
        .expect("come back");
    assert!(restored.contains(&SessionNotice::OfflineDeduction { seconds: 45 }));
    assert!(restored.contains(&SessionNotice::ConnectionRestored));

    assert_eq!(controller.overview().time_remaining_seconds, Some(75));
    assert_eq!(backend.started.load(Ordering::SeqCst), 2);
    assert_eq!(backend.heartbeats.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn closed_window_expires_saved_attempt() {
    let backend = Arc::new(FakeBackend::default());
    let grader = Arc::new(RecordingGrader::default());
    let storage = Storage::in_memory();
    let remote = InMemoryStore::new();
    let services = wire(&backend, &grader, &storage, &remote);

    let closes_at = fixed_now() + Duration::seconds(300);
    let windowed = |closes_at: DateTime<Utc>| {
        manifest(ProctorSettings::relaxed(), Some(600)).with_window(
            AvailabilityWindow::new(None, Some(closes_at)).expect("build window"),
        )
    };

    let mut controller = ready(&services, windowed(closes_at)).await;
    controller.start().await.expect("start attempt");
    controller
        .apply(SessionEvent::AnswerChanged {
            question_id: QuestionId::new("q1"),
            value: AnswerValue::text("x = 4"),
        })
        .await
        .expect("record answer");
    drop(controller);

    let late = ExamServices::new(
        Clock::fixed(fixed_now() + Duration::seconds(600)),
        storage.clone(),
        Arc::new(remote.clone()),
        Arc::clone(&backend) as Arc<dyn SessionBackend>,
        Arc::clone(&grader) as Arc<dyn GradingClient>,
    );
    match late
        .open_session(windowed(closes_at), draft())
        .await
        .expect("reopen late")
    {
        OpenedSession::Expired => {}
        other => panic!("expected an expired attempt, got {other:?}"),
    }
    assert!(
        storage
            .progress
            .load(&ExamId::new(EXAM), &student_key())
            .await
            .expect("read progress")
            .is_none()
    );
}
