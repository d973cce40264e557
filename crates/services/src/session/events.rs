//! Events into, and signals out of, the session state machine.

use chrono::{DateTime, Utc};

use exam_core::model::{
    AnswerValue, ConfidenceLevel, LifecycleState, QuestionId, ViolationKind, ViolationRecord,
};
use storage::repository::SubmissionReceipt;

use crate::backend::SessionOutcome;

/// Everything the outside world can tell the machine.
///
/// Student input, proctoring detections, the host's once-a-second tick, and
/// connectivity changes all arrive through this one type so the machine can
/// stay a single exhaustive match.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    AnswerChanged {
        question_id: QuestionId,
        value: AnswerValue,
    },
    AnswerCleared {
        question_id: QuestionId,
    },
    FlagToggled {
        question_id: QuestionId,
    },
    PositionChanged {
        position: usize,
    },
    ScratchpadEdited {
        text: String,
    },
    ConfidenceChanged {
        question_id: QuestionId,
        level: ConfidenceLevel,
    },
    ViolationDetected {
        kind: ViolationKind,
        detail: Option<String>,
    },
    /// One second of wall-clock time passed. The host owns the interval;
    /// the machine derives every deadline from these.
    TickElapsed,
    NetworkChanged {
        online: bool,
    },
    SubmitRequested,
    /// Server-reported remaining time arriving outside a heartbeat reply.
    AuthoritativeTime {
        remaining_seconds: u32,
    },
}

/// What a student-facing shell should surface after an event.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionNotice {
    ViolationWarning {
        kind: ViolationKind,
        count: u32,
        remaining: u32,
    },
    FinalViolationWarning {
        kind: ViolationKind,
        count: u32,
    },
    ViolationLimitReached {
        count: u32,
    },
    ContentObscured {
        until: DateTime<Utc>,
    },
    TimerCorrected {
        from_secs: u32,
        to_secs: u32,
    },
    OfflineDeduction {
        seconds: u32,
    },
    ConnectionLost,
    ConnectionRestored,
    GraceStarted {
        deadline: DateTime<Utc>,
    },
    IdleWarning {
        idle_secs: i64,
    },
    SubmissionQueued {
        action: RecoveryAction,
    },
    SubmissionAccepted {
        receipt: SubmissionReceipt,
    },
    SessionEndedElsewhere {
        state: LifecycleState,
    },
}

/// What the student can do about a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    AutoRetry,
    Reload,
    ContactSupport,
}

/// Asynchronous work the machine asks its host to execute.
///
/// The machine never awaits; it emits directives and folds their results
/// back in as further calls.
#[derive(Debug, Clone, PartialEq)]
pub enum Directive {
    PersistLocal,
    FlushRemote { seq: u64 },
    ReportViolation { record: ViolationRecord },
    SendHeartbeat,
    EstablishRemote,
    BeginSubmission { trigger: SubmissionTrigger },
    ClearLocal,
    CloseRemote { outcome: SessionOutcome },
}

/// Why a submission started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionTrigger {
    Student,
    GraceExpired,
    ViolationLimit,
}
