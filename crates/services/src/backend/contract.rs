//! Wire contract between the controller and the platform backend.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use exam_core::model::{AnswerValue, ExamId, QuestionId, SessionId, ViolationRecord};
use exam_core::timer::ConnectionQuality;
use storage::repository::SubmissionReceipt;

use crate::error::BackendError;

//
// ─── SESSION LIFECYCLE ─────────────────────────────────────────────────────────
//

/// Opaque token identifying a registered session on the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(String);

impl SessionToken {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StartSessionRequest {
    pub exam_id: ExamId,
    pub session_id: SessionId,
    pub student_fields: BTreeMap<String, String>,
    pub client_info: Option<String>,
}

/// Backend acknowledgment of a start request.
///
/// `resumed` is set when the backend matched an existing live session for
/// this student instead of registering a new one.
#[derive(Debug, Clone, Deserialize)]
pub struct StartedSession {
    pub token: SessionToken,
    #[serde(default)]
    pub resumed: bool,
    pub time_remaining_seconds: Option<u32>,
    /// Answers the backend still held for a resumed attempt.
    #[serde(default)]
    pub saved_answers: Option<BTreeMap<QuestionId, AnswerValue>>,
}

/// Compact progress shipped with every heartbeat.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressSummary {
    pub current_position: usize,
    pub answered_count: usize,
    pub time_remaining_seconds: Option<u32>,
    pub quality: ConnectionQuality,
}

/// What the backend believes about the session, piggybacked on heartbeats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteSessionStatus {
    Active,
    /// The heartbeat arrived inside the server throttle window and carried
    /// no fresh state.
    Throttled,
    Submitted,
    Expired,
}

impl RemoteSessionStatus {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Submitted | Self::Expired)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HeartbeatReply {
    pub status: RemoteSessionStatus,
    pub time_remaining_seconds: Option<u32>,
}

/// How an attempt ended, reported when closing the remote session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionOutcome {
    Submitted,
    Expired,
}

//
// ─── GRADING ───────────────────────────────────────────────────────────────────
//

/// Full submission payload sent to the grading service.
///
/// Also serialized into the pending queue, so it derives `Deserialize` for
/// replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradingRequest {
    pub exam_id: ExamId,
    pub session_id: SessionId,
    pub student_fields: BTreeMap<String, String>,
    pub answers: BTreeMap<QuestionId, AnswerValue>,
    pub violations: Vec<ViolationRecord>,
    pub time_taken_seconds: Option<u32>,
    pub submitted_at: DateTime<Utc>,
    pub client_info: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradedSubmission {
    pub submission_id: Option<String>,
    pub score: Option<f64>,
    pub max_score: Option<f64>,
    pub percentage: Option<f64>,
}

/// Result of handing a submission to the grading service.
#[derive(Debug, Clone, PartialEq)]
pub enum GradingOutcome {
    Accepted(GradedSubmission),
    /// The backend had already graded an attempt for this student; ours was
    /// discarded in its favor. Carries the earlier result when the backend
    /// returns it.
    AlreadySubmitted(Option<GradedSubmission>),
}

impl GradingOutcome {
    /// Collapse the outcome into a storable receipt.
    #[must_use]
    pub fn into_receipt(self, recorded_at: DateTime<Utc>) -> SubmissionReceipt {
        let graded = match self {
            Self::Accepted(graded) => Some(graded),
            Self::AlreadySubmitted(earlier) => earlier,
        };
        match graded {
            Some(graded) => SubmissionReceipt {
                submission_id: graded.submission_id,
                score: graded.score,
                max_score: graded.max_score,
                percentage: graded.percentage,
                recorded_at,
            },
            None => SubmissionReceipt {
                submission_id: None,
                score: None,
                max_score: None,
                percentage: None,
                recorded_at,
            },
        }
    }
}

//
// ─── TRAITS ────────────────────────────────────────────────────────────────────
//

/// Live-session contract with the platform backend.
#[async_trait]
pub trait SessionBackend: Send + Sync {
    /// Register (or resume) a session for this student.
    ///
    /// # Errors
    ///
    /// Returns `BackendError` if the backend is unreachable or rejects the
    /// request.
    async fn start(&self, request: &StartSessionRequest) -> Result<StartedSession, BackendError>;

    /// Report liveness and receive the backend's view of the session.
    ///
    /// # Errors
    ///
    /// Returns `BackendError` if the backend is unreachable or rejects the
    /// request.
    async fn heartbeat(
        &self,
        token: &SessionToken,
        progress: &ProgressSummary,
    ) -> Result<HeartbeatReply, BackendError>;

    /// Forward one counted violation for the proctor log.
    ///
    /// # Errors
    ///
    /// Returns `BackendError` if the backend is unreachable or rejects the
    /// request.
    async fn report_violation(
        &self,
        token: &SessionToken,
        record: &ViolationRecord,
    ) -> Result<(), BackendError>;

    /// Close the remote session with its final outcome.
    ///
    /// # Errors
    ///
    /// Returns `BackendError` if the backend is unreachable or rejects the
    /// request.
    async fn end(
        &self,
        token: &SessionToken,
        outcome: SessionOutcome,
    ) -> Result<(), BackendError>;
}

/// Grading-service contract.
#[async_trait]
pub trait GradingClient: Send + Sync {
    /// Deliver a completed attempt for grading.
    ///
    /// # Errors
    ///
    /// Returns `BackendError` if the service is unreachable or rejects the
    /// submission outright.
    async fn submit(&self, request: &GradingRequest) -> Result<GradingOutcome, BackendError>;
}
