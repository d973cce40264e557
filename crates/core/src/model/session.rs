use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::answer::{AnswerValue, ConfidenceLevel};
use crate::model::identity::StudentIdentity;
use crate::model::ids::{ExamId, QuestionId, SessionId};
use crate::model::violation::{Escalation, ViolationKind, ViolationLedger};

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SessionStateError {
    #[error("cannot move session from {from} to {to}")]
    IllegalTransition {
        from: LifecycleState,
        to: LifecycleState,
    },

    #[error("persisted session in state {state} is missing its start time")]
    MissingStartedAt { state: LifecycleState },

    #[error("persisted position {position} is outside the question count {questions}")]
    PositionOutOfRange { position: usize, questions: usize },
}

/// Error returned when parsing a [`LifecycleState`] from its stored form.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unrecognized lifecycle state `{0}`")]
pub struct ParseLifecycleError(pub String);

//
// ─── LIFECYCLE ─────────────────────────────────────────────────────────────────
//

/// Where an attempt sits in its life.
///
/// `Submitted` and `Expired` are terminal; every event after them is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    NotStarted,
    Active,
    Grace,
    Submitting,
    Submitted,
    Expired,
    Error,
}

impl LifecycleState {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::Active => "active",
            Self::Grace => "grace",
            Self::Submitting => "submitting",
            Self::Submitted => "submitted",
            Self::Expired => "expired",
            Self::Error => "error",
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Submitted | Self::Expired)
    }

    /// Legal moves in the lifecycle graph. Anything not listed is an
    /// `IllegalTransition`, including every move out of a terminal state.
    #[must_use]
    pub fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::NotStarted, Self::Active)
                | (Self::NotStarted, Self::Expired)
                | (Self::Active, Self::Grace)
                | (Self::Active, Self::Submitting)
                | (Self::Active, Self::Expired)
                | (Self::Grace, Self::Active)
                | (Self::Grace, Self::Submitting)
                | (Self::Grace, Self::Expired)
                | (Self::Submitting, Self::Submitted)
                | (Self::Submitting, Self::Error)
                | (Self::Error, Self::Active)
                | (Self::Error, Self::Submitted)
        )
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LifecycleState {
    type Err = ParseLifecycleError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "not_started" => Ok(Self::NotStarted),
            "active" => Ok(Self::Active),
            "grace" => Ok(Self::Grace),
            "submitting" => Ok(Self::Submitting),
            "submitted" => Ok(Self::Submitted),
            "expired" => Ok(Self::Expired),
            "error" => Ok(Self::Error),
            other => Err(ParseLifecycleError(other.to_string())),
        }
    }
}

//
// ─── SESSION ───────────────────────────────────────────────────────────────────
//

/// One student's attempt at one exam.
///
/// Holds everything the student has produced so far plus the proctoring
/// ledger. Mutations are silently ignored once the attempt reaches a
/// terminal state so late events cannot corrupt a finished attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExamSession {
    session_id: SessionId,
    exam_id: ExamId,
    identity: StudentIdentity,
    state: LifecycleState,
    started_at: Option<DateTime<Utc>>,
    answers: BTreeMap<QuestionId, AnswerValue>,
    flagged: BTreeSet<QuestionId>,
    confidence: BTreeMap<QuestionId, ConfidenceLevel>,
    current_position: usize,
    scratchpad: String,
    violations: ViolationLedger,
}

impl ExamSession {
    /// Creates a fresh, unstarted attempt with a newly minted session id.
    #[must_use]
    pub fn new(exam_id: ExamId, identity: StudentIdentity) -> Self {
        Self {
            session_id: SessionId::new(),
            exam_id,
            identity,
            state: LifecycleState::NotStarted,
            started_at: None,
            answers: BTreeMap::new(),
            flagged: BTreeSet::new(),
            confidence: BTreeMap::new(),
            current_position: 0,
            scratchpad: String::new(),
            violations: ViolationLedger::new(),
        }
    }

    /// Rebuilds an attempt from persisted state.
    ///
    /// Transient states (`Grace`, `Submitting`, `Error`) normalize back to
    /// `Active`; they describe in-flight work that did not survive the
    /// process that was doing it.
    ///
    /// # Errors
    ///
    /// Returns `SessionStateError` if a started state has no start time or
    /// the stored position does not fit the exam's question count.
    #[allow(clippy::too_many_arguments)]
    pub fn from_persisted(
        session_id: SessionId,
        exam_id: ExamId,
        identity: StudentIdentity,
        state: LifecycleState,
        started_at: Option<DateTime<Utc>>,
        answers: BTreeMap<QuestionId, AnswerValue>,
        flagged: BTreeSet<QuestionId>,
        confidence: BTreeMap<QuestionId, ConfidenceLevel>,
        current_position: usize,
        scratchpad: String,
        violations: ViolationLedger,
        question_count: usize,
    ) -> Result<Self, SessionStateError> {
        if state != LifecycleState::NotStarted && started_at.is_none() {
            return Err(SessionStateError::MissingStartedAt { state });
        }
        if question_count > 0 && current_position >= question_count {
            return Err(SessionStateError::PositionOutOfRange {
                position: current_position,
                questions: question_count,
            });
        }

        let state = match state {
            LifecycleState::Grace | LifecycleState::Submitting | LifecycleState::Error => {
                LifecycleState::Active
            }
            other => other,
        };

        Ok(Self {
            session_id,
            exam_id,
            identity,
            state,
            started_at,
            answers,
            flagged,
            confidence,
            current_position,
            scratchpad,
            violations,
        })
    }

    /// Moves the attempt to `next`.
    ///
    /// # Errors
    ///
    /// Returns `SessionStateError::IllegalTransition` when the lifecycle
    /// graph has no edge from the current state to `next`.
    pub fn transition_to(&mut self, next: LifecycleState) -> Result<(), SessionStateError> {
        if !self.state.can_transition_to(next) {
            return Err(SessionStateError::IllegalTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    /// Starts the attempt, stamping `started_at`.
    ///
    /// # Errors
    ///
    /// Returns `SessionStateError::IllegalTransition` unless the attempt is
    /// `NotStarted`.
    pub fn begin(&mut self, at: DateTime<Utc>) -> Result<(), SessionStateError> {
        self.transition_to(LifecycleState::Active)?;
        self.started_at = Some(at);
        Ok(())
    }

    pub fn set_answer(&mut self, question_id: QuestionId, value: AnswerValue) {
        if self.state.is_terminal() {
            return;
        }
        self.answers.insert(question_id, value);
    }

    pub fn clear_answer(&mut self, question_id: &QuestionId) {
        if self.state.is_terminal() {
            return;
        }
        self.answers.remove(question_id);
        self.confidence.remove(question_id);
    }

    /// Toggles the review flag; returns whether the question is now flagged.
    pub fn toggle_flag(&mut self, question_id: QuestionId) -> bool {
        if self.state.is_terminal() {
            return self.flagged.contains(&question_id);
        }
        if self.flagged.remove(&question_id) {
            false
        } else {
            self.flagged.insert(question_id);
            true
        }
    }

    pub fn set_confidence(&mut self, question_id: QuestionId, level: ConfidenceLevel) {
        if self.state.is_terminal() {
            return;
        }
        self.confidence.insert(question_id, level);
    }

    pub fn set_position(&mut self, position: usize) {
        if self.state.is_terminal() {
            return;
        }
        self.current_position = position;
    }

    pub fn set_scratchpad(&mut self, text: String) {
        if self.state.is_terminal() {
            return;
        }
        self.scratchpad = text;
    }

    /// Appends a counted violation; `None` once the attempt is terminal.
    pub fn record_violation(
        &mut self,
        kind: ViolationKind,
        detail: Option<String>,
        at: DateTime<Utc>,
        max_violations: u32,
    ) -> Option<Escalation> {
        if self.state.is_terminal() {
            return None;
        }
        Some(self.violations.record(kind, detail, at, max_violations))
    }

    /// Answered questions with non-blank values.
    #[must_use]
    pub fn answered_count(&self) -> usize {
        self.answers.values().filter(|v| !v.is_blank()).count()
    }

    /// Whether this attempt is worth resuming over starting fresh.
    #[must_use]
    pub fn has_meaningful_progress(&self) -> bool {
        self.started_at.is_some() || self.answered_count() > 0
    }

    // Accessors
    #[must_use]
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    #[must_use]
    pub fn exam_id(&self) -> &ExamId {
        &self.exam_id
    }

    #[must_use]
    pub fn identity(&self) -> &StudentIdentity {
        &self.identity
    }

    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    #[must_use]
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    #[must_use]
    pub fn answers(&self) -> &BTreeMap<QuestionId, AnswerValue> {
        &self.answers
    }

    #[must_use]
    pub fn answer(&self, question_id: &QuestionId) -> Option<&AnswerValue> {
        self.answers.get(question_id)
    }

    #[must_use]
    pub fn flagged(&self) -> &BTreeSet<QuestionId> {
        &self.flagged
    }

    #[must_use]
    pub fn is_flagged(&self, question_id: &QuestionId) -> bool {
        self.flagged.contains(question_id)
    }

    #[must_use]
    pub fn confidence(&self) -> &BTreeMap<QuestionId, ConfidenceLevel> {
        &self.confidence
    }

    #[must_use]
    pub fn current_position(&self) -> usize {
        self.current_position
    }

    #[must_use]
    pub fn scratchpad(&self) -> &str {
        &self.scratchpad
    }

    #[must_use]
    pub fn violations(&self) -> &ViolationLedger {
        &self.violations
    }

    #[must_use]
    pub fn violation_count(&self) -> u32 {
        self.violations.count()
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
