use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use exam_core::model::{
    AnswerValue, ConfidenceLevel, ExamId, ExamSession, LifecycleState, QuestionId, SessionId,
    SessionStateError, StudentIdentity, ViolationLedger, ViolationRecord,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    #[error("conflict")]
    Conflict,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Persisted shape for an in-progress attempt.
///
/// This mirrors the domain `ExamSession` plus the countdown reading, so
/// both local and remote stores can serialize it without leaking storage
/// concerns into the domain layer. Snapshots from different stores are
/// compared by `last_updated` when deciding which side to resume from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub session_id: SessionId,
    pub exam_id: ExamId,
    pub student_fields: BTreeMap<String, String>,
    pub answers: BTreeMap<QuestionId, AnswerValue>,
    pub flagged_question_ids: BTreeSet<QuestionId>,
    pub confidence_levels: BTreeMap<QuestionId, ConfidenceLevel>,
    pub current_position: usize,
    pub scratchpad_text: String,
    pub violations: Vec<ViolationRecord>,
    pub time_remaining_seconds: Option<u32>,
    pub lifecycle_state: LifecycleState,
    pub started_at: Option<DateTime<Utc>>,
    pub last_updated: DateTime<Utc>,
}

impl ProgressSnapshot {
    #[must_use]
    pub fn capture(
        session: &ExamSession,
        time_remaining_seconds: Option<u32>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            session_id: session.session_id(),
            exam_id: session.exam_id().clone(),
            student_fields: session.identity().fields().clone(),
            answers: session.answers().clone(),
            flagged_question_ids: session.flagged().clone(),
            confidence_levels: session.confidence().clone(),
            current_position: session.current_position(),
            scratchpad_text: session.scratchpad().to_owned(),
            violations: session.violations().records().to_vec(),
            time_remaining_seconds,
            lifecycle_state: session.state(),
            started_at: session.started_at(),
            last_updated: at,
        }
    }

    /// Convert the snapshot back into a domain session plus the stored
    /// countdown reading.
    ///
    /// # Errors
    ///
    /// Returns `SessionStateError` if the persisted state is internally
    /// inconsistent (see `ExamSession::from_persisted`).
    pub fn restore(
        self,
        question_count: usize,
    ) -> Result<(ExamSession, Option<u32>), SessionStateError> {
        let session = ExamSession::from_persisted(
            self.session_id,
            self.exam_id,
            StudentIdentity::from_fields(self.student_fields),
            self.lifecycle_state,
            self.started_at,
            self.answers,
            self.flagged_question_ids,
            self.confidence_levels,
            self.current_position,
            self.scratchpad_text,
            ViolationLedger::from_records(self.violations),
            question_count,
        )?;
        Ok((session, self.time_remaining_seconds))
    }

    /// Storage key identifying the student this snapshot belongs to.
    #[must_use]
    pub fn student_key(&self) -> String {
        StudentIdentity::from_fields(self.student_fields.clone()).storage_key()
    }

    /// Whether this snapshot is worth resuming over starting fresh.
    #[must_use]
    pub fn has_meaningful_progress(&self) -> bool {
        self.started_at.is_some() || self.answers.values().any(|v| !v.is_blank())
    }
}

/// Proof that an attempt was graded, kept so reopening the exam shows the
/// result instead of a blank attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionReceipt {
    pub submission_id: Option<String>,
    pub score: Option<f64>,
    pub max_score: Option<f64>,
    pub percentage: Option<f64>,
    pub recorded_at: DateTime<Utc>,
}

/// A submission that could not reach the grading service, parked for
/// background replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingSubmission {
    pub exam_id: ExamId,
    pub student_key: String,
    pub payload: serde_json::Value,
    pub queued_at: DateTime<Utc>,
}

/// Store for in-progress attempt snapshots, keyed by exam and student.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    /// Fetch the snapshot for one attempt, if any.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the store cannot be read.
    async fn load(
        &self,
        exam_id: &ExamId,
        student_key: &str,
    ) -> Result<Option<ProgressSnapshot>, StorageError>;

    /// Persist or replace the snapshot for one attempt.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the snapshot cannot be stored.
    async fn save(&self, snapshot: &ProgressSnapshot) -> Result<(), StorageError>;

    /// Remove the snapshot for one attempt. Removing a missing snapshot is
    /// not an error.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the store cannot be written.
    async fn clear(&self, exam_id: &ExamId, student_key: &str) -> Result<(), StorageError>;
}

/// Store for durable submitted-marks, consulted before any new attempt.
#[async_trait]
pub trait SubmissionMarkStore: Send + Sync {
    /// Record that an attempt was accepted, replacing any earlier receipt.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the mark cannot be stored.
    async fn mark_submitted(
        &self,
        exam_id: &ExamId,
        student_key: &str,
        receipt: &SubmissionReceipt,
    ) -> Result<(), StorageError>;

    /// Fetch the receipt for an already-submitted attempt, if any.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the store cannot be read.
    async fn submitted_receipt(
        &self,
        exam_id: &ExamId,
        student_key: &str,
    ) -> Result<Option<SubmissionReceipt>, StorageError>;
}

/// Queue of submissions awaiting replay, in arrival order.
#[async_trait]
pub trait PendingSubmissionStore: Send + Sync {
    /// Park a submission for later replay; returns its queue id.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the submission cannot be stored.
    async fn enqueue(&self, submission: &PendingSubmission) -> Result<i64, StorageError>;

    /// List queued submissions, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the queue cannot be read.
    async fn list(&self) -> Result<Vec<(i64, PendingSubmission)>, StorageError>;

    /// Drop a delivered or poisoned entry by queue id.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the queue cannot be written.
    async fn remove(&self, id: i64) -> Result<(), StorageError>;
}

/// Simple in-memory store implementation for testing and prototyping.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    snapshots: Arc<Mutex<HashMap<(ExamId, String), ProgressSnapshot>>>,
    marks: Arc<Mutex<HashMap<(ExamId, String), SubmissionReceipt>>>,
    pending: Arc<Mutex<Vec<(i64, PendingSubmission)>>>,
    next_pending_id: Arc<Mutex<i64>>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProgressStore for InMemoryStore {
    async fn load(
        &self,
        exam_id: &ExamId,
        student_key: &str,
    ) -> Result<Option<ProgressSnapshot>, StorageError> {
        let guard = self
            .snapshots
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard.get(&(exam_id.clone(), student_key.to_owned())).cloned())
    }

    async fn save(&self, snapshot: &ProgressSnapshot) -> Result<(), StorageError> {
        let mut guard = self
            .snapshots
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard.insert(
            (snapshot.exam_id.clone(), snapshot.student_key()),
            snapshot.clone(),
        );
        Ok(())
    }

    async fn clear(&self, exam_id: &ExamId, student_key: &str) -> Result<(), StorageError> {
        let mut guard = self
            .snapshots
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard.remove(&(exam_id.clone(), student_key.to_owned()));
        Ok(())
    }
}

#[async_trait]
impl SubmissionMarkStore for InMemoryStore {
    async fn mark_submitted(
        &self,
        exam_id: &ExamId,
        student_key: &str,
        receipt: &SubmissionReceipt,
    ) -> Result<(), StorageError> {
        let mut guard = self
            .marks
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard.insert((exam_id.clone(), student_key.to_owned()), receipt.clone());
        Ok(())
    }

    async fn submitted_receipt(
        &self,
        exam_id: &ExamId,
        student_key: &str,
    ) -> Result<Option<SubmissionReceipt>, StorageError> {
        let guard = self
            .marks
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard.get(&(exam_id.clone(), student_key.to_owned())).cloned())
    }
}

#[async_trait]
impl PendingSubmissionStore for InMemoryStore {
    async fn enqueue(&self, submission: &PendingSubmission) -> Result<i64, StorageError> {
        let mut next = self
            .next_pending_id
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        let mut guard = self
            .pending
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        *next += 1;
        guard.push((*next, submission.clone()));
        Ok(*next)
    }

    async fn list(&self) -> Result<Vec<(i64, PendingSubmission)>, StorageError> {
        let guard = self
            .pending
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard.clone())
    }

    async fn remove(&self, id: i64) -> Result<(), StorageError> {
        let mut guard = self
            .pending
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard.retain(|(queued_id, _)| *queued_id != id);
        Ok(())
    }
}

/// Aggregates the device-local stores behind trait objects for easy backend
/// swapping.
#[derive(Clone)]
pub struct Storage {
    pub progress: Arc<dyn ProgressStore>,
    pub marks: Arc<dyn SubmissionMarkStore>,
    pub pending: Arc<dyn PendingSubmissionStore>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        let store = InMemoryStore::new();
        let progress: Arc<dyn ProgressStore> = Arc::new(store.clone());
        let marks: Arc<dyn SubmissionMarkStore> = Arc::new(store.clone());
        let pending: Arc<dyn PendingSubmissionStore> = Arc::new(store);
        Self {
            progress,
            marks,
            pending,
        }
    }
}
