//! Async shell around [`SessionMachine`].
//!
//! The controller owns the stores and backend clients, executes the
//! machine's directives, and folds each completion back in until the
//! directive queue drains. Hosts talk to it through [`open`],
//! [`ExamSessionController::start`], and [`ExamSessionController::apply`].
//!
//! [`open`]: ExamSessionController::open

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use exam_core::model::{ExamManifest, IdentityDraft, LifecycleState};
use exam_core::policy::SessionPolicy;
use exam_core::Clock;
use storage::repository::{
    PendingSubmission, PendingSubmissionStore, ProgressSnapshot, ProgressStore, Storage,
    SubmissionMarkStore, SubmissionReceipt,
};

use crate::backend::{
    GradingClient, GradingRequest, SessionBackend, SessionToken, StartSessionRequest,
};
use crate::error::{ControllerError, StartError};
use crate::session::events::{Directive, SessionEvent, SessionNotice, SubmissionTrigger};
use crate::session::machine::{SessionMachine, Step, SubmissionResolution};
use crate::session::view::SessionOverview;

//
// ─── OPEN ──────────────────────────────────────────────────────────────────────
//

/// What opening an exam for a student resolved to.
#[derive(Debug)]
pub enum OpenedSession {
    /// Fresh attempt; call [`ExamSessionController::start`] to begin.
    Ready(ExamSessionController),
    /// An earlier attempt was restored from the freshest saved snapshot.
    Restored(ExamSessionController),
    /// This student already submitted this exam; the receipt survives
    /// reloads so they see their result instead of a blank attempt.
    AlreadySubmitted { receipt: SubmissionReceipt },
    /// A saved attempt can no longer continue (terminal snapshot, or the
    /// availability window closed over it).
    Expired,
}

//
// ─── CONTROLLER ────────────────────────────────────────────────────────────────
//

/// Drives one attempt end to end against local storage and the backend.
pub struct ExamSessionController {
    clock: Clock,
    machine: SessionMachine,
    local: Arc<dyn ProgressStore>,
    remote: Arc<dyn ProgressStore>,
    marks: Arc<dyn SubmissionMarkStore>,
    pending: Arc<dyn PendingSubmissionStore>,
    sessions: Arc<dyn SessionBackend>,
    grading: Arc<dyn GradingClient>,
    token: Option<SessionToken>,
    client_info: Option<String>,
}

impl fmt::Debug for ExamSessionController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExamSessionController")
            .field("state", &self.machine.state())
            .field("registered", &self.token.is_some())
            .finish_non_exhaustive()
    }
}

impl ExamSessionController {
    /// Resolves how this student enters this exam: already submitted,
    /// expired, restored from the freshest meaningful snapshot, or fresh.
    ///
    /// Local and remote snapshot reads are best-effort; a corrupt or
    /// unreachable copy is logged and treated as absent rather than
    /// blocking the student.
    ///
    /// # Errors
    ///
    /// Returns `StartError` when identity validation fails or the durable
    /// submission marks cannot be read.
    #[allow(clippy::too_many_arguments)]
    pub async fn open(
        clock: Clock,
        policy: SessionPolicy,
        manifest: ExamManifest,
        draft: IdentityDraft,
        storage: Storage,
        remote_progress: Arc<dyn ProgressStore>,
        sessions: Arc<dyn SessionBackend>,
        grading: Arc<dyn GradingClient>,
    ) -> Result<OpenedSession, StartError> {
        let identity =
            draft.validate(manifest.required_identity_fields(), manifest.allow_list())?;
        let student_key = identity.storage_key();
        let exam_id = manifest.exam_id().clone();

        if let Some(receipt) = storage.marks.submitted_receipt(&exam_id, &student_key).await? {
            if let Err(e) = storage.progress.clear(&exam_id, &student_key).await {
                warn!("failed to clear stale progress for submitted exam: {e}");
            }
            return Ok(OpenedSession::AlreadySubmitted { receipt });
        }

        let local_snapshot = match storage.progress.load(&exam_id, &student_key).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("local progress unavailable: {e}");
                None
            }
        };
        let remote_snapshot = match remote_progress.load(&exam_id, &student_key).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("remote progress unavailable: {e}");
                None
            }
        };
        let snapshot = freshest_meaningful(local_snapshot, remote_snapshot);

        let build = |machine: SessionMachine| ExamSessionController {
            clock,
            machine,
            local: Arc::clone(&storage.progress),
            remote: remote_progress.clone(),
            marks: Arc::clone(&storage.marks),
            pending: Arc::clone(&storage.pending),
            sessions: sessions.clone(),
            grading: grading.clone(),
            token: None,
            client_info: None,
        };

        if let Some(snapshot) = snapshot {
            if snapshot.lifecycle_state.is_terminal()
                || !manifest.window().is_open(clock.now())
            {
                if let Err(e) = storage.progress.clear(&exam_id, &student_key).await {
                    warn!("failed to clear expired attempt: {e}");
                }
                return Ok(OpenedSession::Expired);
            }

            match snapshot.restore(manifest.question_count()) {
                Ok((session, time_remaining)) => {
                    let machine = SessionMachine::resumed(
                        manifest,
                        session,
                        time_remaining,
                        policy,
                        clock.now(),
                    );
                    return Ok(OpenedSession::Restored(build(machine)));
                }
                Err(e) => {
                    warn!("saved attempt is unusable, starting fresh: {e}");
                }
            }
        }

        let machine = SessionMachine::new(manifest, identity, policy);
        Ok(OpenedSession::Ready(build(machine)))
    }

    /// Free-form client descriptor forwarded to the backend (user agent,
    /// app build, screen size).
    #[must_use]
    pub fn with_client_info(mut self, client_info: impl Into<String>) -> Self {
        self.client_info = Some(client_info.into());
        self
    }

    /// Starts (or re-arms a restored) attempt and runs its opening work.
    ///
    /// # Errors
    ///
    /// Returns `ControllerError` when the exam cannot start or local
    /// persistence fails.
    pub async fn start(&mut self) -> Result<Vec<SessionNotice>, ControllerError> {
        let now = self.clock.now();
        let step = self.machine.start(now)?;
        self.execute(step).await
    }

    /// Feeds one event through the machine and executes everything it asks
    /// for, returning the notices the shell should surface.
    ///
    /// # Errors
    ///
    /// Returns `ControllerError` when local persistence fails.
    pub async fn apply(
        &mut self,
        event: SessionEvent,
    ) -> Result<Vec<SessionNotice>, ControllerError> {
        let now = self.clock.now();
        let step = self.machine.handle(event, now);
        self.execute(step).await
    }

    /// Persists the attempt and pushes any pending remote flush immediately.
    /// For hosts about to lose the page (tab close, navigation away).
    ///
    /// # Errors
    ///
    /// Returns `ControllerError` when local persistence fails.
    pub async fn flush_now(&mut self) -> Result<(), ControllerError> {
        let step = self.machine.prepare_leave(self.clock.now());
        self.execute(step).await?;
        Ok(())
    }

    //
    // ─── DIRECTIVE EXECUTION ───────────────────────────────────────────────────
    //

    async fn execute(&mut self, step: Step) -> Result<Vec<SessionNotice>, ControllerError> {
        let mut notices = step.notices;
        let mut queue: VecDeque<Directive> = step.directives.into();

        while let Some(directive) = queue.pop_front() {
            if let Some(follow_on) = self.run_directive(directive).await? {
                notices.extend(follow_on.notices);
                queue.extend(follow_on.directives);
            }
        }
        Ok(notices)
    }

    async fn run_directive(
        &mut self,
        directive: Directive,
    ) -> Result<Option<Step>, ControllerError> {
        let now = self.clock.now();
        match directive {
            Directive::PersistLocal => {
                let snapshot = self.machine.build_snapshot(now);
                self.local.save(&snapshot).await?;
                Ok(None)
            }
            Directive::FlushRemote { seq } => {
                let snapshot = self.machine.build_snapshot(now);
                let ok = match self.remote.save(&snapshot).await {
                    Ok(()) => true,
                    Err(e) => {
                        debug!(seq, "remote flush failed: {e}");
                        false
                    }
                };
                Ok(Some(self.machine.flush_resolved(seq, ok, now)))
            }
            Directive::ReportViolation { record } => {
                if let Some(token) = &self.token {
                    if let Err(e) = self.sessions.report_violation(token, &record).await {
                        warn!(kind = %record.kind, "violation report failed: {e}");
                    }
                }
                Ok(None)
            }
            Directive::SendHeartbeat => {
                let Some(token) = self.token.clone() else {
                    return Ok(None);
                };
                let summary = self.machine.progress_summary(now);
                let reply = match self.sessions.heartbeat(&token, &summary).await {
                    Ok(reply) => Some(reply),
                    Err(e) => {
                        debug!("heartbeat failed: {e}");
                        None
                    }
                };
                Ok(Some(self.machine.heartbeat_resolved(reply.as_ref(), now)))
            }
            Directive::EstablishRemote => {
                let session = self.machine.session();
                let request = StartSessionRequest {
                    exam_id: session.exam_id().clone(),
                    session_id: session.session_id(),
                    student_fields: session.identity().fields().clone(),
                    client_info: self.client_info.clone(),
                };
                match self.sessions.start(&request).await {
                    Ok(started) => {
                        self.token = Some(started.token.clone());
                        Ok(Some(self.machine.remote_started(&started, now)))
                    }
                    Err(e) => {
                        // the attempt continues offline; an answered exam
                        // beats a reachable backend
                        warn!("session registration failed: {e}");
                        Ok(None)
                    }
                }
            }
            Directive::BeginSubmission { trigger } => {
                let resolution = self.run_submission(trigger).await;
                Ok(Some(self.machine.submission_resolved(resolution, now)))
            }
            Directive::ClearLocal => {
                let session = self.machine.session();
                let exam_id = session.exam_id().clone();
                let student_key = session.identity().storage_key();
                if let Err(e) = self.local.clear(&exam_id, &student_key).await {
                    warn!("failed to clear finished attempt: {e}");
                }
                Ok(None)
            }
            Directive::CloseRemote { outcome } => {
                if let Some(token) = &self.token {
                    if let Err(e) = self.sessions.end(token, outcome).await {
                        debug!("session close failed: {e}");
                    }
                }
                Ok(None)
            }
        }
    }

    async fn run_submission(&self, trigger: SubmissionTrigger) -> SubmissionResolution {
        let now = self.clock.now();
        let session = self.machine.session();
        let exam_id = session.exam_id().clone();
        let student_key = session.identity().storage_key();

        // a receipt on record wins over a new delivery
        match self.marks.submitted_receipt(&exam_id, &student_key).await {
            Ok(Some(receipt)) => return SubmissionResolution::Accepted { receipt },
            Ok(None) => {}
            Err(e) => warn!("submission mark check failed: {e}"),
        }

        let request = self.grading_request(now);
        match self.grading.submit(&request).await {
            Ok(outcome) => {
                let receipt = outcome.into_receipt(now);
                if let Err(e) = self
                    .marks
                    .mark_submitted(&exam_id, &student_key, &receipt)
                    .await
                {
                    warn!("failed to record submission mark: {e}");
                }
                SubmissionResolution::Accepted { receipt }
            }
            Err(e) => {
                warn!(?trigger, "grading service unreachable, queueing: {e}");
                match serde_json::to_value(&request) {
                    Ok(payload) => {
                        let queued = PendingSubmission {
                            exam_id,
                            student_key,
                            payload,
                            queued_at: now,
                        };
                        if let Err(e) = self.pending.enqueue(&queued).await {
                            warn!("failed to queue submission for replay: {e}");
                        }
                    }
                    Err(e) => warn!("failed to serialize submission for replay: {e}"),
                }
                SubmissionResolution::Failed
            }
        }
    }

    fn grading_request(&self, now: DateTime<Utc>) -> GradingRequest {
        let session = self.machine.session();
        let time_taken_seconds = session.started_at().map(|started| {
            u32::try_from((now - started).num_seconds().max(0)).unwrap_or(u32::MAX)
        });
        GradingRequest {
            exam_id: session.exam_id().clone(),
            session_id: session.session_id(),
            student_fields: session.identity().fields().clone(),
            answers: session.answers().clone(),
            violations: session.violations().records().to_vec(),
            time_taken_seconds,
            submitted_at: now,
            client_info: self.client_info.clone(),
        }
    }

    //
    // ─── ACCESSORS ─────────────────────────────────────────────────────────────
    //

    #[must_use]
    pub fn overview(&self) -> SessionOverview {
        self.machine.overview(self.clock.now())
    }

    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.machine.state()
    }

    #[must_use]
    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    /// Mutable clock access, used by fixed-clock tests to advance time
    /// between events.
    pub fn clock_mut(&mut self) -> &mut Clock {
        &mut self.clock
    }

    #[must_use]
    pub fn token(&self) -> Option<&SessionToken> {
        self.token.as_ref()
    }
}

/// The freshest snapshot worth resuming, by `last_updated`.
fn freshest_meaningful(
    local: Option<ProgressSnapshot>,
    remote: Option<ProgressSnapshot>,
) -> Option<ProgressSnapshot> {
    let mut candidates: Vec<ProgressSnapshot> = local
        .into_iter()
        .chain(remote)
        .filter(ProgressSnapshot::has_meaningful_progress)
        .collect();
    candidates.sort_by_key(|snapshot| snapshot.last_updated);
    candidates.pop()
}
