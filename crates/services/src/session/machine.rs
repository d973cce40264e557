//! Pure state machine for one proctored attempt.
//!
//! The machine never does I/O and never awaits. Events go in, a [`Step`] of
//! notices and directives comes out; the controller executes the directives
//! and folds their results back in through the `*_resolved` methods. Every
//! deadline is derived from injected timestamps, so the whole lifecycle is
//! testable with a fixed clock.

use chrono::{DateTime, Duration, Utc};

use exam_core::model::{
    Availability, Escalation, ExamManifest, ExamSession, LifecycleState, QuestionId,
    StudentIdentity, ViolationKind,
};
use exam_core::policy::SessionPolicy;
use exam_core::timer::{ConnectionQuality, TimerCorrection, TimerReconciler};
use storage::repository::{ProgressSnapshot, SubmissionReceipt};

use crate::backend::{
    HeartbeatReply, ProgressSummary, RemoteSessionStatus, SessionOutcome, StartedSession,
};
use crate::error::StartError;
use crate::session::cache::WriteCoalescer;
use crate::session::events::{
    Directive, RecoveryAction, SessionEvent, SessionNotice, SubmissionTrigger,
};
use crate::session::gate::SubmissionGate;
use crate::session::plan::attempt_question_order;
use crate::session::view::SessionOverview;

//
// ─── STEP ──────────────────────────────────────────────────────────────────────
//

/// One turn of the machine: what to tell the student and what to execute.
#[derive(Debug, Default)]
pub struct Step {
    pub notices: Vec<SessionNotice>,
    pub directives: Vec<Directive>,
}

/// How an in-flight submission ended, reported back by the controller.
#[derive(Debug, Clone)]
pub enum SubmissionResolution {
    Accepted { receipt: SubmissionReceipt },
    /// The grading service was unreachable; the payload is parked in the
    /// pending queue for background replay.
    Failed,
}

//
// ─── MACHINE ───────────────────────────────────────────────────────────────────
//

/// Drives one attempt from start to a terminal state.
#[derive(Debug, Clone)]
pub struct SessionMachine {
    session: ExamSession,
    manifest: ExamManifest,
    policy: SessionPolicy,
    timer: Option<TimerReconciler>,
    question_order: Vec<QuestionId>,
    gate: SubmissionGate,
    coalescer: WriteCoalescer,
    online: bool,
    grace_deadline: Option<DateTime<Utc>>,
    blur_until: Option<DateTime<Utc>>,
    next_heartbeat_at: Option<DateTime<Utc>>,
    last_activity_at: Option<DateTime<Utc>>,
    idle_warned: bool,
    submission_trigger: Option<SubmissionTrigger>,
}

impl SessionMachine {
    /// Machine for a brand-new attempt. The countdown is seeded when
    /// [`SessionMachine::start`] stamps the start time.
    #[must_use]
    pub fn new(manifest: ExamManifest, identity: StudentIdentity, policy: SessionPolicy) -> Self {
        let session = ExamSession::new(manifest.exam_id().clone(), identity);
        let question_order = attempt_question_order(&manifest, session.session_id());
        Self {
            session,
            manifest,
            policy,
            timer: None,
            question_order,
            gate: SubmissionGate::default(),
            coalescer: WriteCoalescer::new(policy.remote_flush_debounce_secs()),
            online: true,
            grace_deadline: None,
            blur_until: None,
            next_heartbeat_at: None,
            last_activity_at: None,
            idle_warned: false,
            submission_trigger: None,
        }
    }

    /// Machine for a restored attempt.
    ///
    /// The countdown resumes from the snapshot's reading (falling back to
    /// the manifest limit) and remote flushes hold off for the restore
    /// quiet window, so the just-restored copy cannot clobber a fresher
    /// remote one before the backend has had a chance to correct us.
    #[must_use]
    pub fn resumed(
        manifest: ExamManifest,
        session: ExamSession,
        time_remaining_seconds: Option<u32>,
        policy: SessionPolicy,
        now: DateTime<Utc>,
    ) -> Self {
        let question_order = attempt_question_order(&manifest, session.session_id());
        let timer = time_remaining_seconds
            .or(manifest.time_limit_seconds())
            .map(|secs| TimerReconciler::seeded(secs, policy.timer(), now));
        let mut coalescer = WriteCoalescer::new(policy.remote_flush_debounce_secs())
            .with_quiet_until(now + Duration::seconds(policy.restore_quiet_secs()));
        // one reconciling flush once the quiet window passes
        coalescer.note_mutation(now);
        Self {
            session,
            manifest,
            policy,
            timer,
            question_order,
            gate: SubmissionGate::default(),
            coalescer,
            online: true,
            grace_deadline: None,
            blur_until: None,
            next_heartbeat_at: None,
            last_activity_at: None,
            idle_warned: false,
            submission_trigger: None,
        }
    }

    /// Brings the attempt live: availability checks, start stamp for fresh
    /// attempts, countdown seed, heartbeat schedule.
    ///
    /// # Errors
    ///
    /// Returns `StartError` when the exam is deactivated, outside its
    /// window, or this machine was already started.
    pub fn start(&mut self, now: DateTime<Utc>) -> Result<Step, StartError> {
        if self.next_heartbeat_at.is_some() || self.session.state().is_terminal() {
            return Err(StartError::AlreadyStarted);
        }
        if !self.manifest.is_active() {
            return Err(StartError::Deactivated);
        }
        match self.manifest.window().status(now) {
            Availability::NotYetOpen { opens_at } => {
                return Err(StartError::NotYetOpen { opens_at });
            }
            Availability::Closed { .. } => return Err(StartError::WindowClosed),
            Availability::Open => {}
        }

        if self.session.state() == LifecycleState::NotStarted {
            self.session.begin(now)?;
            if self.timer.is_none() {
                self.timer = self
                    .manifest
                    .time_limit_seconds()
                    .map(|limit| TimerReconciler::seeded(limit, self.policy.timer(), now));
            }
        }
        self.last_activity_at = Some(now);
        self.next_heartbeat_at =
            Some(now + Duration::seconds(self.policy.heartbeat_interval_secs()));

        Ok(Step {
            notices: Vec::new(),
            directives: vec![Directive::PersistLocal, Directive::EstablishRemote],
        })
    }

    /// Feeds one event through the machine.
    ///
    /// Terminal attempts ignore everything; a late tick or a buffered
    /// keystroke cannot disturb a submitted exam.
    #[must_use]
    pub fn handle(&mut self, event: SessionEvent, now: DateTime<Utc>) -> Step {
        let mut step = Step::default();
        if self.session.state().is_terminal() {
            return step;
        }

        match event {
            SessionEvent::AnswerChanged { question_id, value } => {
                self.session.set_answer(question_id, value);
                self.note_student_activity(now, &mut step);
            }
            SessionEvent::AnswerCleared { question_id } => {
                self.session.clear_answer(&question_id);
                self.note_student_activity(now, &mut step);
            }
            SessionEvent::FlagToggled { question_id } => {
                self.session.toggle_flag(question_id);
                self.note_student_activity(now, &mut step);
            }
            SessionEvent::PositionChanged { position } => {
                if position < self.question_order.len() {
                    self.session.set_position(position);
                    self.note_student_activity(now, &mut step);
                }
            }
            SessionEvent::ScratchpadEdited { text } => {
                self.session.set_scratchpad(text);
                self.note_student_activity(now, &mut step);
            }
            SessionEvent::ConfidenceChanged { question_id, level } => {
                self.session.set_confidence(question_id, level);
                self.note_student_activity(now, &mut step);
            }
            SessionEvent::ViolationDetected { kind, detail } => {
                self.on_violation(kind, detail, now, &mut step);
            }
            SessionEvent::TickElapsed => self.on_tick(now, &mut step),
            SessionEvent::NetworkChanged { online } => self.on_network(online, now, &mut step),
            SessionEvent::SubmitRequested => {
                self.begin_submission(SubmissionTrigger::Student, now, &mut step);
            }
            SessionEvent::AuthoritativeTime { remaining_seconds } => {
                self.apply_server_time(remaining_seconds, now, &mut step);
            }
        }
        step
    }

    /// Step for a host about to lose the page: persist locally and push any
    /// unflushed edits to the remote store without waiting out the debounce.
    #[must_use]
    pub fn prepare_leave(&mut self, now: DateTime<Utc>) -> Step {
        let mut step = Step::default();
        if self.session.state().is_terminal() {
            return step;
        }
        step.directives.push(Directive::PersistLocal);
        if let Some(seq) = self.coalescer.force(now) {
            step.directives.push(Directive::FlushRemote { seq });
        }
        step
    }

    //
    // ─── EVENT HANDLERS ────────────────────────────────────────────────────────
    //

    fn note_student_activity(&mut self, now: DateTime<Utc>, step: &mut Step) {
        self.last_activity_at = Some(now);
        self.idle_warned = false;
        self.coalescer.note_mutation(now);
        step.directives.push(Directive::PersistLocal);
    }

    fn on_violation(
        &mut self,
        kind: ViolationKind,
        detail: Option<String>,
        now: DateTime<Utc>,
        step: &mut Step,
    ) {
        if !matches!(
            self.session.state(),
            LifecycleState::Active | LifecycleState::Grace
        ) {
            return;
        }
        if !kind.is_enforced(self.manifest.settings()) {
            return;
        }

        let max_violations = self.manifest.settings().max_violations();
        let Some(escalation) = self.session.record_violation(kind, detail, now, max_violations)
        else {
            return;
        };
        let count = self.session.violation_count();

        if kind.obscures_content() {
            let until = now + Duration::seconds(self.policy.blur_secs());
            self.blur_until = Some(until);
            step.notices.push(SessionNotice::ContentObscured { until });
        }

        self.coalescer.note_mutation(now);
        step.directives.push(Directive::PersistLocal);
        if let Some(record) = self.session.violations().last() {
            step.directives.push(Directive::ReportViolation {
                record: record.clone(),
            });
        }

        match escalation {
            Escalation::Notice { remaining } => {
                step.notices.push(SessionNotice::ViolationWarning {
                    kind,
                    count,
                    remaining,
                });
            }
            Escalation::FinalWarning => {
                step.notices
                    .push(SessionNotice::FinalViolationWarning { kind, count });
            }
            Escalation::ForcedSubmission => {
                step.notices
                    .push(SessionNotice::ViolationLimitReached { count });
                self.begin_submission(SubmissionTrigger::ViolationLimit, now, step);
            }
        }
    }

    fn on_tick(&mut self, now: DateTime<Utc>, step: &mut Step) {
        if self.session.state() == LifecycleState::Active {
            if let Some(timer) = self.timer.as_mut() {
                if timer.tick() == 0 {
                    self.enter_grace(now, step);
                }
            }
        } else if self.session.state() == LifecycleState::Grace {
            if let Some(timer) = self.timer.as_mut() {
                timer.tick();
            }
            if self.grace_deadline.is_some_and(|deadline| now >= deadline) {
                self.begin_submission(SubmissionTrigger::GraceExpired, now, step);
            }
        }

        if self.blur_until.is_some_and(|until| now >= until) {
            self.blur_until = None;
        }

        if matches!(
            self.session.state(),
            LifecycleState::Active | LifecycleState::Grace
        ) && self.online
        {
            if let Some(at) = self.next_heartbeat_at {
                if now >= at {
                    step.directives.push(Directive::SendHeartbeat);
                    self.next_heartbeat_at =
                        Some(now + Duration::seconds(self.policy.heartbeat_interval_secs()));
                }
            }
        }

        if self.online {
            if let Some(seq) = self.coalescer.take_due(now) {
                step.directives.push(Directive::FlushRemote { seq });
            }
        }

        if self.session.state() == LifecycleState::Active && !self.idle_warned {
            if let Some(last) = self.last_activity_at {
                let idle_secs = (now - last).num_seconds();
                if idle_secs >= self.policy.idle_warning_secs() {
                    self.idle_warned = true;
                    step.notices.push(SessionNotice::IdleWarning { idle_secs });
                }
            }
        }
    }

    fn on_network(&mut self, online: bool, now: DateTime<Utc>, step: &mut Step) {
        if online == self.online {
            return;
        }
        self.online = online;

        if online {
            if let Some(timer) = self.timer.as_mut() {
                let deducted = timer.reconnect(now);
                if deducted > 0 {
                    step.notices
                        .push(SessionNotice::OfflineDeduction { seconds: deducted });
                }
                if timer.is_expired() && self.session.state() == LifecycleState::Active {
                    self.enter_grace(now, step);
                }
            }
            step.notices.push(SessionNotice::ConnectionRestored);
            step.directives.push(Directive::EstablishRemote);
            if let Some(seq) = self.coalescer.force(now) {
                step.directives.push(Directive::FlushRemote { seq });
            }
            if self.next_heartbeat_at.is_some() {
                step.directives.push(Directive::SendHeartbeat);
                self.next_heartbeat_at =
                    Some(now + Duration::seconds(self.policy.heartbeat_interval_secs()));
            }
        } else {
            if let Some(timer) = self.timer.as_mut() {
                timer.mark_offline(now);
            }
            step.notices.push(SessionNotice::ConnectionLost);
            step.directives.push(Directive::PersistLocal);
        }
    }

    fn apply_server_time(&mut self, secs: u32, now: DateTime<Utc>, step: &mut Step) {
        let Some(timer) = self.timer.as_mut() else {
            return;
        };
        match timer.apply_authoritative(secs, now) {
            TimerCorrection::Unchanged => {}
            TimerCorrection::Snapped { from_secs, to_secs } => {
                step.notices
                    .push(SessionNotice::TimerCorrected { from_secs, to_secs });
                if to_secs == 0 {
                    if self.session.state() == LifecycleState::Active {
                        self.enter_grace(now, step);
                    }
                } else if self.session.state() == LifecycleState::Grace
                    && self.session.transition_to(LifecycleState::Active).is_ok()
                {
                    // the server says time is left after all
                    self.grace_deadline = None;
                }
            }
        }
    }

    fn enter_grace(&mut self, now: DateTime<Utc>, step: &mut Step) {
        if self.session.transition_to(LifecycleState::Grace).is_ok() {
            let deadline = now + Duration::seconds(self.policy.grace_secs());
            self.grace_deadline = Some(deadline);
            step.notices.push(SessionNotice::GraceStarted { deadline });
            if let Some(seq) = self.coalescer.force(now) {
                step.directives.push(Directive::FlushRemote { seq });
            }
            step.directives.push(Directive::PersistLocal);
        }
    }

    fn begin_submission(
        &mut self,
        trigger: SubmissionTrigger,
        now: DateTime<Utc>,
        step: &mut Step,
    ) {
        if !matches!(
            self.session.state(),
            LifecycleState::Active | LifecycleState::Grace
        ) {
            return;
        }
        if !self.gate.try_acquire() {
            return;
        }
        if self
            .session
            .transition_to(LifecycleState::Submitting)
            .is_err()
        {
            self.gate.release();
            return;
        }

        self.submission_trigger = Some(trigger);
        self.grace_deadline = None;
        if let Some(seq) = self.coalescer.force(now) {
            step.directives.push(Directive::FlushRemote { seq });
        }
        step.directives.push(Directive::PersistLocal);
        step.directives.push(Directive::BeginSubmission { trigger });
    }

    //
    // ─── COMPLETIONS ───────────────────────────────────────────────────────────
    //

    /// Folds the backend's start acknowledgment in. Answers it held for a
    /// resumed attempt fill local gaps (an edit made on this device wins
    /// over the echoed copy), and its remaining-time report is
    /// authoritative.
    #[must_use]
    pub fn remote_started(&mut self, started: &StartedSession, now: DateTime<Utc>) -> Step {
        let mut step = Step::default();
        if self.session.state().is_terminal() {
            return step;
        }
        if let Some(saved) = &started.saved_answers {
            let mut merged = false;
            for (question_id, value) in saved {
                if self.session.answer(question_id).is_none() {
                    self.session.set_answer(question_id.clone(), value.clone());
                    merged = true;
                }
            }
            if merged {
                step.directives.push(Directive::PersistLocal);
            }
        }
        if let Some(secs) = started.time_remaining_seconds {
            self.apply_server_time(secs, now, &mut step);
        }
        step
    }

    /// Folds a heartbeat reply in. `None` means the heartbeat failed;
    /// quality degrades on its own as the last report ages.
    #[must_use]
    pub fn heartbeat_resolved(
        &mut self,
        reply: Option<&HeartbeatReply>,
        now: DateTime<Utc>,
    ) -> Step {
        let mut step = Step::default();
        let Some(reply) = reply else {
            return step;
        };
        if self.session.state().is_terminal() {
            return step;
        }

        if let Some(secs) = reply.time_remaining_seconds {
            self.apply_server_time(secs, now, &mut step);
        }

        if reply.status.is_terminal()
            && matches!(
                self.session.state(),
                LifecycleState::Active | LifecycleState::Grace
            )
        {
            let remote_state = match reply.status {
                RemoteSessionStatus::Submitted => LifecycleState::Submitted,
                _ => LifecycleState::Expired,
            };
            if self.session.transition_to(LifecycleState::Expired).is_ok() {
                self.grace_deadline = None;
                step.notices
                    .push(SessionNotice::SessionEndedElsewhere { state: remote_state });
                step.directives.push(Directive::ClearLocal);
            }
        }
        step
    }

    /// Folds the outcome of a submission attempt in.
    ///
    /// Acceptance is the only path to `Submitted`. Failure parks the
    /// attempt: a student-triggered submission returns to `Active` so the
    /// student keeps working, while an expiry- or violation-triggered one
    /// holds in `Error` until background replay delivers it.
    #[must_use]
    pub fn submission_resolved(
        &mut self,
        resolution: SubmissionResolution,
        _now: DateTime<Utc>,
    ) -> Step {
        let mut step = Step::default();
        if self.session.state() != LifecycleState::Submitting {
            return step;
        }

        match resolution {
            SubmissionResolution::Accepted { receipt } => {
                if self.session.transition_to(LifecycleState::Submitted).is_ok() {
                    self.gate.mark_completed();
                    let outcome = match self.submission_trigger {
                        Some(SubmissionTrigger::GraceExpired) => SessionOutcome::Expired,
                        _ => SessionOutcome::Submitted,
                    };
                    step.notices
                        .push(SessionNotice::SubmissionAccepted { receipt });
                    step.directives.push(Directive::ClearLocal);
                    step.directives.push(Directive::CloseRemote { outcome });
                }
            }
            SubmissionResolution::Failed => {
                if self.session.transition_to(LifecycleState::Error).is_ok() {
                    self.gate.release();
                    step.notices.push(SessionNotice::SubmissionQueued {
                        action: RecoveryAction::AutoRetry,
                    });
                    if self.submission_trigger == Some(SubmissionTrigger::Student) {
                        // back to work; a later submit builds a fresh payload
                        let _ = self.session.transition_to(LifecycleState::Active);
                    }
                    step.directives.push(Directive::PersistLocal);
                }
            }
        }
        step
    }

    /// Folds a remote flush result in; stale sequences are ignored.
    #[must_use]
    pub fn flush_resolved(&mut self, seq: u64, ok: bool, now: DateTime<Utc>) -> Step {
        self.coalescer.complete(seq, ok, now);
        Step::default()
    }

    //
    // ─── SNAPSHOTS AND VIEWS ───────────────────────────────────────────────────
    //

    /// Snapshot of the attempt for either store.
    #[must_use]
    pub fn build_snapshot(&self, now: DateTime<Utc>) -> ProgressSnapshot {
        ProgressSnapshot::capture(
            &self.session,
            self.timer.as_ref().map(TimerReconciler::remaining_secs),
            now,
        )
    }

    /// Compact progress for heartbeats.
    #[must_use]
    pub fn progress_summary(&self, now: DateTime<Utc>) -> ProgressSummary {
        ProgressSummary {
            current_position: self.session.current_position(),
            answered_count: self.session.answered_count(),
            time_remaining_seconds: self.timer.as_ref().map(TimerReconciler::remaining_secs),
            quality: self.quality(now),
        }
    }

    /// Everything a shell needs to render the attempt.
    #[must_use]
    pub fn overview(&self, now: DateTime<Utc>) -> SessionOverview {
        SessionOverview {
            state: self.session.state(),
            time_remaining_seconds: self.timer.as_ref().map(TimerReconciler::remaining_secs),
            total_questions: self.question_order.len(),
            answered_count: self.session.answered_count(),
            flagged_count: self.session.flagged().len(),
            current_position: self.session.current_position(),
            violation_count: self.session.violation_count(),
            quality: self.quality(now),
            content_obscured: self.blur_until.is_some_and(|until| now < until),
            grace_deadline: self.grace_deadline,
        }
    }

    #[must_use]
    pub fn quality(&self, now: DateTime<Utc>) -> ConnectionQuality {
        if !self.online {
            return ConnectionQuality::Offline;
        }
        self.timer
            .as_ref()
            .map_or(ConnectionQuality::Good, |timer| timer.quality(now))
    }

    // Accessors
    #[must_use]
    pub fn session(&self) -> &ExamSession {
        &self.session
    }

    #[must_use]
    pub fn manifest(&self) -> &ExamManifest {
        &self.manifest
    }

    #[must_use]
    pub fn question_order(&self) -> &[QuestionId] {
        &self.question_order
    }

    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.session.state()
    }

    #[must_use]
    pub fn submission_trigger(&self) -> Option<SubmissionTrigger> {
        self.submission_trigger
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
