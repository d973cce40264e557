use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::model::ids::{ExamId, QuestionId};

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ManifestError {
    #[error("exam title cannot be empty")]
    EmptyTitle,

    #[error("exam has no questions")]
    NoQuestions,

    #[error("time limit must be > 0 when set")]
    InvalidTimeLimit,

    #[error("max violations must be > 0")]
    InvalidMaxViolations,

    #[error("availability window closes before it opens")]
    InvalidWindow,
}

//
// ─── PROCTOR SETTINGS ──────────────────────────────────────────────────────────
//

/// Per-exam proctoring configuration.
///
/// Each detection flag gates the violation kind of the same name: a detected
/// event is only counted when its flag is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(clippy::struct_excessive_bools)]
pub struct ProctorSettings {
    detect_tab_switch: bool,
    disable_copy_paste: bool,
    disable_right_click: bool,
    block_shortcuts: bool,
    require_fullscreen: bool,
    block_printing: bool,
    randomize_questions: bool,
    max_violations: u32,
}

impl ProctorSettings {
    /// Creates custom proctor settings.
    ///
    /// # Errors
    ///
    /// Returns `ManifestError::InvalidMaxViolations` if `max_violations` is zero.
    #[allow(clippy::too_many_arguments, clippy::fn_params_excessive_bools)]
    pub fn new(
        detect_tab_switch: bool,
        disable_copy_paste: bool,
        disable_right_click: bool,
        block_shortcuts: bool,
        require_fullscreen: bool,
        block_printing: bool,
        randomize_questions: bool,
        max_violations: u32,
    ) -> Result<Self, ManifestError> {
        if max_violations == 0 {
            return Err(ManifestError::InvalidMaxViolations);
        }

        Ok(Self {
            detect_tab_switch,
            disable_copy_paste,
            disable_right_click,
            block_shortcuts,
            require_fullscreen,
            block_printing,
            randomize_questions,
            max_violations,
        })
    }

    /// All detections off; used for practice exams and as a base to build on.
    #[must_use]
    pub fn relaxed() -> Self {
        Self {
            detect_tab_switch: false,
            disable_copy_paste: false,
            disable_right_click: false,
            block_shortcuts: false,
            require_fullscreen: false,
            block_printing: false,
            randomize_questions: false,
            max_violations: 3,
        }
    }

    /// Every detection on with the default violation budget of 3.
    #[must_use]
    pub fn strict() -> Self {
        Self {
            detect_tab_switch: true,
            disable_copy_paste: true,
            disable_right_click: true,
            block_shortcuts: true,
            require_fullscreen: true,
            block_printing: true,
            randomize_questions: false,
            max_violations: 3,
        }
    }

    #[must_use]
    pub fn with_randomize_questions(mut self, randomize: bool) -> Self {
        self.randomize_questions = randomize;
        self
    }

    /// Override the violation budget.
    ///
    /// # Errors
    ///
    /// Returns `ManifestError::InvalidMaxViolations` if `max_violations` is zero.
    pub fn with_max_violations(mut self, max_violations: u32) -> Result<Self, ManifestError> {
        if max_violations == 0 {
            return Err(ManifestError::InvalidMaxViolations);
        }
        self.max_violations = max_violations;
        Ok(self)
    }

    // Accessors
    #[must_use]
    pub fn detect_tab_switch(&self) -> bool {
        self.detect_tab_switch
    }

    #[must_use]
    pub fn disable_copy_paste(&self) -> bool {
        self.disable_copy_paste
    }

    #[must_use]
    pub fn disable_right_click(&self) -> bool {
        self.disable_right_click
    }

    #[must_use]
    pub fn block_shortcuts(&self) -> bool {
        self.block_shortcuts
    }

    #[must_use]
    pub fn require_fullscreen(&self) -> bool {
        self.require_fullscreen
    }

    #[must_use]
    pub fn block_printing(&self) -> bool {
        self.block_printing
    }

    #[must_use]
    pub fn randomize_questions(&self) -> bool {
        self.randomize_questions
    }

    #[must_use]
    pub fn max_violations(&self) -> u32 {
        self.max_violations
    }
}

//
// ─── AVAILABILITY ──────────────────────────────────────────────────────────────
//

/// Optional open/close bounds for taking the exam.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AvailabilityWindow {
    opens_at: Option<DateTime<Utc>>,
    closes_at: Option<DateTime<Utc>>,
}

/// Where an instant falls relative to an availability window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    NotYetOpen { opens_at: DateTime<Utc> },
    Open,
    Closed { closed_at: DateTime<Utc> },
}

impl AvailabilityWindow {
    /// A window with no bounds; the exam can always be taken.
    #[must_use]
    pub fn always_open() -> Self {
        Self::default()
    }

    /// Creates a bounded window.
    ///
    /// # Errors
    ///
    /// Returns `ManifestError::InvalidWindow` if the window closes before it opens.
    pub fn new(
        opens_at: Option<DateTime<Utc>>,
        closes_at: Option<DateTime<Utc>>,
    ) -> Result<Self, ManifestError> {
        if let (Some(opens), Some(closes)) = (opens_at, closes_at) {
            if closes < opens {
                return Err(ManifestError::InvalidWindow);
            }
        }
        Ok(Self { opens_at, closes_at })
    }

    #[must_use]
    pub fn opens_at(&self) -> Option<DateTime<Utc>> {
        self.opens_at
    }

    #[must_use]
    pub fn closes_at(&self) -> Option<DateTime<Utc>> {
        self.closes_at
    }

    #[must_use]
    pub fn status(&self, now: DateTime<Utc>) -> Availability {
        if let Some(opens_at) = self.opens_at {
            if now < opens_at {
                return Availability::NotYetOpen { opens_at };
            }
        }
        if let Some(closed_at) = self.closes_at {
            if now >= closed_at {
                return Availability::Closed { closed_at };
            }
        }
        Availability::Open
    }

    #[must_use]
    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        matches!(self.status(now), Availability::Open)
    }
}

//
// ─── MANIFEST ──────────────────────────────────────────────────────────────────
//

/// Everything the controller needs to run one exam: identity requirements,
/// question order, timing, and proctoring rules.
///
/// Authoring, question content, and scoring stay on the platform side; the
/// manifest only carries question ids so the controller can track position
/// and key answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExamManifest {
    exam_id: ExamId,
    title: String,
    question_ids: Vec<QuestionId>,
    time_limit_seconds: Option<u32>,
    settings: ProctorSettings,
    window: AvailabilityWindow,
    required_identity_fields: Vec<String>,
    allow_list: Option<Vec<String>>,
    is_active: bool,
}

impl ExamManifest {
    /// Creates a new exam manifest.
    ///
    /// Defaults: always-open window, `name` + `email` required, no allow
    /// list, active.
    ///
    /// # Errors
    ///
    /// Returns `ManifestError` if the title is blank, there are no
    /// questions, or a zero time limit is given.
    pub fn new(
        exam_id: ExamId,
        title: impl Into<String>,
        question_ids: Vec<QuestionId>,
        time_limit_seconds: Option<u32>,
        settings: ProctorSettings,
    ) -> Result<Self, ManifestError> {
        let title = title.into();
        if title.trim().is_empty() {
            return Err(ManifestError::EmptyTitle);
        }
        if question_ids.is_empty() {
            return Err(ManifestError::NoQuestions);
        }
        if time_limit_seconds == Some(0) {
            return Err(ManifestError::InvalidTimeLimit);
        }

        Ok(Self {
            exam_id,
            title: title.trim().to_owned(),
            question_ids,
            time_limit_seconds,
            settings,
            window: AvailabilityWindow::always_open(),
            required_identity_fields: vec!["name".to_string(), "email".to_string()],
            allow_list: None,
            is_active: true,
        })
    }

    #[must_use]
    pub fn with_window(mut self, window: AvailabilityWindow) -> Self {
        self.window = window;
        self
    }

    #[must_use]
    pub fn with_required_identity_fields(mut self, fields: Vec<String>) -> Self {
        self.required_identity_fields = fields;
        self
    }

    /// Restrict the exam to the given student emails.
    #[must_use]
    pub fn with_allow_list(mut self, emails: Vec<String>) -> Self {
        self.allow_list = Some(emails);
        self
    }

    /// Deactivated exams reject new and resumed attempts outright.
    #[must_use]
    pub fn with_active(mut self, is_active: bool) -> Self {
        self.is_active = is_active;
        self
    }

    // Accessors
    #[must_use]
    pub fn exam_id(&self) -> &ExamId {
        &self.exam_id
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    #[must_use]
    pub fn question_ids(&self) -> &[QuestionId] {
        &self.question_ids
    }

    #[must_use]
    pub fn question_count(&self) -> usize {
        self.question_ids.len()
    }

    #[must_use]
    pub fn time_limit_seconds(&self) -> Option<u32> {
        self.time_limit_seconds
    }

    #[must_use]
    pub fn settings(&self) -> &ProctorSettings {
        &self.settings
    }

    #[must_use]
    pub fn window(&self) -> &AvailabilityWindow {
        &self.window
    }

    #[must_use]
    pub fn required_identity_fields(&self) -> &[String] {
        &self.required_identity_fields
    }

    #[must_use]
    pub fn allow_list(&self) -> Option<&[String]> {
        self.allow_list.as_deref()
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.is_active
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
