use chrono::{DateTime, Utc};

use exam_core::model::LifecycleState;
use exam_core::timer::ConnectionQuality;

/// Presentation-agnostic snapshot of a running attempt.
///
/// This is intentionally **not** a UI view-model: no pre-formatted strings
/// and no localization assumptions. A shell renders the countdown, progress
/// bar, and connection badge from these raw values as it sees fit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOverview {
    pub state: LifecycleState,
    pub time_remaining_seconds: Option<u32>,

    pub total_questions: usize,
    pub answered_count: usize,
    pub flagged_count: usize,
    pub current_position: usize,

    pub violation_count: u32,
    pub quality: ConnectionQuality,
    /// True while answers should be hidden after a copy or print attempt.
    pub content_obscured: bool,
    pub grace_deadline: Option<DateTime<Utc>>,
}
