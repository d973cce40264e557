use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::exam::ProctorSettings;

//
// ─── VIOLATION KINDS ───────────────────────────────────────────────────────────
//

/// A category of proctoring event the harness can detect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    TabSwitch,
    CopyAttempt,
    PasteAttempt,
    RightClick,
    ForbiddenShortcut,
    FullscreenExit,
    PrintAttempt,
}

impl ViolationKind {
    /// Whether this kind counts against the violation budget under the
    /// given settings. Detections for disabled rules are dropped silently.
    #[must_use]
    pub fn is_enforced(&self, settings: &ProctorSettings) -> bool {
        match self {
            Self::TabSwitch => settings.detect_tab_switch(),
            Self::CopyAttempt | Self::PasteAttempt => settings.disable_copy_paste(),
            Self::RightClick => settings.disable_right_click(),
            Self::ForbiddenShortcut => settings.block_shortcuts(),
            Self::FullscreenExit => settings.require_fullscreen(),
            Self::PrintAttempt => settings.block_printing(),
        }
    }

    /// Kinds that should briefly blur exam content when they fire, so the
    /// student cannot harvest text through the attempted action.
    #[must_use]
    pub fn obscures_content(&self) -> bool {
        matches!(
            self,
            Self::CopyAttempt | Self::PasteAttempt | Self::ForbiddenShortcut | Self::PrintAttempt
        )
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TabSwitch => "tab_switch",
            Self::CopyAttempt => "copy_attempt",
            Self::PasteAttempt => "paste_attempt",
            Self::RightClick => "right_click",
            Self::ForbiddenShortcut => "forbidden_shortcut",
            Self::FullscreenExit => "fullscreen_exit",
            Self::PrintAttempt => "print_attempt",
        }
    }
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

//
// ─── RECORDS ───────────────────────────────────────────────────────────────────
//

/// One counted proctoring event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViolationRecord {
    pub kind: ViolationKind,
    pub detail: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl ViolationRecord {
    #[must_use]
    pub fn new(kind: ViolationKind, detail: Option<String>, occurred_at: DateTime<Utc>) -> Self {
        Self {
            kind,
            detail,
            occurred_at,
        }
    }
}

//
// ─── ESCALATION ────────────────────────────────────────────────────────────────
//

/// The consequence of a counted violation, derived from how much budget is
/// left afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Escalation {
    /// Budget remains; the student is told how many chances are left.
    Notice { remaining: u32 },
    /// Exactly one chance left.
    FinalWarning,
    /// Budget exhausted; the attempt must be submitted.
    ForcedSubmission,
}

impl Escalation {
    /// Escalation for a running count against a budget of `max_violations`.
    #[must_use]
    pub fn for_count(count: u32, max_violations: u32) -> Self {
        match max_violations.saturating_sub(count) {
            0 => Self::ForcedSubmission,
            1 => Self::FinalWarning,
            remaining => Self::Notice { remaining },
        }
    }

    #[must_use]
    pub fn is_forced(&self) -> bool {
        matches!(self, Self::ForcedSubmission)
    }
}

//
// ─── LEDGER ────────────────────────────────────────────────────────────────────
//

/// Append-only list of counted violations for one attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViolationLedger {
    records: Vec<ViolationRecord>,
}

impl ViolationLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds a ledger from persisted records.
    #[must_use]
    pub fn from_records(records: Vec<ViolationRecord>) -> Self {
        Self { records }
    }

    /// Appends a violation and returns the resulting escalation.
    pub fn record(
        &mut self,
        kind: ViolationKind,
        detail: Option<String>,
        occurred_at: DateTime<Utc>,
        max_violations: u32,
    ) -> Escalation {
        self.records
            .push(ViolationRecord::new(kind, detail, occurred_at));
        Escalation::for_count(self.count(), max_violations)
    }

    #[must_use]
    pub fn count(&self) -> u32 {
        u32::try_from(self.records.len()).unwrap_or(u32::MAX)
    }

    #[must_use]
    pub fn records(&self) -> &[ViolationRecord] {
        &self.records
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[must_use]
    pub fn last(&self) -> Option<&ViolationRecord> {
        self.records.last()
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;

    #[test]
    fn enforcement_follows_settings() {
        let relaxed = ProctorSettings::relaxed();
        let strict = ProctorSettings::strict();

        assert!(!ViolationKind::TabSwitch.is_enforced(&relaxed));
        assert!(ViolationKind::TabSwitch.is_enforced(&strict));
        assert!(ViolationKind::CopyAttempt.is_enforced(&strict));
        assert!(ViolationKind::PasteAttempt.is_enforced(&strict));
        assert!(!ViolationKind::PrintAttempt.is_enforced(&relaxed));
    }

    #[test]
    fn content_obscuring_kinds() {
        assert!(ViolationKind::CopyAttempt.obscures_content());
        assert!(ViolationKind::PrintAttempt.obscures_content());
        assert!(!ViolationKind::TabSwitch.obscures_content());
        assert!(!ViolationKind::FullscreenExit.obscures_content());
    }

    #[test]
    fn escalation_ladder_with_budget_of_three() {
        assert_eq!(Escalation::for_count(1, 3), Escalation::Notice { remaining: 2 });
        assert_eq!(Escalation::for_count(2, 3), Escalation::FinalWarning);
        assert_eq!(Escalation::for_count(3, 3), Escalation::ForcedSubmission);
        assert_eq!(Escalation::for_count(4, 3), Escalation::ForcedSubmission);
    }

    #[test]
    fn ledger_counts_and_escalates() {
        let mut ledger = ViolationLedger::new();
        let at = fixed_now();

        let first = ledger.record(ViolationKind::TabSwitch, None, at, 3);
        assert_eq!(first, Escalation::Notice { remaining: 2 });

        let second = ledger.record(
            ViolationKind::CopyAttempt,
            Some("ctrl+c".to_string()),
            at,
            3,
        );
        assert_eq!(second, Escalation::FinalWarning);

        let third = ledger.record(ViolationKind::FullscreenExit, None, at, 3);
        assert!(third.is_forced());
        assert_eq!(ledger.count(), 3);
        assert_eq!(ledger.last().map(|r| r.kind), Some(ViolationKind::FullscreenExit));
    }

    #[test]
    fn kind_serializes_snake_case() {
        let json = serde_json::to_string(&ViolationKind::ForbiddenShortcut).unwrap();
        assert_eq!(json, "\"forbidden_shortcut\"");
        assert_eq!(ViolationKind::ForbiddenShortcut.to_string(), "forbidden_shortcut");
    }
}
