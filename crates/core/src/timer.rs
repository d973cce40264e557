use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

//
// ─── CONNECTION QUALITY ────────────────────────────────────────────────────────
//

/// How trustworthy the displayed countdown currently is.
///
/// Quality degrades with the age of the last authoritative time report, and
/// `Offline` overrides staleness entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionQuality {
    Good,
    Fair,
    Poor,
    Offline,
}

impl ConnectionQuality {
    #[must_use]
    pub fn is_offline(&self) -> bool {
        matches!(self, Self::Offline)
    }
}

//
// ─── POLICY ────────────────────────────────────────────────────────────────────
//

/// Tuning knobs for timer reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerPolicy {
    correction_threshold_secs: u32,
    fair_after_secs: i64,
    poor_after_secs: i64,
}

impl Default for TimerPolicy {
    fn default() -> Self {
        Self {
            correction_threshold_secs: 3,
            fair_after_secs: 30,
            poor_after_secs: 60,
        }
    }
}

impl TimerPolicy {
    /// Disparity beyond which a server report replaces the local countdown.
    /// A disparity of exactly the threshold does not snap.
    #[must_use]
    pub fn with_correction_threshold_secs(mut self, secs: u32) -> Self {
        self.correction_threshold_secs = secs;
        self
    }

    #[must_use]
    pub fn with_fair_after_secs(mut self, secs: i64) -> Self {
        self.fair_after_secs = secs;
        self
    }

    #[must_use]
    pub fn with_poor_after_secs(mut self, secs: i64) -> Self {
        self.poor_after_secs = secs;
        self
    }

    #[must_use]
    pub fn correction_threshold_secs(&self) -> u32 {
        self.correction_threshold_secs
    }

    #[must_use]
    pub fn fair_after_secs(&self) -> i64 {
        self.fair_after_secs
    }

    #[must_use]
    pub fn poor_after_secs(&self) -> i64 {
        self.poor_after_secs
    }
}

//
// ─── RECONCILER ────────────────────────────────────────────────────────────────
//

/// Result of folding an authoritative server time into the local countdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerCorrection {
    /// Local and server time agreed within the threshold; small drift is
    /// tolerated to avoid a jittery display.
    Unchanged,
    /// The local countdown was replaced by the server's value.
    Snapped { from_secs: u32, to_secs: u32 },
}

impl TimerCorrection {
    #[must_use]
    pub fn is_snap(&self) -> bool {
        matches!(self, Self::Snapped { .. })
    }
}

/// Local countdown that yields to server-reported time.
///
/// The countdown keeps ticking while offline. Ticks observed during the
/// outage are remembered so that reconnecting deducts only the offline
/// wall-clock time that the local countdown did not already cover; elapsed
/// exam time is never forgiven by a dropped connection, and never deducted
/// twice either.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerReconciler {
    remaining_secs: u32,
    last_authoritative_secs: Option<u32>,
    last_authoritative_at: Option<DateTime<Utc>>,
    went_offline_at: Option<DateTime<Utc>>,
    offline_ticks: u32,
    policy: TimerPolicy,
}

impl TimerReconciler {
    /// Starts a countdown from `initial_secs`, treating the seed itself as
    /// an authoritative report at `now`.
    #[must_use]
    pub fn seeded(initial_secs: u32, policy: TimerPolicy, now: DateTime<Utc>) -> Self {
        Self {
            remaining_secs: initial_secs,
            last_authoritative_secs: Some(initial_secs),
            last_authoritative_at: Some(now),
            went_offline_at: None,
            offline_ticks: 0,
            policy,
        }
    }

    /// Advances the countdown by one second; saturates at zero.
    pub fn tick(&mut self) -> u32 {
        self.remaining_secs = self.remaining_secs.saturating_sub(1);
        if self.went_offline_at.is_some() {
            self.offline_ticks = self.offline_ticks.saturating_add(1);
        }
        self.remaining_secs
    }

    #[must_use]
    pub fn remaining_secs(&self) -> u32 {
        self.remaining_secs
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.remaining_secs == 0
    }

    /// Folds a server-reported remaining time into the countdown.
    ///
    /// The report is always recorded for quality tracking; the countdown
    /// only snaps when the disparity exceeds the policy threshold.
    pub fn apply_authoritative(&mut self, secs: u32, now: DateTime<Utc>) -> TimerCorrection {
        self.last_authoritative_secs = Some(secs);
        self.last_authoritative_at = Some(now);

        if self.remaining_secs.abs_diff(secs) > self.policy.correction_threshold_secs {
            let from_secs = self.remaining_secs;
            self.remaining_secs = secs;
            TimerCorrection::Snapped {
                from_secs,
                to_secs: secs,
            }
        } else {
            TimerCorrection::Unchanged
        }
    }

    /// Notes the start of an outage. Repeated calls keep the earliest
    /// timestamp so overlapping reports cannot shrink the outage.
    pub fn mark_offline(&mut self, now: DateTime<Utc>) {
        self.went_offline_at.get_or_insert(now);
    }

    /// Ends the outage and charges the countdown for any offline wall-clock
    /// time its own ticks did not already cover. Returns the seconds
    /// deducted.
    pub fn reconnect(&mut self, now: DateTime<Utc>) -> u32 {
        let Some(since) = self.went_offline_at.take() else {
            return 0;
        };

        let wall_secs = u32::try_from((now - since).num_seconds().max(0)).unwrap_or(u32::MAX);
        let uncovered = wall_secs.saturating_sub(self.offline_ticks);
        let deducted = uncovered.min(self.remaining_secs);

        self.remaining_secs -= deducted;
        self.offline_ticks = 0;
        deducted
    }

    #[must_use]
    pub fn is_offline(&self) -> bool {
        self.went_offline_at.is_some()
    }

    /// Quality of the countdown at `now`, from outage state and the age of
    /// the last authoritative report.
    #[must_use]
    pub fn quality(&self, now: DateTime<Utc>) -> ConnectionQuality {
        if self.is_offline() {
            return ConnectionQuality::Offline;
        }
        let Some(at) = self.last_authoritative_at else {
            return ConnectionQuality::Poor;
        };

        let age_secs = (now - at).num_seconds();
        if age_secs > self.policy.poor_after_secs {
            ConnectionQuality::Poor
        } else if age_secs > self.policy.fair_after_secs {
            ConnectionQuality::Fair
        } else {
            ConnectionQuality::Good
        }
    }

    #[must_use]
    pub fn last_authoritative_secs(&self) -> Option<u32> {
        self.last_authoritative_secs
    }

    #[must_use]
    pub fn policy(&self) -> &TimerPolicy {
        &self.policy
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;
    use chrono::Duration;

    fn reconciler(initial: u32) -> TimerReconciler {
        TimerReconciler::seeded(initial, TimerPolicy::default(), fixed_now())
    }

    #[test]
    fn tick_saturates_at_zero() {
        let mut timer = reconciler(2);
        assert_eq!(timer.tick(), 1);
        assert_eq!(timer.tick(), 0);
        assert_eq!(timer.tick(), 0);
        assert!(timer.is_expired());
    }

    #[test]
    fn large_disparity_snaps_to_server_time() {
        let mut timer = reconciler(300);
        let correction = timer.apply_authoritative(270, fixed_now());
        assert_eq!(
            correction,
            TimerCorrection::Snapped {
                from_secs: 300,
                to_secs: 270,
            }
        );
        assert_eq!(timer.remaining_secs(), 270);
    }

    #[test]
    fn small_disparity_is_tolerated() {
        let mut timer = reconciler(300);
        assert_eq!(timer.apply_authoritative(298, fixed_now()), TimerCorrection::Unchanged);
        assert_eq!(timer.remaining_secs(), 300);

        // exactly the threshold still does not snap
        assert_eq!(timer.apply_authoritative(297, fixed_now()), TimerCorrection::Unchanged);
        assert_eq!(timer.remaining_secs(), 300);

        assert!(timer.apply_authoritative(296, fixed_now()).is_snap());
        assert_eq!(timer.remaining_secs(), 296);
    }

    #[test]
    fn reconnect_charges_outage_time_not_covered_by_ticks() {
        // 120s remaining, 45s outage with no ticks delivered in between
        let mut timer = reconciler(120);
        let start = fixed_now();
        timer.mark_offline(start);

        let deducted = timer.reconnect(start + Duration::seconds(45));
        assert_eq!(deducted, 45);
        assert_eq!(timer.remaining_secs(), 75);
        assert!(!timer.is_offline());
    }

    #[test]
    fn reconnect_deducts_nothing_when_ticks_kept_up() {
        let mut timer = reconciler(120);
        let start = fixed_now();
        timer.mark_offline(start);
        for _ in 0..45 {
            timer.tick();
        }
        assert_eq!(timer.remaining_secs(), 75);

        let deducted = timer.reconnect(start + Duration::seconds(45));
        assert_eq!(deducted, 0);
        assert_eq!(timer.remaining_secs(), 75);
    }

    #[test]
    fn reconnect_deducts_only_the_uncovered_portion() {
        let mut timer = reconciler(120);
        let start = fixed_now();
        timer.mark_offline(start);
        for _ in 0..20 {
            timer.tick();
        }

        let deducted = timer.reconnect(start + Duration::seconds(45));
        assert_eq!(deducted, 25);
        assert_eq!(timer.remaining_secs(), 75);
    }

    #[test]
    fn reconnect_never_underflows_remaining() {
        let mut timer = reconciler(10);
        let start = fixed_now();
        timer.mark_offline(start);

        let deducted = timer.reconnect(start + Duration::seconds(600));
        assert_eq!(deducted, 10);
        assert_eq!(timer.remaining_secs(), 0);
    }

    #[test]
    fn mark_offline_keeps_earliest_timestamp() {
        let mut timer = reconciler(120);
        let start = fixed_now();
        timer.mark_offline(start);
        timer.mark_offline(start + Duration::seconds(30));

        let deducted = timer.reconnect(start + Duration::seconds(45));
        assert_eq!(deducted, 45);
    }

    #[test]
    fn quality_degrades_with_report_age() {
        let timer = reconciler(120);
        let seeded_at = fixed_now();

        assert_eq!(timer.quality(seeded_at + Duration::seconds(10)), ConnectionQuality::Good);
        assert_eq!(timer.quality(seeded_at + Duration::seconds(31)), ConnectionQuality::Fair);
        assert_eq!(timer.quality(seeded_at + Duration::seconds(61)), ConnectionQuality::Poor);
    }

    #[test]
    fn offline_dominates_quality() {
        let mut timer = reconciler(120);
        timer.mark_offline(fixed_now());
        assert_eq!(timer.quality(fixed_now()), ConnectionQuality::Offline);
        assert!(timer.quality(fixed_now()).is_offline());

        timer.reconnect(fixed_now() + Duration::seconds(1));
        assert_ne!(timer.quality(fixed_now() + Duration::seconds(2)), ConnectionQuality::Offline);
    }
}
