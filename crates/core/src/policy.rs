use crate::timer::TimerPolicy;

/// Timing knobs for one proctored session.
///
/// The defaults are the platform's shipped behavior; hosts override
/// individual fields with the `with_*` builders, mostly to shrink waits in
/// tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionPolicy {
    grace_secs: i64,
    remote_flush_debounce_secs: i64,
    restore_quiet_secs: i64,
    heartbeat_interval_secs: i64,
    blur_secs: i64,
    idle_warning_secs: i64,
    retry_interval_secs: i64,
    timer: TimerPolicy,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            grace_secs: 5,
            remote_flush_debounce_secs: 3,
            restore_quiet_secs: 3,
            heartbeat_interval_secs: 10,
            blur_secs: 4,
            idle_warning_secs: 120,
            retry_interval_secs: 60,
            timer: TimerPolicy::default(),
        }
    }
}

impl SessionPolicy {
    /// How long after the timer hits zero unsaved work may still land.
    #[must_use]
    pub fn with_grace_secs(mut self, secs: i64) -> Self {
        self.grace_secs = secs;
        self
    }

    #[must_use]
    pub fn with_remote_flush_debounce_secs(mut self, secs: i64) -> Self {
        self.remote_flush_debounce_secs = secs;
        self
    }

    /// Quiet window after a restore during which remote writes hold off.
    #[must_use]
    pub fn with_restore_quiet_secs(mut self, secs: i64) -> Self {
        self.restore_quiet_secs = secs;
        self
    }

    #[must_use]
    pub fn with_heartbeat_interval_secs(mut self, secs: i64) -> Self {
        self.heartbeat_interval_secs = secs;
        self
    }

    /// How long exam content stays obscured after a capture-style violation.
    #[must_use]
    pub fn with_blur_secs(mut self, secs: i64) -> Self {
        self.blur_secs = secs;
        self
    }

    #[must_use]
    pub fn with_idle_warning_secs(mut self, secs: i64) -> Self {
        self.idle_warning_secs = secs;
        self
    }

    /// Pause between replay attempts for queued submissions.
    #[must_use]
    pub fn with_retry_interval_secs(mut self, secs: i64) -> Self {
        self.retry_interval_secs = secs;
        self
    }

    #[must_use]
    pub fn with_timer(mut self, timer: TimerPolicy) -> Self {
        self.timer = timer;
        self
    }

    #[must_use]
    pub fn grace_secs(&self) -> i64 {
        self.grace_secs
    }

    #[must_use]
    pub fn remote_flush_debounce_secs(&self) -> i64 {
        self.remote_flush_debounce_secs
    }

    #[must_use]
    pub fn restore_quiet_secs(&self) -> i64 {
        self.restore_quiet_secs
    }

    #[must_use]
    pub fn heartbeat_interval_secs(&self) -> i64 {
        self.heartbeat_interval_secs
    }

    #[must_use]
    pub fn blur_secs(&self) -> i64 {
        self.blur_secs
    }

    #[must_use]
    pub fn idle_warning_secs(&self) -> i64 {
        self.idle_warning_secs
    }

    #[must_use]
    pub fn retry_interval_secs(&self) -> i64 {
        self.retry_interval_secs
    }

    #[must_use]
    pub fn timer(&self) -> TimerPolicy {
        self.timer
    }
}
