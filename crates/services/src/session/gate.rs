/// Single-flight latch for submission.
///
/// The latch is taken synchronously before any submission work is awaited,
/// so a second trigger arriving mid-flight (double click, grace expiry
/// racing a manual submit) finds it closed and becomes a no-op.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubmissionGate {
    latched: bool,
    completed: bool,
}

impl SubmissionGate {
    /// Try to take the gate. Returns `false` when a submission is already
    /// in flight or has already completed.
    pub fn try_acquire(&mut self) -> bool {
        if self.latched || self.completed {
            return false;
        }
        self.latched = true;
        true
    }

    /// Close the gate forever; the attempt is submitted.
    pub fn mark_completed(&mut self) {
        self.latched = false;
        self.completed = true;
    }

    /// Reopen the gate after a failed attempt so a retry can take it.
    pub fn release(&mut self) {
        self.latched = false;
    }

    #[must_use]
    pub fn in_flight(&self) -> bool {
        self.latched
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.completed
    }
}
