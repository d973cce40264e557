use chrono::{DateTime, Duration, Utc};

/// Debounces remote snapshot writes and orders them with sequence numbers.
///
/// At most one flush is in flight at a time, and each flush carries a
/// sequence minted at launch; a completion that does not match the
/// in-flight sequence is stale and ignored. A snapshot can therefore never
/// be overwritten remotely by an earlier one that finished late.
#[derive(Debug, Clone)]
pub struct WriteCoalescer {
    debounce_secs: i64,
    next_seq: u64,
    dirty_since: Option<DateTime<Utc>>,
    flush_due_at: Option<DateTime<Utc>>,
    in_flight: Option<u64>,
    last_acked: Option<u64>,
    quiet_until: Option<DateTime<Utc>>,
}

impl WriteCoalescer {
    #[must_use]
    pub fn new(debounce_secs: i64) -> Self {
        Self {
            debounce_secs,
            next_seq: 0,
            dirty_since: None,
            flush_due_at: None,
            in_flight: None,
            last_acked: None,
            quiet_until: None,
        }
    }

    /// Hold flushes until `until`, e.g. right after restoring a snapshot so
    /// the fresher copy is not clobbered by a reflex write.
    #[must_use]
    pub fn with_quiet_until(mut self, until: DateTime<Utc>) -> Self {
        self.quiet_until = Some(until);
        self
    }

    /// Note a change that the remote copy does not have yet.
    pub fn note_mutation(&mut self, now: DateTime<Utc>) {
        self.dirty_since.get_or_insert(now);
        let mut due = now + Duration::seconds(self.debounce_secs);
        if let Some(quiet) = self.quiet_until {
            due = due.max(quiet);
        }
        self.flush_due_at = Some(due);
    }

    /// Take a flush if one is due. Mints and returns the sequence the host
    /// must hand back to [`WriteCoalescer::complete`].
    pub fn take_due(&mut self, now: DateTime<Utc>) -> Option<u64> {
        if self.in_flight.is_some() {
            return None;
        }
        let due = self.flush_due_at?;
        if now < due || self.dirty_since.is_none() {
            return None;
        }
        Some(self.launch())
    }

    /// Flush immediately if there are unsent changes, skipping the
    /// debounce. While a flush is in flight this reschedules instead, so
    /// the pending data goes out as soon as the current one completes.
    pub fn force(&mut self, now: DateTime<Utc>) -> Option<u64> {
        self.dirty_since?;
        if self.in_flight.is_some() {
            self.flush_due_at = Some(now);
            return None;
        }
        Some(self.launch())
    }

    /// Fold a flush result back in. Returns `false` for stale completions,
    /// which callers must ignore.
    pub fn complete(&mut self, seq: u64, ok: bool, now: DateTime<Utc>) -> bool {
        if self.in_flight != Some(seq) {
            return false;
        }
        self.in_flight = None;
        if ok {
            self.last_acked = Some(seq);
        } else {
            self.dirty_since.get_or_insert(now);
            self.flush_due_at = Some(now + Duration::seconds(self.debounce_secs));
        }
        true
    }

    fn launch(&mut self) -> u64 {
        self.next_seq += 1;
        self.dirty_since = None;
        self.flush_due_at = None;
        self.in_flight = Some(self.next_seq);
        self.next_seq
    }

    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty_since.is_some()
    }

    #[must_use]
    pub fn in_flight(&self) -> Option<u64> {
        self.in_flight
    }

    #[must_use]
    pub fn last_acked(&self) -> Option<u64> {
        self.last_acked
    }
}
