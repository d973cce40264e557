//! Background replay of submissions that missed the grading service.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use exam_core::Clock;
use storage::repository::{PendingSubmissionStore, ProgressStore, SubmissionMarkStore};

use crate::backend::{GradingClient, GradingRequest};
use crate::error::SyncError;

/// What one replay pass accomplished.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub attempted: usize,
    pub delivered: usize,
    pub remaining: usize,
}

/// Replays queued submissions until the grading service accepts them.
///
/// Hosts run [`SubmissionRetryService::sync_once`] on their own schedule,
/// typically every [`SubmissionRetryService::interval_secs`] and once right
/// after connectivity returns.
#[derive(Clone)]
pub struct SubmissionRetryService {
    clock: Clock,
    grading: Arc<dyn GradingClient>,
    pending: Arc<dyn PendingSubmissionStore>,
    marks: Arc<dyn SubmissionMarkStore>,
    progress: Arc<dyn ProgressStore>,
    interval_secs: i64,
}

impl fmt::Debug for SubmissionRetryService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubmissionRetryService")
            .field("interval_secs", &self.interval_secs)
            .finish_non_exhaustive()
    }
}

impl SubmissionRetryService {
    #[must_use]
    pub fn new(
        clock: Clock,
        grading: Arc<dyn GradingClient>,
        pending: Arc<dyn PendingSubmissionStore>,
        marks: Arc<dyn SubmissionMarkStore>,
        progress: Arc<dyn ProgressStore>,
        interval_secs: i64,
    ) -> Self {
        Self {
            clock,
            grading,
            pending,
            marks,
            progress,
            interval_secs,
        }
    }

    /// Suggested pause between passes.
    #[must_use]
    pub fn interval_secs(&self) -> i64 {
        self.interval_secs
    }

    /// Attempts every queued submission once, oldest first.
    ///
    /// Delivered entries are marked submitted, their local progress is
    /// cleared, and they leave the queue. Unreachable entries stay for the
    /// next pass; entries that no longer deserialize are dropped.
    ///
    /// # Errors
    ///
    /// Returns `SyncError` when the queue itself cannot be read or written.
    pub async fn sync_once(&self) -> Result<SyncReport, SyncError> {
        let entries = self.pending.list().await?;
        let mut report = SyncReport {
            attempted: entries.len(),
            ..SyncReport::default()
        };

        for (id, entry) in entries {
            let request: GradingRequest = match serde_json::from_value(entry.payload.clone()) {
                Ok(request) => request,
                Err(e) => {
                    warn!(id, "dropping queued submission that no longer parses: {e}");
                    self.pending.remove(id).await?;
                    continue;
                }
            };

            match self.grading.submit(&request).await {
                Ok(outcome) => {
                    let receipt = outcome.into_receipt(self.clock.now());
                    self.marks
                        .mark_submitted(&entry.exam_id, &entry.student_key, &receipt)
                        .await?;
                    if let Err(e) = self
                        .progress
                        .clear(&entry.exam_id, &entry.student_key)
                        .await
                    {
                        warn!("failed to clear progress after replay: {e}");
                    }
                    self.pending.remove(id).await?;
                    report.delivered += 1;
                }
                Err(e) => {
                    debug!(id, "queued submission still undeliverable: {e}");
                }
            }
        }

        report.remaining = self.pending.list().await?.len();
        Ok(report)
    }
}
