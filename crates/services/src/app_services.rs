use std::sync::Arc;

use exam_core::model::{BackendConfig, ExamManifest, IdentityDraft};
use exam_core::policy::SessionPolicy;
use storage::repository::{ProgressStore, Storage};

use crate::Clock;
use crate::backend::{
    GradingClient, HttpGradingClient, HttpProgressStore, HttpSessionBackend, SessionBackend,
};
use crate::error::{ExamServicesError, StartError};
use crate::session::{ExamSessionController, OpenedSession, SubmissionRetryService};

/// Assembles the stores and backend clients a host shell needs to run
/// proctored attempts.
#[derive(Clone)]
pub struct ExamServices {
    clock: Clock,
    policy: SessionPolicy,
    storage: Storage,
    remote_progress: Arc<dyn ProgressStore>,
    sessions: Arc<dyn SessionBackend>,
    grading: Arc<dyn GradingClient>,
}

impl ExamServices {
    /// Wire services from explicit parts, e.g. in-memory stores and fake
    /// backends in tests.
    #[must_use]
    pub fn new(
        clock: Clock,
        storage: Storage,
        remote_progress: Arc<dyn ProgressStore>,
        sessions: Arc<dyn SessionBackend>,
        grading: Arc<dyn GradingClient>,
    ) -> Self {
        Self {
            clock,
            policy: SessionPolicy::default(),
            storage,
            remote_progress,
            sessions,
            grading,
        }
    }

    /// Build services backed by `SQLite` storage and HTTP backend clients.
    ///
    /// # Errors
    ///
    /// Returns `ExamServicesError` if storage initialization fails.
    pub async fn new_sqlite(
        db_url: &str,
        clock: Clock,
        config: BackendConfig,
    ) -> Result<Self, ExamServicesError> {
        let storage = Storage::sqlite(db_url).await?;
        let sessions: Arc<dyn SessionBackend> =
            Arc::new(HttpSessionBackend::new(config.clone()));
        let grading: Arc<dyn GradingClient> = Arc::new(HttpGradingClient::new(config.clone()));
        let remote_progress: Arc<dyn ProgressStore> = Arc::new(HttpProgressStore::new(config));

        Ok(Self {
            clock,
            policy: SessionPolicy::default(),
            storage,
            remote_progress,
            sessions,
            grading,
        })
    }

    #[must_use]
    pub fn with_policy(mut self, policy: SessionPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Resolve how a student enters an exam and hand back a controller when
    /// there is an attempt to run.
    ///
    /// # Errors
    ///
    /// Returns `StartError` when identity validation fails or durable
    /// submission marks cannot be read.
    pub async fn open_session(
        &self,
        manifest: ExamManifest,
        draft: IdentityDraft,
    ) -> Result<OpenedSession, StartError> {
        ExamSessionController::open(
            self.clock,
            self.policy,
            manifest,
            draft,
            self.storage.clone(),
            Arc::clone(&self.remote_progress),
            Arc::clone(&self.sessions),
            Arc::clone(&self.grading),
        )
        .await
    }

    /// Replay service for submissions parked while the grading service was
    /// unreachable.
    #[must_use]
    pub fn retry_service(&self) -> SubmissionRetryService {
        SubmissionRetryService::new(
            self.clock,
            Arc::clone(&self.grading),
            Arc::clone(&self.storage.pending),
            Arc::clone(&self.storage.marks),
            Arc::clone(&self.storage.progress),
            self.policy.retry_interval_secs(),
        )
    }

    #[must_use]
    pub fn clock(&self) -> Clock {
        self.clock
    }

    #[must_use]
    pub fn policy(&self) -> SessionPolicy {
        self.policy
    }

    #[must_use]
    pub fn storage(&self) -> &Storage {
        &self.storage
    }
}
