//! Shared error types for the services crate.

use chrono::{DateTime, Utc};
use thiserror::Error;

use exam_core::model::{IdentityError, SessionStateError};
use storage::repository::StorageError;
use storage::sqlite::SqliteInitError;

/// Errors emitted by the HTTP backend clients.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BackendError {
    #[error("backend rejected the request with status {status}: {message}")]
    Rejected {
        status: reqwest::StatusCode,
        message: String,
    },
    #[error("backend response could not be decoded: {0}")]
    Decode(String),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

/// Errors that prevent an attempt from being opened or started.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StartError {
    #[error("exam opens at {opens_at}")]
    NotYetOpen { opens_at: DateTime<Utc> },
    #[error("exam window has closed")]
    WindowClosed,
    #[error("exam is deactivated")]
    Deactivated,
    #[error("this exam was already submitted")]
    AlreadySubmitted,
    #[error("session was already started")]
    AlreadyStarted,
    #[error(transparent)]
    Identity(#[from] IdentityError),
    #[error(transparent)]
    State(#[from] SessionStateError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted by `ExamSessionController`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ControllerError {
    #[error(transparent)]
    Start(#[from] StartError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted by `SubmissionRetryService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SyncError {
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted while bootstrapping exam services.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ExamServicesError {
    #[error(transparent)]
    Sqlite(#[from] SqliteInitError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}
