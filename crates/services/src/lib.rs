#![forbid(unsafe_code)]

pub mod app_services;
pub mod backend;
pub mod error;
pub mod session;

pub use exam_core::Clock;

pub use app_services::ExamServices;
pub use error::{BackendError, ControllerError, ExamServicesError, StartError, SyncError};

pub use session::{
    ExamSessionController, OpenedSession, SessionEvent, SessionNotice, SessionOverview,
    SubmissionRetryService, SyncReport,
};
